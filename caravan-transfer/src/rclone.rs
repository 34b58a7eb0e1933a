//! rclone-backed [`TargetTransfer`] implementation.
//!
//! One ephemeral config file per invocation: the target's [`StorageKind`]
//! is rendered into an INI section named `caravan`, written 0600 under the
//! invoker's config dir, passed via `--config`, and removed afterwards.
//! Copy success is exit code 0; the transferred byte count is read from the
//! tool's final `Transferred:` stats line when present.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use caravan_core::types::{StorageKind, StorageTarget};
use caravan_core::CaravanConfig;

use crate::error::{io_err, TransferError};
use crate::invoker::{RemoteEntry, SyncOutcome, TargetTransfer};
use crate::process::{run_captured, ProcessOutcome};

/// Section name used in every ephemeral config file.
const REMOTE_NAME: &str = "caravan";

static CONFIG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Drives the `rclone` binary for copy / list / delete.
pub struct RcloneInvoker {
    binary: String,
    conf_dir: PathBuf,
    list_timeout: Duration,
    delete_timeout: Duration,
}

impl RcloneInvoker {
    pub fn new(config: &CaravanConfig, conf_dir: PathBuf) -> Self {
        Self {
            binary: config.rclone_binary.clone(),
            conf_dir,
            list_timeout: Duration::from_secs(config.list_timeout_secs),
            delete_timeout: Duration::from_secs(config.delete_timeout_secs),
        }
    }

    fn write_config(&self, section: &str) -> Result<PathBuf, TransferError> {
        std::fs::create_dir_all(&self.conf_dir).map_err(|e| io_err(&self.conf_dir, e))?;
        let seq = CONFIG_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = self.conf_dir.join(format!("rclone-{seq}.conf"));
        std::fs::write(&path, section).map_err(|e| io_err(&path, e))?;
        set_config_permissions(&path)?;
        Ok(path)
    }
}

#[async_trait]
impl TargetTransfer for RcloneInvoker {
    async fn copy_to(
        &self,
        target: &StorageTarget,
        artifact: &Path,
        remote_path: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        let section = match render_remote_section(target) {
            Ok(section) => section,
            Err(detail) => return SyncOutcome::ConfigInvalid { detail },
        };
        let conf = match self.write_config(&section) {
            Ok(conf) => conf,
            Err(err) => {
                return SyncOutcome::TransferFailed {
                    detail: err.to_string(),
                }
            }
        };

        let dest = format!("{REMOTE_NAME}:{}/", remote_spec(target, remote_path));
        let args = vec![
            "copy".to_string(),
            artifact.display().to_string(),
            dest,
            "--config".to_string(),
            conf.display().to_string(),
            "--s3-no-check-bucket".to_string(),
            "--stats-one-line".to_string(),
            "--stats".to_string(),
            "1s".to_string(),
            "-v".to_string(),
        ];

        let result = run_captured(&self.binary, &args, timeout, cancel).await;
        let _ = std::fs::remove_file(&conf);

        match result {
            Ok(ProcessOutcome::Completed { code: 0, stdout, stderr }) => {
                let bytes = parse_transferred(&stderr).or_else(|| parse_transferred(&stdout));
                SyncOutcome::Success {
                    bytes_transferred: bytes.unwrap_or(0),
                    size_unknown: bytes.is_none(),
                }
            }
            Ok(ProcessOutcome::Completed { stdout, stderr, .. }) => SyncOutcome::TransferFailed {
                detail: pick_diagnostic(&stderr, &stdout),
            },
            Ok(ProcessOutcome::TimedOut) => SyncOutcome::Timeout,
            Ok(ProcessOutcome::Cancelled) => SyncOutcome::Cancelled,
            Err(err) => SyncOutcome::TransferFailed {
                detail: err.to_string(),
            },
        }
    }

    async fn list_remote(
        &self,
        target: &StorageTarget,
        remote_path: &str,
    ) -> Result<Vec<RemoteEntry>, TransferError> {
        let section = render_remote_section(target)
            .map_err(|detail| TransferError::ConfigInvalid { detail })?;
        let conf = self.write_config(&section)?;

        let args = vec![
            "lsjson".to_string(),
            format!("{REMOTE_NAME}:{}", remote_spec(target, remote_path)),
            "--config".to_string(),
            conf.display().to_string(),
        ];

        let result = run_captured(&self.binary, &args, self.list_timeout, &CancellationToken::new()).await;
        let _ = std::fs::remove_file(&conf);

        match result? {
            ProcessOutcome::Completed { code: 0, stdout, .. } => parse_listing(&stdout),
            ProcessOutcome::Completed { stdout, stderr, .. } => Err(TransferError::Tool {
                detail: pick_diagnostic(&stderr, &stdout),
            }),
            ProcessOutcome::TimedOut => Err(TransferError::ToolTimeout {
                seconds: self.list_timeout.as_secs(),
            }),
            ProcessOutcome::Cancelled => Err(TransferError::Cancelled),
        }
    }

    async fn delete_remote(
        &self,
        target: &StorageTarget,
        remote_path: &str,
        name: &str,
    ) -> Result<(), TransferError> {
        let section = render_remote_section(target)
            .map_err(|detail| TransferError::ConfigInvalid { detail })?;
        let conf = self.write_config(&section)?;

        let args = vec![
            "deletefile".to_string(),
            format!("{REMOTE_NAME}:{}/{name}", remote_spec(target, remote_path)),
            "--config".to_string(),
            conf.display().to_string(),
        ];

        let result =
            run_captured(&self.binary, &args, self.delete_timeout, &CancellationToken::new()).await;
        let _ = std::fs::remove_file(&conf);

        match result? {
            ProcessOutcome::Completed { code: 0, .. } => Ok(()),
            ProcessOutcome::Completed { stdout, stderr, .. } => {
                let detail = pick_diagnostic(&stderr, &stdout);
                if already_gone(&detail) {
                    tracing::info!("delete of missing artifact treated as success: {}", name);
                    return Ok(());
                }
                Err(TransferError::Tool { detail })
            }
            ProcessOutcome::TimedOut => Err(TransferError::ToolTimeout {
                seconds: self.delete_timeout.as_secs(),
            }),
            ProcessOutcome::Cancelled => Err(TransferError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Config rendering
// ---------------------------------------------------------------------------

/// Render the INI section for a target, or a human-readable reason why its
/// configuration is unusable.
pub fn render_remote_section(target: &StorageTarget) -> Result<String, String> {
    let mut lines = vec![format!("[{REMOTE_NAME}]")];

    match &target.kind {
        StorageKind::ObjectStore {
            endpoint,
            region,
            bucket,
            access_key_id,
            secret_access_key,
        } => {
            require(access_key_id, "object-store target needs an access_key_id")?;
            require(secret_access_key, "object-store target needs a secret_access_key")?;
            require(bucket, "object-store target needs a bucket")?;

            lines.push("type = s3".to_string());
            lines.push(format!("access_key_id = {access_key_id}"));
            lines.push(format!("secret_access_key = {secret_access_key}"));
            if !region.is_empty() {
                lines.push(format!("region = {region}"));
            }
            // Provider is inferred from the endpoint, as the storage kinds
            // the operators actually use differ only there.
            let endpoint = endpoint.trim_start_matches("https://").trim_start_matches("http://");
            if endpoint.is_empty() {
                lines.push("provider = AWS".to_string());
            } else if endpoint.contains("r2.cloudflarestorage.com") {
                lines.push("provider = Cloudflare".to_string());
                lines.push(format!("endpoint = {endpoint}"));
                lines.push("force_path_style = true".to_string());
            } else if endpoint.contains("aliyuncs.com") {
                lines.push("provider = Alibaba".to_string());
                lines.push(format!("endpoint = {endpoint}"));
            } else {
                lines.push("provider = Other".to_string());
                lines.push(format!("endpoint = {endpoint}"));
            }
        }
        StorageKind::Sftp {
            host,
            port,
            user,
            password,
            key_file,
        } => {
            require(host, "sftp target needs a host")?;
            require(user, "sftp target needs a user")?;

            lines.push("type = sftp".to_string());
            lines.push(format!("host = {host}"));
            lines.push(format!("user = {user}"));
            lines.push(format!("port = {port}"));
            if let Some(password) = password {
                lines.push(format!("pass = {password}"));
            }
            if let Some(key_file) = key_file {
                lines.push(format!("key_file = {}", key_file.display()));
            }
        }
        StorageKind::Ftp {
            host,
            port,
            user,
            password,
        } => {
            require(host, "ftp target needs a host")?;
            require(user, "ftp target needs a user")?;
            require(password, "ftp target needs a password")?;

            lines.push("type = ftp".to_string());
            lines.push(format!("host = {host}"));
            lines.push(format!("user = {user}"));
            lines.push(format!("pass = {password}"));
            lines.push(format!("port = {port}"));
        }
        StorageKind::WebDav { url, user, password } => {
            require(url, "webdav target needs a url")?;
            require(user, "webdav target needs a user")?;

            lines.push("type = webdav".to_string());
            lines.push(format!("url = {url}"));
            lines.push("vendor = other".to_string());
            lines.push(format!("user = {user}"));
            lines.push(format!("pass = {password}"));
        }
        StorageKind::RawConfig { params } => {
            if params.get("type").map(|t| t.trim().is_empty()).unwrap_or(true) {
                return Err("raw target needs a 'type' parameter".to_string());
            }
            for (key, value) in params {
                lines.push(format!("{key} = {value}"));
            }
        }
    }

    lines.push(String::new());
    Ok(lines.join("\n"))
}

fn require(value: &str, message: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(message.to_string());
    }
    Ok(())
}

/// The remote path as rclone sees it. Object stores address
/// `bucket/remote_path`; everything else addresses `remote_path` directly.
pub fn remote_spec(target: &StorageTarget, remote_path: &str) -> String {
    let path = remote_path.trim_matches('/');
    match &target.kind {
        StorageKind::ObjectStore { bucket, .. } => {
            if path.is_empty() {
                bucket.clone()
            } else {
                format!("{bucket}/{path}")
            }
        }
        _ => path.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Extract the transferred byte count from rclone's stats output.
///
/// Looks for the last line like
/// `Transferred:   1.234 MiB / 1.234 MiB, 100%, 458.3 KiB/s, ETA 0s`
/// and parses the first value. Lines counting files (`Transferred: 1 / 1`)
/// carry no byte unit and are ignored. `None` means the tool reported no
/// usable count — the caller records `size_unknown`, never a guess.
pub fn parse_transferred(output: &str) -> Option<u64> {
    for line in output.lines().rev() {
        let rest = match line.split_once("Transferred:") {
            Some((_, rest)) => rest,
            None => continue,
        };
        let first = rest.split(',').next()?.split('/').next()?.trim();
        if let Some(bytes) = parse_size(first) {
            return Some(bytes);
        }
    }
    None
}

fn parse_size(text: &str) -> Option<u64> {
    let mut parts = text.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let factor: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0_f64.powi(4),
        "PiB" => 1024.0_f64.powi(5),
        _ => return None,
    };
    Some((value * factor).round() as u64)
}

#[derive(Debug, Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ModTime")]
    mod_time: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "Size", default)]
    size: i64,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

fn parse_listing(stdout: &str) -> Result<Vec<RemoteEntry>, TransferError> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(vec![]);
    }
    let entries: Vec<LsJsonEntry> = serde_json::from_str(stdout)?;
    Ok(entries
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| RemoteEntry {
            name: e.name,
            mod_time: e.mod_time,
            size: e.size,
        })
        .collect())
}

fn pick_diagnostic(stderr: &str, stdout: &str) -> String {
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    detail.trim().to_string()
}

fn already_gone(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("not found") || lower.contains("does not exist")
}

#[cfg(unix)]
fn set_config_permissions(path: &Path) -> Result<(), TransferError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_config_permissions(_path: &Path) -> Result<(), TransferError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use caravan_core::types::TargetId;
    use std::collections::BTreeMap;

    fn target(kind: StorageKind) -> StorageTarget {
        StorageTarget {
            id: TargetId::from("t"),
            name: "t".to_string(),
            kind,
        }
    }

    #[test]
    fn object_store_section_infers_provider_from_endpoint() {
        let t = target(StorageKind::ObjectStore {
            endpoint: "https://accid.r2.cloudflarestorage.com".to_string(),
            region: "auto".to_string(),
            bucket: "backups".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
        });
        let section = render_remote_section(&t).expect("render");
        assert!(section.starts_with("[caravan]\n"));
        assert!(section.contains("provider = Cloudflare"));
        assert!(section.contains("endpoint = accid.r2.cloudflarestorage.com"));
        assert!(section.contains("force_path_style = true"));

        let aws = target(StorageKind::ObjectStore {
            endpoint: String::new(),
            region: "us-east-1".to_string(),
            bucket: "b".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
        });
        let section = render_remote_section(&aws).expect("render");
        assert!(section.contains("provider = AWS"));
        assert!(!section.contains("endpoint ="));
    }

    #[test]
    fn object_store_missing_bucket_is_invalid() {
        let t = target(StorageKind::ObjectStore {
            endpoint: String::new(),
            region: String::new(),
            bucket: "  ".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
        });
        let err = render_remote_section(&t).unwrap_err();
        assert!(err.contains("bucket"), "got: {err}");
    }

    #[test]
    fn sftp_section_includes_auth_material_when_present() {
        let t = target(StorageKind::Sftp {
            host: "nas.local".to_string(),
            port: 2222,
            user: "backup".to_string(),
            password: Some("pw".to_string()),
            key_file: None,
        });
        let section = render_remote_section(&t).expect("render");
        assert!(section.contains("type = sftp"));
        assert!(section.contains("port = 2222"));
        assert!(section.contains("pass = pw"));
        assert!(!section.contains("key_file"));
    }

    #[test]
    fn raw_config_requires_a_type_parameter() {
        let missing = target(StorageKind::RawConfig {
            params: BTreeMap::from([("account".to_string(), "a".to_string())]),
        });
        assert!(render_remote_section(&missing).is_err());

        let ok = target(StorageKind::RawConfig {
            params: BTreeMap::from([
                ("type".to_string(), "b2".to_string()),
                ("account".to_string(), "a".to_string()),
            ]),
        });
        let section = render_remote_section(&ok).expect("render");
        assert!(section.contains("type = b2"));
        assert!(section.contains("account = a"));
    }

    #[test]
    fn remote_spec_prefixes_bucket_for_object_stores() {
        let t = target(StorageKind::ObjectStore {
            endpoint: String::new(),
            region: String::new(),
            bucket: "backups".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
        });
        assert_eq!(remote_spec(&t, "/nightly/etc/"), "backups/nightly/etc");

        let t = target(StorageKind::Ftp {
            host: "h".to_string(),
            port: 21,
            user: "u".to_string(),
            password: "p".to_string(),
        });
        assert_eq!(remote_spec(&t, "nightly/etc"), "nightly/etc");
    }

    #[test]
    fn transferred_bytes_parse_from_stats_line() {
        let output = "\
2024/03/10 02:30:01 INFO  : etc.tar.gz: Copied (new)
Transferred:   	    1.234 MiB / 1.234 MiB, 100%, 458.3 KiB/s, ETA 0s
Transferred:            1 / 1, 100%
Elapsed time:         2.8s";
        let bytes = parse_transferred(output).expect("bytes");
        assert_eq!(bytes, (1.234f64 * 1024.0 * 1024.0).round() as u64);
    }

    #[test]
    fn zero_byte_transfer_parses_as_zero_not_unknown() {
        let output = "Transferred:   	         0 B / 0 B, -, 0 B/s, ETA -";
        assert_eq!(parse_transferred(output), Some(0));
    }

    #[test]
    fn stats_without_byte_units_are_ignored() {
        assert_eq!(parse_transferred("Transferred: 3 / 3, 100%"), None);
        assert_eq!(parse_transferred("no stats at all"), None);
    }

    #[test]
    fn listing_parses_and_skips_directories() {
        let stdout = r#"[
            {"Path":"a6.tar.gz","Name":"a6.tar.gz","Size":1024,"ModTime":"2024-03-10T02:30:00Z","IsDir":false},
            {"Path":"old","Name":"old","Size":-1,"ModTime":"2024-01-01T00:00:00Z","IsDir":true}
        ]"#;
        let entries = parse_listing(stdout).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a6.tar.gz");
        assert_eq!(entries[0].size, 1024);
    }

    #[test]
    fn empty_listing_is_an_empty_vec() {
        assert!(parse_listing("").expect("parse").is_empty());
        assert!(parse_listing("[]").expect("parse").is_empty());
    }

    #[test]
    fn missing_remote_file_counts_as_deleted() {
        assert!(already_gone("ERROR : file.tar.gz: object not found"));
        assert!(already_gone("the specified key does not exist"));
        assert!(!already_gone("permission denied"));
    }
}
