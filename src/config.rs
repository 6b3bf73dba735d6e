use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 5000

[auth]
username = "admin"
password = "admin"
session_timeout_mins = 10

[paths]
log_dir = "/var/log"

[upgrade]
upload_path = "/tmp/upgrade/firmware.pkg"
max_upload_mb = 150
"#;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_mins: u64,
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_session_timeout() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: default_password(),
            session_timeout_mins: default_session_timeout(),
        }
    }
}

/// Filesystem roots the host readers look under. Tests point these at fixtures.
#[derive(Deserialize, Clone, Debug)]
pub struct PathsConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,
    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,
    #[serde(default = "default_os_release")]
    pub os_release: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_os_release() -> PathBuf {
    PathBuf::from("/etc/os-release")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            proc_root: default_proc_root(),
            sys_root: default_sys_root(),
            os_release: default_os_release(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct StatusConfig {
    /// Interval between the two CPU usage samples
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
}

fn default_cpu_sample_ms() -> u64 {
    1000
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cpu_sample_ms: default_cpu_sample_ms(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UpgradeConfig {
    #[serde(default = "default_upload_path")]
    pub upload_path: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Program and leading arguments; the upload path is appended
    #[serde(default)]
    pub installer: Option<Vec<String>>,
    /// Prints the bundle status (version, build date, booted slot), e.g. `["rauc", "status"]`
    #[serde(default)]
    pub status_command: Option<Vec<String>>,
    /// Run when an operator asks for a reboot. Without it a reboot is only logged.
    #[serde(default)]
    pub reboot_command: Option<Vec<String>>,
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("/tmp/upgrade/firmware.pkg")
}

fn default_max_upload_mb() -> usize {
    150
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            upload_path: default_upload_path(),
            max_upload_mb: default_max_upload_mb(),
            installer: None,
            status_command: None,
            reboot_command: None,
        }
    }
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        timeout_from_mins(self.auth.session_timeout_mins).ok_or_else(|| {
            anyhow!(
                "auth.session_timeout_mins = {} is out of range",
                self.auth.session_timeout_mins
            )
        })?;
        upload_bytes_from_mb(self.upgrade.max_upload_mb).ok_or_else(|| {
            anyhow!("upgrade.max_upload_mb = {} is out of range", self.upgrade.max_upload_mb)
        })?;
        Ok(())
    }

    /// Load the configuration, writing the default file first if it does not exist
    pub async fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Configuration file {} not found, creating default", path.display());
                tokio::fs::write(path, DEFAULT_CONFIG)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                DEFAULT_CONFIG.to_string()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Idle window of a session. Values rejected by `parse` fall back to the default.
    pub fn session_timeout(&self) -> chrono::Duration {
        timeout_from_mins(self.auth.session_timeout_mins)
            .unwrap_or_else(|| chrono::Duration::minutes(10))
    }

    pub fn max_upload_bytes(&self) -> usize {
        upload_bytes_from_mb(self.upgrade.max_upload_mb).unwrap_or(usize::MAX)
    }
}

fn timeout_from_mins(mins: u64) -> Option<chrono::Duration> {
    chrono::TimeDelta::try_minutes(i64::try_from(mins).ok()?)
}

fn upload_bytes_from_mb(mb: usize) -> Option<usize> {
    mb.checked_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_matches_builtin_defaults() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.username, "admin");
        assert_eq!(config.auth.password, "admin");
        assert_eq!(config.session_timeout(), chrono::Duration::minutes(10));
        assert_eq!(config.paths.log_dir, PathBuf::from("/var/log"));
        assert_eq!(config.status.cpu_sample_ms, 1000);
        assert_eq!(config.max_upload_bytes(), 150 * 1024 * 1024);
        assert!(config.upgrade.installer.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 8080

            [upgrade]
            installer = ["rauc", "install"]
            status_command = ["rauc", "status"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.paths.proc_root, PathBuf::from("/proc"));
        assert_eq!(
            config.upgrade.installer,
            Some(vec!["rauc".to_string(), "install".to_string()])
        );
        assert_eq!(
            config.upgrade.status_command,
            Some(vec!["rauc".to_string(), "status".to_string()])
        );
        assert!(config.upgrade.reboot_command.is_none());
    }

    #[test]
    fn rejects_out_of_range_limits() {
        // fits in i64 but not in a TimeDelta
        let err = Config::parse("[auth]\nsession_timeout_mins = 9223372036854775807").unwrap_err();
        assert!(format!("{:#}", err).contains("session_timeout_mins"));

        let err = Config::parse("[upgrade]\nmax_upload_mb = 9223372036854775807").unwrap_err();
        assert!(format!("{:#}", err).contains("max_upload_mb"));

        let config = Config::parse("[auth]\nsession_timeout_mins = 525600").unwrap();
        assert_eq!(config.session_timeout(), chrono::Duration::days(365));
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(Config::parse("[server]\nport = \"eighty\"").is_err());
    }

    #[tokio::test]
    async fn creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sysdash.toml");
        let config = Config::load_or_create(&path).await.unwrap();
        assert_eq!(config.server.port, 5000);
        assert!(path.exists());
    }
}
