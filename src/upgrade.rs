//! Firmware upload and upgrade progress tracking

use anyhow::{bail, Context};
use axum::extract::multipart::Field;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Uploaded,
    Installing,
    Completed,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct UpgradeStatus {
    pub status: Phase,
    pub progress: f64,
    pub message: String,
    pub show_reboot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for UpgradeStatus {
    fn default() -> Self {
        Self {
            status: Phase::Idle,
            progress: 0.0,
            message: "No upgrade in progress".to_string(),
            show_reboot: false,
            error: None,
        }
    }
}

/// Shared progress of the current upgrade, polled by the progress page
#[derive(Clone, Default)]
pub struct UpgradeTracker {
    status: Arc<RwLock<UpgradeStatus>>,
}

impl UpgradeTracker {
    pub fn snapshot(&self) -> UpgradeStatus {
        self.status.read().clone()
    }

    pub fn update(&self, phase: Phase, progress: f64, message: &str) {
        let mut status = self.status.write();
        status.status = phase;
        status.progress = progress;
        status.message = message.to_string();
        match phase {
            Phase::Completed => status.show_reboot = true,
            Phase::Error => {
                status.error = Some(if message.starts_with("Error:") {
                    message.to_string()
                } else {
                    format!("Error: {}", message)
                });
            }
            _ => {}
        }
        tracing::info!("Upgrade status: {:?} {:.0}% {}", phase, progress, message);
    }

    /// Start over after a new file has been received
    pub fn reset_uploaded(&self, bytes: u64) {
        *self.status.write() = UpgradeStatus::default();
        self.update(
            Phase::Uploaded,
            0.0,
            &format!("Upload complete ({} bytes)", bytes),
        );
    }
}

/// Stream a multipart field to `path`, creating the parent directory
pub async fn save_upload(mut field: Field<'_>, path: &Path) -> anyhow::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;

    let result = write_field(&mut field, &mut file).await;
    if result.is_err() {
        drop(file);
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove partial upload {}: {}", path.display(), e);
        }
    }
    result
}

async fn write_field(field: &mut Field<'_>, file: &mut tokio::fs::File) -> anyhow::Result<u64> {
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.context("reading upload")? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Run the installer on the uploaded file and record the outcome
pub async fn run_installer(tracker: &UpgradeTracker, command: &[String], package: &Path) {
    tracker.update(Phase::Installing, 10.0, "Installing firmware");
    record_install(tracker, command, package).await;
}

async fn record_install(tracker: &UpgradeTracker, command: &[String], package: &Path) {
    match install(command, package).await {
        Ok(()) => tracker.update(Phase::Completed, 100.0, "Installation completed successfully"),
        Err(e) => {
            tracing::error!("Upgrade failed: {:#}", e);
            tracker.update(Phase::Error, 90.0, &format!("Installation failed: {:#}", e));
        }
    }
}

async fn install(command: &[String], package: &Path) -> anyhow::Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("installer command is empty");
    };
    let output = Command::new(program)
        .args(args)
        .arg(package)
        .output()
        .await
        .with_context(|| format!("failed to start {}", program))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        bail!("{} exited with {}", program, output.status);
    }
    bail!("{} exited with {}: {}", program, output.status, stderr)
}

/// Mark the upgrade as installing before returning, then install in the background.
/// Uploads are refused from this point until the installer finishes.
pub fn spawn_installer(tracker: UpgradeTracker, command: Vec<String>, package: PathBuf) {
    tracker.update(Phase::Installing, 10.0, "Installing firmware");
    tokio::spawn(async move {
        record_install(&tracker, &command, &package).await;
    });
}

const UNKNOWN: &str = "Unknown";

/// Installed firmware as reported by the bundle status command
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub build_date: String,
    pub active_slot: String,
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self {
            version: UNKNOWN.to_string(),
            build_date: UNKNOWN.to_string(),
            active_slot: UNKNOWN.to_string(),
        }
    }
}

/// Pick the version, build date and booted slot out of `rauc status` style
/// output. The first line containing each marker, ignoring ASCII case, wins;
/// missing ones stay `Unknown`.
pub fn parse_firmware_status(output: &str) -> FirmwareInfo {
    let find = |marker: &str| {
        output.lines().find_map(|line| {
            let start = line.to_ascii_lowercase().find(marker)? + marker.len();
            let value = line[start..].trim();
            (!value.is_empty()).then(|| value.to_string())
        })
    };
    let defaults = FirmwareInfo::default();
    FirmwareInfo {
        version: find("version=").unwrap_or(defaults.version),
        build_date: find("build=").unwrap_or(defaults.build_date),
        active_slot: find("booted from:").unwrap_or(defaults.active_slot),
    }
}

/// Run the configured status command and parse its output
pub async fn firmware_info(command: Option<&[String]>) -> FirmwareInfo {
    let Some((program, args)) = command.and_then(|c| c.split_first()) else {
        return FirmwareInfo::default();
    };
    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            parse_firmware_status(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::warn!("{} exited with {}", program, output.status);
            FirmwareInfo::default()
        }
        Err(e) => {
            tracing::warn!("Failed to start {}: {}", program, e);
            FirmwareInfo::default()
        }
    }
}

/// File name offered for the configuration backup download
pub const BACKUP_FILE_NAME: &str = "startup-config.cfg";

/// Text of the configuration backup offered on the configuration page
pub fn config_backup<Tz>(hostname: &str, version: Option<&str>, generated: chrono::DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "# Configuration Backup\n# Generated: {}\n\nhostname={}\nversion={}\n",
        generated.format("%Y-%m-%d %H:%M:%S"),
        hostname,
        version.unwrap_or(UNKNOWN)
    )
}

/// Delay between answering the reboot request and running the command
pub const REBOOT_DELAY: Duration = Duration::from_secs(2);

/// Run the reboot command after `delay`, giving the response time to reach the browser
pub fn spawn_reboot(command: Option<Vec<String>>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some((program, args)) = command.as_deref().and_then(|c| c.split_first()) else {
            tracing::warn!("No reboot command configured, not rebooting");
            return;
        };
        tracing::info!("Rebooting with {}", program);
        match Command::new(program).args(args).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::error!("{} exited with {}", program, status),
            Err(e) => tracing::error!("Failed to start {}: {}", program, e),
        }
    });
}
