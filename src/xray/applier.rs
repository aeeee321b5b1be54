//! Configuration applier and process supervisor
//!
//! Owns the on-disk document and the supervised process's running
//! configuration. Every apply runs the same sequence: backup the previous
//! file, write the new document to a temporary path and atomically rename
//! it into place, restart the process and wait for a bounded confirmation
//! window. A failed or timed-out restart restores the backup, so the live
//! process is never left pointed at a document it rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::document::XrayDocument;
use crate::error::{Result, SyncError};
use crate::logger::log;

/// Restart/reload primitive and liveness query for the supervised process
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn restart(&self) -> Result<()>;
    async fn is_running(&self) -> bool;
}

/// systemd-backed process control (`systemctl restart` / `is-active`)
pub struct SystemctlControl {
    service: String,
}

impl SystemctlControl {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl ProcessControl for SystemctlControl {
    async fn restart(&self) -> Result<()> {
        let output = Command::new("systemctl")
            .args(["restart", &self.service])
            .output()
            .await?;
        if !output.status.success() {
            return Err(SyncError::Apply(format!(
                "systemctl restart {} failed: {}",
                self.service,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", &self.service])
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Phase reached by an apply attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Idle,
    Writing,
    Restarting,
    Converged,
    RolledBack,
}

/// Result of a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub phase: ApplyPhase,
    pub restarted: bool,
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes synthesized documents to the path the xray process reads and
/// supervises the restart. All operations are serialized internally; at
/// most one apply is in flight at a time.
pub struct XrayApplier {
    config_path: PathBuf,
    process: Arc<dyn ProcessControl>,
    restart_timeout: Duration,
    lock: Mutex<()>,
}

impl XrayApplier {
    pub fn new(
        config_path: PathBuf,
        process: Arc<dyn ProcessControl>,
        restart_timeout: Duration,
    ) -> Self {
        Self {
            config_path,
            process,
            restart_timeout,
            lock: Mutex::new(()),
        }
    }

    fn backup_path(&self) -> PathBuf {
        sibling_path(&self.config_path, ".bak")
    }

    fn temp_path(&self) -> PathBuf {
        sibling_path(&self.config_path, ".tmp")
    }

    /// Write and activate a document. On restart failure the previous
    /// configuration is restored before the error is returned.
    pub async fn apply(&self, document: &XrayDocument) -> Result<ApplyOutcome> {
        let _guard = self.lock.lock().await;

        let bytes = document.to_bytes()?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Writing: backup, then write-and-rename so the supervised process
        // never observes a partial file.
        let had_previous = fs::try_exists(&self.config_path).await.unwrap_or(false);
        if had_previous {
            fs::copy(&self.config_path, self.backup_path()).await?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &self.config_path).await?;

        // Restarting, bounded by the confirmation window.
        match timeout(self.restart_timeout, self.restart_and_confirm()).await {
            Ok(Ok(())) => {
                log::applied(&self.config_path.to_string_lossy(), true);
                Ok(ApplyOutcome {
                    phase: ApplyPhase::Converged,
                    restarted: true,
                })
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.rollback(had_previous, &reason).await;
                Err(SyncError::Apply(reason))
            }
            Err(_) => {
                let reason = format!(
                    "restart confirmation timed out after {:?}",
                    self.restart_timeout
                );
                self.rollback(had_previous, &reason).await;
                Err(SyncError::Apply(reason))
            }
        }
    }

    async fn restart_and_confirm(&self) -> Result<()> {
        self.process.restart().await?;
        if !self.process.is_running().await {
            return Err(SyncError::Apply(
                "service is not active after restart".to_string(),
            ));
        }
        Ok(())
    }

    /// Restore the last known-good configuration. Best effort: rollback
    /// runs in a failure path and can only log its own failures.
    async fn rollback(&self, had_previous: bool, reason: &str) {
        log::rollback(&self.config_path.to_string_lossy(), reason);

        if had_previous {
            if let Err(e) = fs::copy(self.backup_path(), &self.config_path).await {
                log::error!(error = %e, "Failed to restore configuration backup");
                return;
            }
            // Bring the process back up on the restored configuration,
            // bounded like any other restart
            match timeout(self.restart_timeout, self.process.restart()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!(error = %e, "Restart on restored configuration failed");
                }
                Err(_) => {
                    log::error!("Restart on restored configuration timed out");
                }
            }
        } else {
            // No known-good document exists; remove the rejected one rather
            // than leave the process pointed at it.
            if let Err(e) = fs::remove_file(&self.config_path).await {
                log::error!(error = %e, "Failed to remove rejected configuration");
            }
        }
    }

    /// Raw bytes of the currently active configuration, if any
    pub async fn current_bytes(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.config_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse the currently active configuration for status reporting
    pub async fn get_current(&self) -> Result<Option<XrayDocument>> {
        match self.current_bytes().await? {
            Some(bytes) => Ok(Some(XrayDocument::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
