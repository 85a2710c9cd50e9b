// # Gateway Health Signal
//
// Append-only fault log watched by the gateway's process supervisor.
//
// ## Purpose
//
// When a request to the registry gateway fails at the transport level the
// client appends one line to this file. The supervisor reacts by
// restarting the gateway, and the client retries the request once after a
// short delay.
//
// ## File Format
//
// One line per fault:
//
// ```text
// Connectivity error: connection refused at 2026-10-18T09:15:02.114Z
// ```

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;

/// Writer for the gateway fault signal
///
/// Appends are serialized through an async mutex so concurrent
/// conversations never interleave partial lines. A signal without a path
/// only logs.
#[derive(Debug, Default)]
pub struct HealthSignal {
    path: Option<PathBuf>,
    guard: Mutex<()>,
}

impl HealthSignal {
    /// Signal writing to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            guard: Mutex::new(()),
        }
    }

    /// Signal that only logs faults
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Signal from an optional configured path
    pub fn from_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a transport fault
    ///
    /// Failing to write the file is logged and otherwise ignored: the
    /// request still gets its retry.
    pub async fn signal(&self, fault: &Error) {
        let Some(path) = &self.path else {
            tracing::warn!("Transport fault (no health file configured): {}", fault);
            return;
        };

        let line = format!(
            "{} at {}\n",
            fault,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );

        let _guard = self.guard.lock().await;
        if let Err(e) = Self::append(path, &line).await {
            tracing::error!(
                "Failed to write health signal to {}: {}",
                path.display(),
                e
            );
        } else {
            tracing::warn!("Transport fault signalled to {}: {}", path.display(), fault);
        }
    }

    async fn append(path: &Path, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
