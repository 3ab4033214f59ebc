use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Why a sweep is running. The startup sweep and the periodic one share a
/// single code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    Startup,
    Interval,
}

/// Spawn the retention sweeper: one sweep immediately at startup, then one
/// every 30 minutes.
pub fn spawn(downloads_dir: PathBuf, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(SWEEP_INTERVAL);
        let mut trigger = SweepTrigger::Startup;
        loop {
            // The first tick completes immediately, which is the startup sweep.
            timer.tick().await;
            sweep(&downloads_dir, retention, trigger).await;
            trigger = SweepTrigger::Interval;
        }
    })
}

/// Delete every entry in the downloads directory whose modification time is
/// older than the retention window. Per-entry failures are logged and the
/// sweep continues. Returns the number of entries removed.
pub async fn sweep(downloads_dir: &Path, retention: Duration, trigger: SweepTrigger) -> usize {
    let mut entries = match fs::read_dir(downloads_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Failed to open downloads directory for sweep: {error}");
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0usize;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Failed to iterate downloads directory: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!("Failed to read metadata of {path:?}: {error}");
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(error) => {
                warn!("Failed to read mtime of {path:?}: {error}");
                continue;
            }
        };

        let age = now
            .duration_since(modified)
            .unwrap_or(Duration::from_secs(0));
        if age < retention {
            continue;
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Failed to delete {path:?}: {error}"),
        }
    }

    info!(?trigger, removed, "retention sweep finished");
    removed
}
