use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tiller_runtime::{PullProgress, RuntimeClient};
use tiller_store::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog;

/// A running download is abandoned after this long regardless of progress.
const HARD_TIMEOUT: Duration = Duration::from_secs(90 * 60);
/// Progress writes to the model row are coalesced to this interval.
const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to one in-flight pull. Lives in the manager's jobs map from spawn
/// until the background task finishes its terminal transition.
#[derive(Clone)]
pub(crate) struct DownloadJob {
    pub cancel: CancellationToken,
    /// Live progress in [0, 100]; monotone until terminal.
    pub progress: Arc<Mutex<f64>>,
}

impl DownloadJob {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn progress(&self) -> f64 {
        *self.progress.lock().unwrap()
    }
}

/// Spawn the background task driving one pull. The caller has already
/// inserted `job` into `jobs` under `name`; the task removes it on exit.
pub(crate) fn spawn(
    store: Store,
    runtime: Arc<dyn RuntimeClient>,
    jobs: Arc<DashMap<String, DownloadJob>>,
    job: DownloadJob,
    model_id: String,
    name: String,
) {
    tokio::spawn(async move {
        let outcome = run(&store, &runtime, &job, &name).await;

        match outcome {
            Ok(observed_bytes) => {
                // Prefer the runtime's own descriptor for size and family
                // metadata; fall back to the bytes counted off the wire.
                let mut size = observed_bytes;
                if let Ok(installed) = runtime.list_installed().await {
                    if let Some(desc) = installed.iter().find(|m| m.name == name) {
                        let conn = store.lock();
                        let _ = catalog::upsert_descriptor(&conn, desc);
                        size = desc.size_bytes;
                    }
                }
                let conn = store.lock();
                if let Err(e) = catalog::set_downloaded(&conn, &model_id, size) {
                    warn!(model = %name, error = %e, "failed to finalize download row");
                }
                info!(model = %name, size, "download complete");
            }
            Err(reason) => {
                let conn = store.lock();
                if let Err(e) = catalog::set_error(&conn, &model_id, &reason) {
                    warn!(model = %name, error = %e, "failed to record download error");
                }
                warn!(model = %name, reason, "download failed");
            }
        }

        jobs.remove(&name);
    });
}

/// Drive the pull stream to completion. Returns the total bytes observed on
/// success, or a human-readable failure reason.
async fn run(
    store: &Store,
    runtime: &Arc<dyn RuntimeClient>,
    job: &DownloadJob,
    name: &str,
) -> Result<u64, String> {
    let (tx, mut rx) = mpsc::channel::<PullProgress>(64);

    let driver = {
        let runtime = runtime.clone();
        let name = name.to_string();
        let cancel = job.cancel.clone();
        tokio::spawn(async move { runtime.pull(&name, tx, cancel).await })
    };

    let deadline = tokio::time::Instant::now() + HARD_TIMEOUT;
    let timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(timeout);

    let mut last_persist: Option<tokio::time::Instant> = None;
    let mut max_total: u64 = 0;

    let model_id: String = {
        let conn = store.lock();
        match catalog::get_by_name(&conn, name) {
            Ok(Some(m)) => m.id,
            _ => return Err("model row vanished during download".to_string()),
        }
    };

    loop {
        tokio::select! {
            _ = job.cancel.cancelled() => {
                driver.abort();
                return Err("download cancelled".to_string());
            }
            _ = &mut timeout => {
                job.cancel.cancel();
                driver.abort();
                return Err("download timed out after 90 minutes".to_string());
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                if event.total > 0 {
                    max_total = max_total.max(event.total);
                    let pct = 100.0 * event.completed as f64 / event.total as f64;
                    let mut progress = job.progress.lock().unwrap();
                    // Multi-layer pulls restart per layer; progress only moves forward.
                    if pct > *progress {
                        *progress = pct.min(100.0);
                    }
                    let current = *progress;
                    drop(progress);

                    let due = last_persist
                        .map(|t| t.elapsed() >= PERSIST_INTERVAL)
                        .unwrap_or(true);
                    if due {
                        let conn = store.lock();
                        let _ = catalog::set_progress(&conn, &model_id, current);
                        last_persist = Some(tokio::time::Instant::now());
                    }
                }
            }
        }
    }

    match driver.await {
        Ok(Ok(())) => Ok(max_total),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("download task panicked: {e}")),
    }
}
