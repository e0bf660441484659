use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{CacheSnapshot, SnapshotStore};

/// Most recent write that did not reach the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistFailure {
    pub generation: u64,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Background task writing the latest published snapshot.
///
/// Publishing never waits on I/O. Snapshots published while a write is in
/// flight coalesce, so the store always ends on the newest one.
pub struct PersistWriter {
    generation: u64,
    snapshot_tx: watch::Sender<(u64, CacheSnapshot)>,
    written_rx: watch::Receiver<u64>,
    error_rx: watch::Receiver<Option<PersistFailure>>,
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl PersistWriter {
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (snapshot_tx, mut snapshot_rx) = watch::channel((0, CacheSnapshot::default()));
        let (written_tx, written_rx) = watch::channel(0u64);
        let (error_tx, error_rx) = watch::channel(None);
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(()) = cancel_rx.recv() => {
                        info!("snapshot writer shutdown requested");
                        break;
                    }
                    changed = snapshot_rx.changed() => {
                        if changed.is_err() {
                            debug!("snapshot publisher dropped");
                            break;
                        }
                        let (generation, snapshot) = snapshot_rx.borrow_and_update().clone();
                        match store.save(&snapshot).await {
                            Ok(()) => {
                                debug!(generation, "snapshot persisted");
                                error_tx.send_replace(None);
                            }
                            Err(err) => {
                                warn!(generation, error = %err, "failed to persist course snapshot");
                                error_tx.send_replace(Some(PersistFailure {
                                    generation,
                                    at: Utc::now(),
                                    message: err.to_string(),
                                }));
                            }
                        }
                        written_tx.send_replace(generation);
                    }
                }
            }
        });

        Self {
            generation: 0,
            snapshot_tx,
            written_rx,
            error_rx,
            cancel_tx,
            join,
        }
    }

    pub fn publish(&mut self, snapshot: CacheSnapshot) {
        self.generation += 1;
        self.snapshot_tx.send_replace((self.generation, snapshot));
    }

    /// Waits until everything published so far has been attempted.
    pub async fn flush(&self) {
        let target = self.generation;
        let mut written = self.written_rx.clone();
        if written.wait_for(|done| *done >= target).await.is_err() {
            warn!(target, "snapshot writer stopped before flush completed");
        }
    }

    pub fn last_error(&self) -> Option<PersistFailure> {
        self.error_rx.borrow().clone()
    }

    pub fn errors(&self) -> watch::Receiver<Option<PersistFailure>> {
        self.error_rx.clone()
    }

    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        self.flush().await;
        let _ = self.cancel_tx.send(());
        self.join.await
    }
}
