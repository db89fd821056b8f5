use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::lifecycle::LifecycleEngine;
use crate::persistence::Repository;
use crate::poller::Poller;
use crate::record::Mode;

/// Reconciles persisted records with live state at process start (§4.6).
/// Runs asynchronously and never blocks the API surface from accepting
/// requests.
pub struct RestoreCoordinator {
    repo: Arc<dyn Repository>,
    lifecycle: Arc<LifecycleEngine>,
    poller: Arc<Poller>,
}

impl RestoreCoordinator {
    pub fn new(repo: Arc<dyn Repository>, lifecycle: Arc<LifecycleEngine>, poller: Arc<Poller>) -> Self {
        Self {
            repo,
            lifecycle,
            poller,
        }
    }

    /// Spawns itself as a background task so the caller (daemon startup)
    /// doesn't wait on it.
    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            self.run().await;
        });
    }

    async fn run(&self) {
        let records = match self.repo.get_all().await {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "restore: failed to list persisted records");
                return;
            }
        };

        info!(count = records.len(), "restoring persisted sessions");

        join_all(records.into_iter().map(|record| async move {
            if record.mode == Mode::Polling {
                self.poller.start_internal(record);
            } else {
                let id = record.id;
                if let Err(err) = self.lifecycle.check(id).await {
                    warn!(%id, error = %err, "restore: one-shot connect failed, left reconnecting");
                }
            }
        }))
        .await;
    }
}
