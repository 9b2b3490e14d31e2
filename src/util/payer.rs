use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayReport {
    pub selected: usize,
    pub paid: usize,
    pub failed: usize,
}

/// Credits wallets for confirmed quests on a fixed interval.
#[derive(Clone)]
pub struct QuestPayer {
    store: Arc<dyn Store>,
    interval: Duration,
    batch_size: i64,
}

impl QuestPayer {
    pub fn new(store: Arc<dyn Store>, interval: Duration, batch_size: i64) -> Self {
        Self {
            store,
            interval,
            batch_size,
        }
    }

    /// One tick: pays up to `batch_size` statuses, each in its own
    /// transaction. Failures are logged and left for the next tick.
    pub async fn pay_pending(&self) -> PayReport {
        let statuses = match self.store.unpaid_statuses(self.batch_size).await {
            Ok(statuses) => statuses,
            Err(e) => {
                error!("Payer failed to fetch unpaid quests: {e}");
                return PayReport::default();
            }
        };

        let mut report = PayReport {
            selected: statuses.len(),
            ..PayReport::default()
        };
        for status in statuses {
            match self.store.pay_status(status.id, Utc::now()).await {
                Ok(wallet) => {
                    report.paid += 1;
                    debug!(
                        "Paid status {} to player {}, wallet of master {} now {}",
                        status.id, wallet.player_id, wallet.master_id, wallet.score
                    );
                }
                Err(StoreError::Conflict) => {
                    debug!("Status {} changed before payment, skipped", status.id);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to pay status {}: {e}", status.id);
                }
            }
        }

        if report.selected > 0 {
            info!(
                "Payer tick: {} selected, {} paid, {} failed",
                report.selected, report.paid, report.failed
            );
        }
        report
    }

    pub fn spawn(self) -> PayerHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Quest payer started, ticking every {:?}", self.interval);

            loop {
                tokio::select! {
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.pay_pending().await;
                    }
                }
            }
            info!("Quest payer stopped");
        });
        PayerHandle { shutdown, task }
    }
}

pub struct PayerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PayerHandle {
    /// Signals the loop and waits for it. A payment in flight finishes first.
    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();
        if let Err(e) = self.task.await {
            error!("Quest payer task ended abnormally: {e}");
        }
    }
}
