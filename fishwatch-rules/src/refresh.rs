use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::cache::{RefreshOutcome, RuleSetCache};
use crate::compiler::RuleCategory;
use crate::error::RuleError;

struct Shared {
    notify: Notify,
    pending: [AtomicBool; 3],
    shutting_down: AtomicBool,
}

impl Shared {
    fn pending(&self, category: RuleCategory) -> &AtomicBool {
        &self.pending[category.index()]
    }
}

/// Submits refresh requests to a running [`RefreshWorker`]. Requests made
/// while a rebuild is in flight coalesce into one further pass.
#[derive(Clone)]
pub struct RefreshHandle {
    shared: Arc<Shared>,
    passes: watch::Receiver<u64>,
}

impl RefreshHandle {
    pub fn request(&self, category: RuleCategory) -> Result<(), RuleError> {
        if self.shared.shutting_down.load(Ordering::Relaxed) {
            return Err(RuleError::ShuttingDown);
        }
        self.shared.pending(category).store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn request_all(&self) -> Result<(), RuleError> {
        for category in RuleCategory::ALL {
            self.request(category)?;
        }
        Ok(())
    }

    /// Number of refresh passes the worker has completed.
    pub fn passes(&self) -> watch::Receiver<u64> {
        self.passes.clone()
    }
}

/// Background task owning every rebuild of the rule set cache.
pub struct RefreshWorker {
    shared: Arc<Shared>,
    handle: RefreshHandle,
    task: JoinHandle<()>,
}

impl RefreshWorker {
    /// Starts the worker. With an `interval`, every category is also
    /// refreshed once per period.
    pub fn spawn(cache: Arc<RuleSetCache>, interval: Option<Duration>) -> Self {
        let shared = Arc::new(Shared {
            notify: Notify::new(),
            pending: RuleCategory::ALL.map(|_| AtomicBool::new(false)),
            shutting_down: AtomicBool::new(false),
        });
        let (passes_tx, passes_rx) = watch::channel(0);

        let task = tokio::spawn(worker_loop(cache, shared.clone(), interval, passes_tx));
        let handle = RefreshHandle {
            shared: shared.clone(),
            passes: passes_rx,
        };
        Self {
            shared,
            handle,
            task,
        }
    }

    pub fn handle(&self) -> RefreshHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self) {
        self.shared.shutting_down.store(true, Ordering::Relaxed);
        self.shared.notify.notify_one();
        if let Err(err) = self.task.await {
            error!("refresh worker crashed: {:?}", err);
        }
    }
}

async fn worker_loop(
    cache: Arc<RuleSetCache>,
    shared: Arc<Shared>,
    interval: Option<Duration>,
    passes: watch::Sender<u64>,
) {
    let mut ticker = interval.map(|period| time::interval_at(Instant::now() + period, period));

    loop {
        if shared.shutting_down.load(Ordering::Relaxed) {
            break;
        }

        let scheduled = tokio::select! {
            _ = shared.notify.notified() => false,
            _ = tick(&mut ticker) => true,
        };
        if shared.shutting_down.load(Ordering::Relaxed) {
            break;
        }

        for category in RuleCategory::ALL {
            let requested = shared.pending(category).swap(false, Ordering::SeqCst);
            if !(requested || scheduled) {
                continue;
            }
            match cache.refresh(category).await {
                Ok(RefreshOutcome::Unchanged { version }) => {
                    debug!(%category, version, "rule set unchanged")
                }
                Ok(outcome) => info!(%category, ?outcome, "rule set refreshed"),
                Err(err) => error!(%category, error = %err, "rule set refresh failed"),
            }
        }
        passes.send_modify(|count| *count += 1);
    }
    debug!("refresh worker stopped");
}

async fn tick(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
