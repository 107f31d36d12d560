//! Supervisory loop: keeps the event subscription alive, runs one
//! reconciliation pass per connection, and fans candidate revisions
//! out to a bounded pool of build workers.
//!
//! Each connection cycle walks Connecting -> Streaming -> Draining and
//! back. The remote side tearing the subscription down periodically is
//! its normal cadence, not an error; so is a decode failure, which
//! aborts the cycle and gets a fresh subscription on the next one. The
//! loop itself never terminates.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use verifier_core::{decode_event, ChangeFilter, RevisionId};

use crate::job::run_verification;
use crate::locks::LockRegistry;
use crate::service::{EventFeed, ReviewService};

/// Pause before reopening the event subscription.
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    ctx: WorkerCtx,
    build_slots: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        service: Arc<dyn ReviewService>,
        filter: ChangeFilter,
        locks: LockRegistry,
        program: PathBuf,
        build_slots: usize,
    ) -> Self {
        Self {
            ctx: WorkerCtx {
                service,
                filter,
                locks: Arc::new(locks),
                program,
            },
            build_slots: Arc::new(Semaphore::new(build_slots)),
        }
    }

    /// Runs forever: one [`Self::run_cycle`] per subscription lifetime.
    pub async fn run(&self) {
        loop {
            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "connection cycle ended with error");
            }
            debug!("reconnecting to event stream");
            tokio::time::sleep(RECONNECT_PAUSE).await;
        }
    }

    /// One Connecting -> Streaming -> Draining pass. Returns once the
    /// event feed ends, after in-flight builds have drained.
    pub async fn run_cycle(&self) -> Result<()> {
        let mut feed = self.ctx.service.open_events().await?;
        info!("event subscription established");

        // Catch-up pass for anything missed while disconnected.
        // Deliberately serialized to bound load at (re)start.
        let reconciliation = {
            let ctx = self.ctx.clone();
            tokio::spawn(async move { ctx.reconcile().await })
        };

        let mut workers = JoinSet::new();
        let stream_result = self.stream(feed.as_mut(), &mut workers).await;

        // Draining: no new candidates from this subscription; let the
        // catch-up pass and in-flight builds finish.
        drop(feed);
        if let Err(e) = reconciliation.await {
            warn!(error = %e, "reconciliation task panicked");
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "build worker panicked");
            }
        }

        stream_result
    }

    /// Streaming state: pulls raw lines, decodes, filters, and
    /// dispatches until the feed ends or decoding fails.
    async fn stream(&self, feed: &mut dyn EventFeed, workers: &mut JoinSet<()>) -> Result<()> {
        loop {
            let line = match feed.next_line().await? {
                Some(line) => line,
                None => {
                    info!("event subscription closed by remote side");
                    return Ok(());
                }
            };

            // An unrecognized event kind aborts this subscription just
            // like a disconnect; the outer loop starts a fresh one.
            let event = decode_event(&line)?;
            let Some(revision) = event.candidate(&self.ctx.filter) else {
                continue;
            };

            // The event may race the change's current state: re-query
            // before committing a build slot.
            match self.ctx.service.change_is_open(&revision, &self.ctx.filter).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(revision = %revision, "change no longer eligible, dropping");
                    continue;
                }
                Err(e) => {
                    warn!(revision = %revision, error = %e, "liveness check failed, dropping");
                    continue;
                }
            }

            let Ok(permit) = Arc::clone(&self.build_slots).acquire_owned().await else {
                // The semaphore is never closed.
                return Ok(());
            };
            let ctx = self.ctx.clone();
            workers.spawn(async move {
                ctx.verify(revision).await;
                drop(permit);
            });
        }
    }
}

/// Everything a build worker needs, cheap to clone into tasks.
#[derive(Clone)]
struct WorkerCtx {
    service: Arc<dyn ReviewService>,
    filter: ChangeFilter,
    locks: Arc<LockRegistry>,
    program: PathBuf,
}

impl WorkerCtx {
    /// One reconciliation pass: poll the service once and verify the
    /// results strictly one at a time.
    async fn reconcile(&self) {
        let revisions = match self.service.poll_unverified(&self.filter).await {
            Ok(revisions) => revisions,
            Err(e) => {
                warn!(error = %e, "reconciliation query failed");
                return;
            }
        };
        if !revisions.is_empty() {
            info!(count = revisions.len(), "reconciliation found unverified changes");
        }
        for revision in revisions {
            self.verify(revision).await;
        }
    }

    /// Lock -> build -> classify -> report. Infallible by design:
    /// every per-revision condition is handled right here and the
    /// daemon moves on.
    async fn verify(&self, revision: RevisionId) {
        let lock = match self.locks.try_acquire(&revision) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(revision = %revision, "already being built, dropping");
                return;
            }
            Err(e) => {
                warn!(revision = %revision, error = %e, "lock acquisition failed");
                return;
            }
        };

        let outcome = match run_verification(&self.program, &revision, lock.dir()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(revision = %revision, error = %e, "verification job could not run");
                return;
            }
        };
        info!(revision = %revision, outcome = ?outcome, "verification finished");

        if let Some(verdict) = outcome.verdict(&self.filter, &revision) {
            // Not retried on failure: if the change is still
            // unverified, the next reconciliation pass re-surfaces it.
            if let Err(e) = self.service.post_review(&verdict).await {
                warn!(revision = %revision, error = %e, "failed to post review");
            }
        }

        // The lock directory is removed when `lock` drops, on every
        // path out of this function.
    }
}
