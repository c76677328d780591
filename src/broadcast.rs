//! Broadcast fan-out engine with batched concurrency
//!
//! Fans an admin message out to every known user in fixed-size batches. All
//! sends inside a batch run concurrently and are joined before the next
//! batch starts, with a pause between batches to stay under the transport's
//! aggregate rate ceiling. Delivery is at most once per user per run: there
//! is no checkpoint, so a crash mid-run drops the remaining recipients.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{OutboundPayload, ResponseDispatcher};
use crate::session::{SessionStore, StoreError};

/// Outcome of one broadcast run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Users the message reached
    pub sent: usize,
    /// Users every delivery attempt failed for
    pub failed: usize,
    /// Wall-clock time of the whole run
    pub duration: Duration,
}

/// Batched broadcast runner
pub struct BroadcastEngine {
    sessions: Arc<dyn SessionStore>,
    dispatcher: Arc<ResponseDispatcher>,
    batch_size: usize,
    batch_delay: Duration,
}

impl BroadcastEngine {
    /// Engine sending `batch_size` concurrent messages per batch with
    /// `batch_delay` between batches
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        dispatcher: Arc<ResponseDispatcher>,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    /// Send `message` to every known user.
    ///
    /// Partial failures are counted, never propagated; `sent + failed`
    /// always equals the number of targeted users. An empty audience
    /// returns a zero result immediately.
    ///
    /// # Errors
    ///
    /// Returns an error only if the audience cannot be listed at all.
    pub async fn run(&self, message: &str) -> Result<BroadcastResult, StoreError> {
        let started = Instant::now();
        let job_id = Uuid::new_v4();
        let targets = self.sessions.list_user_ids().await?;

        if targets.is_empty() {
            info!("broadcast {job_id}: no registered users, nothing to do");
            return Ok(BroadcastResult {
                sent: 0,
                failed: 0,
                duration: started.elapsed(),
            });
        }

        let total = targets.len();
        let batches = targets.len().div_ceil(self.batch_size);
        info!("broadcast {job_id}: {total} users in {batches} batches of {}", self.batch_size);

        let payload = OutboundPayload::text(message);
        let mut sent = 0usize;
        let mut failed = 0usize;

        for (index, batch) in targets.chunks(self.batch_size).enumerate() {
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|&user_id| self.dispatcher.send(user_id, &payload)),
            )
            .await;

            for (user_id, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        failed += 1;
                        warn!("broadcast {job_id}: delivery to {user_id} failed: {e}");
                    }
                }
            }

            info!(
                "broadcast {job_id}: batch {}/{batches} done ({sent} sent, {failed} failed)",
                index + 1
            );

            if index + 1 < batches {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        let duration = started.elapsed();
        info!(
            "broadcast {job_id}: finished in {:.1}s — {sent} sent, {failed} failed",
            duration.as_secs_f64()
        );

        Ok(BroadcastResult {
            sent,
            failed,
            duration,
        })
    }
}
