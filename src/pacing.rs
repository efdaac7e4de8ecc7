//! Admission control for outbound provider calls.
//!
//! Every component that talks to the data provider (reconciler snapshots,
//! session detail fetches, stream connects) shares one gate, since they all
//! hit the same upstream. The gate holds the last-call instant behind an
//! async mutex; waiting out the spacing window happens while the lock is
//! held, so admission is strictly serialized and FIFO by arrival.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Single-slot token gate enforcing a minimum spacing between outbound calls.
pub struct RequestGate {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(min_spacing: Duration) -> Self {
        RequestGate {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the spacing window since the previous call has elapsed,
    /// then claim the slot. Returns once the caller may issue its request.
    pub async fn admit(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let next_free = prev + self.min_spacing;
            if next_free > Instant::now() {
                tokio::time::sleep_until(next_free).await;
            }
        }
        *last = Some(Instant::now());
    }
}
