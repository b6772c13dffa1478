use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Global admission gate: consecutive queries start at least `interval` apart,
/// no matter how many workers share it.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Waits for the next free slot. Holding the lock while sleeping queues the
    /// other callers behind this one.
    pub async fn admit(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            // An interval too large for the clock means no further admissions.
            let next = prev.checked_add(self.interval).unwrap_or_else(far_future);
            if next > Instant::now() {
                debug!("Waiting {:.2?} before the next query", next - Instant::now());
                sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
