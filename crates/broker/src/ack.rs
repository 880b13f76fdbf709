//! Delivery ids and acknowledgment bookkeeping.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

/// How many recently issued ids are remembered for ack correlation.
pub const ACK_TRACKING_CAPACITY: usize = 4096;

/// Result of correlating an `ack` with the ids this broker issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The id was issued by this broker and is still tracked.
    Known,
    /// Never issued, or already evicted from the tracking window.
    Unknown,
}

/// Mints message ids and records acknowledgments.
///
/// Ids come from a monotonic counter, so they are unique for the lifetime
/// of the correlator regardless of how fast messages arrive.
pub struct AckCorrelator {
    next: AtomicU64,
    capacity: usize,
    issued: Mutex<Issued>,
}

#[derive(Default)]
struct Issued {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::with_capacity(ACK_TRACKING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next: AtomicU64::new(1),
            capacity: capacity.max(1),
            issued: Mutex::new(Issued::default()),
        }
    }

    /// Returns a fresh message id.
    pub fn new_id(&self) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed).to_string();
        if let Ok(mut issued) = self.issued.lock() {
            if issued.order.len() >= self.capacity
                && let Some(oldest) = issued.order.pop_front()
            {
                issued.set.remove(&oldest);
            }
            issued.order.push_back(id.clone());
            issued.set.insert(id.clone());
        }
        id
    }

    /// Records that `message_id` was acknowledged. Unknown ids are logged,
    /// never treated as errors.
    pub fn correlate(&self, message_id: &str) -> AckOutcome {
        let known = self
            .issued
            .lock()
            .map(|issued| issued.set.contains(message_id))
            .unwrap_or(false);

        if known {
            debug!(message_id, "message acknowledged");
            AckOutcome::Known
        } else {
            warn!(message_id, "unknown ack");
            AckOutcome::Unknown
        }
    }

    /// Number of ids currently held in the tracking window.
    pub fn tracked(&self) -> usize {
        self.issued.lock().map(|i| i.order.len()).unwrap_or(0)
    }
}

impl Default for AckCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
