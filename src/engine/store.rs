use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Metadata for a probe that has been sent but not yet matched or reaped.
///
/// Owned exclusively by the [`CorrelationStore`] from the moment the probe
/// is transmitted until a matching echo removes it or the reaper evicts it.
#[derive(Debug, Clone)]
pub struct InFlightPacket {
    /// Process-wide monotonic packet identifier, assigned at send time.
    pub packet_id: u64,
    /// Name of the target the probe was sent to.
    pub target: String,
    /// Per-packet random tag embedded in the payload.
    pub tag: Uuid,
    /// Wall-clock send time in milliseconds since the Unix epoch, as
    /// stamped into the wire header.
    pub sent_at_ms: u64,
    /// Monotonic send instant, used for expiry so a backward wall-clock
    /// jump cannot break the sweep ordering.
    pub sent_at: Instant,
}

/// Ordered mapping from packet ID to in-flight probe metadata.
///
/// Packet IDs are assigned from a monotonic counter at send time, so key
/// order equals send order. The expiry sweep depends on this: it walks
/// entries in ascending key order and stops at the first non-expired one,
/// which is correct because `sent_at` is non-decreasing in key order.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    packets: BTreeMap<u64, InFlightPacket>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly sent probe.
    ///
    /// Returns false and leaves the store unchanged if the packet ID is
    /// already present. That cannot happen while IDs come from the
    /// monotonic counter, but callers must not clobber an existing entry.
    pub fn insert(&mut self, info: InFlightPacket) -> bool {
        if self.packets.contains_key(&info.packet_id) {
            return false;
        }

        debug_assert!(
            self.packets
                .last_key_value()
                .map_or(true, |(&id, last)| id < info.packet_id
                    && last.sent_at <= info.sent_at),
            "in-flight entries must be inserted in send order",
        );

        self.packets.insert(info.packet_id, info);
        true
    }

    /// Atomically look up and remove the entry for the given packet ID.
    ///
    /// Absence is not an error: it means the probe was already matched,
    /// already reaped, or the echo is spurious.
    pub fn take(&mut self, packet_id: u64) -> Option<InFlightPacket> {
        self.packets.remove(&packet_id)
    }

    /// Remove and return all entries older than `max_age`.
    ///
    /// Walks entries in ascending key (= send-time) order and stops at the
    /// first entry still inside the window; everything beyond it is
    /// strictly younger. Amortized O(k) where k is the number of newly
    /// expired entries, not O(n) per sweep.
    pub fn sweep_expired(&mut self, now: Instant, max_age: Duration) -> Vec<InFlightPacket> {
        let mut expired = Vec::new();

        while let Some(entry) = self.packets.first_entry() {
            if now.saturating_duration_since(entry.get().sent_at) > max_age {
                expired.push(entry.remove());
            } else {
                break;
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
