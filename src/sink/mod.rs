use tracing::{debug, info, warn};
use uuid::Uuid;

/// One structured measurement event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    /// A probe was transmitted (fire-and-forget; says nothing about delivery).
    Sent {
        target: String,
        tag: Uuid,
        packet_id: u64,
        len: usize,
    },
    /// An echo was correlated back to its probe.
    Matched {
        target: String,
        tag: Uuid,
        packet_id: u64,
        len: usize,
        /// Round-trip time in milliseconds, computed against the wall-clock
        /// timestamp carried in the wire header. Negative under clock skew.
        rtt_ms: i64,
        /// True when `rtt_ms` is negative. The measurement is still
        /// reported; dropping it would bias loss statistics.
        clock_anomaly: bool,
    },
    /// An in-flight probe exceeded the timeout window and was evicted.
    Lost {
        target: String,
        tag: Uuid,
        packet_id: u64,
    },
    /// A received datagram was too short to carry a probe header.
    Malformed { len: usize },
}

/// ProbeSink consumes measurement events from the engine.
///
/// The engine is single-threaded, so sinks need no synchronization of
/// their own; a test sink can be a plain `Rc<RefCell<Vec<_>>>`.
pub trait ProbeSink {
    /// Record a single event.
    fn record(&self, event: ProbeEvent);
}

/// Production sink: one structured tracing line per event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProbeSink for TracingSink {
    fn record(&self, event: ProbeEvent) {
        match event {
            ProbeEvent::Sent {
                target,
                tag,
                packet_id,
                len,
            } => {
                info!(name = %target, %tag, packet_id, len, "probe sent");
            }
            ProbeEvent::Matched {
                target,
                tag,
                packet_id,
                len,
                rtt_ms,
                clock_anomaly,
            } => {
                if clock_anomaly {
                    warn!(
                        name = %target,
                        %tag,
                        packet_id,
                        len,
                        rtt_ms,
                        "echo matched with negative RTT (clock anomaly)",
                    );
                } else {
                    info!(name = %target, %tag, packet_id, len, rtt_ms, "echo matched");
                }
            }
            ProbeEvent::Lost {
                target,
                tag,
                packet_id,
            } => {
                info!(name = %target, %tag, packet_id, "probe timed out");
            }
            ProbeEvent::Malformed { len } => {
                debug!(len, "dropped undersized datagram");
            }
        }
    }
}
