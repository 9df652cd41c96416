pub mod stats;
pub mod store;
pub mod timer;
pub mod wire;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::sink::{ProbeEvent, ProbeSink};

use self::stats::ProbeStats;
use self::store::{CorrelationStore, InFlightPacket};
use self::timer::{TimerQueue, TimerSlot};

/// Receive buffer size; any echo larger than this is truncated by the
/// kernel, which only ever drops padding bytes.
const RECV_BUF_LEN: usize = 64 * 1024;

/// One probe target: descriptor fields plus its exclusively owned socket.
struct TargetSlot {
    name: String,
    addr: SocketAddr,
    socket: UdpSocket,
    /// Send cadence derived from the configured frequency.
    interval: Duration,
    payload_min: u32,
    payload_max: u32,
}

/// Probe scheduling and RTT-correlation engine.
///
/// All state lives here and is touched only from the single driver-loop
/// future: the engine is deliberately single-threaded and cooperative, so
/// the packet ID counter and the correlation store need no locks. Running
/// it on anything other than a current-thread runtime gains nothing; the
/// handlers are short and never block.
pub struct Engine {
    targets: Vec<TargetSlot>,
    store: CorrelationStore,
    timers: TimerQueue,
    /// Process-wide packet ID counter, incremented once per transmitted
    /// probe. Strictly increasing, never reused.
    next_packet_id: u64,
    sink: Box<dyn ProbeSink>,
    stats: Arc<ProbeStats>,
    tick_interval: Duration,
    timeout_window: Duration,
    rng: StdRng,
    recv_buf: Box<[u8]>,
}

impl Engine {
    /// Create sockets for every configured target and set up the engine.
    ///
    /// Any failure here (resolution, bind, connect) is a setup error and
    /// aborts startup; nothing past this point is allowed to be fatal.
    pub async fn new(cfg: &Config, sink: Box<dyn ProbeSink>) -> Result<Self> {
        let mut targets = Vec::with_capacity(cfg.targets.len());

        for t in &cfg.targets {
            let addr = resolve_target(&t.host, t.port).await?;

            let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            let socket = UdpSocket::bind(bind_addr)
                .await
                .with_context(|| format!("binding probe socket for {}", t.name))?;
            socket
                .connect(addr)
                .await
                .with_context(|| format!("connecting probe socket for {} to {addr}", t.name))?;

            let interval = t.interval();
            info!(
                name = %t.name,
                %addr,
                frequency = t.frequency,
                interval_ms = interval.as_millis() as u64,
                "target registered",
            );

            targets.push(TargetSlot {
                name: t.name.clone(),
                addr,
                socket,
                interval,
                payload_min: t.payload_min,
                payload_max: t.payload_max,
            });
        }

        Ok(Self {
            targets,
            store: CorrelationStore::new(),
            timers: TimerQueue::new(),
            next_packet_id: 0,
            sink,
            stats: Arc::new(ProbeStats::new()),
            tick_interval: cfg.tick_interval,
            timeout_window: cfg.timeout_window,
            rng: StdRng::from_entropy(),
            recv_buf: vec![0u8; RECV_BUF_LEN].into_boxed_slice(),
        })
    }

    /// Shared outcome counters, for the periodic stats reporter.
    pub fn stats(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.stats)
    }

    /// Drive the engine until the token is cancelled.
    ///
    /// Pops the earliest deadline from the timer queue, sleeps until it,
    /// dispatches, and re-arms the slot from its scheduled (not actual)
    /// fire time. The tick slot runs one receive pass then one reaper
    /// pass; target slots send one probe each.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let start = tokio::time::Instant::now();

        self.timers.push(start + self.tick_interval, TimerSlot::Tick);
        for (idx, t) in self.targets.iter().enumerate() {
            self.timers.push(start + t.interval, TimerSlot::Target(idx));
        }

        info!(
            targets = self.targets.len(),
            tick_ms = self.tick_interval.as_millis() as u64,
            timeout_ms = self.timeout_window.as_millis() as u64,
            "engine started",
        );

        loop {
            // Every handler re-arms its own slot, so the queue can never
            // drain while the loop is running.
            let (fire_at, slot) = self.timers.pop().expect("timer queue is never empty");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(in_flight = self.store.len(), "engine stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(fire_at) => {}
            }

            match slot {
                TimerSlot::Tick => {
                    self.receive_pass();
                    self.reap(Instant::now());
                    self.timers.push(fire_at + self.tick_interval, TimerSlot::Tick);
                }
                TimerSlot::Target(idx) => {
                    self.send_probe(idx);
                    let interval = self.targets[idx].interval;
                    self.timers.push(fire_at + interval, TimerSlot::Target(idx));
                }
            }
        }
    }

    /// Build, transmit, and record one probe for the target at `idx`.
    fn send_probe(&mut self, idx: usize) {
        let (payload_min, payload_max) = {
            let t = &self.targets[idx];
            (t.payload_min, t.payload_max)
        };

        let len = wire::payload_len(payload_min, payload_max, &mut self.rng);
        let tag = Uuid::new_v4();
        let sent_at_ms = unix_millis(SystemTime::now());
        let sent_at = Instant::now();

        self.next_packet_id += 1;
        let packet_id = self.next_packet_id;

        let payload = wire::encode_probe(tag, sent_at_ms, packet_id, len, &mut self.rng);

        let slot = &self.targets[idx];
        if let Err(e) = slot.socket.try_send(&payload) {
            // Transient: the probe stays in flight and resolves as a loss
            // through the reaper; the cadence continues without backoff.
            warn!(name = %slot.name, addr = %slot.addr, error = %e, "probe send failed");
        }

        let inserted = self.store.insert(InFlightPacket {
            packet_id,
            target: slot.name.clone(),
            tag,
            sent_at_ms,
            sent_at,
        });
        debug_assert!(inserted, "packet ids are strictly increasing");

        self.stats.record_sent();
        self.sink.record(ProbeEvent::Sent {
            target: slot.name.clone(),
            tag,
            packet_id,
            len: payload.len(),
        });
    }

    /// Drain every target socket without blocking and correlate each echo.
    fn receive_pass(&mut self) {
        for idx in 0..self.targets.len() {
            loop {
                let n = match self.targets[idx].socket.try_recv(&mut self.recv_buf) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        // ICMP errors surface here on connected sockets;
                        // the probe itself resolves via the reaper.
                        debug!(name = %self.targets[idx].name, error = %e, "recv error");
                        break;
                    }
                };

                process_echo(
                    &mut self.store,
                    &*self.sink,
                    &self.stats,
                    &self.recv_buf[..n],
                    unix_millis(SystemTime::now()),
                );
            }
        }
    }

    /// Evict everything older than the timeout window, reporting losses.
    fn reap(&mut self, now: Instant) {
        reap_expired(
            &mut self.store,
            &*self.sink,
            &self.stats,
            now,
            self.timeout_window,
        );
    }
}

/// Correlate one received datagram against the store.
fn process_echo(
    store: &mut CorrelationStore,
    sink: &dyn ProbeSink,
    stats: &ProbeStats,
    data: &[u8],
    now_ms: u64,
) {
    let header = match wire::decode_echo(data) {
        Ok(header) => header,
        Err(e) => {
            debug!(error = %e, "dropping malformed datagram");
            stats.record_malformed();
            sink.record(ProbeEvent::Malformed { len: data.len() });
            return;
        }
    };

    // Absent means already matched, already reaped, or a foreign packet;
    // all three are dropped without a log.
    let Some(info) = store.take(header.packet_id) else {
        return;
    };

    let rtt_ms = now_ms as i64 - header.sent_at_ms as i64;
    let clock_anomaly = rtt_ms < 0;
    if clock_anomaly {
        warn!(
            name = %info.target,
            packet_id = header.packet_id,
            rtt_ms,
            "negative RTT, reporting flagged measurement",
        );
    }

    stats.record_matched();
    sink.record(ProbeEvent::Matched {
        target: info.target,
        tag: header.tag,
        packet_id: header.packet_id,
        len: data.len(),
        rtt_ms,
        clock_anomaly,
    });
}

/// Sweep the store and emit one loss event per evicted entry.
fn reap_expired(
    store: &mut CorrelationStore,
    sink: &dyn ProbeSink,
    stats: &ProbeStats,
    now: Instant,
    window: Duration,
) {
    for info in store.sweep_expired(now, window) {
        stats.record_lost();
        sink.record(ProbeEvent::Lost {
            target: info.target,
            tag: info.tag,
            packet_id: info.packet_id,
        });
    }
}

async fn resolve_target(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving target {host}:{port}"))?
        .next()
        .with_context(|| format!("no addresses for target {host}:{port}"))
}

fn unix_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[derive(Default, Clone)]
    struct RecordingSink {
        events: Rc<RefCell<Vec<ProbeEvent>>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<ProbeEvent> {
            self.events.borrow().clone()
        }
    }

    impl ProbeSink for RecordingSink {
        fn record(&self, event: ProbeEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    fn in_flight(id: u64, tag: Uuid, sent_at_ms: u64, sent_at: Instant) -> InFlightPacket {
        InFlightPacket {
            packet_id: id,
            target: "A".to_string(),
            tag,
            sent_at_ms,
            sent_at,
        }
    }

    fn echo_payload(tag: Uuid, sent_at_ms: u64, id: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(1);
        wire::encode_probe(tag, sent_at_ms, id, 64, &mut rng)
    }

    #[test]
    fn test_echo_within_window_matches_exactly_once() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();
        let tag = Uuid::new_v4();

        store.insert(in_flight(1, tag, 1_000, Instant::now()));
        let payload = echo_payload(tag, 1_000, 1);

        process_echo(&mut store, &sink, &stats, &payload, 1_042);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProbeEvent::Matched {
                target,
                packet_id,
                len,
                rtt_ms,
                clock_anomaly,
                ..
            } => {
                assert_eq!(target, "A");
                assert_eq!(*packet_id, 1);
                assert_eq!(*len, 64);
                assert_eq!(*rtt_ms, 42);
                assert!(!clock_anomaly);
            }
            other => panic!("expected Matched, got {other:?}"),
        }
        assert!(store.is_empty());

        // The same echo again finds nothing and is silently dropped.
        process_echo(&mut store, &sink, &stats, &payload, 1_050);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(stats.snapshot().matched, 1);
    }

    #[test]
    fn test_short_datagram_rejected() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();

        process_echo(&mut store, &sink, &stats, &[0u8; wire::HEADER_LEN - 1], 0);

        assert_eq!(
            sink.events(),
            vec![ProbeEvent::Malformed {
                len: wire::HEADER_LEN - 1
            }]
        );
        assert_eq!(stats.snapshot().malformed, 1);
    }

    #[test]
    fn test_unknown_packet_id_dropped_silently() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();

        let payload = echo_payload(Uuid::new_v4(), 500, 99);
        process_echo(&mut store, &sink, &stats, &payload, 600);

        assert!(sink.events().is_empty());
        assert_eq!(stats.snapshot().total(), 0);
    }

    #[test]
    fn test_negative_rtt_flagged_not_discarded() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();
        let tag = Uuid::new_v4();

        store.insert(in_flight(3, tag, 2_000, Instant::now()));
        let payload = echo_payload(tag, 2_000, 3);

        // Receiver clock behind the send stamp.
        process_echo(&mut store, &sink, &stats, &payload, 1_500);

        match &sink.events()[0] {
            ProbeEvent::Matched {
                rtt_ms,
                clock_anomaly,
                ..
            } => {
                assert_eq!(*rtt_ms, -500);
                assert!(clock_anomaly);
            }
            other => panic!("expected Matched, got {other:?}"),
        }
        assert_eq!(stats.snapshot().matched, 1);
    }

    #[test]
    fn test_matched_entry_is_never_reaped() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();
        let tag = Uuid::new_v4();
        let now = Instant::now();

        store.insert(in_flight(1, tag, 100, now - Duration::from_secs(120)));
        let payload = echo_payload(tag, 100, 1);
        process_echo(&mut store, &sink, &stats, &payload, 200);

        reap_expired(&mut store, &sink, &stats, now, Duration::from_secs(60));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProbeEvent::Matched { .. }));
    }

    #[test]
    fn test_reaped_entry_reports_loss_and_late_echo_is_dropped() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();
        let tag = Uuid::new_v4();
        let now = Instant::now();

        store.insert(in_flight(1, tag, 100, now - Duration::from_secs(120)));

        reap_expired(&mut store, &sink, &stats, now, Duration::from_secs(60));
        assert_eq!(
            sink.events(),
            vec![ProbeEvent::Lost {
                target: "A".to_string(),
                tag,
                packet_id: 1,
            }]
        );

        // The echo arrives after eviction: no success measurement.
        let payload = echo_payload(tag, 100, 1);
        process_echo(&mut store, &sink, &stats, &payload, 999_999);
        assert_eq!(sink.events().len(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.lost, 1);
        assert_eq!(snap.matched, 0);
    }

    #[test]
    fn test_timeout_window_boundary() {
        let mut store = CorrelationStore::new();
        let sink = RecordingSink::default();
        let stats = ProbeStats::new();
        let window = Duration::from_millis(60_000);
        let now = Instant::now();

        // 59999ms old: still inside the window, a reply matches.
        let tag_fresh = Uuid::new_v4();
        store.insert(in_flight(1, tag_fresh, 0, now - Duration::from_millis(59_999)));
        reap_expired(&mut store, &sink, &stats, now, window);
        assert!(sink.events().is_empty());

        let payload = echo_payload(tag_fresh, 0, 1);
        process_echo(&mut store, &sink, &stats, &payload, 59_999);
        assert!(matches!(sink.events()[0], ProbeEvent::Matched { .. }));

        // 60001ms old: the sweep evicts it first, the reply is dropped.
        let tag_stale = Uuid::new_v4();
        store.insert(in_flight(2, tag_stale, 0, now - Duration::from_millis(60_001)));
        reap_expired(&mut store, &sink, &stats, now, window);
        assert!(matches!(sink.events()[1], ProbeEvent::Lost { .. }));

        let payload = echo_payload(tag_stale, 0, 2);
        process_echo(&mut store, &sink, &stats, &payload, 60_002);
        assert_eq!(sink.events().len(), 2);
    }
}
