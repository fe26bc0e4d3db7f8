//! Clock sync engine: estimates clock offset between host and an MCU.
//!
//! Sends `TIME_SYNC_REQ` pings on its own schedule (5 Hz until 20 samples,
//! then 2 Hz), maintains a 16-sample sliding window, takes the offset from
//! the minimum-RTT sample below a 10 ms threshold, and tracks drift with
//! an exponential filter. State machine: unsynced → synced ↔ degraded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use rover_common::state::{ClockSyncState, SyncStatus};
use rover_common::time::mono_ns;
use rover_proto::time_sync::{build_time_sync_req, TimeSyncResp};
use rover_proto::types::TIME_SYNC_RESP;

use crate::transport::{TransportEvent, TransportHandle};

// ─── Constants ──────────────────────────────────────────────────────

const WINDOW_SIZE: usize = 16;
const INITIAL_HZ: f64 = 5.0;
const STEADY_HZ: f64 = 2.0;
const INITIAL_SAMPLE_COUNT: u64 = 20;
const PING_TIMEOUT_NS: u64 = 500_000_000;
/// Full-speed USB CDC round trips are typically 2–5 ms.
const RTT_THRESHOLD_NS: u64 = 10_000_000;
const STALE_TIMEOUT_NS: u64 = 5_000_000_000;
const MIN_SAMPLES_FOR_SYNCED: u64 = 5;
const CONSECUTIVE_BAD_RTT_FOR_DEGRADED: u32 = 10;
const DRIFT_ALPHA: f64 = 0.1;
const DRIFT_WARN_US_PER_S: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
struct SyncSample {
    rtt_ns: u64,
    offset_ns: i64,
}

/// Per-MCU clock sync engine. The I/O loop lives in [`run`]; the sample
/// and state-machine logic is synchronous and unit-testable.
pub struct ClockSyncEngine {
    transport: TransportHandle,
    shared: Arc<Mutex<ClockSyncState>>,
    label: &'static str,

    ping_seq: u32,
    pending: Option<PendingPing>,
    pkt_seq: u32,

    window: VecDeque<SyncSample>,
    total_samples: u64,
    consecutive_bad_rtt: u32,
    timed_out_pings: u64,

    prev_offset: Option<(i64, u64)>,
    drift_filtered: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    ping_seq: u32,
    t_tx_ns: u64,
}

impl ClockSyncEngine {
    pub fn new(transport: TransportHandle, label: &'static str) -> Self {
        Self {
            transport,
            shared: Arc::new(Mutex::new(ClockSyncState::default())),
            label,
            ping_seq: 0,
            pending: None,
            pkt_seq: 0,
            window: VecDeque::with_capacity(WINDOW_SIZE),
            total_samples: 0,
            consecutive_bad_rtt: 0,
            timed_out_pings: 0,
            prev_offset: None,
            drift_filtered: 0.0,
        }
    }

    /// Shared state read by the tick loop each tick.
    pub fn state_handle(&self) -> Arc<Mutex<ClockSyncState>> {
        self.shared.clone()
    }

    /// Run the sync loop. Call as a tokio task; cancelled on shutdown.
    pub async fn run(mut self) {
        info!("{}: clock sync started", self.label);
        let mut events = self.transport.subscribe();

        loop {
            let interval = if self.total_samples < INITIAL_SAMPLE_COUNT {
                Duration::from_secs_f64(1.0 / INITIAL_HZ)
            } else {
                Duration::from_secs_f64(1.0 / STEADY_HZ)
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let now = mono_ns();
                    if self.transport.connected() {
                        self.check_timeout(now);
                        self.send_ping(now);
                    }
                    self.check_stale(now);
                }
                evt = events.recv() => {
                    match evt {
                        Ok(TransportEvent::Packet(pkt)) if pkt.pkt_type == TIME_SYNC_RESP => {
                            match TimeSyncResp::parse(&pkt.payload) {
                                Some(resp) => self.on_response(
                                    resp.ping_seq,
                                    resp.t_src_us,
                                    pkt.t_rx_ns,
                                ),
                                None => warn!("{}: bad TIME_SYNC_RESP", self.label),
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!("{}: clock sync lagged {} events", self.label, n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    // ── Ping / pong ──────────────────────────────────────────────

    fn send_ping(&mut self, now_ns: u64) {
        if self.pending.is_some() {
            return;
        }
        self.ping_seq += 1;
        self.pending = Some(PendingPing { ping_seq: self.ping_seq, t_tx_ns: now_ns });

        let seq = self.pkt_seq;
        self.pkt_seq = self.pkt_seq.wrapping_add(1);
        let frame = build_time_sync_req(
            seq,
            self.ping_seq,
            self.transport.protocol_version(),
            now_ns / 1000,
        );
        self.transport.write(frame);
    }

    fn on_response(&mut self, ping_seq: u32, t_src_us: u64, t_rx_ns: u64) {
        let Some(pending) = self.pending else { return };
        if ping_seq != pending.ping_seq {
            return;
        }
        self.pending = None;

        let rtt_ns = t_rx_ns.saturating_sub(pending.t_tx_ns);
        let t_src_ns = (t_src_us as i64) * 1000;
        let offset_ns = t_rx_ns as i64 - t_src_ns - (rtt_ns / 2) as i64;

        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(SyncSample { rtt_ns, offset_ns });
        self.total_samples += 1;

        if rtt_ns > RTT_THRESHOLD_NS {
            self.consecutive_bad_rtt += 1;
        } else {
            self.consecutive_bad_rtt = 0;
        }

        if let Some(best) = self.min_rtt_sample() {
            self.update_drift(best.offset_ns, t_rx_ns);
            let mut shared = self.shared.lock();
            shared.offset_ns = best.offset_ns;
            shared.rtt_min_us = (best.rtt_ns / 1000) as u32;
            shared.last_sync_mono_ns = t_rx_ns;
        }

        {
            let mut shared = self.shared.lock();
            shared.samples = self.total_samples;
            shared.drift_us_per_s = self.drift_filtered;
        }

        self.update_state(t_rx_ns);
    }

    fn min_rtt_sample(&self) -> Option<SyncSample> {
        self.window
            .iter()
            .filter(|s| s.rtt_ns <= RTT_THRESHOLD_NS)
            .min_by_key(|s| s.rtt_ns)
            .copied()
    }

    // ── State machine ────────────────────────────────────────────

    fn update_state(&mut self, now_ns: u64) {
        let mut shared = self.shared.lock();
        let prev = shared.status;
        let good = self.min_rtt_sample().is_some();

        let next = match prev {
            SyncStatus::Unsynced if self.total_samples >= MIN_SAMPLES_FOR_SYNCED && good => {
                SyncStatus::Synced
            }
            SyncStatus::Synced if self.is_degraded(&shared, now_ns) => SyncStatus::Degraded,
            SyncStatus::Degraded if good => SyncStatus::Synced,
            other => other,
        };

        if next != prev {
            shared.status = next;
            info!(
                "{}: clock {:?} -> {:?} (samples={}, rtt_min={} us)",
                self.label, prev, next, self.total_samples, shared.rtt_min_us
            );
        }
    }

    fn is_degraded(&self, shared: &ClockSyncState, now_ns: u64) -> bool {
        if shared.last_sync_mono_ns > 0
            && now_ns.saturating_sub(shared.last_sync_mono_ns) > STALE_TIMEOUT_NS
        {
            return true;
        }
        self.consecutive_bad_rtt >= CONSECUTIVE_BAD_RTT_FOR_DEGRADED
    }

    // ── Timeout / stale ──────────────────────────────────────────

    fn check_timeout(&mut self, now_ns: u64) {
        let Some(pending) = self.pending else { return };
        if now_ns.saturating_sub(pending.t_tx_ns) > PING_TIMEOUT_NS {
            debug!("{}: ping {} timed out", self.label, pending.ping_seq);
            self.pending = None;
            self.timed_out_pings += 1;
        }
    }

    fn check_stale(&mut self, now_ns: u64) {
        let mut shared = self.shared.lock();
        if shared.status == SyncStatus::Synced && self.is_degraded(&shared, now_ns) {
            warn!("{}: clock sync degraded (stale or bad RTT)", self.label);
            shared.status = SyncStatus::Degraded;
        }
    }

    // ── Drift estimation ─────────────────────────────────────────

    fn update_drift(&mut self, offset_ns: i64, t_ns: u64) {
        if let Some((prev_offset, prev_t)) = self.prev_offset {
            let dt_ns = t_ns.saturating_sub(prev_t);
            if dt_ns > 0 {
                let d_offset_us = (offset_ns - prev_offset) as f64 / 1000.0;
                let dt_s = dt_ns as f64 / 1e9;
                let raw = d_offset_us / dt_s;
                self.drift_filtered = DRIFT_ALPHA * raw + (1.0 - DRIFT_ALPHA) * self.drift_filtered;
                if self.drift_filtered.abs() > DRIFT_WARN_US_PER_S {
                    warn!("{}: high drift {:.1} us/s", self.label, self.drift_filtered);
                }
            }
        }
        self.prev_offset = Some((offset_ns, t_ns));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::spawn_transport;

    fn engine() -> ClockSyncEngine {
        let transport = spawn_transport("/dev/null-clock".into(), 115_200, "clock-test");
        ClockSyncEngine::new(transport, "clock-test")
    }

    /// Drive one ping/pong with a controlled RTT.
    fn exchange(e: &mut ClockSyncEngine, t_tx_ns: u64, rtt_ns: u64, t_src_us: u64) {
        e.ping_seq += 1;
        e.pending = Some(PendingPing { ping_seq: e.ping_seq, t_tx_ns });
        e.on_response(e.ping_seq, t_src_us, t_tx_ns + rtt_ns);
    }

    #[tokio::test]
    async fn unsynced_until_five_samples() {
        let mut e = engine();
        for i in 0..4 {
            exchange(&mut e, i * 200_000_000, 3_000_000, 1000 * i);
            assert_eq!(e.shared.lock().status, SyncStatus::Unsynced);
        }
        exchange(&mut e, 900_000_000, 3_000_000, 5000);
        assert_eq!(e.shared.lock().status, SyncStatus::Synced);
        assert_eq!(e.shared.lock().samples, 5);
    }

    #[tokio::test]
    async fn offset_from_min_rtt_sample() {
        let mut e = engine();
        // Two good samples; the lower-RTT one should win.
        exchange(&mut e, 1_000_000_000, 4_000_000, 0);
        exchange(&mut e, 1_200_000_000, 2_000_000, 0);
        // offset = t_rx - t_src*1000 - rtt/2 for the 2 ms sample
        let expected = (1_200_000_000u64 + 2_000_000) as i64 - 0 - 1_000_000;
        assert_eq!(e.shared.lock().offset_ns, expected);
        assert_eq!(e.shared.lock().rtt_min_us, 2000);
    }

    #[tokio::test]
    async fn consecutive_bad_rtt_degrades() {
        let mut e = engine();
        for i in 0..6 {
            exchange(&mut e, i * 200_000_000, 3_000_000, 0);
        }
        assert_eq!(e.shared.lock().status, SyncStatus::Synced);

        // Bad-RTT samples push the good ones out of the window.
        for i in 0..CONSECUTIVE_BAD_RTT_FOR_DEGRADED as u64 + WINDOW_SIZE as u64 {
            exchange(&mut e, 2_000_000_000 + i * 200_000_000, 50_000_000, 0);
        }
        assert_eq!(e.shared.lock().status, SyncStatus::Degraded);

        // One good sample recovers.
        exchange(&mut e, 20_000_000_000, 1_000_000, 0);
        assert_eq!(e.shared.lock().status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn stale_response_degrades() {
        let mut e = engine();
        for i in 0..6 {
            exchange(&mut e, i * 200_000_000, 3_000_000, 0);
        }
        assert_eq!(e.shared.lock().status, SyncStatus::Synced);

        let last = e.shared.lock().last_sync_mono_ns;
        e.check_stale(last + STALE_TIMEOUT_NS + 1);
        assert_eq!(e.shared.lock().status, SyncStatus::Degraded);
    }

    #[tokio::test]
    async fn ping_timeout_drops_pending() {
        let mut e = engine();
        e.pending = Some(PendingPing { ping_seq: 1, t_tx_ns: 0 });
        e.check_timeout(PING_TIMEOUT_NS + 1);
        assert!(e.pending.is_none());
        assert_eq!(e.timed_out_pings, 1);
    }

    #[tokio::test]
    async fn mismatched_ping_seq_ignored() {
        let mut e = engine();
        e.pending = Some(PendingPing { ping_seq: 7, t_tx_ns: 0 });
        e.on_response(6, 0, 1_000_000);
        assert!(e.pending.is_some());
        assert_eq!(e.total_samples, 0);
    }

    #[tokio::test]
    async fn samples_counter_monotonic() {
        let mut e = engine();
        let mut last = 0;
        for i in 0..30 {
            exchange(&mut e, i * 100_000_000, 3_000_000, 0);
            let now = e.shared.lock().samples;
            assert!(now > last);
            last = now;
        }
        assert_eq!(e.window.len(), WINDOW_SIZE);
    }
}
