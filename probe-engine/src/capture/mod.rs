//! Passive capture of radio frames on the monitored channel.
//!
//! Frames are observed on a dedicated thread and folded into [`SharedCounters`], which the main
//! loop reads and resets between probes. The frame path only ever increments atomics: it never
//! blocks, never allocates and never takes a lock.
//!
//! Counters are updated with relaxed ordering. A reader racing with the frame path may see a
//! frame reflected in one counter (e.g. `bytes_received`) but not yet in another (e.g.
//! `packets_total`); the skew is bounded by the frames in flight during the read, which is
//! acceptable for telemetry. The RSSI sum and count share a single atomic word, so an average
//! is never computed from a sum without its matching count.

pub mod pcap_source;
pub mod radiotap;

use crate::protocol::Protocol;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::time::Instant;

/// Frames weaker than this are counted as lost for the active protocol
pub const DEFAULT_LOSS_RSSI_THRESHOLD_DBM: i8 = -75;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Management,
    Control,
    Data,
    /// Extension or otherwise unclassifiable frames, which are ignored
    Unknown,
}

impl FrameKind {
    /// Classifies a frame by the type bits of its 802.11 frame control field
    pub fn from_frame_control(frame_control: u16) -> Self {
        match (frame_control >> 2) & 0b11 {
            0 => FrameKind::Management,
            1 => FrameKind::Control,
            2 => FrameKind::Data,
            _ => FrameKind::Unknown,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub kind: FrameKind,
    /// Signal strength in dBm, or 0 if the radio did not report it
    pub rssi_dbm: i8,
    /// Length of the 802.11 frame in bytes
    pub length: u32,
}

/// Cumulative passive-capture counters for a single protocol (never reset)
#[derive(Debug, Default)]
pub struct ProtocolCounters {
    packets_total: AtomicU64,
    packets_lost: AtomicU64,
}

impl ProtocolCounters {
    pub fn packets_total(&self) -> u64 {
        self.packets_total.load(Ordering::Relaxed)
    }

    pub fn packets_lost(&self) -> u64 {
        self.packets_lost.load(Ordering::Relaxed)
    }

    pub fn track_lost(&self) {
        self.packets_lost.fetch_add(1, Ordering::Relaxed);
    }
}

/// RSSI sum (upper 32 bits, two's complement) and sample count (lower 32 bits) in one word
#[derive(Debug, Default)]
struct PackedRssi(AtomicU64);

impl PackedRssi {
    fn add(&self, rssi_dbm: i8) {
        let delta = ((rssi_dbm as i32 as u32 as u64) << 32) | 1;
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    fn take(&self) -> (i64, u64) {
        Self::unpack(self.0.swap(0, Ordering::Relaxed))
    }

    fn load(&self) -> (i64, u64) {
        Self::unpack(self.0.load(Ordering::Relaxed))
    }

    fn unpack(word: u64) -> (i64, u64) {
        let sum = (word >> 32) as u32 as i32;
        let count = word as u32;
        (sum as i64, count as u64)
    }
}

/// Passive-capture counters that only cover the current window
#[derive(Debug)]
pub struct WindowCounters {
    rssi: PackedRssi,
    bytes_received: AtomicU64,
    // Only the main loop touches the start, so the frame path never contends on this lock
    start: Mutex<Instant>,
}

impl WindowCounters {
    fn new(start: Instant) -> Self {
        Self {
            rssi: PackedRssi::default(),
            bytes_received: AtomicU64::new(0),
            start: Mutex::new(start),
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let (rssi_sum, rssi_count) = self.rssi.load();
        WindowSnapshot {
            rssi_sum,
            rssi_count,
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            start: *self.start.lock(),
        }
    }

    /// Zeroes the window counters and starts a new window at `now`, returning the old window
    pub fn reset(&self, now: Instant) -> WindowSnapshot {
        let mut start = self.start.lock();
        let (rssi_sum, rssi_count) = self.rssi.take();
        let bytes_received = self.bytes_received.swap(0, Ordering::Relaxed);
        let old_start = std::mem::replace(&mut *start, now);
        WindowSnapshot {
            rssi_sum,
            rssi_count,
            bytes_received,
            start: old_start,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub rssi_sum: i64,
    pub rssi_count: u64,
    pub bytes_received: u64,
    pub start: Instant,
}

impl WindowSnapshot {
    /// Average RSSI of the window in dBm, truncated toward zero, or 0 without samples
    pub fn avg_rssi(&self) -> i32 {
        if self.rssi_count == 0 {
            return 0;
        }

        (self.rssi_sum / self.rssi_count as i64) as i32
    }
}

/// State shared between the capture thread and the main loop
#[derive(Debug)]
pub struct SharedCounters {
    active: AtomicUsize,
    protocols: [ProtocolCounters; Protocol::COUNT],
    window: WindowCounters,
}

impl SharedCounters {
    pub fn new(start: Instant) -> Self {
        Self {
            active: AtomicUsize::new(Protocol::Http.index()),
            protocols: Default::default(),
            window: WindowCounters::new(start),
        }
    }

    pub fn active_protocol(&self) -> Protocol {
        Protocol::from_index(self.active.load(Ordering::Relaxed))
    }

    pub(crate) fn set_active_protocol(&self, protocol: Protocol) {
        self.active.store(protocol.index(), Ordering::Relaxed);
    }

    pub fn protocol(&self, protocol: Protocol) -> &ProtocolCounters {
        &self.protocols[protocol.index()]
    }

    pub fn window(&self) -> &WindowCounters {
        &self.window
    }
}

/// Folds every observed frame into the shared counters, attributing it to the active protocol
#[derive(Clone, Debug)]
pub struct CaptureAccumulator {
    shared: Arc<SharedCounters>,
    loss_rssi_threshold_dbm: i8,
}

impl CaptureAccumulator {
    pub fn new(shared: Arc<SharedCounters>, loss_rssi_threshold_dbm: i8) -> Self {
        Self {
            shared,
            loss_rssi_threshold_dbm,
        }
    }

    pub fn on_frame(&self, frame: &CapturedFrame) {
        if frame.kind == FrameKind::Unknown {
            return;
        }

        let protocol = self.shared.protocol(self.shared.active_protocol());
        protocol.packets_total.fetch_add(1, Ordering::Relaxed);

        let window = &self.shared.window;
        if frame.rssi_dbm != 0 {
            window.rssi.add(frame.rssi_dbm);
        }

        // A weak signal is only a proxy for loss, not a confirmed delivery failure
        if frame.rssi_dbm < self.loss_rssi_threshold_dbm {
            protocol.packets_lost.fetch_add(1, Ordering::Relaxed);
        }

        window
            .bytes_received
            .fetch_add(frame.length as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn accumulator() -> (Arc<SharedCounters>, CaptureAccumulator) {
        let shared = Arc::new(SharedCounters::new(Instant::now()));
        let accumulator =
            CaptureAccumulator::new(shared.clone(), DEFAULT_LOSS_RSSI_THRESHOLD_DBM);
        (shared, accumulator)
    }

    fn frame(rssi_dbm: i8, length: u32) -> CapturedFrame {
        CapturedFrame {
            kind: FrameKind::Data,
            rssi_dbm,
            length,
        }
    }

    #[test]
    fn test_frame_control_type_bits() {
        assert_eq!(FrameKind::from_frame_control(0x0080), FrameKind::Management);
        assert_eq!(FrameKind::from_frame_control(0x00d4), FrameKind::Control);
        assert_eq!(FrameKind::from_frame_control(0x0888), FrameKind::Data);
        assert_eq!(FrameKind::from_frame_control(0x000c), FrameKind::Unknown);
    }

    #[test]
    fn test_frames_are_attributed_to_active_protocol() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&frame(-50, 10));

        shared.set_active_protocol(Protocol::Tcp);
        accumulator.on_frame(&frame(-50, 10));
        accumulator.on_frame(&frame(-50, 10));

        assert_eq!(shared.protocol(Protocol::Http).packets_total(), 1);
        assert_eq!(shared.protocol(Protocol::Tcp).packets_total(), 2);
        assert_eq!(shared.window().snapshot().bytes_received, 30);
    }

    #[test]
    fn test_weak_frames_count_as_lost() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&frame(-75, 10));
        accumulator.on_frame(&frame(-76, 10));
        accumulator.on_frame(&frame(-90, 10));

        let http = shared.protocol(Protocol::Http);
        assert_eq!(http.packets_total(), 3);
        assert_eq!(http.packets_lost(), 2);
    }

    #[test]
    fn test_missing_rssi_is_not_averaged() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&frame(0, 100));
        accumulator.on_frame(&frame(-40, 100));

        let window = shared.window().snapshot();
        assert_eq!(window.rssi_count, 1);
        assert_eq!(window.avg_rssi(), -40);
        assert_eq!(window.bytes_received, 200);
        assert_eq!(shared.protocol(Protocol::Http).packets_lost(), 0);
    }

    #[test]
    fn test_unknown_frames_are_ignored() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&CapturedFrame {
            kind: FrameKind::Unknown,
            rssi_dbm: -90,
            length: 100,
        });

        let window = shared.window().snapshot();
        assert_eq!(shared.protocol(Protocol::Http).packets_total(), 0);
        assert_eq!(shared.protocol(Protocol::Http).packets_lost(), 0);
        assert_eq!(window.rssi_count, 0);
        assert_eq!(window.bytes_received, 0);
    }

    #[test]
    fn test_avg_rssi_without_samples_is_zero() {
        let (shared, _) = accumulator();
        let window = shared.window().snapshot();
        assert_eq!(window.avg_rssi(), 0);
        assert_eq!(window.avg_rssi(), window.avg_rssi());
    }

    #[test]
    fn test_avg_rssi_truncates_toward_zero() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&frame(-60, 1));
        accumulator.on_frame(&frame(-61, 1));

        let window = shared.window().snapshot();
        assert_eq!(window.rssi_sum, -121);
        assert_eq!(window.avg_rssi(), -60);
    }

    #[test]
    fn test_packed_rssi_survives_many_negative_samples() {
        let rssi = PackedRssi::default();
        for _ in 0..100_000 {
            rssi.add(-127);
        }

        assert_eq!(rssi.load(), (-12_700_000, 100_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_keeps_cumulative_counters() {
        let (shared, accumulator) = accumulator();
        accumulator.on_frame(&frame(-80, 100));

        tokio::time::advance(Duration::from_secs(3)).await;
        let now = Instant::now();
        let old = shared.window().reset(now);
        assert_eq!(old.bytes_received, 100);
        assert_eq!(old.rssi_count, 1);

        let window = shared.window().snapshot();
        assert_eq!(window.rssi_sum, 0);
        assert_eq!(window.rssi_count, 0);
        assert_eq!(window.bytes_received, 0);
        assert_eq!(window.start, now);

        let http = shared.protocol(Protocol::Http);
        assert_eq!(http.packets_total(), 1);
        assert_eq!(http.packets_lost(), 1);
    }
}
