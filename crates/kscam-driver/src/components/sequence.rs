//! Sequence Worker
//!
//! Dedicated thread that drives repeated acquisition cycles until the
//! requested count is reached, a cycle fails, or a stop is requested.
//!
//! The stop and suspend flags each sit behind their own lock. Stop is
//! cooperative: it is observed between cycles, so an in-flight frame wait
//! still completes or times out first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use kscam_core::{CameraError, CameraResult, FrameMetadata};

/// Granularity of interval pacing and suspend polling.
const PACING_SLICE: Duration = Duration::from_millis(5);

/// One acquisition cycle, run repeatedly by the worker.
pub trait SequenceCycle: Send + Sync + 'static {
    /// Wait for one frame and deliver it.
    ///
    /// `Ok` with no frame (timeout) still counts as a cycle. `Err` ends the
    /// sequence.
    fn run_cycle(&self) -> CameraResult<()>;

    /// Called once on the worker thread after the last cycle.
    fn sequence_finished(&self, cycles: u64);
}

// =============================================================================
// Flags
// =============================================================================

/// Stop and suspend requests, each behind its own lock.
#[derive(Debug, Default)]
pub struct WorkerFlags {
    stop: Mutex<bool>,
    suspend: Mutex<bool>,
}

impl WorkerFlags {
    /// Stop requested.
    pub fn is_stopped(&self) -> bool {
        *self.stop.lock()
    }

    /// Request a stop at the next cycle boundary.
    pub fn set_stopped(&self) {
        *self.stop.lock() = true;
    }

    /// Delivery paused.
    pub fn is_suspended(&self) -> bool {
        *self.suspend.lock()
    }

    /// Pause or continue delivery.
    pub fn set_suspended(&self, suspended: bool) {
        *self.suspend.lock() = suspended;
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time view of the running (or last) sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SequenceSnapshot {
    /// Estimate from the last inter-frame interval
    pub frames_per_second: f64,
    /// Images delivered so far
    pub image_counter: u64,
    /// Set when the sequence starts
    pub start_time: Option<DateTime<Utc>>,
    /// Milliseconds since `start_time`
    pub elapsed_ms: f64,
}

#[derive(Debug, Default)]
struct StatsInner {
    start: Option<(DateTime<Utc>, Instant)>,
    counter: u64,
    fps: f64,
    stop_on_overflow: bool,
}

/// Frame-rate and counter bookkeeping for sequences.
#[derive(Debug, Default)]
pub struct SequenceStats {
    inner: Mutex<StatsInner>,
}

impl SequenceStats {
    /// Reset for a new sequence starting now.
    pub fn begin(&self, stop_on_overflow: bool) {
        *self.inner.lock() = StatsInner {
            start: Some((Utc::now(), Instant::now())),
            counter: 0,
            fps: 0.0,
            stop_on_overflow,
        };
    }

    /// Metadata for the next image, then advance the image counter.
    pub fn next_metadata(&self, camera_label: &str) -> FrameMetadata {
        let mut inner = self.inner.lock();
        let (start_time, elapsed_ms) = match inner.start {
            Some((wall, mono)) => (wall, mono.elapsed().as_secs_f64() * 1000.0),
            None => (Utc::now(), 0.0),
        };
        let metadata = FrameMetadata {
            camera_label: camera_label.to_string(),
            start_time,
            elapsed_ms,
            image_number: inner.counter,
        };
        inner.counter += 1;
        metadata
    }

    /// Update the frame-rate estimate from one cycle's wall-clock duration.
    pub fn record_frame_interval(&self, interval: Duration) {
        let ms = interval.as_secs_f64() * 1000.0;
        if ms > 0.0 {
            self.inner.lock().fps = 1000.0 / ms;
        }
    }

    /// Overflow policy of the current sequence.
    pub fn stop_on_overflow(&self) -> bool {
        self.inner.lock().stop_on_overflow
    }

    /// Copy of the current numbers.
    pub fn snapshot(&self) -> SequenceSnapshot {
        let inner = self.inner.lock();
        SequenceSnapshot {
            frames_per_second: inner.fps,
            image_counter: inner.counter,
            start_time: inner.start.map(|(wall, _)| wall),
            elapsed_ms: inner
                .start
                .map_or(0.0, |(_, mono)| mono.elapsed().as_secs_f64() * 1000.0),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

/// Handle to a running sequence thread.
pub struct SequenceWorker {
    flags: Arc<WorkerFlags>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SequenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceWorker")
            .field("flags", &self.flags)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SequenceWorker {
    /// Start a worker that runs at most `count` cycles (at least one), at
    /// most one per `interval`.
    pub fn spawn(
        cycle: Arc<dyn SequenceCycle>,
        count: u64,
        interval: Duration,
    ) -> CameraResult<Self> {
        let flags = Arc::new(WorkerFlags::default());
        let thread_flags = flags.clone();
        let count = count.max(1);

        let thread = std::thread::Builder::new()
            .name("kscam-sequence".into())
            .spawn(move || run(cycle, &thread_flags, count, interval))
            .map_err(|e| CameraError::Initialization(format!("sequence thread: {}", e)))?;

        Ok(Self {
            flags,
            thread: Some(thread),
        })
    }

    /// Flags shared with the worker thread.
    pub fn flags(&self) -> &Arc<WorkerFlags> {
        &self.flags
    }

    /// Stop requested.
    pub fn is_stopped(&self) -> bool {
        self.flags.is_stopped()
    }

    /// Whether the thread has not exited yet.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Pause delivery.
    pub fn suspend(&self) {
        self.flags.set_suspended(true);
    }

    /// Continue delivery.
    pub fn resume(&self) {
        self.flags.set_suspended(false);
    }

    /// Delivery paused.
    pub fn is_suspended(&self) -> bool {
        self.flags.is_suspended()
    }

    /// Request a stop and join the thread.
    pub fn stop(&mut self) {
        self.flags.set_stopped();
        self.join();
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!("sequence thread panicked");
        }
    }
}

impl Drop for SequenceWorker {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("SequenceWorker dropped while running; stopping");
        }
        self.stop();
    }
}

fn run(cycle: Arc<dyn SequenceCycle>, flags: &WorkerFlags, count: u64, interval: Duration) {
    let mut cycles = 0u64;
    tracing::debug!(count, ?interval, "sequence worker started");

    loop {
        if flags.is_stopped() {
            break;
        }
        if flags.is_suspended() {
            std::thread::sleep(PACING_SLICE);
            continue;
        }

        let started = Instant::now();
        let result = cycle.run_cycle();
        cycles += 1;

        if let Err(e) = result {
            tracing::error!(kind = %e.kind(), error = %e, cycles, "sequence cycle failed");
            break;
        }
        if flags.is_stopped() || cycles >= count {
            break;
        }
        pace(flags, interval.saturating_sub(started.elapsed()));
    }

    flags.set_stopped();
    tracing::debug!(cycles, "sequence worker exiting");
    cycle.sequence_finished(cycles);
}

/// Sleep out the remainder of the interval unless a stop arrives.
fn pace(flags: &WorkerFlags, remaining: Duration) {
    let deadline = Instant::now() + remaining;
    while !flags.is_stopped() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(PACING_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingCycle {
        runs: AtomicU64,
        finished: Mutex<Option<u64>>,
        fail_at: Option<u64>,
        delay: Duration,
    }

    impl SequenceCycle for CountingCycle {
        fn run_cycle(&self) -> CameraResult<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            std::thread::sleep(self.delay);
            if Some(n) == self.fail_at {
                return Err(CameraError::BufferOverflow);
            }
            Ok(())
        }

        fn sequence_finished(&self, cycles: u64) {
            *self.finished.lock() = Some(cycles);
        }
    }

    fn wait_for_exit(worker: &SequenceWorker) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_exactly_count_cycles() {
        let cycle = Arc::new(CountingCycle::default());
        let worker = SequenceWorker::spawn(cycle.clone(), 5, Duration::ZERO).unwrap();
        wait_for_exit(&worker);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 5);
        assert_eq!(*cycle.finished.lock(), Some(5));
        assert!(worker.is_stopped());
    }

    #[test]
    fn zero_count_still_runs_once() {
        let cycle = Arc::new(CountingCycle::default());
        let worker = SequenceWorker::spawn(cycle.clone(), 0, Duration::ZERO).unwrap();
        wait_for_exit(&worker);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_cycle_ends_sequence() {
        let cycle = Arc::new(CountingCycle {
            fail_at: Some(3),
            ..Default::default()
        });
        let worker = SequenceWorker::spawn(cycle.clone(), 100, Duration::ZERO).unwrap();
        wait_for_exit(&worker);
        assert_eq!(*cycle.finished.lock(), Some(3));
    }

    #[test]
    fn stop_joins_open_ended_sequence() {
        let cycle = Arc::new(CountingCycle {
            delay: Duration::from_millis(2),
            ..Default::default()
        });
        let mut worker = SequenceWorker::spawn(cycle.clone(), u64::MAX, Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        worker.stop();
        assert!(!worker.is_running());
        let finished = cycle.finished.lock().unwrap();
        assert_eq!(finished, cycle.runs.load(Ordering::SeqCst));
        // Second stop is harmless.
        worker.stop();
    }

    #[test]
    fn interval_paces_cycles() {
        let cycle = Arc::new(CountingCycle::default());
        let started = Instant::now();
        let worker =
            SequenceWorker::spawn(cycle.clone(), 3, Duration::from_millis(30)).unwrap();
        wait_for_exit(&worker);
        // Two full intervals separate three cycles.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn suspend_pauses_delivery() {
        let cycle = Arc::new(CountingCycle {
            delay: Duration::from_millis(1),
            ..Default::default()
        });
        let mut worker = SequenceWorker::spawn(cycle.clone(), u64::MAX, Duration::ZERO).unwrap();
        worker.suspend();
        std::thread::sleep(Duration::from_millis(20));
        let paused_at = cycle.runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cycle.runs.load(Ordering::SeqCst), paused_at);
        assert!(worker.is_suspended());

        worker.resume();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cycle.runs.load(Ordering::SeqCst) > paused_at);
        worker.stop();
    }

    #[test]
    fn stats_number_images_from_zero() {
        let stats = SequenceStats::default();
        stats.begin(true);
        let first = stats.next_metadata("KsCam");
        let second = stats.next_metadata("KsCam");
        assert_eq!(first.image_number, 0);
        assert_eq!(second.image_number, 1);
        assert!(second.elapsed_ms >= first.elapsed_ms);
        assert!(stats.stop_on_overflow());

        stats.record_frame_interval(Duration::from_millis(50));
        let snap = stats.snapshot();
        assert!((snap.frames_per_second - 20.0).abs() < 1e-9);
        assert_eq!(snap.image_counter, 2);
        assert!(snap.start_time.is_some());
    }
}
