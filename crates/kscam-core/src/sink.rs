//! Frame sinks - where sequence frames are delivered.
//!
//! The acquisition controller pushes every sequence frame into a
//! [`FrameSink`] together with its [`FrameMetadata`]. A sink that is full
//! answers [`CameraError::BufferOverflow`]; the controller then decides,
//! depending on its stop-on-overflow setting, whether to clear the sink and
//! retry once or to abort the sequence.
//!
//! Sinks are called from the sequence worker thread, so all methods are
//! synchronous and must not block for long.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use crate::data::{Frame, FrameMetadata};
use crate::error::{CameraError, CameraResult};

/// Consumer of sequence frames.
pub trait FrameSink: Send + Sync {
    /// Called once before a sequence starts.
    fn prepare_for_acquisition(&self) -> CameraResult<()> {
        Ok(())
    }

    /// Accept one frame.
    ///
    /// Returns `Err(CameraError::BufferOverflow)` when no room is left.
    fn insert_image(&self, frame: &Frame, metadata: &FrameMetadata) -> CameraResult<()>;

    /// Discard every buffered frame.
    fn clear_buffer(&self);

    /// Called once after the sequence worker exits.
    fn acquisition_finished(&self) {}

    /// Sink name for logging.
    fn name(&self) -> &'static str {
        "frame_sink"
    }
}

#[derive(Debug, Default)]
struct SinkState {
    frames: VecDeque<(Frame, FrameMetadata)>,
    inserted: u64,
    overflows: u64,
    sequences_finished: u64,
}

/// In-memory FIFO sink with a fixed capacity.
#[derive(Debug)]
pub struct BoundedFrameSink {
    capacity: usize,
    state: Mutex<SinkState>,
    finished: Condvar,
}

impl BoundedFrameSink {
    /// Create a sink that holds at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(SinkState::default()),
            finished: Condvar::new(),
        }
    }

    /// Maximum number of buffered frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// True when no frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest buffered frame.
    pub fn pop(&self) -> Option<(Frame, FrameMetadata)> {
        self.state.lock().frames.pop_front()
    }

    /// Take every buffered frame, oldest first.
    pub fn drain(&self) -> Vec<(Frame, FrameMetadata)> {
        self.state.lock().frames.drain(..).collect()
    }

    /// Frames accepted since creation.
    pub fn inserted(&self) -> u64 {
        self.state.lock().inserted
    }

    /// Inserts rejected because the sink was full.
    pub fn overflows(&self) -> u64 {
        self.state.lock().overflows
    }

    /// Number of sequences that reported completion.
    pub fn sequences_finished(&self) -> u64 {
        self.state.lock().sequences_finished
    }

    /// Block until `acquisition_finished` has been called at least `count`
    /// times in total, or until `timeout` expires. Returns whether it was.
    pub fn wait_finished(&self, count: u64, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.sequences_finished >= count {
            return true;
        }
        let result = self.finished.wait_while_for(
            &mut state,
            |s| s.sequences_finished < count,
            timeout,
        );
        !result.timed_out() || state.sequences_finished >= count
    }
}

impl FrameSink for BoundedFrameSink {
    fn prepare_for_acquisition(&self) -> CameraResult<()> {
        tracing::debug!(capacity = self.capacity, "sink prepared for acquisition");
        Ok(())
    }

    fn insert_image(&self, frame: &Frame, metadata: &FrameMetadata) -> CameraResult<()> {
        let mut state = self.state.lock();
        if state.frames.len() >= self.capacity {
            state.overflows += 1;
            return Err(CameraError::BufferOverflow);
        }
        state.frames.push_back((frame.clone(), metadata.clone()));
        state.inserted += 1;
        Ok(())
    }

    fn clear_buffer(&self) {
        let mut state = self.state.lock();
        let dropped = state.frames.len();
        state.frames.clear();
        tracing::debug!(dropped, "sink cleared");
    }

    fn acquisition_finished(&self) {
        let mut state = self.state.lock();
        state.sequences_finished += 1;
        self.finished.notify_all();
    }

    fn name(&self) -> &'static str {
        "bounded_frame_sink"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(n: u64) -> (Frame, FrameMetadata) {
        let frame = Frame {
            width: 1,
            height: 1,
            bytes_per_pixel: 2,
            components: 1,
            bit_depth: 16,
            data: vec![0, 0],
            frame_number: n,
            timestamp: Utc::now(),
        };
        let md = FrameMetadata {
            camera_label: "KsCam".into(),
            start_time: Utc::now(),
            elapsed_ms: 0.0,
            image_number: n,
        };
        (frame, md)
    }

    #[test]
    fn overflow_when_full() {
        let sink = BoundedFrameSink::new(2);
        for n in 0..2 {
            let (f, m) = frame(n);
            sink.insert_image(&f, &m).unwrap();
        }
        let (f, m) = frame(2);
        assert_eq!(sink.insert_image(&f, &m), Err(CameraError::BufferOverflow));
        assert_eq!(sink.overflows(), 1);

        sink.clear_buffer();
        assert!(sink.is_empty());
        sink.insert_image(&f, &m).unwrap();
        assert_eq!(sink.pop().map(|(f, _)| f.frame_number), Some(2));
        assert_eq!(sink.inserted(), 3);
    }

    #[test]
    fn wait_finished_wakes_on_signal() {
        let sink = std::sync::Arc::new(BoundedFrameSink::new(1));
        let handle = std::thread::spawn({
            let sink = sink.clone();
            move || sink.wait_finished(1, Duration::from_secs(2))
        });
        std::thread::sleep(Duration::from_millis(20));
        sink.acquisition_finished();
        assert!(handle.join().unwrap());
        assert!(!sink.wait_finished(2, Duration::from_millis(10)));
    }
}
