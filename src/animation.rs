//! The decoded animation shared between the decode worker, the cache and
//! playback sessions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::NativeImage;
use crate::pixel::PixelBuffer;

/// A fully-resolved, presentable canvas snapshot.
///
/// Produced strictly in index order by the compositor. `next_delay_ms` is
/// the delay to apply before advancing past this frame; for the last frame
/// it equals the frame's own delay (the hold duration), which is settled
/// only when parsing completes, hence the atomics.
pub struct CompositedFrame {
    pub index: usize,
    pub pixels: PixelBuffer,
    pub native: NativeImage,
    pub delay_ms: u64,
    next_delay_ms: AtomicU64,
    is_last: AtomicBool,
}

impl CompositedFrame {
    pub fn new(
        index: usize,
        pixels: PixelBuffer,
        native: NativeImage,
        delay_ms: u64,
        next_delay_ms: u64,
    ) -> Self {
        Self {
            index,
            pixels,
            native,
            delay_ms,
            next_delay_ms: AtomicU64::new(next_delay_ms),
            is_last: AtomicBool::new(false),
        }
    }

    pub fn next_delay_ms(&self) -> u64 {
        self.next_delay_ms.load(Ordering::Acquire)
    }

    pub fn is_last(&self) -> bool {
        self.is_last.load(Ordering::Acquire)
    }

    fn mark_last(&self) {
        self.is_last.store(true, Ordering::Release);
        self.next_delay_ms.store(self.delay_ms, Ordering::Release);
    }
}

#[derive(Default)]
struct ImageInfo {
    width: u32,
    height: u32,
    loop_count: u32,
    duration_ms: u64,
}

/// A decoded (or still-decoding) animation.
///
/// Created empty by the fetch coordinator, populated on a worker thread,
/// read by playback sessions at presentation time. The composited frame
/// list is the one structure touched from both sides, so it sits behind a
/// mutex; everything else is write-once metadata or an atomic flag.
pub struct AnimatedImage {
    info: Mutex<ImageInfo>,
    frames: Mutex<Vec<Arc<CompositedFrame>>>,
    parsing: AtomicBool,
    valid: AtomicBool,
}

impl AnimatedImage {
    pub(crate) fn new() -> Self {
        Self {
            info: Mutex::new(ImageInfo::default()),
            frames: Mutex::new(Vec::new()),
            parsing: AtomicBool::new(true),
            valid: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_info(&self, width: u32, height: u32, loop_count: u32, duration_ms: u64) {
        let mut info = self.info.lock();
        info.width = width;
        info.height = height;
        info.loop_count = loop_count;
        info.duration_ms = duration_ms;
    }

    pub fn width(&self) -> u32 {
        self.info.lock().width
    }

    pub fn height(&self) -> u32 {
        self.info.lock().height
    }

    /// Declared number of plays, 0 meaning infinite.
    pub fn loop_count(&self) -> u32 {
        self.info.lock().loop_count
    }

    /// Nominal duration of one loop in milliseconds.
    pub fn nominal_duration_ms(&self) -> u64 {
        self.info.lock().duration_ms
    }

    /// True from decode start until the parser has walked every frame.
    pub fn is_parsing(&self) -> bool {
        self.parsing.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frame(&self, index: usize) -> Option<Arc<CompositedFrame>> {
        self.frames.lock().get(index).cloned()
    }

    /// Appends the next composited frame. Frames arrive strictly in
    /// ascending index order from a single worker.
    pub(crate) fn push_frame(&self, frame: CompositedFrame) {
        let mut frames = self.frames.lock();
        debug_assert!(frames.last().map_or(true, |f| f.index < frame.index));
        frames.push(Arc::new(frame));
        self.valid.store(true, Ordering::Release);
    }

    /// Marks parse completion and finalises the last frame's hold delay.
    pub(crate) fn finish_parsing(&self) {
        {
            let frames = self.frames.lock();
            if let Some(last) = frames.last() {
                last.mark_last();
            }
        }
        self.parsing.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info.lock();
        f.debug_struct("AnimatedImage")
            .field("width", &info.width)
            .field("height", &info.height)
            .field("loop_count", &info.loop_count)
            .field("frames", &self.frames.lock().len())
            .field("parsing", &self.is_parsing())
            .finish()
    }
}
