//! Seams to the embedding host: still-image decode, task posting and the
//! display surface.
//!
//! The engine never decompresses PNG image data itself; it hands each
//! reconstructed single-frame stream to a [`PixelDecoder`]. Cross-thread
//! handoff goes through a [`TaskRunner`]: one UI-affine controlling thread
//! plus a bounded worker pool. Defaults backed by the `image` crate and
//! `std::thread` are provided so the engine runs stand-alone.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::pixel::PixelBuffer;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Opaque, cheaply clonable handle to whatever the host presents on screen.
#[derive(Clone)]
pub struct NativeImage(Arc<dyn Any + Send + Sync>);

impl NativeImage {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for NativeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NativeImage")
    }
}

/// Host still-image decode primitives.
pub trait PixelDecoder: Send + Sync {
    /// Decodes an encoded image into an RGBA buffer; `None` on malformed
    /// data. A `None` here fails one frame, never the whole animation.
    fn decode(&self, bytes: &[u8]) -> Option<PixelBuffer>;

    /// Builds the presentable handle for a full-canvas snapshot.
    fn to_native(&self, pixels: &PixelBuffer) -> Option<NativeImage>;
}

/// Task posting: the UI-affine controlling thread and the worker pool.
pub trait TaskRunner: Send + Sync {
    /// Queues `task` on the controlling thread after `delay`.
    fn post_to_main(&self, delay: Duration, task: Task);

    /// Queues `task` on the worker pool.
    fn post_to_worker(&self, task: Task);
}

/// The surface an animation plays on, plus its notification callbacks.
pub trait DisplaySurface: Send + Sync {
    fn set_image(&self, image: NativeImage);

    fn on_animation_start(&self) {}
    fn on_animation_end(&self) {}
    fn on_load_failure(&self) {}
}

/// Default decoder backed by the `image` crate's PNG codec.
pub struct ImageRsDecoder;

impl PixelDecoder for ImageRsDecoder {
    fn decode(&self, bytes: &[u8]) -> Option<PixelBuffer> {
        match image::load_from_memory_with_format(bytes, image::ImageFormat::Png) {
            Ok(img) => {
                let rgba = img.into_rgba8();
                let (w, h) = rgba.dimensions();
                PixelBuffer::from_raw(w, h, rgba.into_raw())
            }
            Err(e) => {
                log::warn!("frame stream failed to decode: {e}");
                None
            }
        }
    }

    fn to_native(&self, pixels: &PixelBuffer) -> Option<NativeImage> {
        Some(NativeImage::new(pixels.clone()))
    }
}

struct TimedTask {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimedTask {}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedTask {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Thread-backed [`TaskRunner`]: a dedicated controlling thread draining a
/// deadline queue, and a small fixed pool of workers.
pub struct ThreadedHost {
    main_tx: Sender<TimedTask>,
    worker_tx: Sender<Task>,
    seq: Mutex<u64>,
}

impl ThreadedHost {
    pub fn new(workers: usize) -> Arc<Self> {
        let (main_tx, main_rx) = mpsc::channel::<TimedTask>();
        thread::Builder::new()
            .name("apng-main".into())
            .spawn(move || run_main_loop(main_rx))
            .expect("spawn controlling thread");

        let (worker_tx, worker_rx) = mpsc::channel::<Task>();
        let worker_rx = Arc::new(Mutex::new(worker_rx));
        for i in 0..workers.max(1) {
            let rx = Arc::clone(&worker_rx);
            thread::Builder::new()
                .name(format!("apng-worker-{i}"))
                .spawn(move || loop {
                    let task = {
                        let guard = rx.lock();
                        guard.recv()
                    };
                    match task {
                        Ok(task) => task(),
                        Err(_) => break,
                    }
                })
                .expect("spawn worker thread");
        }

        Arc::new(Self {
            main_tx,
            worker_tx,
            seq: Mutex::new(0),
        })
    }
}

fn run_main_loop(rx: Receiver<TimedTask>) {
    let mut queue: BinaryHeap<TimedTask> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while queue.peek().is_some_and(|t| t.due <= now) {
            let t = queue.pop().expect("peeked");
            (t.task)();
        }
        let wait = queue
            .peek()
            .map(|t| t.due.saturating_duration_since(Instant::now()));
        match wait {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(t) => queue.push(t),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(t) => queue.push(t),
                Err(_) => break,
            },
        }
    }
}

impl TaskRunner for ThreadedHost {
    fn post_to_main(&self, delay: Duration, task: Task) {
        let seq = {
            let mut seq = self.seq.lock();
            *seq += 1;
            *seq
        };
        let timed = TimedTask {
            due: Instant::now() + delay,
            seq,
            task,
        };
        if self.main_tx.send(timed).is_err() {
            log::warn!("controlling thread is gone, task dropped");
        }
    }

    fn post_to_worker(&self, task: Task) {
        if self.worker_tx.send(task).is_err() {
            log::warn!("worker pool is gone, task dropped");
        }
    }
}
