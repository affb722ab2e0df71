//! Test support: a deterministic task runner with a virtual clock, a
//! recording display surface, and a synthetic APNG builder whose frames
//! use stored (uncompressed) deflate blocks so any PNG codec can read
//! them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apng_player::chunk::{ChunkWriter, ACTL, FCTL, FDAT, IDAT, IEND, IHDR};
use apng_player::{DisplaySurface, NativeImage, PixelBuffer, Task, TaskRunner};

struct MainTask {
    due: u64,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Inner {
    now_ms: u64,
    seq: u64,
    main: Vec<MainTask>,
    workers: VecDeque<Task>,
    worker_posts: u64,
}

/// Runner with a virtual clock; nothing executes until the test drives it.
#[derive(Default)]
pub struct ManualHost {
    inner: Mutex<Inner>,
}

impl ManualHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.lock().unwrap().now_ms
    }

    /// Number of tasks ever posted to the worker pool.
    pub fn worker_posts(&self) -> u64 {
        self.inner.lock().unwrap().worker_posts
    }

    fn pop_worker(&self) -> Option<Task> {
        self.inner.lock().unwrap().workers.pop_front()
    }

    fn pop_due_main(&self) -> Option<Task> {
        let mut inner = self.inner.lock().unwrap();
        let now = inner.now_ms;
        let idx = inner
            .main
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        Some(inner.main.remove(idx).task)
    }

    fn next_main_due(&self) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        inner.main.iter().map(|t| t.due).min()
    }

    /// Runs every worker task and every already-due main task. Does not
    /// move the clock.
    pub fn settle(&self) {
        loop {
            if let Some(task) = self.pop_worker() {
                task();
            } else if let Some(task) = self.pop_due_main() {
                task();
            } else {
                break;
            }
        }
    }

    /// Moves the clock forward by `ms`, executing tasks in deadline order
    /// along the way.
    pub fn advance(&self, ms: u64) {
        let target = self.now_ms() + ms;
        loop {
            self.settle();
            match self.next_main_due() {
                Some(due) if due <= target => {
                    self.inner.lock().unwrap().now_ms = due;
                }
                _ => break,
            }
        }
        self.inner.lock().unwrap().now_ms = target;
        self.settle();
    }
}

impl TaskRunner for ManualHost {
    fn post_to_main(&self, delay: Duration, task: Task) {
        let mut inner = self.inner.lock().unwrap();
        inner.seq += 1;
        let due = inner.now_ms + delay.as_millis() as u64;
        let seq = inner.seq;
        inner.main.push(MainTask { due, seq, task });
    }

    fn post_to_worker(&self, task: Task) {
        let mut inner = self.inner.lock().unwrap();
        inner.worker_posts += 1;
        inner.workers.push_back(task);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// (virtual time, top-left pixel of the presented canvas)
    Frame(u64, [u8; 4]),
    Start(u64),
    End(u64),
    LoadFailed(u64),
}

pub struct RecordingSurface {
    host: Arc<ManualHost>,
    pub events: Mutex<Vec<Event>>,
}

impl RecordingSurface {
    pub fn new(host: Arc<ManualHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn presented_pixels(&self) -> Vec<[u8; 4]> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Frame(_, px) => Some(px),
                _ => None,
            })
            .collect()
    }
}

impl DisplaySurface for RecordingSurface {
    fn set_image(&self, image: NativeImage) {
        let px = image
            .downcast_ref::<PixelBuffer>()
            .map(|buf| buf.pixel(0, 0))
            .unwrap_or([0; 4]);
        self.events
            .lock()
            .unwrap()
            .push(Event::Frame(self.host.now_ms(), px));
    }

    fn on_animation_start(&self) {
        let now = self.host.now_ms();
        self.events.lock().unwrap().push(Event::Start(now));
    }

    fn on_animation_end(&self) {
        let now = self.host.now_ms();
        self.events.lock().unwrap().push(Event::End(now));
    }

    fn on_load_failure(&self) {
        let now = self.host.now_ms();
        self.events.lock().unwrap().push(Event::LoadFailed(now));
    }
}

fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % 65521;
        b = (b + a) % 65521;
    }
    (b << 16) | a
}

/// Zlib stream using stored deflate blocks only.
fn zlib_stored(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x78, 0x01];
    let mut chunks = data.chunks(65535).peekable();
    if data.is_empty() {
        out.extend_from_slice(&[0x01, 0x00, 0x00, 0xff, 0xff]);
    }
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        out.push(if last { 0x01 } else { 0x00 });
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&adler32(data).to_be_bytes());
    out
}

/// Compressed image data for a solid-color RGBA8 rect.
pub fn solid_frame_data(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(height as usize * (1 + width as usize * 4));
    for _ in 0..height {
        raw.push(0); // filter: none
        for _ in 0..width {
            raw.extend_from_slice(&rgba);
        }
    }
    zlib_stored(&raw)
}

pub struct TestFrame {
    pub rect: (u32, u32, u32, u32), // left, top, width, height
    pub delay: (u16, u16),          // numerator, denominator
    pub dispose: u8,
    pub blend: u8,
    pub rgba: [u8; 4],
}

impl TestFrame {
    pub fn full(width: u32, height: u32, delay_num: u16, rgba: [u8; 4]) -> Self {
        Self {
            rect: (0, 0, width, height),
            delay: (delay_num, 100),
            dispose: 0,
            blend: 0,
            rgba,
        }
    }
}

/// Assembles a complete APNG byte stream.
pub fn build_apng(width: u32, height: u32, num_plays: u32, frames: &[TestFrame]) -> Vec<u8> {
    let mut w = ChunkWriter::new();
    w.signature();

    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);
    w.chunk(IHDR, &ihdr);

    let mut actl = Vec::new();
    actl.extend_from_slice(&(frames.len() as u32).to_be_bytes());
    actl.extend_from_slice(&num_plays.to_be_bytes());
    w.chunk(ACTL, &actl);

    let mut seq = 0u32;
    for (i, frame) in frames.iter().enumerate() {
        let (left, top, fw, fh) = frame.rect;
        let mut fctl = Vec::new();
        fctl.extend_from_slice(&seq.to_be_bytes());
        seq += 1;
        fctl.extend_from_slice(&fw.to_be_bytes());
        fctl.extend_from_slice(&fh.to_be_bytes());
        fctl.extend_from_slice(&left.to_be_bytes());
        fctl.extend_from_slice(&top.to_be_bytes());
        fctl.extend_from_slice(&frame.delay.0.to_be_bytes());
        fctl.extend_from_slice(&frame.delay.1.to_be_bytes());
        fctl.push(frame.dispose);
        fctl.push(frame.blend);
        w.chunk(FCTL, &fctl);

        let data = solid_frame_data(fw, fh, frame.rgba);
        if i == 0 {
            w.chunk(IDAT, &data);
        } else {
            let mut fdat = Vec::new();
            fdat.extend_from_slice(&seq.to_be_bytes());
            seq += 1;
            fdat.extend_from_slice(&data);
            w.chunk(FDAT, &fdat);
        }
    }

    w.chunk(IEND, &[]);
    w.into_bytes()
}
