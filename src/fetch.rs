//! Fetch-and-cache coordination.
//!
//! Maps a source path to an [`AnimatedImage`], single-flights concurrent
//! requests for the same path and evicts cache entries after a bounded
//! lifetime. `fetch` is called on the controlling thread; decode runs on
//! the worker pool and every completion is marshalled back through the
//! controlling thread's task queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::animation::AnimatedImage;
use crate::compositor::FrameCompositor;
use crate::host::{PixelDecoder, TaskRunner};
use crate::parser;

/// How long a decoded animation stays cached after insertion.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// Result callback; `None` means the source failed to decode.
pub type FetchCallback = Box<dyn FnOnce(Option<Arc<AnimatedImage>>) + Send>;

struct CacheEntry {
    image: Arc<AnimatedImage>,
    epoch: u64,
}

#[derive(Default)]
struct CoordinatorState {
    cache: HashMap<PathBuf, CacheEntry>,
    pending: HashMap<PathBuf, Vec<FetchCallback>>,
    epoch: u64,
}

/// The public entry point of the engine.
pub struct FetchCoordinator {
    runner: Arc<dyn TaskRunner>,
    decoder: Arc<dyn PixelDecoder>,
    state: Mutex<CoordinatorState>,
    this: Weak<FetchCoordinator>,
}

impl FetchCoordinator {
    pub fn new(runner: Arc<dyn TaskRunner>, decoder: Arc<dyn PixelDecoder>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            runner,
            decoder,
            state: Mutex::new(CoordinatorState::default()),
            this: this.clone(),
        })
    }

    /// Resolves `path` to an [`AnimatedImage`].
    ///
    /// Cache hits call back synchronously. An in-flight decode for the
    /// same path absorbs this request; otherwise one decode task is
    /// submitted to the worker pool. The callback fires on the controlling
    /// thread as soon as the first frame is composited, while remaining
    /// frames continue decoding in the background.
    pub fn fetch(
        &self,
        path: &Path,
        on_result: impl FnOnce(Option<Arc<AnimatedImage>>) + Send + 'static,
    ) {
        let on_result: FetchCallback = Box::new(on_result);
        let hit = {
            let mut state = self.state.lock();
            if let Some(entry) = state.cache.get(path) {
                log::debug!("cache hit for {}", path.display());
                Some((Arc::clone(&entry.image), on_result))
            } else if let Some(waiters) = state.pending.get_mut(path) {
                log::debug!("joining in-flight decode for {}", path.display());
                waiters.push(on_result);
                return;
            } else {
                state.pending.insert(path.to_owned(), vec![on_result]);
                None
            }
        };

        if let Some((image, on_result)) = hit {
            return on_result(Some(image));
        }

        let Some(this) = self.this.upgrade() else { return };
        let path = path.to_owned();
        self.runner.post_to_worker(Box::new(move || {
            this.decode_job(path);
        }));
    }

    /// Worker-thread decode: read, parse, composite, marshal results back.
    fn decode_job(self: Arc<Self>, path: PathBuf) {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("could not read {}: {e}", path.display());
                return self.post_completion(path, None);
            }
        };

        let parsed = match parser::parse(&bytes) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("decode of {} failed: {e}", path.display());
                return self.post_completion(path, None);
            }
        };

        let image = Arc::new(AnimatedImage::new());
        image.set_info(
            parsed.width,
            parsed.height,
            parsed.loop_count,
            parsed.nominal_duration_ms(),
        );

        // One-shot: waiters are released on the first composited frame so
        // playback can begin while the rest of the animation decodes.
        let notified = AtomicBool::new(false);
        let emitted = FrameCompositor::new(&parsed, self.decoder.as_ref()).run(|frame| {
            image.push_frame(frame);
            if !notified.swap(true, Ordering::AcqRel) {
                self.post_completion(path.clone(), Some(Arc::clone(&image)));
            }
        });
        image.finish_parsing();

        if emitted == 0 {
            log::warn!("no frame of {} decoded", path.display());
            self.post_completion(path, None);
        }
    }

    fn post_completion(&self, path: PathBuf, result: Option<Arc<AnimatedImage>>) {
        let Some(this) = self.this.upgrade() else { return };
        self.runner.post_to_main(
            Duration::ZERO,
            Box::new(move || this.complete(path, result)),
        );
    }

    /// Controlling thread: drain waiters, insert into cache, arm eviction.
    fn complete(&self, path: PathBuf, result: Option<Arc<AnimatedImage>>) {
        let (waiters, arm_eviction) = {
            let mut state = self.state.lock();
            // Requests arriving after this point start a fresh decode.
            let waiters = state.pending.remove(&path).unwrap_or_default();
            let mut arm = None;
            if let Some(image) = &result {
                state.epoch += 1;
                let epoch = state.epoch;
                state.cache.insert(
                    path.clone(),
                    CacheEntry {
                        image: Arc::clone(image),
                        epoch,
                    },
                );
                arm = Some(epoch);
            }
            (waiters, arm)
        };

        if let (Some(epoch), Some(this)) = (arm_eviction, self.this.upgrade()) {
            let path = path.clone();
            self.runner
                .post_to_main(CACHE_TTL, Box::new(move || this.evict(path, epoch)));
        }
        for waiter in waiters {
            waiter(result.clone());
        }
    }

    /// Drops an expired entry; pixel-heavy teardown runs on the worker
    /// pool so the controlling thread never blocks freeing large buffers.
    fn evict(&self, path: PathBuf, epoch: u64) {
        let removed = {
            let mut state = self.state.lock();
            match state.cache.get(&path) {
                Some(entry) if entry.epoch == epoch => state.cache.remove(&path),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            log::debug!("evicting {}", path.display());
            self.runner.post_to_worker(Box::new(move || drop(entry)));
        }
    }
}
