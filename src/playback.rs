//! Frame-by-frame presentation on the UI-affine scheduler.
//!
//! One session per display surface. The session walks the composited
//! frame list at the cadence embedded in the stream, handling loop count,
//! playback speed and cooperative cancellation: `stop` does not retract
//! an already-posted delayed task, it bumps a schedule token the task
//! re-checks at fire time.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::animation::AnimatedImage;
use crate::fetch::FetchCoordinator;
use crate::host::{DisplaySurface, TaskRunner};

/// ~60Hz cap on presentation cadence.
const MIN_FRAME_MS: u64 = 16;
/// Poll interval while decoding runs behind presentation.
const DECODE_RETRY_MS: u64 = 16;

const MIN_SPEED: f64 = 0.01;

struct SessionState {
    /// Index of the frame currently shown; -1 before the first present.
    current: i64,
    loops: u32,
    /// Loops to play; 0 means infinite.
    repeat: u32,
    speed: f64,
    autoplay: bool,
    /// Generation counter compared by scheduled callbacks at fire time.
    token: u64,
    scheduled: bool,
}

/// Playback of one [`AnimatedImage`] onto one display surface.
///
/// All mutable state is touched from the presentation thread; the mutex
/// exists so scheduled callbacks can reach it, not for contention.
pub struct PlaybackSession {
    image: Arc<AnimatedImage>,
    surface: Arc<dyn DisplaySurface>,
    runner: Arc<dyn TaskRunner>,
    state: Mutex<SessionState>,
    this: Weak<PlaybackSession>,
}

impl PlaybackSession {
    pub fn new(
        image: Arc<AnimatedImage>,
        surface: Arc<dyn DisplaySurface>,
        runner: Arc<dyn TaskRunner>,
    ) -> Arc<Self> {
        let repeat = image.loop_count();
        Arc::new_cyclic(|this| Self {
            image,
            surface,
            runner,
            state: Mutex::new(SessionState {
                current: -1,
                loops: 0,
                repeat,
                speed: 1.0,
                autoplay: true,
                token: 0,
                scheduled: false,
            }),
            this: this.clone(),
        })
    }

    /// Fetches `path` through `engine` and binds the result to `surface`.
    ///
    /// On success a session is handed to `on_ready` (already playing when
    /// autoplay is on); on failure the surface is notified via
    /// `on_load_failure` and `on_ready` receives `None`.
    pub fn attach(
        engine: &FetchCoordinator,
        path: &Path,
        surface: Arc<dyn DisplaySurface>,
        runner: Arc<dyn TaskRunner>,
        autoplay: bool,
        on_ready: impl FnOnce(Option<Arc<PlaybackSession>>) + Send + 'static,
    ) {
        engine.fetch(path, move |image| match image {
            Some(image) => {
                let session = PlaybackSession::new(image, surface, runner);
                session.set_autoplay(autoplay);
                if autoplay {
                    session.play();
                }
                on_ready(Some(session));
            }
            None => {
                surface.on_load_failure();
                on_ready(None);
            }
        });
    }

    pub fn image(&self) -> &Arc<AnimatedImage> {
        &self.image
    }

    /// Starts playback. No-op if an advance is already scheduled.
    pub fn play(&self) {
        {
            let mut state = self.state.lock();
            if state.scheduled {
                return;
            }
            if self.image.frame_count() == 0 && !self.image.is_parsing() {
                log::debug!("play requested with no frames, ignoring");
                return;
            }
            state.scheduled = true;
            state.token += 1;
        }
        self.surface.on_animation_start();
        self.advance();
    }

    /// Halts playback and rewinds. Pending callbacks see a stale token and
    /// become no-ops.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.token += 1;
        state.scheduled = false;
        state.current = -1;
        state.loops = 0;
    }

    pub fn set_autoplay(&self, autoplay: bool) {
        self.state.lock().autoplay = autoplay;
    }

    pub fn autoplay(&self) -> bool {
        self.state.lock().autoplay
    }

    /// Overrides the declared loop count; 0 plays forever.
    pub fn set_repeat_count(&self, count: u32) {
        self.state.lock().repeat = count;
    }

    pub fn set_speed(&self, rate: f64) {
        self.state.lock().speed = rate.max(MIN_SPEED);
    }

    /// One scheduler step: obtain the next frame, present it, reschedule.
    fn advance(&self) {
        enum Step {
            Present {
                frame: Arc<crate::animation::CompositedFrame>,
                delay: Duration,
                token: u64,
                ending: bool,
            },
            Finish,
        }

        let step = {
            let mut state = self.state.lock();
            if !state.scheduled {
                return;
            }
            let next_index = (state.current + 1) as usize;
            let frame = match self.image.frame(next_index) {
                Some(frame) => {
                    state.current = next_index as i64;
                    Some(frame)
                }
                None if self.image.is_parsing() => {
                    // Decoding is behind presentation; retry shortly.
                    state.token += 1;
                    let token = state.token;
                    drop(state);
                    return self.schedule(DECODE_RETRY_MS, token, false);
                }
                None => {
                    state.loops += 1;
                    if state.repeat == 0 || state.loops < state.repeat {
                        state.current = 0;
                        self.image.frame(0)
                    } else {
                        None
                    }
                }
            };

            match frame {
                None => {
                    state.scheduled = false;
                    state.token += 1;
                    state.current = -1;
                    state.loops = 0;
                    Step::Finish
                }
                Some(frame) => {
                    let finite = state.repeat != 0;
                    let ending = frame.is_last() && finite && state.loops + 1 >= state.repeat;
                    let raw = frame.next_delay_ms() as f64 / state.speed;
                    let delay = Duration::from_millis((raw.round() as u64).max(MIN_FRAME_MS));
                    state.token += 1;
                    Step::Present {
                        frame,
                        delay,
                        token: state.token,
                        ending,
                    }
                }
            }
        };

        match step {
            Step::Present {
                frame,
                delay,
                token,
                ending,
            } => {
                log::trace!("presenting frame {}", frame.index);
                self.surface.set_image(frame.native.clone());
                self.schedule_after(delay, token, ending);
            }
            Step::Finish => self.surface.on_animation_end(),
        }
    }

    fn schedule(&self, delay_ms: u64, token: u64, ending: bool) {
        self.schedule_after(Duration::from_millis(delay_ms), token, ending);
    }

    fn schedule_after(&self, delay: Duration, token: u64, ending: bool) {
        let this = self.this.clone();
        self.runner.post_to_main(
            delay,
            Box::new(move || {
                let Some(session) = this.upgrade() else { return };
                if ending {
                    session.finish_if_current(token);
                } else {
                    session.advance_if_current(token);
                }
            }),
        );
    }

    /// Cooperative cancellation check at callback fire time.
    fn advance_if_current(&self, token: u64) {
        {
            let state = self.state.lock();
            if !state.scheduled || state.token != token {
                log::trace!("stale schedule token, step dropped");
                return;
            }
        }
        self.advance();
    }

    /// The final loop's last frame was presented; its hold has elapsed.
    fn finish_if_current(&self, token: u64) {
        {
            let mut state = self.state.lock();
            if !state.scheduled || state.token != token {
                return;
            }
            state.scheduled = false;
            state.token += 1;
            state.current = -1;
            state.loops = 0;
        }
        self.surface.on_animation_end();
    }
}
