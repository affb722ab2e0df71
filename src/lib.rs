//! Embeddable APNG playback engine.
//!
//! Decodes animated PNG byte streams at the chunk level, composites the
//! partial frames into full-canvas snapshots, caches decoded animations
//! per source path and drives frame-by-frame presentation on the host's
//! UI-affine scheduler.
//!
//! The engine does no PNG decompression itself: each frame is rebuilt
//! into an independently decodable single-frame stream and handed to a
//! host [`PixelDecoder`]. Likewise threading is delegated to a host
//! [`TaskRunner`]. Defaults for both are provided ([`ImageRsDecoder`],
//! [`ThreadedHost`]) so the engine runs stand-alone:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use apng_player::{FetchCoordinator, ImageRsDecoder, ThreadedHost};
//!
//! let host = ThreadedHost::new(2);
//! let engine = FetchCoordinator::new(host, Arc::new(ImageRsDecoder));
//! engine.fetch(Path::new("spinner.png"), |image| match image {
//!     Some(image) => println!("{}x{}", image.width(), image.height()),
//!     None => eprintln!("decode failed"),
//! });
//! ```

pub mod animation;
pub mod chunk;
pub mod compositor;
pub mod error;
pub mod fetch;
pub mod host;
pub mod parser;
pub mod pixel;
pub mod playback;

pub use animation::{AnimatedImage, CompositedFrame};
pub use error::Error;
pub use fetch::{FetchCoordinator, CACHE_TTL};
pub use host::{
    DisplaySurface, ImageRsDecoder, NativeImage, PixelDecoder, Task, TaskRunner, ThreadedHost,
};
pub use parser::{BlendOp, DisposeOp, FrameDescriptor};
pub use pixel::PixelBuffer;
pub use playback::PlaybackSession;
