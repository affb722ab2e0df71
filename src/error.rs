use thiserror::Error;

/// Errors produced while decoding an animated image.
///
/// `Format` and `Io` are terminal: every waiter for the source receives a
/// failed (`None`) result. `FrameDecode` is recovered locally by skipping
/// the frame; it only escalates when no frame ever decodes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not an animated png: {0}")]
    Format(&'static str),

    #[error("frame {0} failed to decode")]
    FrameDecode(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
