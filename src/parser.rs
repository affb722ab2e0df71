//! Chunk-level APNG parser.
//!
//! Validates the signature and the animation-control marker, walks the
//! chunk sequence and produces an ordered list of [`FrameDescriptor`]s
//! plus the reusable header/trailer byte groups needed to reconstruct an
//! independently decodable single-frame stream per frame.

use smallvec::SmallVec;

use crate::chunk::{ChunkReader, ACTL, FCTL, FDAT, IDAT, IEND, IHDR, SIGNATURE};
use crate::error::Error;

/// How the canvas is modified after a frame is shown, before the next one
/// is composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeOp {
    /// Leave the canvas untouched.
    None,
    /// Clear the frame's rect to fully transparent.
    Background,
    /// Revert the frame's rect to its pre-blend contents.
    Previous,
}

/// How a frame's pixels combine with the existing canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    /// Overwrite destination pixels.
    Source,
    /// Standard alpha-over compositing.
    Over,
}

/// Metadata and accumulated raw image data for one frame.
///
/// Immutable once the chunk walk crosses the next frame boundary.
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Normalized display delay in milliseconds.
    pub delay_ms: u64,
    pub dispose: DisposeOp,
    pub blend: BlendOp,
    /// Concatenated compressed image data, sequence numbers stripped.
    pub data: Vec<u8>,
}

/// Parser output: frame list plus the byte groups shared by every
/// reconstructed single-frame stream.
pub struct ParsedAnimation {
    pub width: u32,
    pub height: u32,
    /// Declared number of plays, 0 meaning infinite.
    pub loop_count: u32,
    pub frames: Vec<FrameDescriptor>,
    /// IHDR payload kept as a template; rect fields get overwritten per frame.
    pub ihdr: Vec<u8>,
    /// Ancillary records (palette, transparency, ...) preserved verbatim,
    /// replayed before the image data of every reconstructed stream.
    pub pre_chunks: SmallVec<[Vec<u8>; 2]>,
    /// The end-marker record, replayed after the image data.
    pub post_chunks: SmallVec<[Vec<u8>; 1]>,
}

impl ParsedAnimation {
    /// Nominal duration of one loop, in milliseconds.
    pub fn nominal_duration_ms(&self) -> u64 {
        self.frames.iter().map(|f| f.delay_ms).sum()
    }
}

/// Normalizes an fcTL delay fraction to milliseconds.
///
/// A zero denominator means 1/100ths of a second; anything at or below
/// 10ms is floored to 16ms (a ~60Hz cap) to avoid tight repaint loops.
pub fn normalize_delay_ms(numerator: u16, denominator: u16) -> u64 {
    let den = if denominator == 0 { 100 } else { denominator as u64 };
    let ms = 1000 * numerator as u64 / den;
    if ms <= 10 {
        16
    } else {
        ms
    }
}

fn dispose_from_byte(b: u8, frame_index: usize) -> DisposeOp {
    match b {
        0 => DisposeOp::None,
        1 => DisposeOp::Background,
        // Previous is disallowed for the first frame; there is nothing
        // before it to restore.
        2 if frame_index == 0 => DisposeOp::Background,
        2 => DisposeOp::Previous,
        other => {
            log::warn!("unknown dispose_op {other}, treating as None");
            DisposeOp::None
        }
    }
}

fn blend_from_byte(b: u8) -> BlendOp {
    match b {
        0 => BlendOp::Source,
        1 => BlendOp::Over,
        other => {
            log::warn!("unknown blend_op {other}, treating as Source");
            BlendOp::Source
        }
    }
}

/// Walks the chunk sequence of `bytes`.
///
/// A structurally valid still image without the animation-control marker
/// is rejected: the engine's contract is "decode an animation or fail".
pub fn parse(bytes: &[u8]) -> Result<ParsedAnimation, Error> {
    let mut reader = ChunkReader::new(bytes);
    match reader.read_bytes(8) {
        Some(sig) if sig == SIGNATURE => {}
        _ => return Err(Error::Format("bad signature")),
    }

    let mut width = 0u32;
    let mut height = 0u32;
    let mut loop_count = None;
    let mut ihdr = None;
    let mut pre_chunks = SmallVec::new();
    let mut post_chunks = SmallVec::new();
    let mut frames: Vec<FrameDescriptor> = Vec::new();
    let mut current: Option<FrameDescriptor> = None;

    while let Some(chunk) = reader.next_chunk() {
        if !chunk.crc_ok() {
            return Err(Error::Format("chunk crc mismatch"));
        }
        match chunk.ty {
            IHDR => {
                if chunk.data.len() < 8 {
                    return Err(Error::Format("short header chunk"));
                }
                let mut r = ChunkReader::new(chunk.data);
                width = r.read_u32().unwrap_or(0);
                height = r.read_u32().unwrap_or(0);
                ihdr = Some(chunk.data.to_vec());
            }
            ACTL => {
                let mut r = ChunkReader::new(chunk.data);
                let _num_frames = r.read_u32();
                loop_count = Some(r.read_u32().unwrap_or(0));
            }
            FCTL => {
                if let Some(done) = current.take() {
                    frames.push(done);
                }
                let mut r = ChunkReader::new(chunk.data);
                let _sequence = r.read_u32();
                let w = r.read_u32().unwrap_or(0);
                let h = r.read_u32().unwrap_or(0);
                let left = r.read_u32().unwrap_or(0);
                let top = r.read_u32().unwrap_or(0);
                let delay_num = r.read_u16().unwrap_or(0);
                let delay_den = r.read_u16().unwrap_or(0);
                let dispose = r.read_u8().unwrap_or(0);
                let blend = r.read_u8().unwrap_or(0);
                current = Some(FrameDescriptor {
                    left,
                    top,
                    width: w,
                    height: h,
                    delay_ms: normalize_delay_ms(delay_num, delay_den),
                    dispose: dispose_from_byte(dispose, frames.len()),
                    blend: blend_from_byte(blend),
                    data: Vec::new(),
                });
            }
            IDAT => {
                // The first frame's pixel data arrives via the base
                // image-data chunk type rather than fdAT.
                match current.as_mut() {
                    Some(frame) => frame.data.extend_from_slice(chunk.data),
                    None => {
                        log::debug!("image data outside any frame, default image skipped")
                    }
                }
            }
            FDAT => {
                if chunk.data.len() < 4 {
                    return Err(Error::Format("short frame data chunk"));
                }
                match current.as_mut() {
                    // Leading 4 bytes are the sequence number, not pixels.
                    Some(frame) => frame.data.extend_from_slice(&chunk.data[4..]),
                    None => log::warn!("frame data before any frame control, skipped"),
                }
            }
            IEND => {
                post_chunks.push(chunk.raw.to_vec());
                break;
            }
            other => {
                log::trace!(
                    "preserving ancillary chunk {}",
                    String::from_utf8_lossy(&other)
                );
                pre_chunks.push(chunk.raw.to_vec());
            }
        }
    }

    if let Some(done) = current.take() {
        frames.push(done);
    }

    let Some(loop_count) = loop_count else {
        return Err(Error::Format("no animation control chunk"));
    };
    let Some(ihdr) = ihdr else {
        return Err(Error::Format("no header chunk"));
    };
    if frames.is_empty() {
        return Err(Error::Format("no frames"));
    }

    log::debug!(
        "parsed animation: {}x{}, {} frames, loop count {}",
        width,
        height,
        frames.len(),
        loop_count
    );

    Ok(ParsedAnimation {
        width,
        height,
        loop_count,
        frames,
        ihdr,
        pre_chunks,
        post_chunks,
    })
}
