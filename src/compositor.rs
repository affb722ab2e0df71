//! Turns the parsed frame sequence into full-canvas snapshots.
//!
//! Each frame is rebuilt into a standalone single-frame PNG stream and
//! handed to the host decoder; the decoded rect is then blended onto a
//! running canvas per the frame's blend/dispose rules. Frames are emitted
//! incrementally so playback can begin while later frames still decode.

use crate::animation::CompositedFrame;
use crate::chunk::{ChunkWriter, IDAT, IEND, IHDR};
use crate::host::PixelDecoder;
use crate::parser::{BlendOp, DisposeOp, FrameDescriptor, ParsedAnimation};
use crate::pixel::PixelBuffer;

/// The running canvas, materialized lazily.
///
/// A first frame covering the whole canvas becomes the canvas directly;
/// committing it as a mutable buffer is deferred until a later frame
/// actually needs to read it, so a single-frame animation never pays for
/// the copy.
enum CanvasState {
    Empty,
    Deferred(PixelBuffer),
    Materialized(PixelBuffer),
}

/// Canvas edit owed from the previous frame's dispose operation.
struct PendingDispose {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    op: DisposeOp,
    /// Pre-blend contents of the rect, captured for `Previous`.
    snapshot: Option<PixelBuffer>,
}

pub struct FrameCompositor<'a> {
    parsed: &'a ParsedAnimation,
    decoder: &'a dyn PixelDecoder,
}

impl<'a> FrameCompositor<'a> {
    pub fn new(parsed: &'a ParsedAnimation, decoder: &'a dyn PixelDecoder) -> Self {
        Self { parsed, decoder }
    }

    /// Composites every frame in order, invoking `on_frame` for each
    /// successful one. A frame whose stream fails to decode is skipped;
    /// the animation continues with the frames that succeeded. Returns the
    /// number of frames emitted.
    pub fn run(&self, mut on_frame: impl FnMut(CompositedFrame)) -> usize {
        let canvas_w = self.parsed.width;
        let canvas_h = self.parsed.height;
        let mut canvas = CanvasState::Empty;
        let mut pending: Option<PendingDispose> = None;
        let mut emitted = 0usize;

        for (i, fd) in self.parsed.frames.iter().enumerate() {
            let stream = self.rebuild_frame_stream(fd);
            let Some(decoded) = self.decoder.decode(&stream) else {
                log::warn!("frame {i} failed to decode, skipping");
                continue;
            };

            let full_canvas = fd.left == 0
                && fd.top == 0
                && decoded.width() == canvas_w
                && decoded.height() == canvas_h;

            let snapshot;
            if matches!(canvas, CanvasState::Empty) && full_canvas {
                snapshot = decoded.clone();
                canvas = CanvasState::Deferred(decoded);
            } else {
                let mut buf = match std::mem::replace(&mut canvas, CanvasState::Empty) {
                    CanvasState::Empty => PixelBuffer::new(canvas_w, canvas_h),
                    CanvasState::Deferred(b) | CanvasState::Materialized(b) => b,
                };
                apply_dispose(&mut buf, pending.take());

                let pre_blend = match fd.dispose {
                    DisposeOp::Previous => {
                        Some(buf.region(fd.left, fd.top, fd.width, fd.height))
                    }
                    _ => None,
                };
                match fd.blend {
                    BlendOp::Source => buf.blit(&decoded, fd.left, fd.top),
                    BlendOp::Over => buf.blend_over(&decoded, fd.left, fd.top),
                }
                snapshot = buf.clone();
                canvas = CanvasState::Materialized(buf);
                pending = Some(PendingDispose {
                    left: fd.left,
                    top: fd.top,
                    width: fd.width,
                    height: fd.height,
                    op: fd.dispose,
                    snapshot: pre_blend,
                });
            }

            if matches!(canvas, CanvasState::Deferred(_)) {
                pending = Some(PendingDispose {
                    left: fd.left,
                    top: fd.top,
                    width: fd.width,
                    height: fd.height,
                    op: fd.dispose,
                    snapshot: None,
                });
            }

            // The whole canvas is re-encoded for the host, not just the rect.
            let Some(native) = self.decoder.to_native(&snapshot) else {
                log::warn!("frame {i} could not build a native handle, skipping");
                continue;
            };

            let next_delay = self
                .parsed
                .frames
                .get(i + 1)
                .map_or(fd.delay_ms, |next| next.delay_ms);
            on_frame(CompositedFrame::new(
                emitted,
                snapshot,
                native,
                fd.delay_ms,
                next_delay,
            ));
            emitted += 1;
        }

        log::debug!(
            "composited {emitted}/{} frames",
            self.parsed.frames.len()
        );
        emitted
    }

    /// Signature + patched header + preserved ancillary chunks + this
    /// frame's image data + trailer: an independently decodable stream.
    fn rebuild_frame_stream(&self, fd: &FrameDescriptor) -> Vec<u8> {
        let mut w = ChunkWriter::with_capacity(
            64 + self.parsed.ihdr.len()
                + self.parsed.pre_chunks.iter().map(Vec::len).sum::<usize>()
                + fd.data.len(),
        );
        w.signature();

        let mut ihdr = self.parsed.ihdr.clone();
        ihdr[0..4].copy_from_slice(&fd.width.to_be_bytes());
        ihdr[4..8].copy_from_slice(&fd.height.to_be_bytes());
        w.chunk(IHDR, &ihdr);

        for record in &self.parsed.pre_chunks {
            w.raw(record);
        }
        w.chunk(IDAT, &fd.data);
        if self.parsed.post_chunks.is_empty() {
            w.chunk(IEND, &[]);
        } else {
            for record in &self.parsed.post_chunks {
                w.raw(record);
            }
        }
        w.into_bytes()
    }
}

fn apply_dispose(canvas: &mut PixelBuffer, pending: Option<PendingDispose>) {
    let Some(p) = pending else { return };
    match p.op {
        DisposeOp::None => {}
        DisposeOp::Background => canvas.clear_rect(p.left, p.top, p.width, p.height),
        DisposeOp::Previous => {
            if let Some(snapshot) = p.snapshot {
                canvas.clear_rect(p.left, p.top, p.width, p.height);
                canvas.blit(&snapshot, p.left, p.top);
            } else {
                // No snapshot means the previous frame was the deferred
                // full-canvas one; restoring it clears to transparent.
                canvas.clear_rect(p.left, p.top, p.width, p.height);
            }
        }
    }
}
