//! RGBA8 canvas buffer and the pixel-level blend/dispose primitives.

/// A width x height RGBA8 pixel buffer, row-major, 4 bytes per pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    /// Wraps raw RGBA bytes; `None` if the length does not match.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Overwrites destination pixels with `src` at (left, top), clipped to
    /// this buffer's bounds. The `Source` blend operation.
    pub fn blit(&mut self, src: &PixelBuffer, left: u32, top: u32) {
        self.for_each_overlap(src, left, top, |dst, s| dst.copy_from_slice(s));
    }

    /// Alpha-over compositing of `src` at (left, top). The `Over` blend
    /// operation, with channels normalized to [0, 1]:
    /// `outA = srcA + dstA*(1-srcA)`; fully transparent output is black.
    pub fn blend_over(&mut self, src: &PixelBuffer, left: u32, top: u32) {
        self.for_each_overlap(src, left, top, |dst, s| {
            let sa = s[3] as f32 / 255.0;
            if sa >= 1.0 {
                dst.copy_from_slice(s);
                return;
            }
            let da = dst[3] as f32 / 255.0;
            let oa = sa + da * (1.0 - sa);
            if oa <= 0.0 {
                dst.copy_from_slice(&[0, 0, 0, 0]);
                return;
            }
            for c in 0..3 {
                let v = (s[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / oa;
                dst[c] = v.round().clamp(0.0, 255.0) as u8;
            }
            dst[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
        });
    }

    /// Zeroes (fully transparent) the pixels inside the rect, clipped.
    pub fn clear_rect(&mut self, left: u32, top: u32, width: u32, height: u32) {
        let x1 = left.min(self.width) as usize;
        let y1 = top.min(self.height) as usize;
        let x2 = left.saturating_add(width).min(self.width) as usize;
        let y2 = top.saturating_add(height).min(self.height) as usize;
        for y in y1..y2 {
            let row = (y * self.width as usize + x1) * 4;
            self.data[row..row + (x2 - x1) * 4].fill(0);
        }
    }

    /// Copies out the rect at (left, top), clipped to the buffer bounds.
    pub fn region(&self, left: u32, top: u32, width: u32, height: u32) -> PixelBuffer {
        let w = width.min(self.width.saturating_sub(left));
        let h = height.min(self.height.saturating_sub(top));
        let mut out = PixelBuffer::new(w, h);
        for y in 0..h as usize {
            let src = ((top as usize + y) * self.width as usize + left as usize) * 4;
            let dst = y * w as usize * 4;
            out.data[dst..dst + w as usize * 4]
                .copy_from_slice(&self.data[src..src + w as usize * 4]);
        }
        out
    }

    fn for_each_overlap(
        &mut self,
        src: &PixelBuffer,
        left: u32,
        top: u32,
        mut f: impl FnMut(&mut [u8], &[u8]),
    ) {
        let w = src.width.min(self.width.saturating_sub(left)) as usize;
        let h = src.height.min(self.height.saturating_sub(top)) as usize;
        for y in 0..h {
            for x in 0..w {
                let di = ((top as usize + y) * self.width as usize + left as usize + x) * 4;
                let si = (y * src.width as usize + x) * 4;
                f(&mut self.data[di..di + 4], &src.data[si..si + 4]);
            }
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> PixelBuffer {
        let mut data = Vec::with_capacity(w as usize * h as usize * 4);
        for _ in 0..w * h {
            data.extend_from_slice(&px);
        }
        PixelBuffer::from_raw(w, h, data).unwrap()
    }

    #[test]
    fn blit_overwrites_rect() {
        let mut canvas = solid(4, 4, [10, 10, 10, 255]);
        let patch = solid(2, 2, [200, 0, 0, 255]);
        canvas.blit(&patch, 1, 1);
        assert_eq!(canvas.pixel(0, 0), [10, 10, 10, 255]);
        assert_eq!(canvas.pixel(1, 1), [200, 0, 0, 255]);
        assert_eq!(canvas.pixel(2, 2), [200, 0, 0, 255]);
        assert_eq!(canvas.pixel(3, 3), [10, 10, 10, 255]);
    }

    #[test]
    fn blit_is_idempotent() {
        let mut once = solid(4, 4, [10, 10, 10, 128]);
        let patch = solid(2, 2, [200, 50, 0, 77]);
        once.blit(&patch, 1, 0);
        let mut twice = once.clone();
        twice.blit(&patch, 1, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn blit_clips_at_edges() {
        let mut canvas = PixelBuffer::new(4, 4);
        let patch = solid(3, 3, [1, 2, 3, 255]);
        canvas.blit(&patch, 3, 3);
        assert_eq!(canvas.pixel(3, 3), [1, 2, 3, 255]);
        assert_eq!(canvas.pixel(2, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn over_onto_transparent_is_source() {
        let mut canvas = PixelBuffer::new(2, 2);
        let patch = solid(2, 2, [100, 150, 200, 128]);
        canvas.blend_over(&patch, 0, 0);
        assert_eq!(canvas.pixel(0, 0), [100, 150, 200, 128]);
    }

    #[test]
    fn over_with_opaque_source_replaces() {
        let mut canvas = solid(2, 2, [5, 6, 7, 255]);
        let patch = solid(2, 2, [90, 80, 70, 255]);
        canvas.blend_over(&patch, 0, 0);
        assert_eq!(canvas.pixel(1, 1), [90, 80, 70, 255]);
    }

    #[test]
    fn over_blends_half_alpha() {
        let mut canvas = solid(1, 1, [0, 0, 0, 255]);
        let patch = solid(1, 1, [255, 255, 255, 128]);
        canvas.blend_over(&patch, 0, 0);
        let px = canvas.pixel(0, 0);
        // outA stays opaque; color is ~50/50.
        assert_eq!(px[3], 255);
        assert!((px[0] as i32 - 128).abs() <= 1, "got {px:?}");
    }

    #[test]
    fn over_both_transparent_is_transparent_black() {
        let mut canvas = solid(1, 1, [40, 40, 40, 0]);
        let patch = solid(1, 1, [200, 200, 200, 0]);
        canvas.blend_over(&patch, 0, 0);
        assert_eq!(canvas.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn clear_rect_zeroes_only_rect() {
        let mut canvas = solid(3, 3, [9, 9, 9, 255]);
        canvas.clear_rect(1, 1, 1, 1);
        assert_eq!(canvas.pixel(1, 1), [0, 0, 0, 0]);
        assert_eq!(canvas.pixel(0, 1), [9, 9, 9, 255]);
        // Clipped, out-of-bounds clears are no-ops.
        canvas.clear_rect(5, 5, 10, 10);
        assert_eq!(canvas.pixel(2, 2), [9, 9, 9, 255]);
    }

    #[test]
    fn region_round_trips_through_blit() {
        let mut canvas = solid(4, 4, [1, 2, 3, 255]);
        let patch = solid(2, 2, [200, 0, 0, 255]);
        canvas.blit(&patch, 1, 1);
        let saved = canvas.region(1, 1, 2, 2);
        canvas.clear_rect(1, 1, 2, 2);
        canvas.blit(&saved, 1, 1);
        assert_eq!(canvas.pixel(1, 1), [200, 0, 0, 255]);
    }
}
