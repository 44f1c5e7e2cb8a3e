//! Pixel rectangles and surface diffing for region snapshots

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::core::cache_key::Param;

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whole surface of the given size
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge, saturating at `u32::MAX`
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clip to a `width`x`height` surface
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect::new(x, y, self.right().min(width) - x, self.bottom().min(height) - y)
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(x, y, self.right().max(other.right()) - x, self.bottom().max(other.bottom()) - y)
    }
}

impl From<Rect> for Param {
    fn from(r: Rect) -> Self {
        Param::List(vec![r.x.into(), r.y.into(), r.width.into(), r.height.into()])
    }
}

/// Tightest rectangle containing every pixel that differs between two surfaces.
///
/// Surfaces of different sizes are treated as entirely changed; identical ones
/// yield `None`.
pub fn changed_bounds(before: &RgbaImage, after: &RgbaImage) -> Option<Rect> {
    if before.dimensions() != after.dimensions() {
        let (w, h) = after.dimensions();
        return Some(Rect::full(w, h));
    }

    let (w, h) = before.dimensions();
    let stride = w as usize * 4;
    if stride == 0 {
        return None;
    }
    let (a, b) = (before.as_raw(), after.as_raw());

    let mut min_x = u32::MAX;
    let mut max_x = 0u32;
    let mut rows: Option<(u32, u32)> = None;

    for (y, (row_a, row_b)) in a.chunks_exact(stride).zip(b.chunks_exact(stride)).enumerate() {
        if row_a == row_b {
            continue;
        }
        let pixels = || row_a.chunks_exact(4).zip(row_b.chunks_exact(4));
        // row differs, so both searches find something
        let first = pixels().position(|(p, q)| p != q).unwrap_or(0) as u32;
        let last = pixels().rposition(|(p, q)| p != q).unwrap_or(0) as u32;
        min_x = min_x.min(first);
        max_x = max_x.max(last);

        let y = y as u32;
        rows = Some(match rows {
            Some((top, _)) => (top, y),
            None => (y, y),
        });
    }

    rows.map(|(top, bottom)| Rect::new(min_x, top, max_x - min_x + 1, bottom - top + 1))
}

/// Copy of `rect` out of `surface`
pub fn crop(surface: &RgbaImage, rect: Rect) -> RgbaImage {
    imageops::crop_imm(surface, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Write `patch` into `surface` with its top-left corner at `rect`'s origin
pub fn paste(surface: &mut RgbaImage, patch: &RgbaImage, rect: Rect) {
    imageops::replace(surface, patch, rect.x as i64, rect.y as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn blank(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([240, 235, 220, 0]))
    }

    #[test]
    fn test_clamp_oversized_rect() {
        let r = Rect::new(5, 5, u32::MAX, 10).clamp_to(32, 24);
        assert_eq!(r, Rect::new(5, 5, 27, 10));
        assert_eq!(Rect::new(40, 0, 8, 8).clamp_to(32, 24).width, 0);
        assert_eq!(Rect::new(0, 0, 4, 4).union(&Rect::new(2, 2, u32::MAX, 1)).right(), u32::MAX);
    }

    #[test]
    fn test_identical_surfaces_have_no_bounds() {
        let a = blank(16, 8);
        assert_eq!(changed_bounds(&a, &a.clone()), None);
    }

    #[test]
    fn test_bounds_are_minimal() {
        let before = blank(32, 32);
        let mut after = before.clone();
        after.put_pixel(5, 7, Rgba([0, 0, 0, 255]));
        after.put_pixel(9, 3, Rgba([0, 0, 0, 255]));
        after.put_pixel(6, 12, Rgba([0, 0, 0, 1]));

        assert_eq!(changed_bounds(&before, &after), Some(Rect::new(5, 3, 5, 10)));
    }

    #[test]
    fn test_single_pixel() {
        let before = blank(4, 4);
        let mut after = before.clone();
        after.put_pixel(3, 3, Rgba([1, 2, 3, 4]));
        assert_eq!(changed_bounds(&before, &after), Some(Rect::new(3, 3, 1, 1)));
    }

    #[test]
    fn test_crop_and_paste_restore() {
        let original = blank(10, 10);
        let mut edited = original.clone();
        for x in 2..5 {
            edited.put_pixel(x, 4, Rgba([0, 0, 0, 255]));
        }
        let rect = changed_bounds(&original, &edited).unwrap();
        let saved = crop(&original, rect);
        paste(&mut edited, &saved, rect);
        assert_eq!(edited, original);
    }

    #[test]
    fn test_rect_helpers() {
        let a = Rect::new(2, 2, 4, 4);
        let b = Rect::new(5, 0, 2, 2);
        assert_eq!(a.union(&b), Rect::new(2, 0, 5, 6));
        assert_eq!(a.union(&Rect::default()), a);
        assert_eq!(Rect::new(8, 8, 10, 10).clamp_to(12, 10), Rect::new(8, 8, 4, 2));
        assert_eq!(a.area(), 16);
    }
}
