//! Derived images memoized through [`CacheStore`](crate::core::cache::CacheStore).
//!
//! Every computation is a small struct borrowing the movie plus its own
//! parameters. Keys are built from the versions of the frames actually shown
//! at `pos`, so holds resolve to the frame they display and empty frames add
//! nothing.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::{imageops, Rgba, RgbaImage};

use super::frame::{SurfaceId, BACKGROUND};
use super::layer::Layer;
use super::movie::Movie;
use crate::core::cache::CacheableComputation;
use crate::core::cache_key::{CacheKey, DependencySet, Descriptor};
use crate::core::versions::{EntityId, Version};

/// Cached image value, shared between the cache and its callers
pub type Surface = Arc<RgbaImage>;

/// Overlay the frames shown at `pos` of `layers`, halving their opacity if `dim`
fn overlay_layers<'a>(canvas: &mut RgbaImage, layers: impl IntoIterator<Item = &'a Layer>, pos: usize, dim: bool) {
    for layer in layers {
        let frame = layer.frame(pos);
        if frame.is_empty() {
            continue;
        }
        let mut image = frame.composite();
        if dim {
            for px in image.pixels_mut() {
                px[3] /= 2;
            }
        }
        imageops::overlay(canvas, &image, 0, 0);
    }
}

fn visible(layers: &[Layer]) -> impl Iterator<Item = &Layer> {
    layers.iter().filter(|layer| layer.is_visible())
}

fn opaque_canvas(movie: &Movie) -> RgbaImage {
    let (w, h) = movie.resolution();
    RgbaImage::from_pixel(w, h, BACKGROUND)
}

fn clear_canvas(movie: &Movie) -> RgbaImage {
    let (w, h) = movie.resolution();
    RgbaImage::new(w, h)
}

/// All visible layers at `pos` over the paper color
pub struct CompositeFrame<'a> {
    pub movie: &'a Movie,
    pub pos: usize,
}

impl CacheableComputation for CompositeFrame<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let deps = self.movie.dependencies(self.movie.layers(), self.pos, false);
        CacheKey::new(deps, Descriptor::new("composite"))
    }

    fn compute_value(&self) -> Result<Surface> {
        let mut canvas = opaque_canvas(self.movie);
        overlay_layers(&mut canvas, visible(self.movie.layers()), self.pos, false);
        Ok(Arc::new(canvas))
    }
}

/// Visible layers under `layer_pos`, over the paper color
pub struct LayersBelow<'a> {
    pub movie: &'a Movie,
    pub pos: usize,
    pub layer_pos: usize,
    /// Dim the layers so the current one stands out
    pub highlight: bool,
}

impl CacheableComputation for LayersBelow<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let below = &self.movie.layers()[..self.layer_pos.min(self.movie.layer_count())];
        let deps = self.movie.dependencies(below, self.pos, false);
        CacheKey::new(
            deps,
            Descriptor::new("layers-below")
                .with(self.layer_pos)
                .with(self.highlight),
        )
    }

    fn compute_value(&self) -> Result<Surface> {
        let below = &self.movie.layers()[..self.layer_pos.min(self.movie.layer_count())];
        let mut canvas = opaque_canvas(self.movie);
        overlay_layers(&mut canvas, visible(below), self.pos, self.highlight);
        Ok(Arc::new(canvas))
    }
}

/// Visible layers over `layer_pos` on a transparent canvas
pub struct LayersAbove<'a> {
    pub movie: &'a Movie,
    pub pos: usize,
    pub layer_pos: usize,
    pub highlight: bool,
}

impl CacheableComputation for LayersAbove<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let above = self.movie.layers().get(self.layer_pos + 1..).unwrap_or_default();
        let deps = self.movie.dependencies(above, self.pos, false);
        CacheKey::new(
            deps,
            Descriptor::new("layers-above")
                .with(self.layer_pos)
                .with(self.highlight),
        )
    }

    fn compute_value(&self) -> Result<Surface> {
        let above = self.movie.layers().get(self.layer_pos + 1..).unwrap_or_default();
        let mut canvas = clear_canvas(self.movie);
        overlay_layers(&mut canvas, visible(above), self.pos, self.highlight);
        Ok(Arc::new(canvas))
    }
}

/// One layer's frame at `pos`, scaled down; hidden layers included
pub struct LayerThumbnail<'a> {
    pub movie: &'a Movie,
    pub layer_pos: usize,
    pub pos: usize,
    pub width: u32,
    pub height: u32,
}

impl LayerThumbnail<'_> {
    fn layer(&self) -> Result<&Layer> {
        self.movie
            .layer(self.layer_pos)
            .ok_or_else(|| anyhow!("no layer at {}", self.layer_pos))
    }
}

impl CacheableComputation for LayerThumbnail<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let deps = self
            .movie
            .dependencies(self.movie.layer(self.layer_pos), self.pos, true);
        CacheKey::new(
            deps,
            Descriptor::new("layer-thumbnail")
                .with(self.width)
                .with(self.height),
        )
    }

    fn compute_value(&self) -> Result<Surface> {
        let frame = self.layer()?.frame(self.pos);
        Ok(Arc::new(frame.thumbnail(self.width, self.height)))
    }
}

/// Whole-movie thumbnail of frame `pos`.
///
/// With `highlight` the layers other than the current one are dimmed, so the
/// key also records which layer is current.
pub struct Thumbnail<'a> {
    pub movie: &'a Movie,
    pub pos: usize,
    pub width: u32,
    pub height: u32,
    pub highlight: bool,
}

impl CacheableComputation for Thumbnail<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let deps = self.movie.dependencies(self.movie.layers(), self.pos, false);
        let mut descriptor = Descriptor::new("thumbnail")
            .with(self.width)
            .with(self.height);
        descriptor = if self.highlight {
            descriptor.with(self.movie.cursor().layer_pos)
        } else {
            descriptor.with("no-highlight")
        };
        CacheKey::new(deps, descriptor)
    }

    fn compute_value(&self) -> Result<Surface> {
        let layers = self.movie.layers();
        let layer_pos = self.movie.cursor().layer_pos;
        let mut canvas = opaque_canvas(self.movie);
        overlay_layers(&mut canvas, visible(&layers[..layer_pos]), self.pos, self.highlight);
        overlay_layers(&mut canvas, visible(&layers[layer_pos..=layer_pos]), self.pos, false);
        overlay_layers(&mut canvas, visible(&layers[layer_pos + 1..]), self.pos, self.highlight);
        Ok(Arc::new(imageops::resize(
            &canvas,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        )))
    }
}

/// Onion-skin overlay of frame `pos` shown on top of the frame being edited.
///
/// Lines of lit layers are exposed (unless that layer shows the same frame at
/// the cursor, eg through holds); the color of every visible layer hides what
/// is below it. The result is `rgb` with that alpha scaled by `transparency`.
pub struct LightTableMask<'a> {
    pub movie: &'a Movie,
    pub pos: usize,
    pub rgb: [u8; 3],
    pub transparency: f32,
}

impl LightTableMask<'_> {
    fn lines_lit(&self, layer: &Layer) -> bool {
        layer.is_lit() && layer.surface_pos(self.movie.cursor().pos) != layer.surface_pos(self.pos)
    }
}

impl CacheableComputation for LightTableMask<'_> {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let deps = self.movie.dependencies(self.movie.layers(), self.pos, false);
        let lit: Vec<bool> = visible(self.movie.layers())
            .map(|layer| self.lines_lit(layer))
            .collect();
        let rgb: Vec<u32> = self.rgb.iter().map(|&c| c as u32).collect();
        CacheKey::new(
            deps,
            Descriptor::new("light-table-mask")
                .with(rgb)
                .with(self.transparency)
                .with(lit),
        )
    }

    fn compute_value(&self) -> Result<Surface> {
        let (w, h) = self.movie.resolution();
        let mut alpha = vec![0u8; w as usize * h as usize];

        for layer in visible(self.movie.layers()) {
            let frame = layer.frame(self.pos);
            let (Some(color), Some(lines)) = (frame.surface(SurfaceId::Color), frame.surface(SurfaceId::Lines))
            else {
                continue;
            };
            let lit = self.lines_lit(layer);
            for ((a, c), l) in alpha.iter_mut().zip(color.pixels()).zip(lines.pixels()) {
                *a = (*a).min(255 - c[3]);
                if lit {
                    *a = (*a).max(l[3]);
                }
            }
        }

        let scale = self.transparency.clamp(0.0, 1.0);
        let [r, g, b] = self.rgb;
        let mask = RgbaImage::from_fn(w, h, |x, y| {
            let a = alpha[(y * w + x) as usize];
            Rgba([r, g, b, (a as f32 * scale).round() as u8])
        });
        Ok(Arc::new(mask))
    }
}

/// Image tracked by a named entity instead of a frame (eg the fading mask)
pub struct NamedSurface {
    pub id: EntityId,
    pub version: Version,
    pub surface: Surface,
}

impl CacheableComputation for NamedSurface {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        let deps: DependencySet = [(self.id.clone(), self.version)].into_iter().collect();
        CacheKey::new(deps, Descriptor::new("named").with(self.id.clone()))
    }

    fn compute_value(&self) -> Result<Surface> {
        Ok(self.surface.clone())
    }
}

/// Another cached value resized to `width`x`height`.
///
/// Keyed on the source's key, so it goes stale together with the source.
pub struct Scaled {
    pub source_key: CacheKey,
    pub source: Surface,
    pub width: u32,
    pub height: u32,
}

impl CacheableComputation for Scaled {
    type Value = Surface;

    fn compute_key(&self) -> CacheKey {
        CacheKey::new(
            self.source_key.deps().clone(),
            Descriptor::new("scaled")
                .with(self.source_key.descriptor().clone())
                .with(self.width)
                .with(self.height),
        )
    }

    fn compute_value(&self) -> Result<Surface> {
        if self.source.dimensions() == (self.width, self.height) {
            return Ok(self.source.clone());
        }
        Ok(Arc::new(imageops::resize(
            &*self.source,
            self.width,
            self.height,
            imageops::FilterType::Triangle,
        )))
    }
}
