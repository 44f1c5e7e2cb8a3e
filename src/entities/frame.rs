//! Drawable frame: two RGBA surfaces (`color` under `lines`) plus a version.
//!
//! Surfaces are created lazily on the first edit; an empty frame has no cache
//! identity and contributes nothing to dependency sets. Every edit bumps the
//! version and re-registers it with the invalidation table; dropping the frame
//! unregisters it, which is how derived data of deleted frames gets collected.

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::versions::{EntityId, Version, VersionTable};

/// Paper color shown where nothing is drawn
pub const BACKGROUND: Rgba<u8> = Rgba([240, 235, 220, 255]);
/// Pen color of the lines surface
pub const PEN: Rgba<u8> = Rgba([20, 20, 20, 255]);

/// Which of the two surfaces of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceId {
    Color,
    Lines,
}

/// Fully transparent surface of the given base color
pub fn blank_surface(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    let Rgba([r, g, b, _]) = color;
    RgbaImage::from_pixel(width, height, Rgba([r, g, b, 0]))
}

/// Resize to `width`x`height`, rotating instead when the dimensions are swapped
pub fn fit_to_resolution(surface: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (w, h) = surface.dimensions();
    if (w, h) == (width, height) {
        surface.clone()
    } else if (w, h) == (height, width) {
        if w > h {
            imageops::rotate270(surface)
        } else {
            imageops::rotate90(surface)
        }
    } else {
        imageops::resize(surface, width, height, imageops::FilterType::Triangle)
    }
}

#[derive(Debug)]
pub struct Frame {
    /// Shared by the frames of all layers at one timeline slot
    id: Uuid,
    layer_id: Uuid,
    width: u32,
    height: u32,
    color: Option<RgbaImage>,
    lines: Option<RgbaImage>,
    version: Version,
    /// Display the closest earlier non-held frame instead of this one
    hold: bool,
    /// Edited since last save (not exact: undo does not clear it)
    dirty: bool,
    versions: VersionTable,
}

impl Frame {
    pub fn new(id: Uuid, layer_id: Uuid, width: u32, height: u32, versions: VersionTable) -> Self {
        let frame = Self {
            id,
            layer_id,
            width,
            height,
            color: None,
            lines: None,
            version: 0,
            hold: false,
            dirty: false,
            versions,
        };
        frame.versions.register(frame.cache_id(), frame.version);
        frame
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn layer_id(&self) -> Uuid {
        self.layer_id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn cache_id(&self) -> EntityId {
        EntityId::frame(self.id, self.layer_id)
    }

    /// Dependency pair, or `None` for an empty frame
    pub fn cache_id_version(&self) -> Option<(EntityId, Version)> {
        (!self.is_empty()).then(|| (self.cache_id(), self.version))
    }

    pub fn is_empty(&self) -> bool {
        self.color.is_none()
    }

    pub fn hold(&self) -> bool {
        self.hold
    }

    pub fn set_hold(&mut self, hold: bool) {
        self.hold = hold;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    fn create_surfaces_if_needed(&mut self) {
        if !self.is_empty() {
            return;
        }
        self.color = Some(blank_surface(self.width, self.height, BACKGROUND));
        self.lines = Some(blank_surface(self.width, self.height, PEN));
    }

    /// Prepare for an edit: create surfaces, mark dirty, bump and publish the version
    pub fn increment_version(&mut self) {
        self.create_surfaces_if_needed();
        self.dirty = true;
        self.version += 1;
        self.versions.register(self.cache_id(), self.version);
    }

    pub fn surface(&self, surface_id: SurfaceId) -> Option<&RgbaImage> {
        match surface_id {
            SurfaceId::Color => self.color.as_ref(),
            SurfaceId::Lines => self.lines.as_ref(),
        }
    }

    /// Mutable surface; call [`increment_version`](Self::increment_version) first
    pub fn surface_mut(&mut self, surface_id: SurfaceId) -> &mut RgbaImage {
        self.create_surfaces_if_needed();
        let (width, height) = (self.width, self.height);
        let slot = match surface_id {
            SurfaceId::Color => &mut self.color,
            SurfaceId::Lines => &mut self.lines,
        };
        slot.get_or_insert_with(|| blank_surface(width, height, PEN))
    }

    /// Lines over color; transparent where nothing is drawn
    pub fn composite(&self) -> RgbaImage {
        let mut out = match &self.color {
            Some(color) => color.clone(),
            None => blank_surface(self.width, self.height, BACKGROUND),
        };
        if let Some(lines) = &self.lines {
            imageops::overlay(&mut out, lines, 0, 0);
        }
        out
    }

    pub fn thumbnail(&self, width: u32, height: u32) -> RgbaImage {
        imageops::resize(&self.composite(), width, height, imageops::FilterType::Triangle)
    }

    /// Resident bytes: two RGBA surfaces, or nothing when empty
    pub fn byte_size(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize * 8
        }
    }

    /// Adapt to a new movie resolution
    pub fn fit_to_resolution(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        if self.is_empty() {
            return;
        }
        for surface in [&mut self.color, &mut self.lines].into_iter().flatten() {
            *surface = fit_to_resolution(surface, width, height);
        }
        self.version += 1;
        self.versions.register(self.cache_id(), self.version);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.versions.unregister(&self.cache_id());
    }
}
