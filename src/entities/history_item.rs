//! Undoable movie operations
//!
//! Each [`HistoryItem`] remembers where the user was when it was recorded
//! ([`Position`]) and what it needs to revert: a pixel region, a removed frame
//! or layer, or nothing at all for self-inverse toggles.
//!
//! Undoing an item returns the item that re-applies it, so redo is just another
//! undo of that returned item.

use image::RgbaImage;
use log::{debug, warn};
use uuid::Uuid;

use anyhow::Result;

use super::frame::SurfaceId;
use super::layer::Layer;
use super::movie::{Cursor, Movie, RemovedFrames, ViewState};
use super::region::{changed_bounds, crop, paste, Rect};
use crate::core::history::HistoryEntry;

/// Bytes charged for items that hold no pixels
pub const BASE_ITEM_BYTES: usize = 128;

/// Cursor + view at the time an item was recorded
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub cursor: Cursor,
    pub view: ViewState,
}

impl Position {
    pub fn of(movie: &Movie) -> Self {
        Self {
            cursor: movie.cursor(),
            view: movie.view(),
        }
    }
}

/// Self-inverse actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// Hold flag of the frame at the recorded cursor
    Hold,
    LayerVisible(Uuid),
    LayerLocked(Uuid),
    LayerLit(Uuid),
    SwapWidthHeight,
}

impl Toggle {
    /// Perform the action on `movie`
    pub fn apply(self, movie: &mut Movie) -> Result<()> {
        match self {
            Toggle::Hold => movie.toggle_hold(),
            Toggle::LayerVisible(id) => movie.toggle_layer_visible(id),
            Toggle::LayerLocked(id) => movie.toggle_layer_locked(id),
            Toggle::LayerLit(id) => movie.toggle_layer_lit(id),
            Toggle::SwapWidthHeight => {
                movie.swap_width_height();
                Ok(())
            }
        }
    }
}

/// Saved pixels of one surface of the frame at the item's cursor
#[derive(Debug)]
pub struct RegionSnapshot {
    surface: SurfaceId,
    /// Area `pixels` covers
    rect: Rect,
    /// `None` once optimization found nothing changed
    pixels: Option<RgbaImage>,
    /// Shrunk to the changed area (or created from an explicit box)
    optimized: bool,
}

impl RegionSnapshot {
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    fn byte_size(&self) -> usize {
        self.pixels.as_ref().map_or(0, |p| p.as_raw().len())
    }
}

#[derive(Debug)]
pub enum ItemKind {
    SurfaceEdit(RegionSnapshot),
    /// Undone in order; redo undoes the reversed list of results
    CompositeEdit(Vec<HistoryItem>),
    InsertFrame,
    RemoveFrame { pos: usize, removed: RemovedFrames },
    InsertLayer,
    RemoveLayer { layer_pos: usize, removed: Option<Layer> },
    Toggle(Toggle),
    /// Navigation recorded as an undoable step
    Seek { prior: Position },
}

#[derive(Debug)]
pub struct HistoryItem {
    /// Where the user was when the item was recorded
    origin: Position,
    kind: ItemKind,
}

impl HistoryItem {
    fn new(movie: &Movie, kind: ItemKind) -> Self {
        Self {
            origin: Position::of(movie),
            kind,
        }
    }

    /// Snapshot the whole `surface` of the frame at the cursor before editing it.
    ///
    /// Call [`optimize`](Self::optimize) once the edit is done.
    pub fn surface_edit(movie: &mut Movie, surface: SurfaceId) -> Self {
        let origin = Position::of(movie);
        let pixels = movie.edit_curr_frame().surface_mut(surface).clone();
        let (w, h) = pixels.dimensions();
        Self {
            origin,
            kind: ItemKind::SurfaceEdit(RegionSnapshot {
                surface,
                rect: Rect::full(w, h),
                pixels: Some(pixels),
                optimized: false,
            }),
        }
    }

    /// Snapshot only `bbox`, for edits whose extent is known in advance
    pub fn surface_edit_in(movie: &mut Movie, surface: SurfaceId, bbox: Rect) -> Self {
        let origin = Position::of(movie);
        let current = movie.edit_curr_frame().surface_mut(surface);
        let (w, h) = current.dimensions();
        let rect = bbox.clamp_to(w, h);
        let pixels = (!rect.is_empty()).then(|| crop(current, rect));
        Self {
            origin,
            kind: ItemKind::SurfaceEdit(RegionSnapshot {
                surface,
                rect,
                pixels,
                optimized: true,
            }),
        }
    }

    pub fn insert_frame(movie: &Movie) -> Self {
        Self::new(movie, ItemKind::InsertFrame)
    }

    pub fn remove_frame(movie: &Movie, pos: usize, removed: RemovedFrames) -> Self {
        Self::new(movie, ItemKind::RemoveFrame { pos, removed })
    }

    pub fn insert_layer(movie: &Movie) -> Self {
        Self::new(movie, ItemKind::InsertLayer)
    }

    pub fn remove_layer(movie: &Movie, layer_pos: usize, removed: Layer) -> Self {
        Self::new(
            movie,
            ItemKind::RemoveLayer {
                layer_pos,
                removed: Some(removed),
            },
        )
    }

    pub fn toggle(movie: &Movie, toggle: Toggle) -> Self {
        Self::new(movie, ItemKind::Toggle(toggle))
    }

    /// Record a jump made from `prior` to the movie's current position
    pub fn seek(movie: &Movie, prior: Position) -> Self {
        Self::new(movie, ItemKind::Seek { prior })
    }

    pub fn origin(&self) -> Position {
        self.origin
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// Whether undo first navigates back to the origin.
    ///
    /// Removals reinsert at their own recorded slot, and seeks are navigation themselves.
    fn restores_position(&self) -> bool {
        !matches!(
            self.kind,
            ItemKind::RemoveFrame { .. }
                | ItemKind::RemoveLayer { .. }
                | ItemKind::Seek { .. }
                | ItemKind::Toggle(Toggle::SwapWidthHeight)
        )
    }

    /// Shrink full-surface snapshots to what actually changed.
    ///
    /// With `bbox` the snapshot is cut to that box; otherwise the saved pixels are
    /// diffed against the current surface. If nothing changed the item becomes a nop.
    pub fn optimize(&mut self, movie: &Movie, bbox: Option<Rect>) {
        match &mut self.kind {
            ItemKind::SurfaceEdit(snapshot) => {
                optimize_snapshot(snapshot, self.origin.cursor, movie, bbox)
            }
            ItemKind::CompositeEdit(items) => {
                for item in items.iter_mut() {
                    item.optimize(movie, bbox);
                }
                items.retain(|item| !item.nop());
            }
            _ => {}
        }
    }
}

fn undo_surface_edit(origin: Position, snapshot: &RegionSnapshot, movie: &mut Movie) -> Result<HistoryItem> {
    let (surface, rect, optimized) = (snapshot.surface, snapshot.rect, snapshot.optimized);
    let Some(pixels) = &snapshot.pixels else {
        return Ok(HistoryItem::new(
            movie,
            ItemKind::SurfaceEdit(RegionSnapshot {
                surface,
                rect,
                pixels: None,
                optimized: true,
            }),
        ));
    };

    if movie.cursor() != origin.cursor {
        warn!(
            "surface edit undone away from where it was made: recorded {:?}, now {:?}",
            origin.cursor,
            movie.cursor()
        );
    }
    movie.seek(origin.cursor)?;

    let mut redo = if optimized {
        HistoryItem::surface_edit_in(movie, surface, rect)
    } else {
        HistoryItem::surface_edit(movie, surface)
    };

    let target = movie.edit_curr_frame().surface_mut(surface);
    if optimized {
        paste(target, pixels, rect);
    } else {
        *target = pixels.clone();
    }

    redo.optimize(movie, None);
    Ok(redo)
}

fn optimize_snapshot(snapshot: &mut RegionSnapshot, cursor: Cursor, movie: &Movie, bbox: Option<Rect>) {
    if snapshot.optimized {
        return;
    }
    let Some(saved) = snapshot.pixels.take() else {
        return;
    };
    let (w, h) = saved.dimensions();

    let rect = match bbox {
        Some(bbox) => Some(bbox.clamp_to(w, h)).filter(|r| !r.is_empty()),
        None => match movie.surface_at(cursor, snapshot.surface) {
            Some(current) => changed_bounds(&saved, current),
            None => Some(Rect::full(w, h)),
        },
    };

    snapshot.optimized = true;
    match rect {
        Some(rect) => {
            debug!("surface edit optimized to {:?} of {}x{}", rect, w, h);
            snapshot.pixels = Some(if rect == Rect::full(w, h) { saved } else { crop(&saved, rect) });
            snapshot.rect = rect;
        }
        // eg drawing lines over an area already covered by lines
        None => snapshot.rect = Rect::default(),
    }
}

/// Re-apply the children of a composite undone before one of them failed,
/// newest first, putting the regained undo entries back in place
fn roll_forward(items: &mut [HistoryItem], redo: Vec<HistoryItem>, movie: &mut Movie) {
    let undone = redo.len();
    for (slot, mut done) in items[..undone].iter_mut().zip(redo).rev() {
        match done.undo(movie) {
            Ok(item) => *slot = item,
            Err(err) => warn!("composite undo: could not restore a reverted step: {:#}", err),
        }
    }
}

impl HistoryEntry for HistoryItem {
    type Document = Movie;

    fn undo(&mut self, movie: &mut Movie) -> Result<HistoryItem> {
        let origin = self.origin;
        match &mut self.kind {
            ItemKind::SurfaceEdit(snapshot) => undo_surface_edit(origin, snapshot, movie),
            ItemKind::CompositeEdit(items) => {
                let mut redo = Vec::with_capacity(items.len());
                for i in 0..items.len() {
                    match items[i].undo(movie) {
                        Ok(done) => redo.push(done),
                        Err(err) => {
                            roll_forward(items, redo, movie);
                            return Err(err);
                        }
                    }
                }
                redo.reverse();
                Ok(HistoryItem::composite(redo))
            }
            ItemKind::InsertFrame => {
                // land on the frame the insertion was made after
                let pos = origin.cursor.pos;
                let removed = movie.remove_frame(Some(pos), Some(pos.saturating_sub(1)))?;
                Ok(HistoryItem::remove_frame(movie, pos, removed))
            }
            ItemKind::RemoveFrame { pos, removed } => {
                movie.reinsert_frame_at(*pos, removed)?;
                Ok(HistoryItem::insert_frame(movie))
            }
            ItemKind::InsertLayer => {
                let layer_pos = origin.cursor.layer_pos;
                let removed = movie.remove_layer(Some(layer_pos), Some(layer_pos.saturating_sub(1)))?;
                Ok(HistoryItem::remove_layer(movie, layer_pos, removed))
            }
            ItemKind::RemoveLayer { layer_pos, removed } => {
                movie.reinsert_layer_at(*layer_pos, removed)?;
                Ok(HistoryItem::insert_layer(movie))
            }
            ItemKind::Toggle(toggle) => {
                let toggle = *toggle;
                if toggle == Toggle::Hold {
                    movie.seek(origin.cursor)?;
                }
                toggle.apply(movie)?;
                Ok(HistoryItem {
                    origin,
                    kind: ItemKind::Toggle(toggle),
                })
            }
            ItemKind::Seek { prior } => {
                let here = Position::of(movie);
                movie.seek(prior.cursor)?;
                movie.set_view(prior.view);
                Ok(HistoryItem::seek(movie, here))
            }
        }
    }

    fn reveal(&self, movie: &mut Movie) -> Result<bool> {
        if let ItemKind::CompositeEdit(items) = &self.kind {
            for item in items {
                if item.reveal(movie)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if !self.restores_position() || Position::of(movie) == self.origin {
            return Ok(false);
        }
        movie.seek(self.origin.cursor)?;
        movie.set_view(self.origin.view);
        Ok(true)
    }

    fn byte_size(&self) -> usize {
        match &self.kind {
            ItemKind::SurfaceEdit(snapshot) => snapshot.byte_size(),
            ItemKind::CompositeEdit(items) => items.iter().map(HistoryItem::byte_size).sum(),
            ItemKind::RemoveFrame { removed, .. } => removed.byte_size().max(BASE_ITEM_BYTES),
            ItemKind::RemoveLayer { removed, .. } => removed
                .as_ref()
                .map_or(0, Layer::byte_size)
                .max(BASE_ITEM_BYTES),
            ItemKind::InsertFrame | ItemKind::InsertLayer | ItemKind::Toggle(_) | ItemKind::Seek { .. } => {
                BASE_ITEM_BYTES
            }
        }
    }

    fn nop(&self) -> bool {
        match &self.kind {
            ItemKind::SurfaceEdit(snapshot) => snapshot.pixels.is_none(),
            ItemKind::CompositeEdit(items) => items.iter().all(HistoryItem::nop),
            ItemKind::Seek { prior } => *prior == self.origin,
            _ => false,
        }
    }

    fn is_drawing_change(&self) -> bool {
        match &self.kind {
            ItemKind::SurfaceEdit(_) => true,
            ItemKind::CompositeEdit(items) => items.iter().all(HistoryItem::is_drawing_change),
            _ => false,
        }
    }

    fn at_current_position(&self, movie: &Movie) -> bool {
        self.origin.cursor == movie.cursor()
    }

    fn composite(items: Vec<HistoryItem>) -> HistoryItem {
        let origin = items.first().map(HistoryItem::origin).unwrap_or_default();
        HistoryItem {
            origin,
            kind: ItemKind::CompositeEdit(items),
        }
    }
}
