//! Editor session: open movies, their histories, and the shared image cache.
//!
//! Every user action goes through here so it lands in the history of the
//! movie it edits. Derived images are fetched through the cache; call
//! [`EditorSession::end_interaction_cycle`] once per input event to collect
//! entries made stale by the edits of that cycle.

use std::sync::Arc;

use anyhow::{bail, Result};
use image::RgbaImage;
use log::{debug, info};

use crate::config::EditorSettings;
use crate::core::budget::MemoryBudget;
use crate::core::cache::{CacheStats, CacheStore};
use crate::core::history::{HistoryLog, HistoryStep, UndoFilter};
use crate::core::versions::{EntityId, Version, VersionTable};
use crate::entities::computations::{
    CompositeFrame, LayerThumbnail, LayersAbove, LayersBelow, LightTableMask, NamedSurface, Scaled, Surface,
    Thumbnail,
};
use crate::entities::frame::SurfaceId;
use crate::entities::history_item::{HistoryItem, Position, Toggle};
use crate::entities::movie::{Cursor, Movie, ViewState};
use crate::entities::region::Rect;

const FADING_MASK: &str = "fading-mask";

/// A movie with its own undo history
#[derive(Debug)]
pub struct OpenMovie {
    movie: Movie,
    history: HistoryLog<HistoryItem>,
}

impl OpenMovie {
    pub fn movie(&self) -> &Movie {
        &self.movie
    }

    pub fn history(&self) -> &HistoryLog<HistoryItem> {
        &self.history
    }
}

#[derive(Debug)]
pub struct EditorSession {
    settings: EditorSettings,
    versions: VersionTable,
    cache: CacheStore<Surface>,
    /// Shared by the histories of all open movies
    history_budget: Arc<MemoryBudget>,
    movies: Vec<OpenMovie>,
    current: usize,
    fading_mask: Option<Surface>,
    fading_mask_version: Version,
}

impl EditorSession {
    /// Start a session with one empty movie
    pub fn new(settings: EditorSettings) -> Self {
        let versions = VersionTable::new();
        let cache_budget = Arc::new(MemoryBudget::new("cache", settings.cache_budget()));
        let mut cache = CacheStore::new(versions.clone(), cache_budget, settings.cache_max_items);
        cache.set_debug(settings.cache_debug_checks);
        let history_budget = Arc::new(MemoryBudget::new("history", settings.history_budget()));

        info!(
            "Session: cache {} MB / {} items, history {} MB",
            cache.budget().limit() / 1024 / 1024,
            settings.cache_max_items,
            history_budget.limit() / 1024 / 1024
        );

        let mut session = Self {
            settings,
            versions,
            cache,
            history_budget,
            movies: Vec::new(),
            current: 0,
            fading_mask: None,
            fading_mask_version: 0,
        };
        let (w, h) = (session.settings.frame_width, session.settings.frame_height);
        session.open_movie(w, h);
        session
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    // ----- movies -----

    /// Open a new empty movie and make it current; returns its index
    pub fn open_movie(&mut self, width: u32, height: u32) -> usize {
        let movie = Movie::new(width, height, self.versions.clone());
        debug!("opened movie {} ({}x{})", movie.id(), width, height);
        self.movies.push(OpenMovie {
            movie,
            history: HistoryLog::new(Arc::clone(&self.history_budget)),
        });
        self.current = self.movies.len() - 1;
        self.sync_scope();
        self.current
    }

    /// Make another open movie current; its history is kept as it was
    pub fn switch_to(&mut self, index: usize) -> Result<()> {
        if index >= self.movies.len() {
            bail!("no open movie at {}", index);
        }
        self.current = index;
        self.sync_scope();
        Ok(())
    }

    /// Close a movie, dropping its frames and its history
    pub fn close_movie(&mut self, index: usize) -> Result<()> {
        if self.movies.len() <= 1 {
            bail!("can't close the only open movie");
        }
        if index >= self.movies.len() {
            bail!("no open movie at {}", index);
        }
        let closed = self.movies.remove(index);
        debug!(
            "closed movie {} (history {} bytes)",
            closed.movie.id(),
            closed.history.byte_size()
        );
        if self.current > index || self.current == self.movies.len() {
            self.current -= 1;
        }
        self.sync_scope();
        Ok(())
    }

    pub fn movie_count(&self) -> usize {
        self.movies.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn movie(&self) -> &Movie {
        &self.movies[self.current].movie
    }

    pub fn history(&self) -> &HistoryLog<HistoryItem> {
        &self.movies[self.current].history
    }

    pub fn open_movies(&self) -> &[OpenMovie] {
        &self.movies
    }

    fn open(&mut self) -> &mut OpenMovie {
        &mut self.movies[self.current]
    }

    fn sync_scope(&mut self) {
        let scope = self.movies[self.current].movie.resolution();
        self.cache.set_scope(scope);
    }

    // ----- drawing -----

    fn check_unlocked(&self) -> Result<()> {
        if self.movie().curr_layer().is_locked() {
            bail!("current layer is locked");
        }
        Ok(())
    }

    /// Edit a surface of the current frame; the changed area is found by diffing
    pub fn draw(&mut self, surface: SurfaceId, edit: impl FnOnce(&mut RgbaImage)) -> Result<()> {
        self.check_unlocked()?;
        let open = self.open();
        let mut item = HistoryItem::surface_edit(&mut open.movie, surface);
        edit(open.movie.edit_curr_frame().surface_mut(surface));
        item.optimize(&open.movie, None);
        open.history.append(item);
        Ok(())
    }

    /// Edit a surface of the current frame, touching only `bbox`
    pub fn draw_in(&mut self, surface: SurfaceId, bbox: Rect, edit: impl FnOnce(&mut RgbaImage)) -> Result<()> {
        self.check_unlocked()?;
        let open = self.open();
        let item = HistoryItem::surface_edit_in(&mut open.movie, surface, bbox);
        edit(open.movie.edit_curr_frame().surface_mut(surface));
        open.history.append(item);
        Ok(())
    }

    /// Apply several edits in sequence, recorded as suggestions.
    ///
    /// Undo right away steps back through them one at a time; any other action
    /// merges them into one history entry.
    pub fn draw_with_suggestions<F>(&mut self, surface: SurfaceId, edits: impl IntoIterator<Item = F>) -> Result<()>
    where
        F: FnOnce(&mut RgbaImage),
    {
        self.check_unlocked()?;
        let open = self.open();
        let mut items = Vec::new();
        for edit in edits {
            let mut item = HistoryItem::surface_edit(&mut open.movie, surface);
            edit(open.movie.edit_curr_frame().surface_mut(surface));
            item.optimize(&open.movie, None);
            items.push(item);
        }
        open.history.append_suggestions(items);
        Ok(())
    }

    // ----- structure -----

    pub fn insert_frame(&mut self) {
        let open = self.open();
        open.movie.insert_frame();
        let item = HistoryItem::insert_frame(&open.movie);
        open.history.append(item);
    }

    pub fn remove_frame(&mut self) -> Result<()> {
        let open = self.open();
        let pos = open.movie.cursor().pos;
        let removed = open.movie.remove_frame(None, None)?;
        let item = HistoryItem::remove_frame(&open.movie, pos, removed);
        open.history.append(item);
        Ok(())
    }

    pub fn insert_layer(&mut self) {
        let open = self.open();
        open.movie.insert_layer();
        let item = HistoryItem::insert_layer(&open.movie);
        open.history.append(item);
    }

    pub fn remove_layer(&mut self) -> Result<()> {
        let open = self.open();
        let layer_pos = open.movie.cursor().layer_pos;
        let removed = open.movie.remove_layer(None, None)?;
        let item = HistoryItem::remove_layer(&open.movie, layer_pos, removed);
        open.history.append(item);
        Ok(())
    }

    fn toggle(&mut self, toggle: Toggle) -> Result<()> {
        let open = self.open();
        let item = HistoryItem::toggle(&open.movie, toggle);
        toggle.apply(&mut open.movie)?;
        open.history.append(item);
        self.sync_scope();
        Ok(())
    }

    pub fn toggle_hold(&mut self) -> Result<()> {
        self.toggle(Toggle::Hold)
    }

    pub fn toggle_layer_visible(&mut self) -> Result<()> {
        let id = self.movie().curr_layer().id();
        self.toggle(Toggle::LayerVisible(id))
    }

    pub fn toggle_layer_locked(&mut self) -> Result<()> {
        let id = self.movie().curr_layer().id();
        self.toggle(Toggle::LayerLocked(id))
    }

    pub fn toggle_layer_lit(&mut self) -> Result<()> {
        let id = self.movie().curr_layer().id();
        self.toggle(Toggle::LayerLit(id))
    }

    /// Portrait <-> landscape; cached images of the old resolution stop hitting
    pub fn swap_width_height(&mut self) -> Result<()> {
        self.toggle(Toggle::SwapWidthHeight)
    }

    // ----- navigation -----

    /// Move the cursor without recording anything
    pub fn seek(&mut self, cursor: Cursor) -> Result<()> {
        self.open().movie.seek(cursor)
    }

    /// Move the cursor and record the jump, so undo brings the user back
    pub fn jump_to(&mut self, cursor: Cursor) -> Result<()> {
        let open = self.open();
        let prior = Position::of(&open.movie);
        open.movie.seek(cursor)?;
        let item = HistoryItem::seek(&open.movie, prior);
        open.history.append(item);
        Ok(())
    }

    pub fn set_view(&mut self, view: ViewState) {
        self.open().movie.set_view(view);
    }

    // ----- history -----

    pub fn undo(&mut self, filter: UndoFilter) -> Result<HistoryStep> {
        let open = self.open();
        let step = open.history.undo(&mut open.movie, filter)?;
        self.sync_scope();
        Ok(step)
    }

    pub fn redo(&mut self) -> Result<HistoryStep> {
        let open = self.open();
        let step = open.history.redo(&mut open.movie)?;
        self.sync_scope();
        Ok(step)
    }

    pub fn clear_history(&mut self) {
        self.open().history.clear();
    }

    /// Bytes retained by the histories of all open movies
    pub fn history_bytes(&self) -> usize {
        self.history_budget.usage()
    }

    // ----- derived images -----

    /// All visible layers at `pos`
    pub fn composite(&mut self, pos: usize) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        movie.check_frame(pos)?;
        self.cache.fetch(&CompositeFrame { movie, pos })
    }

    /// Layers under the current one at the cursor
    pub fn layers_below(&mut self, highlight: bool) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        let Cursor { pos, layer_pos } = movie.cursor();
        self.cache.fetch(&LayersBelow { movie, pos, layer_pos, highlight })
    }

    /// Layers over the current one at the cursor
    pub fn layers_above(&mut self, highlight: bool) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        let Cursor { pos, layer_pos } = movie.cursor();
        self.cache.fetch(&LayersAbove { movie, pos, layer_pos, highlight })
    }

    pub fn thumbnail(&mut self, pos: usize, width: u32, height: u32) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        movie.check_frame(pos)?;
        self.cache.fetch(&Thumbnail {
            movie,
            pos,
            width,
            height,
            highlight: true,
        })
    }

    pub fn layer_thumbnail(&mut self, layer_pos: usize, pos: usize, width: u32, height: u32) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        movie.check_layer(layer_pos)?;
        movie.check_frame(pos)?;
        self.cache.fetch(&LayerThumbnail {
            movie,
            layer_pos,
            pos,
            width,
            height,
        })
    }

    pub fn light_table_mask(&mut self, pos: usize, rgb: [u8; 3], transparency: f32) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        movie.check_frame(pos)?;
        self.cache.fetch(&LightTableMask {
            movie,
            pos,
            rgb,
            transparency,
        })
    }

    /// Light-table mask resized for display, cached under a key derived from the mask's
    pub fn scaled_light_table_mask(
        &mut self,
        pos: usize,
        rgb: [u8; 3],
        transparency: f32,
        width: u32,
        height: u32,
    ) -> Result<Surface> {
        let movie = &self.movies[self.current].movie;
        movie.check_frame(pos)?;
        let (source_key, source) = self.cache.fetch_kv(&LightTableMask {
            movie,
            pos,
            rgb,
            transparency,
        })?;
        self.cache.fetch(&Scaled {
            source_key,
            source,
            width,
            height,
        })
    }

    /// Replace the fading mask; images scaled from the previous one go stale
    pub fn set_fading_mask(&mut self, mask: Option<RgbaImage>) {
        self.fading_mask_version += 1;
        let id = EntityId::named(FADING_MASK);
        match mask {
            Some(mask) => {
                self.cache.update_id(id, self.fading_mask_version);
                self.fading_mask = Some(Arc::new(mask));
            }
            None => {
                self.cache.delete_id(&id);
                self.fading_mask = None;
            }
        }
    }

    pub fn scaled_fading_mask(&mut self, width: u32, height: u32) -> Result<Option<Surface>> {
        let Some(surface) = self.fading_mask.clone() else {
            return Ok(None);
        };
        let (source_key, source) = self.cache.fetch_kv(&NamedSurface {
            id: EntityId::named(FADING_MASK),
            version: self.fading_mask_version,
            surface,
        })?;
        let scaled = self.cache.fetch(&Scaled {
            source_key,
            source,
            width,
            height,
        })?;
        Ok(Some(scaled))
    }

    // ----- cache control -----

    /// Run `f` with cache retention suppressed (eg while zooming or panning)
    pub fn interactive<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_locked = self.cache.is_locked();
        self.cache.lock();
        let result = f(self);
        if !was_locked {
            self.cache.unlock();
        }
        result
    }

    /// Collect cache entries made stale during this cycle; returns how many went
    pub fn end_interaction_cycle(&mut self) -> usize {
        self.cache.collect_garbage()
    }

    pub fn cache(&self) -> &CacheStore<Surface> {
        &self.cache
    }

    pub fn cache_stats(&self) -> Arc<CacheStats> {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::frame::PEN;

    fn session() -> EditorSession {
        EditorSession::new(EditorSettings {
            frame_width: 16,
            frame_height: 12,
            ..Default::default()
        })
    }

    #[test]
    fn test_locked_layer_rejects_drawing() {
        let mut s = session();
        s.toggle_layer_locked().unwrap();
        assert!(s.draw(SurfaceId::Lines, |img| img.put_pixel(0, 0, PEN)).is_err());
        assert_eq!(s.history().undo_len(), 1);
    }

    #[test]
    fn test_toggle_recorded_and_undone() {
        let mut s = session();
        s.toggle_layer_visible().unwrap();
        assert!(!s.movie().curr_layer().is_visible());
        assert_eq!(s.undo(UndoFilter::Any).unwrap(), HistoryStep::Applied);
        assert!(s.movie().curr_layer().is_visible());
    }

    #[test]
    fn test_swap_changes_scope() {
        let mut s = session();
        s.composite(0).unwrap();
        s.swap_width_height().unwrap();
        assert_eq!(s.cache().scope(), (12, 16));
        assert_eq!(s.end_interaction_cycle(), 1);
        s.undo(UndoFilter::Any).unwrap();
        assert_eq!(s.cache().scope(), (16, 12));
    }

    #[test]
    fn test_interactive_does_not_retain() {
        let mut s = session();
        s.interactive(|s| s.composite(0).unwrap());
        assert!(s.cache().is_empty());
        assert!(!s.cache().is_locked());
    }

    #[test]
    fn test_fading_mask_scaling() {
        let mut s = session();
        assert!(s.scaled_fading_mask(8, 6).unwrap().is_none());
        s.set_fading_mask(Some(RgbaImage::new(16, 12)));
        let scaled = s.scaled_fading_mask(8, 6).unwrap().unwrap();
        assert_eq!(scaled.dimensions(), (8, 6));
        assert_eq!(s.cache().len(), 2);

        s.set_fading_mask(Some(RgbaImage::new(16, 12)));
        assert_eq!(s.end_interaction_cycle(), 2);
        s.set_fading_mask(None);
        assert!(s.scaled_fading_mask(8, 6).unwrap().is_none());
    }

    #[test]
    fn test_close_movie_returns_history_bytes() {
        let mut s = session();
        s.insert_frame();
        let second = s.open_movie(16, 12);
        s.insert_frame();
        s.draw(SurfaceId::Lines, |img| img.put_pixel(1, 1, PEN)).unwrap();
        let before = s.history_bytes();
        let own = s.history().byte_size();
        assert!(own > 0);

        s.close_movie(second).unwrap();
        assert_eq!(s.history_bytes(), before - own);
        assert_eq!(s.current_index(), 0);
        assert!(s.close_movie(0).is_err());
    }

    #[test]
    fn test_out_of_range_positions_are_errors() {
        let mut s = session();
        assert!(s.composite(5).is_err());
        assert!(s.thumbnail(1, 8, 6).is_err());
        assert!(s.layer_thumbnail(3, 0, 8, 6).is_err());
        assert!(s.layer_thumbnail(0, 2, 8, 6).is_err());
        assert!(s.light_table_mask(5, [255, 0, 0], 0.5).is_err());
        assert!(s.scaled_light_table_mask(5, [255, 0, 0], 0.5, 8, 6).is_err());
        assert!(s.cache().is_empty());
        assert!(s.composite(0).is_ok());
    }

    #[test]
    fn test_history_bytes_follow_structural_undo() {
        let mut s = session();
        let in_sync = |s: &EditorSession| s.history_bytes() == s.history().byte_size();

        s.draw(SurfaceId::Lines, |img| img.put_pixel(1, 1, PEN)).unwrap();
        s.insert_frame();
        s.draw(SurfaceId::Lines, |img| img.put_pixel(2, 2, PEN)).unwrap();
        s.remove_frame().unwrap();
        assert!(in_sync(&s));
        s.insert_layer();
        s.draw(SurfaceId::Lines, |img| img.put_pixel(3, 3, PEN)).unwrap();
        s.remove_layer().unwrap();
        assert!(in_sync(&s));
        s.insert_frame();
        assert!(in_sync(&s));

        for _ in 0..32 {
            if s.undo(UndoFilter::Any).unwrap() == HistoryStep::Empty {
                break;
            }
            assert!(in_sync(&s));
        }
        assert!(!s.history().can_undo());

        for _ in 0..32 {
            if s.redo().unwrap() == HistoryStep::Empty {
                break;
            }
            assert!(in_sync(&s));
        }
        assert!(!s.history().can_redo());

        s.undo(UndoFilter::Any).unwrap();
        assert!(in_sync(&s));
        s.clear_history();
        assert_eq!(s.history_bytes(), 0);
    }
}
