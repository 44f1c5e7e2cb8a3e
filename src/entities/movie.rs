//! Movie: a grid of layers x frames with a cursor and a view.
//!
//! This is the document the history log edits and the cache derives images
//! from. It owns every frame, so frame lifetimes drive the invalidation table:
//! frames register on creation and unregister when finally dropped (which for a
//! removed frame happens only once no history entry can reinsert it).

use anyhow::{anyhow, bail, Result};
use image::RgbaImage;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::frame::{Frame, SurfaceId};
use super::layer::Layer;
use crate::core::cache_key::DependencySet;
use crate::core::versions::VersionTable;

/// Frame + layer position of the editing cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub pos: usize,
    pub layer_pos: usize,
}

impl Cursor {
    pub fn new(pos: usize, layer_pos: usize) -> Self {
        Self { pos, layer_pos }
    }
}

/// Zoom/pan of the drawing area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub zoom: f32,
    pub pan_x: f32,
    pub pan_y: f32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

/// One frame per layer taken out by [`Movie::remove_frame`], kept for reinsertion
#[derive(Debug, Default)]
pub struct RemovedFrames {
    frames: Vec<Frame>,
    /// Hold flag of each layer's first frame before it was forced off
    first_holds: Vec<bool>,
}

impl RemovedFrames {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.frames.iter().map(Frame::byte_size).sum()
    }
}

#[derive(Debug)]
pub struct Movie {
    id: Uuid,
    layers: Vec<Layer>,
    cursor: Cursor,
    view: ViewState,
    width: u32,
    height: u32,
    versions: VersionTable,
}

impl Movie {
    /// New movie with one layer holding one empty frame
    pub fn new(width: u32, height: u32, versions: VersionTable) -> Self {
        let layer_id = Uuid::new_v4();
        let frame = Frame::new(Uuid::new_v4(), layer_id, width, height, versions.clone());
        Self {
            id: Uuid::new_v4(),
            layers: vec![Layer::new(layer_id, vec![frame])],
            cursor: Cursor::default(),
            view: ViewState::default(),
            width,
            height,
            versions,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn view(&self) -> ViewState {
        self.view
    }

    pub fn set_view(&mut self, view: ViewState) {
        self.view = view;
    }

    pub fn frame_count(&self) -> usize {
        self.layers[0].len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, layer_pos: usize) -> Option<&Layer> {
        self.layers.get(layer_pos)
    }

    pub fn layer_pos_of(&self, layer_id: Uuid) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == layer_id)
    }

    pub fn curr_layer(&self) -> &Layer {
        &self.layers[self.cursor.layer_pos]
    }

    /// Frame displayed at the cursor (after resolving holds)
    pub fn curr_frame(&self) -> &Frame {
        self.curr_layer().frame(self.cursor.pos)
    }

    /// Frame displayed at `cursor`, if it is in range
    pub fn frame_at(&self, cursor: Cursor) -> Option<&Frame> {
        self.layers
            .get(cursor.layer_pos)
            .filter(|layer| cursor.pos < layer.len())
            .map(|layer| layer.frame(cursor.pos))
    }

    pub fn surface_at(&self, cursor: Cursor, surface_id: SurfaceId) -> Option<&RgbaImage> {
        self.frame_at(cursor).and_then(|frame| frame.surface(surface_id))
    }

    /// Frame at the cursor, prepared for an edit (version bumped)
    pub fn edit_curr_frame(&mut self) -> &mut Frame {
        let Cursor { pos, layer_pos } = self.cursor;
        let frame = self.layers[layer_pos].frame_mut(pos);
        frame.increment_version();
        frame
    }

    /// Fail unless `pos` is an existing frame position
    pub fn check_frame(&self, pos: usize) -> Result<()> {
        if pos >= self.frame_count() {
            bail!("frame {} out of range (movie has {} frames)", pos, self.frame_count());
        }
        Ok(())
    }

    /// Fail unless `layer_pos` is an existing layer
    pub fn check_layer(&self, layer_pos: usize) -> Result<()> {
        if layer_pos >= self.layer_count() {
            bail!("layer {} out of range (movie has {} layers)", layer_pos, self.layer_count());
        }
        Ok(())
    }

    pub fn seek(&mut self, cursor: Cursor) -> Result<()> {
        if cursor.pos >= self.frame_count() || cursor.layer_pos >= self.layer_count() {
            bail!(
                "seek out of range: frame {} layer {} (movie has {} frames, {} layers)",
                cursor.pos,
                cursor.layer_pos,
                self.frame_count(),
                self.layer_count()
            );
        }
        self.cursor = cursor;
        Ok(())
    }

    pub fn seek_frame(&mut self, pos: usize) -> Result<()> {
        self.seek(Cursor::new(pos, self.cursor.layer_pos))
    }

    pub fn seek_layer(&mut self, layer_pos: usize) -> Result<()> {
        self.seek(Cursor::new(self.cursor.pos, layer_pos))
    }

    pub fn next_frame(&mut self) {
        self.cursor.pos = (self.cursor.pos + 1) % self.frame_count();
    }

    pub fn prev_frame(&mut self) {
        let n = self.frame_count();
        self.cursor.pos = (self.cursor.pos + n - 1) % n;
    }

    pub fn next_layer(&mut self) {
        self.cursor.layer_pos = (self.cursor.layer_pos + 1) % self.layer_count();
    }

    pub fn prev_layer(&mut self) {
        let n = self.layer_count();
        self.cursor.layer_pos = (self.cursor.layer_pos + n - 1) % n;
    }

    /// Insert an empty frame after the cursor in every layer and move to it.
    ///
    /// Frames of the other layers are held so they keep showing their content.
    pub fn insert_frame(&mut self) {
        let frame_id = Uuid::new_v4();
        let at = self.cursor.pos + 1;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let mut frame = Frame::new(frame_id, layer.id(), self.width, self.height, self.versions.clone());
            frame.set_hold(i != self.cursor.layer_pos);
            layer.frames.insert(at, frame);
        }
        self.next_frame();
        debug!("inserted frame {} at {}", frame_id, at);
    }

    /// Insert an empty layer above the cursor and move to it
    pub fn insert_layer(&mut self) {
        let layer_id = Uuid::new_v4();
        let frames = self.layers[self.cursor.layer_pos]
            .frames()
            .iter()
            .map(|f| Frame::new(f.id(), layer_id, self.width, self.height, self.versions.clone()))
            .collect();
        self.layers.insert(self.cursor.layer_pos + 1, Layer::new(layer_id, frames));
        self.next_layer();
        debug!("inserted layer {} at {}", layer_id, self.cursor.layer_pos);
    }

    /// Remove the frame at `at` (default: cursor) from every layer.
    ///
    /// The cursor lands on `new_pos` if given, else stays at the removed slot.
    pub fn remove_frame(&mut self, at: Option<usize>, new_pos: Option<usize>) -> Result<RemovedFrames> {
        if self.frame_count() <= 1 {
            bail!("can't remove the only frame");
        }
        let at = at.unwrap_or(self.cursor.pos);
        if at >= self.frame_count() {
            bail!("no frame at {}", at);
        }

        let mut removed = RemovedFrames::default();
        for layer in &mut self.layers {
            removed.frames.push(layer.frames.remove(at));
            removed.first_holds.push(layer.frames[0].hold());
            // a held first frame would have nothing to show
            layer.frames[0].set_hold(false);
        }

        let last = self.frame_count() - 1;
        self.cursor.pos = new_pos.unwrap_or(at).min(last);
        debug!("removed frame at {}", at);
        Ok(removed)
    }

    /// Put frames taken by [`remove_frame`](Self::remove_frame) back at `pos`.
    ///
    /// `removed` is drained only if the reinsertion is valid.
    pub fn reinsert_frame_at(&mut self, pos: usize, removed: &mut RemovedFrames) -> Result<()> {
        if pos > self.frame_count() {
            bail!("can't reinsert frame at {} (movie has {} frames)", pos, self.frame_count());
        }
        if removed.frames.len() != self.layer_count() || removed.first_holds.len() != self.layer_count() {
            bail!(
                "removed frame data covers {} layers, movie has {}",
                removed.frames.len(),
                self.layer_count()
            );
        }

        let frames = std::mem::take(&mut removed.frames);
        let holds = std::mem::take(&mut removed.first_holds);
        for ((layer, frame), hold) in self.layers.iter_mut().zip(frames).zip(holds) {
            layer.frames[0].set_hold(hold);
            layer.frames.insert(pos, frame);
        }
        self.cursor.pos = pos;
        debug!("reinserted frame at {}", pos);
        Ok(())
    }

    /// Remove the layer at `at` (default: cursor)
    pub fn remove_layer(&mut self, at: Option<usize>, new_pos: Option<usize>) -> Result<Layer> {
        if self.layer_count() <= 1 {
            bail!("can't remove the only layer");
        }
        let at = at.unwrap_or(self.cursor.layer_pos);
        if at >= self.layer_count() {
            bail!("no layer at {}", at);
        }

        let removed = self.layers.remove(at);
        let last = self.layer_count() - 1;
        self.cursor.layer_pos = new_pos.unwrap_or(at).min(last);
        debug!("removed layer {} at {}", removed.id(), at);
        Ok(removed)
    }

    /// Put a removed layer back at `layer_pos`; `slot` is emptied only on success
    pub fn reinsert_layer_at(&mut self, layer_pos: usize, slot: &mut Option<Layer>) -> Result<()> {
        if layer_pos > self.layer_count() {
            bail!("can't reinsert layer at {} (movie has {} layers)", layer_pos, self.layer_count());
        }
        let frames = slot
            .as_ref()
            .ok_or_else(|| anyhow!("removed layer already reinserted"))?
            .len();
        if frames != self.frame_count() {
            bail!("removed layer has {} frames, movie has {}", frames, self.frame_count());
        }

        if let Some(layer) = slot.take() {
            debug!("reinserted layer {} at {}", layer.id(), layer_pos);
            self.layers.insert(layer_pos, layer);
        }
        self.cursor.layer_pos = layer_pos;
        Ok(())
    }

    /// Hold/unhold the current layer's frame at the cursor
    pub fn toggle_hold(&mut self) -> Result<()> {
        let Cursor { pos, layer_pos } = self.cursor;
        if pos == 0 {
            bail!("the first frame can't be held");
        }
        let frame = &mut self.layers[layer_pos].frames[pos];
        frame.set_hold(!frame.hold());
        Ok(())
    }

    fn layer_by_id_mut(&mut self, layer_id: Uuid) -> Result<&mut Layer> {
        self.layers
            .iter_mut()
            .find(|l| l.id() == layer_id)
            .ok_or_else(|| anyhow!("layer {} not found", layer_id))
    }

    pub fn toggle_layer_visible(&mut self, layer_id: Uuid) -> Result<()> {
        self.layer_by_id_mut(layer_id).map(Layer::toggle_visible)
    }

    pub fn toggle_layer_locked(&mut self, layer_id: Uuid) -> Result<()> {
        self.layer_by_id_mut(layer_id).map(Layer::toggle_locked)
    }

    pub fn toggle_layer_lit(&mut self, layer_id: Uuid) -> Result<()> {
        self.layer_by_id_mut(layer_id).map(Layer::toggle_lit)
    }

    /// Portrait <-> landscape; every drawn frame is rotated and re-versioned
    pub fn swap_width_height(&mut self) {
        std::mem::swap(&mut self.width, &mut self.height);
        let (width, height) = (self.width, self.height);
        for layer in &mut self.layers {
            for frame in &mut layer.frames {
                frame.fit_to_resolution(width, height);
            }
        }
        debug!("resolution swapped to {}x{}", width, height);
    }

    /// Versions of the frames displayed at `pos` in the given layers.
    ///
    /// Hidden layers are skipped unless `include_invisible`; empty frames never
    /// contribute.
    pub fn dependencies<'a>(
        &self,
        layers: impl IntoIterator<Item = &'a Layer>,
        pos: usize,
        include_invisible: bool,
    ) -> DependencySet {
        layers
            .into_iter()
            .filter(|layer| layer.is_visible() || include_invisible)
            .filter_map(|layer| layer.frame(pos).cache_id_version())
            .collect()
    }

    pub fn byte_size(&self) -> usize {
        self.layers.iter().map(Layer::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie() -> Movie {
        Movie::new(8, 6, VersionTable::new())
    }

    #[test]
    fn test_insert_frame_holds_other_layers() {
        let mut m = movie();
        m.insert_layer();
        assert_eq!(m.cursor(), Cursor::new(0, 1));

        m.insert_frame();
        assert_eq!(m.frame_count(), 2);
        assert_eq!(m.cursor(), Cursor::new(1, 1));
        assert!(m.layers()[0].frames()[1].hold());
        assert!(!m.layers()[1].frames()[1].hold());
        // frames at one slot share the frame id
        assert_eq!(m.layers()[0].frames()[1].id(), m.layers()[1].frames()[1].id());
    }

    #[test]
    fn test_remove_and_reinsert_frame() {
        let mut m = movie();
        m.insert_frame();
        m.edit_curr_frame();
        let id = m.curr_frame().cache_id();
        m.insert_frame();
        assert_eq!(m.frame_count(), 3);

        let mut removed = m.remove_frame(Some(1), Some(0)).unwrap();
        assert_eq!(m.frame_count(), 2);
        assert_eq!(m.cursor().pos, 0);
        // still registered while the removed data is alive
        assert!(m.versions().contains(&id));

        m.reinsert_frame_at(1, &mut removed).unwrap();
        assert!(removed.is_empty());
        assert_eq!(m.cursor().pos, 1);
        assert_eq!(m.curr_frame().cache_id(), id);
    }

    #[test]
    fn test_dropping_removed_frames_unregisters() {
        let mut m = movie();
        m.insert_frame();
        let id = m.curr_frame().cache_id();
        let removed = m.remove_frame(None, None).unwrap();
        drop(removed);
        assert!(!m.versions().contains(&id));
    }

    #[test]
    fn test_cant_remove_last_frame_or_layer() {
        let mut m = movie();
        assert!(m.remove_frame(None, None).is_err());
        assert!(m.remove_layer(None, None).is_err());
    }

    #[test]
    fn test_remove_frame_clears_first_hold_and_restores_it() {
        let mut m = movie();
        m.insert_frame();
        m.toggle_hold().unwrap();
        assert!(m.layers()[0].frames()[1].hold());

        let mut removed = m.remove_frame(Some(0), None).unwrap();
        assert!(!m.layers()[0].frames()[0].hold());
        m.reinsert_frame_at(0, &mut removed).unwrap();
        assert!(m.layers()[0].frames()[1].hold());
    }

    #[test]
    fn test_remove_and_reinsert_layer() {
        let mut m = movie();
        m.insert_layer();
        let id = m.curr_layer().id();
        let removed = m.remove_layer(None, Some(0)).unwrap();
        assert_eq!(m.layer_count(), 1);
        assert_eq!(m.cursor().layer_pos, 0);

        let mut slot = Some(removed);
        m.reinsert_layer_at(1, &mut slot).unwrap();
        assert!(slot.is_none());
        assert_eq!(m.curr_layer().id(), id);
        assert!(m.reinsert_layer_at(1, &mut slot).is_err());
    }

    #[test]
    fn test_toggle_hold_on_first_frame_fails() {
        let mut m = movie();
        assert!(m.toggle_hold().is_err());
    }

    #[test]
    fn test_dependencies_skip_empty_and_hidden() {
        let mut m = movie();
        m.insert_layer();
        m.edit_curr_frame();
        assert_eq!(m.dependencies(m.layers(), 0, false).len(), 1);

        m.seek_layer(0).unwrap();
        m.edit_curr_frame();
        assert_eq!(m.dependencies(m.layers(), 0, false).len(), 2);

        let hidden = m.layers()[1].id();
        m.toggle_layer_visible(hidden).unwrap();
        assert_eq!(m.dependencies(m.layers(), 0, false).len(), 1);
        assert_eq!(m.dependencies(m.layers(), 0, true).len(), 2);
    }

    #[test]
    fn test_seek_bounds() {
        let mut m = movie();
        assert!(m.seek(Cursor::new(1, 0)).is_err());
        m.insert_frame();
        m.seek(Cursor::new(0, 0)).unwrap();
        m.prev_frame();
        assert_eq!(m.cursor().pos, 1);
    }
}
