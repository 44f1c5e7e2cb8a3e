//! Layer: one frame per timeline slot plus display flags

use uuid::Uuid;

use super::frame::Frame;

#[derive(Debug)]
pub struct Layer {
    id: Uuid,
    pub(crate) frames: Vec<Frame>,
    visible: bool,
    /// Locked layers can't be drawn on
    locked: bool,
    /// Lines of a lit layer show up in the light table
    lit: bool,
}

impl Layer {
    pub fn new(id: Uuid, frames: Vec<Frame>) -> Self {
        Self {
            id,
            frames,
            visible: true,
            locked: false,
            lit: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Position of the frame actually displayed at `pos` (skips held frames backwards)
    pub fn surface_pos(&self, mut pos: usize) -> usize {
        while pos > 0 && self.frames[pos].hold() {
            pos -= 1;
        }
        pos
    }

    /// Frame displayed at `pos`
    pub fn frame(&self, pos: usize) -> &Frame {
        &self.frames[self.surface_pos(pos)]
    }

    pub fn frame_mut(&mut self, pos: usize) -> &mut Frame {
        let pos = self.surface_pos(pos);
        &mut self.frames[pos]
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn toggle_locked(&mut self) {
        self.locked = !self.locked;
    }

    pub fn toggle_lit(&mut self) {
        self.lit = !self.lit;
    }

    /// Hidden layers are never lit
    pub fn toggle_visible(&mut self) {
        self.visible = !self.visible;
        self.lit = self.visible;
    }

    pub fn byte_size(&self) -> usize {
        self.frames.iter().map(Frame::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::versions::VersionTable;

    fn layer(n: usize) -> Layer {
        let versions = VersionTable::new();
        let id = Uuid::new_v4();
        let frames = (0..n)
            .map(|_| Frame::new(Uuid::new_v4(), id, 4, 4, versions.clone()))
            .collect();
        Layer::new(id, frames)
    }

    #[test]
    fn test_hold_resolves_to_earlier_frame() {
        let mut l = layer(4);
        l.frames[2].set_hold(true);
        l.frames[3].set_hold(true);
        assert_eq!(l.surface_pos(3), 1);
        assert_eq!(l.frame(2).id(), l.frames[1].id());
        assert_eq!(l.surface_pos(1), 1);
    }

    #[test]
    fn test_hold_on_first_frame_is_ignored() {
        let mut l = layer(2);
        l.frames[0].set_hold(true);
        assert_eq!(l.surface_pos(0), 0);
    }

    #[test]
    fn test_toggle_visible_also_sets_lit() {
        let mut l = layer(1);
        l.toggle_lit();
        assert!(!l.is_lit());
        l.toggle_visible();
        assert!(!l.is_visible());
        assert!(!l.is_lit());
        l.toggle_visible();
        assert!(l.is_lit());
    }
}
