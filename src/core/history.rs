//! Bounded undo/redo log
//!
//! One log per open document; the byte total is shared by all of them through a
//! [`MemoryBudget`], so a large history in one document shortens the others only
//! when they next grow. Eviction always drops the oldest undo entries of the log
//! being appended to.
//!
//! Undo and redo are two-step when the document has moved away from where an
//! entry was recorded: the first call only navigates back to that position, the
//! next one actually reverts. This keeps the user oriented before content changes.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};

use super::budget::MemoryBudget;

/// Reversible document operation stored in a [`HistoryLog`]
pub trait HistoryEntry: Sized + fmt::Debug {
    /// The edited document the entry applies to
    type Document;

    /// Perform the inverse action and return the entry that re-applies it.
    ///
    /// On error the document must be unchanged and `self` must remain undoable.
    fn undo(&mut self, doc: &mut Self::Document) -> Result<Self>;

    /// Navigate `doc` to where the entry was recorded.
    ///
    /// Returns true if anything had to move, in which case the caller stops there.
    fn reveal(&self, doc: &mut Self::Document) -> Result<bool>;

    fn byte_size(&self) -> usize;

    /// Entry changes nothing and should not be stored
    fn nop(&self) -> bool;

    /// Entry only touches pixels (no structural or toggle changes)
    fn is_drawing_change(&self) -> bool;

    /// Entry was recorded at the document's current cursor position
    fn at_current_position(&self, doc: &Self::Document) -> bool;

    /// One entry that undoes `items` in order
    fn composite(items: Vec<Self>) -> Self;
}

/// Which entries an undo request may revert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndoFilter {
    /// Undo whatever is on top of the stack
    #[default]
    Any,
    /// Only a drawing change made at the current cursor position ("undo last stroke")
    DrawingAtCursor,
}

/// What an undo/redo call ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    /// Nothing to undo/redo
    Empty,
    /// Top entry rejected by the filter
    Filtered,
    /// Moved to the entry's position; the next call reverts it
    Revealed,
    /// Entry reverted and moved to the opposite stack
    Applied,
}

/// Stack slot: the entry plus the bytes charged to the budget when it was pushed.
///
/// Undoing may drain an entry's payload, so freeing always uses `bytes`.
#[derive(Debug)]
struct Charged<I> {
    item: I,
    bytes: usize,
}

/// Per-document undo/redo stacks with pending suggestions
pub struct HistoryLog<I: HistoryEntry> {
    undo: Vec<Charged<I>>,
    redo: Vec<Charged<I>>,
    /// Alternative states offered by the last action, not yet merged
    suggestions: Option<Vec<I>>,
    /// Retained bytes across every open document
    budget: Arc<MemoryBudget>,
}

impl<I: HistoryEntry> fmt::Debug for HistoryLog<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryLog")
            .field("undo", &self.undo.len())
            .field("redo", &self.redo.len())
            .field("suggestions", &self.suggestions.as_ref().map(Vec::len))
            .field("byte_size", &self.byte_size())
            .finish()
    }
}

impl<I: HistoryEntry> HistoryLog<I> {
    pub fn new(budget: Arc<MemoryBudget>) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            suggestions: None,
            budget,
        }
    }

    /// Record a forward edit; drops the redo stack
    pub fn append(&mut self, item: I) {
        if item.nop() {
            return;
        }
        self.merge_prev_suggestions();
        self.push_forward(item);
    }

    /// Record several entries leading from the new state back to the old one.
    ///
    /// `items` are in the order they were produced: undoing the last one first
    /// reaches the intermediate state. Pressing undo right away visits the entries
    /// one at a time; any other append merges them into a single composite entry.
    pub fn append_suggestions(&mut self, items: Vec<I>) {
        self.merge_prev_suggestions();
        let mut items: Vec<I> = items.into_iter().filter(|item| !item.nop()).collect();
        match items.len() {
            0 => {}
            1 => {
                if let Some(item) = items.pop() {
                    self.push_forward(item);
                }
            }
            n => {
                debug!("history: {} pending suggestions", n);
                self.drop_redo();
                self.suggestions = Some(items);
            }
        }
    }

    fn merge_prev_suggestions(&mut self) {
        if let Some(mut items) = self.suggestions.take() {
            items.reverse();
            self.push_forward(I::composite(items));
        }
    }

    fn push_forward(&mut self, item: I) {
        self.drop_redo();
        self.push_undo(item);
    }

    fn charge(&self, item: I) -> Charged<I> {
        let bytes = item.byte_size();
        self.budget.add_memory(bytes);
        Charged { item, bytes }
    }

    /// Push onto the undo stack, evicting the oldest entries while over the limit
    fn push_undo(&mut self, item: I) {
        let charged = self.charge(item);
        self.undo.push(charged);
        self.evict_oldest();
    }

    fn evict_oldest(&mut self) {
        while !self.undo.is_empty() && self.budget.check_memory_limit() {
            let oldest = self.undo.remove(0);
            self.budget.free_memory(oldest.bytes);
            debug!("history evicted oldest entry ({} bytes)", oldest.bytes);
        }
    }

    fn drop_redo(&mut self) {
        let freed: usize = self.redo.iter().map(|c| c.bytes).sum();
        self.budget.free_memory(freed);
        self.redo.clear();
    }

    /// Revert the newest entry, subject to `filter` and the reveal-first rule
    pub fn undo(&mut self, doc: &mut I::Document, filter: UndoFilter) -> Result<HistoryStep> {
        // Accept the pending suggestions individually so they can be cycled through
        if let Some(items) = self.suggestions.take() {
            for item in items {
                self.push_undo(item);
            }
        }

        let Some(last) = self.undo.last_mut() else {
            return Ok(HistoryStep::Empty);
        };

        if filter == UndoFilter::DrawingAtCursor
            && (!last.item.is_drawing_change() || !last.item.at_current_position(doc))
        {
            return Ok(HistoryStep::Filtered);
        }

        if last.item.reveal(doc)? {
            warn!("undo: document was elsewhere, moved to the entry's position first");
            return Ok(HistoryStep::Revealed);
        }

        let redo = last.item.undo(doc)?;
        if let Some(done) = self.undo.pop() {
            self.budget.free_memory(done.bytes);
        }
        let charged = self.charge(redo);
        self.redo.push(charged);
        self.evict_oldest();
        Ok(HistoryStep::Applied)
    }

    /// Re-apply the newest undone entry
    pub fn redo(&mut self, doc: &mut I::Document) -> Result<HistoryStep> {
        let Some(last) = self.redo.last_mut() else {
            return Ok(HistoryStep::Empty);
        };

        if last.item.reveal(doc)? {
            warn!("redo: document was elsewhere, moved to the entry's position first");
            return Ok(HistoryStep::Revealed);
        }

        let undo = last.item.undo(doc)?;
        if let Some(done) = self.redo.pop() {
            self.budget.free_memory(done.bytes);
        }
        self.push_undo(undo);
        Ok(HistoryStep::Applied)
    }

    /// Forget everything, returning the bytes to the shared budget
    pub fn clear(&mut self) {
        let freed = self.byte_size();
        self.budget.free_memory(freed);
        self.undo.clear();
        self.redo.clear();
        self.suggestions = None;
        debug!("history cleared ({} bytes freed)", freed);
    }

    /// Bytes retained by this log (pending suggestions excluded)
    pub fn byte_size(&self) -> usize {
        self.undo.iter().chain(self.redo.iter()).map(|c| c.bytes).sum()
    }

    /// Shared budget across all logs
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty() || self.suggestions.is_some()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn has_suggestions(&self) -> bool {
        self.suggestions.is_some()
    }
}

impl<I: HistoryEntry> Drop for HistoryLog<I> {
    fn drop(&mut self) {
        self.budget.free_memory(self.byte_size());
    }
}
