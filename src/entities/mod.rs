//! Entities module - the edited movie and everything derived from it
//!
//! - `frame`, `layer`, `movie`: the document model
//! - `history_item`: undoable operations on a movie
//! - `computations`: cached images derived from a movie

pub mod computations;
pub mod frame;
pub mod history_item;
pub mod layer;
pub mod movie;
pub mod region;

pub use computations::Surface;
pub use frame::{Frame, SurfaceId};
pub use history_item::{HistoryItem, Position, Toggle};
pub use layer::Layer;
pub use movie::{Cursor, Movie, ViewState};
pub use region::Rect;
