//! Story navigation: the level store, the pagination loader and the
//! sibling navigator.
//!
//! - [`LevelStore`]: pure snapshot of a session's level chain
//! - [`StorySession`]: owns a store, loads pages and switches siblings

mod session;
mod store;

pub use session::*;
pub use store::*;
