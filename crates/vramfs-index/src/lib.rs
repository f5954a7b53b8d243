//! Hierarchical entry index for vramfs.
//!
//! Directory and file metadata live in one SQLite table held in memory for the lifetime of the
//! mount. Every entry points at its parent; the root (id 1) points at the reserved id 0. Paths are
//! resolved by walking that table one component at a time (see [`Index::find`]).

mod error;
mod index;
mod schema;
mod store;

pub use error::{IndexError, Result};
pub use index::{ChildEntry, EntryAttributes, EntryFilter, EntryId, Index};
pub use schema::{DEFAULT_ENTRY_SIZE, ROOT_ENTRY, ROOT_PARENT};
pub use store::IndexStore;
