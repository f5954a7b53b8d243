use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::schema::{CREATE_ENTRIES_SQL, INSERT_ROOT_SQL};
use crate::{Index, Result};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// A memory-resident SQLite database shared by every connection opened from it.
///
/// Callers open their own [`Index`] connection per operation instead of sharing one, which keeps
/// concurrent filesystem calls from stepping on each other's statements. The store keeps an
/// anchor connection for its whole lifetime: SQLite discards a shared in-memory database as soon
/// as its last connection closes.
pub struct IndexStore {
    uri: String,
    anchor: Mutex<Connection>,
}

impl IndexStore {
    /// Create a new empty store containing only the root directory.
    pub fn create() -> Result<Self> {
        // Each store gets its own name so independent filesystems in one process do not share
        // entries.
        let uri = format!(
            "file:vramfs-index-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)
        );

        let anchor = open(&uri)?;
        anchor.execute_batch(CREATE_ENTRIES_SQL)?;
        anchor.execute_batch(INSERT_ROOT_SQL)?;
        debug!(%uri, "created index store");

        Ok(Self {
            uri,
            anchor: Mutex::new(anchor),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Open a new connection to this store.
    pub fn connect(&self) -> Result<Index> {
        Ok(Index::new(open(&self.uri)?))
    }

    /// Close the anchor connection. Once every [`Index`] opened from this store is dropped as
    /// well, the database is gone.
    pub fn close(self) -> Result<()> {
        let anchor = self
            .anchor
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        anchor.close().map_err(|(_, err)| err.into())
    }
}

impl fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexStore").field("uri", &self.uri).finish()
    }
}

fn open(uri: &str) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryFilter, EntryId};

    #[test]
    fn connections_share_one_database() {
        let store = IndexStore::create().unwrap();
        let writer = store.connect().unwrap();
        let id = writer.insert_path("/shared", true).unwrap();

        let reader = store.connect().unwrap();
        assert_eq!(reader.find("/shared", EntryFilter::Directory).unwrap(), id);
    }

    #[test]
    fn separate_stores_are_isolated() {
        let a = IndexStore::create().unwrap();
        let b = IndexStore::create().unwrap();
        assert_ne!(a.uri(), b.uri());

        a.connect().unwrap().insert_path("/only-in-a", false).unwrap();
        let err = b
            .connect()
            .unwrap()
            .find("/only-in-a", EntryFilter::All)
            .unwrap_err();
        assert!(matches!(err, crate::IndexError::NotFound));
        assert_eq!(
            b.connect().unwrap().find("/", EntryFilter::All).unwrap(),
            EntryId::ROOT
        );
    }

    #[test]
    fn close_releases_anchor() {
        let store = IndexStore::create().unwrap();
        store.close().unwrap();
    }
}
