use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::error;

use crate::schema::{
    ENTRY_ATTRIBUTES_SQL, FIND_CHILD_SQL, INSERT_ENTRY_SQL, LIST_CHILDREN_SQL, ROOT_ENTRY,
    ROOT_PARENT,
};
use crate::{IndexError, Result};

/// Identifier of a row in the `entries` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub i64);

impl EntryId {
    pub const ROOT: EntryId = EntryId(ROOT_ENTRY);
    /// Parent of the root. Never resolves to an entry.
    pub const ROOT_PARENT: EntryId = EntryId(ROOT_PARENT);
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of entry a lookup must end on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryFilter {
    #[default]
    All,
    File,
    Directory,
}

/// Full row of an entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryAttributes {
    pub id: EntryId,
    pub parent: EntryId,
    pub name: String,
    pub is_directory: bool,
    pub size: i64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildEntry {
    pub id: EntryId,
    pub name: String,
    pub is_directory: bool,
}

/// One connection to an [`IndexStore`](crate::IndexStore).
pub struct Index {
    conn: Connection,
}

impl Index {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Resolve an absolute, `/`-separated path to an entry id.
    ///
    /// The walk starts at the root and looks up one component at a time. Hitting a file while
    /// components remain fails with [`IndexError::NotADirectory`], even if the rest of the path
    /// would match. `filter` is checked against the final entry only. Empty components (`//`, a
    /// trailing `/`) are skipped; a path that does not start with `/` matches nothing.
    pub fn find(&self, path: &str, filter: EntryFilter) -> Result<EntryId> {
        let mut stmt = self.conn.prepare_cached(FIND_CHILD_SQL).map_err(|err| {
            error!(%err, "failed to query entry");
            IndexError::Unavailable(err)
        })?;

        let rest = path.strip_prefix('/').ok_or(IndexError::NotFound)?;

        let mut entry = EntryId::ROOT;
        let mut dir = true;
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            if !dir {
                return Err(IndexError::NotADirectory);
            }

            let found = stmt
                .query_row(params![entry.0, component], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
                })
                .optional()?;
            let (id, is_dir) = found.ok_or(IndexError::NotFound)?;

            entry = EntryId(id);
            dir = is_dir;
        }

        match filter {
            EntryFilter::Directory if !dir => Err(IndexError::NotADirectory),
            EntryFilter::File if dir => Err(IndexError::IsADirectory),
            _ => Ok(entry),
        }
    }

    pub fn attributes(&self, id: EntryId) -> Result<EntryAttributes> {
        let mut stmt = self.conn.prepare_cached(ENTRY_ATTRIBUTES_SQL)?;
        stmt.query_row(params![id.0], |row| {
            Ok(EntryAttributes {
                id,
                parent: EntryId(row.get(0)?),
                name: row.get(1)?,
                is_directory: row.get::<_, Option<bool>>(2)?.unwrap_or(false),
                size: row.get(3)?,
                atime: row.get(4)?,
                mtime: row.get(5)?,
                ctime: row.get(6)?,
            })
        })
        .optional()?
        .ok_or(IndexError::NotFound)
    }

    /// Children of `id` in the order they were created.
    pub fn children(&self, id: EntryId) -> Result<Vec<ChildEntry>> {
        let mut stmt = self.conn.prepare_cached(LIST_CHILDREN_SQL)?;
        let rows = stmt.query_map(params![id.0], |row| {
            Ok(ChildEntry {
                id: EntryId(row.get(0)?),
                name: row.get(1)?,
                is_directory: row.get::<_, Option<bool>>(2)?.unwrap_or(false),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(IndexError::from)
    }

    /// Add an entry named `name` under the directory `parent`.
    pub fn insert_entry(&self, parent: EntryId, name: &str, is_directory: bool) -> Result<EntryId> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(IndexError::InvalidName(name.to_string()));
        }

        let tx = self.conn.unchecked_transaction()?;
        if !self.attributes(parent)?.is_directory {
            return Err(IndexError::NotADirectory);
        }

        let exists = tx
            .prepare_cached(FIND_CHILD_SQL)?
            .exists(params![parent.0, name])?;
        if exists {
            return Err(IndexError::AlreadyExists);
        }

        tx.execute(INSERT_ENTRY_SQL, params![parent.0, name, is_directory])?;
        let id = EntryId(tx.last_insert_rowid());
        tx.commit()?;
        Ok(id)
    }

    /// Add an entry at `path`, whose parent directory must already exist.
    pub fn insert_path(&self, path: &str, is_directory: bool) -> Result<EntryId> {
        let trimmed = path.trim_end_matches('/');
        let (parent_path, name) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| IndexError::InvalidName(path.to_string()))?;
        let parent_path = if parent_path.is_empty() { "/" } else { parent_path };

        let parent = self.find(parent_path, EntryFilter::Directory)?;
        self.insert_entry(parent, name, is_directory)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndexStore;

    fn populated() -> (IndexStore, Index) {
        let store = IndexStore::create().unwrap();
        let index = store.connect().unwrap();
        index.insert_path("/docs", true).unwrap();
        index.insert_path("/docs/readme.txt", false).unwrap();
        index.insert_path("/docs/nested", true).unwrap();
        index.insert_path("/top.bin", false).unwrap();
        (store, index)
    }

    #[test]
    fn root_resolves_to_entry_one() {
        let (_store, index) = populated();
        assert_eq!(index.find("/", EntryFilter::All).unwrap(), EntryId::ROOT);
        assert_eq!(
            index.find("/", EntryFilter::Directory).unwrap(),
            EntryId::ROOT
        );
    }

    #[test]
    fn root_row_matches_seed() {
        let (_store, index) = populated();
        let root = index.attributes(EntryId::ROOT).unwrap();
        assert_eq!(root.parent, EntryId::ROOT_PARENT);
        assert_eq!(root.name, "");
        assert!(root.is_directory);
        assert_eq!(root.size, crate::DEFAULT_ENTRY_SIZE);
        assert!(root.ctime > 0);
    }

    #[test]
    fn type_filters_are_enforced() {
        let (_store, index) = populated();
        assert!(matches!(
            index.find("/top.bin", EntryFilter::Directory),
            Err(IndexError::NotADirectory)
        ));
        assert!(matches!(
            index.find("/docs", EntryFilter::File),
            Err(IndexError::IsADirectory)
        ));
        assert!(index.find("/top.bin", EntryFilter::File).is_ok());
    }

    #[test]
    fn relative_paths_match_nothing() {
        let (_store, index) = populated();
        assert!(matches!(
            index.find("docs", EntryFilter::All),
            Err(IndexError::NotFound)
        ));
        assert!(matches!(
            index.find("", EntryFilter::All),
            Err(IndexError::NotFound)
        ));
    }

    #[test]
    fn redundant_separators_are_ignored() {
        let (_store, index) = populated();
        let id = index.find("/docs/nested", EntryFilter::All).unwrap();
        assert_eq!(index.find("//docs///nested/", EntryFilter::All).unwrap(), id);
    }

    #[test]
    fn insert_rejects_duplicates_and_bad_parents() {
        let (_store, index) = populated();
        assert!(matches!(
            index.insert_path("/docs/readme.txt", false),
            Err(IndexError::AlreadyExists)
        ));
        assert!(matches!(
            index.insert_path("/top.bin/child", false),
            Err(IndexError::NotADirectory)
        ));
        assert!(matches!(
            index.insert_entry(EntryId(999), "x", false),
            Err(IndexError::NotFound)
        ));
        assert!(matches!(
            index.insert_entry(EntryId::ROOT, "a/b", false),
            Err(IndexError::InvalidName(_))
        ));
        assert!(matches!(
            index.insert_path("/", true),
            Err(IndexError::InvalidName(_))
        ));
    }

    #[test]
    fn children_lists_direct_children_only() {
        let (_store, index) = populated();
        let docs = index.find("/docs", EntryFilter::Directory).unwrap();
        let names: Vec<_> = index
            .children(docs)
            .unwrap()
            .into_iter()
            .map(|c| (c.name, c.is_directory))
            .collect();
        assert_eq!(
            names,
            [("readme.txt".to_string(), false), ("nested".to_string(), true)]
        );
    }

    #[test]
    fn children_keep_creation_order_not_name_order() {
        let store = IndexStore::create().unwrap();
        let index = store.connect().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            index.insert_entry(EntryId::ROOT, name, false).unwrap();
        }
        let names: Vec<_> = index
            .children(EntryId::ROOT)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn ids_are_assigned_monotonically() {
        let store = IndexStore::create().unwrap();
        let index = store.connect().unwrap();
        let a = index.insert_path("/a", true).unwrap();
        let b = index.insert_path("/a/b", true).unwrap();
        assert!(a > EntryId::ROOT);
        assert!(b > a);
    }
}
