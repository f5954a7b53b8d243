//! SQL for the `entries` table.
//!
//! `id` is an alias of the SQLite rowid, so ids are assigned monotonically on insert. Timestamps
//! default to the numeric form of the current time at row creation.

/// Parent id of the root entry. Never a valid entry id.
pub const ROOT_PARENT: i64 = 0;

/// Id of the root directory.
pub const ROOT_ENTRY: i64 = 1;

/// Size reported for entries that do not set one.
pub const DEFAULT_ENTRY_SIZE: i64 = 4096;

pub(crate) const CREATE_ENTRIES_SQL: &str = "
    CREATE TABLE entries(
        id INTEGER PRIMARY KEY,
        parent INTEGER DEFAULT 0,
        name TEXT NOT NULL,
        dir INTEGER,
        size INTEGER DEFAULT 4096,
        atime INTEGER DEFAULT (STRFTIME('%s')),
        mtime INTEGER DEFAULT (STRFTIME('%s')),
        ctime INTEGER DEFAULT (STRFTIME('%s'))
    );
";

pub(crate) const INSERT_ROOT_SQL: &str = "INSERT INTO entries (id, name, dir) VALUES (1, '', 1);";

pub(crate) const FIND_CHILD_SQL: &str =
    "SELECT id, dir FROM entries WHERE parent = ?1 AND name = ?2 LIMIT 1";

pub(crate) const ENTRY_ATTRIBUTES_SQL: &str =
    "SELECT parent, name, dir, size, atime, mtime, ctime FROM entries WHERE id = ?1";

/// Children in creation order.
pub(crate) const LIST_CHILDREN_SQL: &str =
    "SELECT id, name, dir FROM entries WHERE parent = ?1 ORDER BY id";

pub(crate) const INSERT_ENTRY_SQL: &str =
    "INSERT INTO entries (parent, name, dir) VALUES (?1, ?2, ?3)";
