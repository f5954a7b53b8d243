use std::sync::Arc;

use tracing::{debug, error, info};
use vramfs_gpu::BlockPool;
use vramfs_index::{EntryFilter, EntryId, Index, IndexStore};

use crate::{FsError, InitError};

/// Permission bits reported for directories.
pub const DIRECTORY_PERMISSIONS: u16 = 0o755;
/// Permission bits reported for files. Content is never writable.
pub const FILE_PERMISSIONS: u16 = 0o444;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
}

/// Attributes of an entry as reported to the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttributes {
    pub id: EntryId,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Unix seconds.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileAttributes {
    /// Full `st_mode`: file type bits plus permissions.
    pub fn mode(&self) -> u32 {
        let format = match self.kind {
            FileKind::Directory => libc::S_IFDIR,
            FileKind::File => libc::S_IFREG,
        };
        format as u32 | u32::from(self.perm)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub id: EntryId,
    pub name: &'a str,
    pub kind: FileKind,
}

/// Path-based filesystem operations over the entry index and the block pool.
///
/// Every operation opens its own index connection, so a `VramFs` can be shared between threads.
pub struct VramFs {
    store: Option<IndexStore>,
    pool: Option<Arc<BlockPool>>,
    uid: u32,
    gid: u32,
}

impl VramFs {
    pub fn new(pool: Option<Arc<BlockPool>>) -> Self {
        // SAFETY: geteuid/getegid take no arguments and always succeed.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            store: None,
            pool,
            uid,
            gid,
        }
    }

    /// Create the entry index, containing only the root directory.
    pub fn init(&mut self) -> Result<(), InitError> {
        let store = IndexStore::create().map_err(|err| {
            error!(%err, "failed to create entry index");
            InitError::Index(err)
        })?;
        info!(uri = store.uri(), "vramfs initialized");
        self.store = Some(store);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.is_some()
    }

    pub fn pool(&self) -> Option<&Arc<BlockPool>> {
        self.pool.as_ref()
    }

    /// Open a connection to the entry index, e.g. to populate it.
    pub fn index(&self) -> Result<Index, FsError> {
        let store = self.store.as_ref().ok_or_else(|| {
            error!("filesystem used before init");
            FsError::TransientIndexFailure
        })?;
        store.connect().map_err(|err| {
            error!(%err, "failed to connect to entry index");
            FsError::from(err)
        })
    }

    pub fn getattr(&self, path: &str) -> Result<FileAttributes, FsError> {
        let index = self.index()?;
        let id = index.find(path, EntryFilter::All)?;
        let entry = index.attributes(id)?;
        debug!(path, %id, "getattr");

        let (kind, perm, nlink) = if entry.is_directory {
            (FileKind::Directory, DIRECTORY_PERMISSIONS, 2)
        } else {
            (FileKind::File, FILE_PERMISSIONS, 1)
        };

        Ok(FileAttributes {
            id,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            size: u64::try_from(entry.size).unwrap_or(0),
            atime: entry.atime,
            mtime: entry.mtime,
            ctime: entry.ctime,
        })
    }

    /// List a directory: `.` and `..` first, then every child.
    ///
    /// `emit` returns `false` to stop early (e.g. when the reply buffer is full).
    pub fn readdir<F>(&self, path: &str, mut emit: F) -> Result<(), FsError>
    where
        F: FnMut(DirEntry<'_>) -> bool,
    {
        let index = self.index()?;
        let id = index.find(path, EntryFilter::Directory)?;
        let parent = match index.attributes(id)?.parent {
            EntryId::ROOT_PARENT => id,
            parent => parent,
        };
        let children = index.children(id)?;
        debug!(path, %id, children = children.len(), "readdir");

        let dots = [(id, "."), (parent, "..")];
        for (id, name) in dots {
            let kind = FileKind::Directory;
            if !emit(DirEntry { id, name, kind }) {
                return Ok(());
            }
        }

        for child in &children {
            let kind = if child.is_directory {
                FileKind::Directory
            } else {
                FileKind::File
            };
            if !emit(DirEntry {
                id: child.id,
                name: &child.name,
                kind,
            }) {
                break;
            }
        }
        Ok(())
    }

    /// Check that `path` is a file that may be opened with `flags`. Only read-only access is
    /// permitted. No per-open state is kept.
    pub fn open(&self, path: &str, flags: i32) -> Result<EntryId, FsError> {
        let id = self.index()?.find(path, EntryFilter::File)?;
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            debug!(path, flags, "rejecting non read-only open");
            return Err(FsError::PermissionDenied);
        }
        Ok(id)
    }

    /// File content is not stored yet; every read is empty.
    pub fn read(&self, _path: &str, _buf: &mut [u8], _offset: u64) -> Result<usize, FsError> {
        Ok(0)
    }

    /// Tear down: drop the entry index and drain the GPU queue.
    pub fn destroy(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(err) = store.close() {
                error!(%err, "failed to close entry index");
            }
        }

        if let Some(pool) = &self.pool {
            let stats = pool.stats();
            info!(
                total_blocks = stats.total_blocks,
                free_blocks = stats.free_blocks,
                block_size = stats.block_size,
                "block pool at unmount"
            );
            pool.backend().shutdown();
        }
        info!("vramfs destroyed");
    }
}
