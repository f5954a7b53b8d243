//! Adapter from the kernel's inode-based FUSE protocol to the path-based [`VramFs`].
//!
//! Inode numbers are entry ids; the root entry (id 1) is also `FUSE_ROOT_ID`. Paths of inodes the
//! kernel has seen through `lookup` or `readdir` are remembered so later calls can be resolved.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEntry, ReplyOpen, Request, FUSE_ROOT_ID,
};
use libc::{c_int, EIO, ENOENT};
use tracing::{debug, info};

use crate::{Config, FileAttributes, FileKind, FsError, VramFs};

const TTL: Duration = Duration::from_secs(1);
const BLKSIZE: u32 = 512;

pub struct VramFsFuse {
    fs: VramFs,
    paths: HashMap<u64, String>,
}

impl VramFsFuse {
    pub fn new(fs: VramFs) -> Self {
        let mut paths = HashMap::new();
        paths.insert(FUSE_ROOT_ID, "/".to_string());
        Self { fs, paths }
    }

    fn path(&self, ino: u64) -> Result<&str, FsError> {
        self.paths
            .get(&ino)
            .map(String::as_str)
            .ok_or(FsError::NotFound)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, FsError> {
        let parent = self.path(parent)?;
        let name = name.to_str().ok_or(FsError::NotFound)?;
        Ok(join(parent, name))
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Directory => FileType::Directory,
        FileKind::File => FileType::RegularFile,
    }
}

fn timestamp(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

fn to_fuse_attr(attr: &FileAttributes) -> FileAttr {
    FileAttr {
        ino: attr.id.0 as u64,
        size: attr.size,
        blocks: attr.size.div_ceil(u64::from(BLKSIZE)),
        atime: timestamp(attr.atime),
        mtime: timestamp(attr.mtime),
        ctime: timestamp(attr.ctime),
        crtime: timestamp(attr.ctime),
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

/// FUSE mount options for `config`. Extra `-o` options are passed through unchanged.
pub fn mount_options(config: &Config) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName("vramfs".to_string()),
        MountOption::Subtype("vramfs".to_string()),
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options.extend(
        config
            .mount_options
            .iter()
            .map(|o| MountOption::CUSTOM(o.clone())),
    );
    options
}

impl Filesystem for VramFsFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        // Already logged; any failure aborts the session.
        self.fs.init().map_err(|_| EIO)
    }

    fn destroy(&mut self) {
        self.fs.destroy();
        info!(inodes = self.paths.len(), "FUSE session ended");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let attr = self
            .child_path(parent, name)
            .and_then(|path| Ok((self.fs.getattr(&path)?, path)));
        match attr {
            Ok((attr, path)) => {
                self.paths.insert(attr.id.0 as u64, path);
                reply.entry(&TTL, &to_fuse_attr(&attr), 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.path(ino).and_then(|path| self.fs.getattr(path)) {
            Ok(attr) => reply.attr(&TTL, &to_fuse_attr(&attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.path(ino).and_then(|path| self.fs.open(path, flags)) {
            Ok(_) => reply.opened(0, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };

        let mut buf = vec![0u8; size as usize];
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.fs.read(path, &mut buf, offset) {
            Ok(read) => reply.data(&buf[..read]),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path(ino) {
            Ok(path) => path.to_string(),
            Err(_) => {
                reply.error(ENOENT);
                return;
            }
        };

        let mut entries = Vec::new();
        let listed = self.fs.readdir(&path, |entry| {
            entries.push((entry.id.0 as u64, entry.kind, entry.name.to_string()));
            true
        });
        if let Err(err) = listed {
            reply.error(err.errno());
            return;
        }

        debug!(path = %path, entries = entries.len(), offset, "readdir");
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (child, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if name != "." && name != ".." {
                self.paths.entry(child).or_insert_with(|| join(&path, &name));
            }
            if reply.add(child, (i + 1) as i64, file_type(kind), &name) {
                break;
            }
        }
        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vramfs_index::EntryId;

    #[test]
    fn child_paths_join_without_double_slashes() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn attributes_convert_to_fuse() {
        let attr = FileAttributes {
            id: EntryId(7),
            kind: FileKind::File,
            perm: 0o444,
            nlink: 1,
            uid: 1000,
            gid: 100,
            size: 4096,
            atime: 10,
            mtime: 20,
            ctime: 30,
        };
        let fuse = to_fuse_attr(&attr);
        assert_eq!(fuse.ino, 7);
        assert_eq!(fuse.kind, FileType::RegularFile);
        assert_eq!(fuse.perm, 0o444);
        assert_eq!(fuse.blocks, 8);
        assert_eq!(fuse.mtime, UNIX_EPOCH + Duration::from_secs(20));
    }

    #[test]
    fn extra_options_pass_through() {
        let config = Config {
            mountpoint: PathBuf::from("/mnt"),
            allow_other: true,
            mount_options: vec!["noatime".to_string()],
            ..Config::default()
        };
        let options = mount_options(&config);
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::CUSTOM("noatime".to_string())));
    }

    #[test]
    fn unknown_inodes_are_not_found() {
        let adapter = VramFsFuse::new(VramFs::new(None));
        assert_eq!(adapter.path(FUSE_ROOT_ID), Ok("/"));
        assert_eq!(adapter.path(99), Err(FsError::NotFound));
    }
}
