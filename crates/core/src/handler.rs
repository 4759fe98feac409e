//! C9 — kernel callback handler: the `fuser::Filesystem` implementation that
//! turns inode-based kernel requests into virtual-path lookups against the
//! layer manager, rule engine, transform pipeline, and cache (spec.md §4.8).
//!
//! `fuser`'s lowlevel protocol addresses everything by inode number, while
//! every other component in this crate speaks virtual paths. `InodeTable`
//! bridges the two: inode 1 is always the virtual root, and every other
//! inode is assigned the first time the kernel asks about a path (via
//! `lookup` or `readdir`) and kept stable for the life of the mount.

use crate::cache::{CacheValue, MultiCache, Namespace};
use crate::error::StrataError;
use crate::manager::LayerManager;
use crate::pattern::normalize_path;
use crate::pipeline::Pipeline;
use crate::rules::{attrs_from_metadata, format_permissions, RuleEngine};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags,
    Generation, INodeNo, LockOwner, OpenAccMode, OpenFlags, ReadFlags, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, WriteFlags,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const ROOT_INO: u64 = 1;
const ATTR_TTL: Duration = Duration::from_secs(1);
const GENERATION: Generation = Generation(0);

/// Maps inode numbers to virtual paths and back. Inode 1 is the virtual
/// filesystem root (`""`); every other path gets an inode lazily on first
/// `lookup`/`readdir` and keeps it until the mount ends.
struct InodeTable {
    next: AtomicU64,
    path_to_ino: Mutex<HashMap<String, u64>>,
    ino_to_path: Mutex<HashMap<u64, String>>,
}

impl InodeTable {
    fn new() -> Self {
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(String::new(), ROOT_INO);
        ino_to_path.insert(ROOT_INO, String::new());
        Self {
            next: AtomicU64::new(ROOT_INO + 1),
            path_to_ino: Mutex::new(path_to_ino),
            ino_to_path: Mutex::new(ino_to_path),
        }
    }

    fn ino_for(&self, virtual_path: &str) -> u64 {
        let mut by_path = self.path_to_ino.lock();
        if let Some(&ino) = by_path.get(virtual_path) {
            return ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        by_path.insert(virtual_path.to_string(), ino);
        self.ino_to_path.lock().insert(ino, virtual_path.to_string());
        ino
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.ino_to_path.lock().get(&ino).cloned()
    }

    /// Drops every mapping under `virtual_path` (a write/rename/removal
    /// invalidates the subtree, same as the path-resolution cache).
    fn forget_subtree(&self, virtual_path: &str) {
        let mut by_path = self.path_to_ino.lock();
        let mut by_ino = self.ino_to_path.lock();
        let doomed: Vec<String> = by_path
            .keys()
            .filter(|p| *p == virtual_path || p.starts_with(&format!("{virtual_path}/")))
            .cloned()
            .collect();
        for p in doomed {
            if let Some(ino) = by_path.remove(&p) {
                by_ino.remove(&ino);
            }
        }
    }
}

/// A kernel-visible open file handle (spec.md §4.8's `OpenHandle`).
struct OpenHandle {
    virtual_path: String,
    backing: PathBuf,
    writable: bool,
}

struct HandleTable {
    next: AtomicU64,
    handles: Mutex<HashMap<u64, OpenHandle>>,
}

impl HandleTable {
    fn new() -> Self {
        Self { next: AtomicU64::new(1), handles: Mutex::new(HashMap::new()) }
    }

    fn insert(&self, handle: OpenHandle) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(id, handle);
        id
    }

    fn get(&self, id: u64) -> Option<(String, PathBuf, bool)> {
        self.handles
            .lock()
            .get(&id)
            .map(|h| (h.virtual_path.clone(), h.backing.clone(), h.writable))
    }

    fn remove(&self, id: u64) {
        self.handles.lock().remove(&id);
    }
}

/// The assembled FUSE entry point (spec.md §4.8): resolves virtual paths
/// through the layer manager with a direct-source fallback, enforces
/// visibility and readonly rules, and applies the transform pipeline on read.
pub struct StrataHandler {
    manager: RwLock<LayerManager>,
    rules: RwLock<RuleEngine>,
    cache: Arc<MultiCache>,
    pipeline: Arc<Pipeline>,
    inodes: InodeTable,
    handles: HandleTable,
    readonly: bool,
}

impl StrataHandler {
    pub fn new(
        manager: LayerManager,
        rules: RuleEngine,
        cache: Arc<MultiCache>,
        pipeline: Arc<Pipeline>,
        readonly: bool,
    ) -> Self {
        Self {
            manager: RwLock::new(manager),
            rules: RwLock::new(rules),
            cache,
            pipeline,
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
            readonly,
        }
    }

    /// Virtual-path resolution algorithm (spec.md §4.8 steps 3-4): normalize,
    /// consult the path cache, else dispatch through the layer manager, else
    /// probe source roots directly, then filter through C2's visibility
    /// check — every caller gets the same rule-engine filtering, and a
    /// rule-excluded backing path resolves as absent. Only a successful,
    /// visible resolution is cached; absence is never cached (spec.md §4.3's
    /// "negative results are not cached" invariant).
    fn resolve(&self, virtual_path: &str) -> Option<PathBuf> {
        let normalized = normalize_path(virtual_path);
        if let Some(CacheValue::Path(cached)) = self.cache.get(Namespace::Path, &normalized) {
            return cached;
        }
        let manager = self.manager.read();
        let found = manager
            .resolve(&normalized)
            .or_else(|| manager.resolve_direct(&normalized));
        drop(manager);
        let found = found.filter(|backing| {
            let meta = std::fs::symlink_metadata(backing).ok();
            self.is_visible(&normalized, meta.as_ref())
        });
        if let Some(backing) = &found {
            self.cache.set(Namespace::Path, &normalized, CacheValue::Path(Some(backing.clone())), 256);
        }
        found
    }

    fn is_visible(&self, virtual_path: &str, meta: Option<&std::fs::Metadata>) -> bool {
        let attrs = meta.map(attrs_from_metadata);
        self.rules.read().visible(virtual_path, attrs.as_ref())
    }

    fn is_readonly(&self, backing: &Path) -> bool {
        self.readonly || self.manager.read().source_read_only(backing)
    }

    fn attr_for(&self, virtual_path: &str, ino: u64, backing: &Path) -> Option<FileAttr> {
        if let Some(CacheValue::Attrs(attrs)) = self.cache.get(Namespace::Attr, virtual_path) {
            return Some(to_file_attr(ino, &attrs, backing));
        }
        let meta = std::fs::symlink_metadata(backing).ok()?;
        if !self.is_visible(virtual_path, Some(&meta)) {
            return None;
        }
        let attrs = attrs_from_metadata(&meta);
        self.cache.set(Namespace::Attr, virtual_path, CacheValue::Attrs(attrs.clone()), 128);
        Some(to_file_attr(ino, &attrs, backing))
    }

    fn dir_attr(ino: u64) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino: INodeNo(ino),
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn invalidate_for_write(&self, virtual_path: &str) {
        self.cache.invalidate(Namespace::Attr, virtual_path);
        self.cache.invalidate(Namespace::Content, virtual_path);
        self.cache.invalidate(Namespace::Content, &format!("{virtual_path}:transformed"));
        if let Some(parent) = virtual_path.rsplit_once('/').map(|(p, _)| p).or(Some("")) {
            self.cache.invalidate(Namespace::Readdir, parent);
        }
        self.inodes.forget_subtree(virtual_path);
    }

    /// Shared cache handle, for callers that want tier stats or a manual
    /// clear/invalidate without going through a kernel request (the control
    /// facade).
    pub fn cache(&self) -> &Arc<MultiCache> {
        &self.cache
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn list_layers(&self) -> Vec<String> {
        self.manager.read().list_layers().into_iter().map(str::to_string).collect()
    }

    pub fn source_count(&self) -> usize {
        self.manager.read().sources().len()
    }

    pub fn file_count(&self) -> usize {
        self.manager.read().files().len()
    }

    pub fn list_rules(&self) -> Vec<crate::rules::Rule> {
        self.rules.read().rules().into_iter().cloned().collect()
    }

    pub fn add_rule(&self, rule: crate::rules::Rule) -> crate::error::StrataResult<()> {
        self.rules.write().add_rule(rule)
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.rules.write().remove_rule(name)
    }

    /// Swaps the whole rule set, e.g. after a config reload.
    pub fn set_rules(&self, rules: RuleEngine) {
        *self.rules.write() = rules;
    }

    /// Drops the cached resolution for `virtual_path` and forgets its inode,
    /// without touching content/attr caches for unrelated paths (the control
    /// facade's `/cache/invalidate`).
    pub fn invalidate_path(&self, virtual_path: &str) {
        let normalized = normalize_path(virtual_path);
        self.cache.invalidate(Namespace::Path, &normalized);
        self.invalidate_for_write(&normalized);
    }
}

fn to_file_attr(ino: u64, attrs: &crate::rules::Attributes, backing: &Path) -> FileAttr {
    let is_dir = attrs.is_dir.unwrap_or(false);
    let is_symlink = attrs.is_symlink.unwrap_or(false);
    let kind = if is_symlink {
        FileType::Symlink
    } else if is_dir {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    let secs_to_time = |s: Option<f64>| {
        s.map(|v| SystemTime::UNIX_EPOCH + Duration::from_secs_f64(v.max(0.0)))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    FileAttr {
        ino: INodeNo(ino),
        size: attrs.size.unwrap_or(0),
        blocks: attrs.size.unwrap_or(0).div_ceil(512),
        atime: secs_to_time(attrs.atime),
        mtime: secs_to_time(attrs.mtime),
        ctime: secs_to_time(attrs.ctime),
        crtime: secs_to_time(attrs.ctime),
        kind,
        perm: (attrs.mode.unwrap_or(0o644) & 0o7777) as u16,
        nlink: 1,
        uid: attrs.uid.unwrap_or(unsafe { libc::getuid() }),
        gid: attrs.gid.unwrap_or(unsafe { libc::getgid() }),
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
    .with_backing_fallback(backing)
}

/// Extension point kept tiny on purpose: today this is a no-op, but it is the
/// one place a future `lstat`-fallback (e.g. for dangling symlinks) would hook in.
trait BackingFallback {
    fn with_backing_fallback(self, backing: &Path) -> Self;
}

impl BackingFallback for FileAttr {
    fn with_backing_fallback(self, _backing: &Path) -> Self {
        self
    }
}

fn join_virtual(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

impl Filesystem for StrataHandler {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.path_for(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name_str) = name.to_str() else {
            reply.error(Errno::EINVAL);
            return;
        };
        let virtual_path = join_virtual(&parent_path, name_str);
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let ino = self.inodes.ino_for(&virtual_path);
        match self.attr_for(&virtual_path, ino, &backing) {
            Some(attr) => reply.entry(&ATTR_TTL, &attr, GENERATION),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        if ino.0 == ROOT_INO {
            reply.attr(&ATTR_TTL, &Self::dir_attr(ROOT_INO));
            return;
        }
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match self.attr_for(&virtual_path, ino.0, &backing) {
            Some(attr) => reply.attr(&ATTR_TTL, &attr),
            None => reply.error(Errno::ENOENT),
        }
    }

    fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match std::fs::read_link(&backing) {
            Ok(target) => reply.data(target.to_string_lossy().as_bytes()),
            Err(e) => reply.error(StrataError::from(e).to_errno()),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        if self.readonly {
            reply.error(Errno::EROFS);
            return;
        }
        let Some(parent_path) = self.inodes.path_for(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name_str) = name.to_str() else {
            reply.error(Errno::EINVAL);
            return;
        };
        let virtual_path = join_virtual(&parent_path, name_str);
        // A new directory has nowhere to live inside a virtual-layer
        // projection; it always lands under the highest-priority writable
        // source root (spec.md §4.8 resolution order, write direction).
        let Some(backing) = self.manager.read().create_target(&virtual_path) else {
            reply.error(Errno::EROFS);
            return;
        };
        match std::fs::create_dir(&backing) {
            Ok(()) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(&backing, std::fs::Permissions::from_mode(mode));
                }
                self.invalidate_for_write(&virtual_path);
                let ino = self.inodes.ino_for(&virtual_path);
                match self.attr_for(&virtual_path, ino, &backing) {
                    Some(attr) => reply.entry(&ATTR_TTL, &attr, GENERATION),
                    None => reply.entry(&ATTR_TTL, &Self::dir_attr(ino), GENERATION),
                }
            }
            Err(e) => reply.error(StrataError::from(e).to_errno()),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path_for(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name_str) = name.to_str() else {
            reply.error(Errno::EINVAL);
            return;
        };
        let virtual_path = join_virtual(&parent_path, name_str);
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        match std::fs::remove_dir(&backing) {
            Ok(()) => {
                self.invalidate_for_write(&virtual_path);
                reply.ok();
            }
            Err(e) => reply.error(StrataError::from(e).to_errno()),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path_for(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name_str) = name.to_str() else {
            reply.error(Errno::EINVAL);
            return;
        };
        let virtual_path = join_virtual(&parent_path, name_str);
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        match std::fs::remove_file(&backing) {
            Ok(()) => {
                self.invalidate_for_write(&virtual_path);
                reply.ok();
            }
            Err(e) => reply.error(StrataError::from(e).to_errno()),
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let write_requested = !matches!(flags.access_mode(), OpenAccMode::ReadOnly);
        if write_requested && self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        let fh = self.handles.insert(OpenHandle {
            virtual_path,
            backing,
            writable: write_requested,
        });
        reply.opened(FileHandle(fh), FopenFlags::empty());
    }

    fn read(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _read_flags: ReadFlags,
        _flags: u32,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let Some((virtual_path, backing, _)) = self.handles.get(fh.0) else {
            reply.error(Errno::EBADF);
            return;
        };
        // Reads first consult the content cache keyed by virtual path +
        // `:transformed` (spec.md §4.8's read-with-transformation path) so a
        // repeat read never touches the backing file at all.
        let transformed_key = format!("{virtual_path}:transformed");
        let bytes = match self.cache.get(Namespace::Content, &transformed_key) {
            Some(CacheValue::Bytes(cached)) => cached,
            _ => {
                let raw = match std::fs::read(&backing) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        reply.error(StrataError::from(e).to_errno());
                        return;
                    }
                };
                let result = self.pipeline.apply(&raw, &virtual_path, false);
                if !result.success {
                    warn!(path = %virtual_path, "transform pipeline reported a failure; serving partial output");
                }
                if result.success {
                    let byte_cost = result.bytes.len() as u64 + 64;
                    self.cache.set(
                        Namespace::Content,
                        &transformed_key,
                        CacheValue::Bytes(Arc::clone(&result.bytes)),
                        byte_cost,
                    );
                }
                result.bytes
            }
        };
        let offset = offset as usize;
        let end = (offset + size as usize).min(bytes.len());
        if offset >= bytes.len() {
            reply.data(&[]);
        } else {
            reply.data(&bytes[offset..end]);
        }
    }

    fn write(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        offset: i64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        let Some((virtual_path, backing, writable)) = self.handles.get(fh.0) else {
            reply.error(Errno::EBADF);
            return;
        };
        if !writable || self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        use std::io::{Seek, SeekFrom, Write as _};
        let file = std::fs::OpenOptions::new().write(true).open(&backing);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                reply.error(StrataError::from(e).to_errno());
                return;
            }
        };
        if let Err(e) = file.seek(SeekFrom::Start(offset.max(0) as u64)) {
            reply.error(StrataError::from(e).to_errno());
            return;
        }
        match file.write_all(data) {
            Ok(()) => {
                self.invalidate_for_write(&virtual_path);
                reply.written(data.len() as u32);
            }
            Err(e) => reply.error(StrataError::from(e).to_errno()),
        }
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(fh.0);
        reply.ok();
    }

    fn fsync(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _datasync: bool, reply: ReplyEmpty) {
        if let Some((_, backing, _)) = self.handles.get(fh.0) {
            if let Ok(file) = std::fs::File::open(&backing) {
                let _ = file.sync_all();
            }
        }
        reply.ok();
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if mask.contains(AccessFlags::W_OK) && self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        if backing.exists() {
            reply.ok();
        } else {
            reply.error(Errno::ENOENT);
        }
    }

    fn readdir(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, offset: u64, mut reply: ReplyDirectory) {
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };

        let names = match self.cache.get(Namespace::Readdir, &virtual_path) {
            Some(CacheValue::Readdir(names)) => names,
            _ => {
                let manager = self.manager.read();
                let mut names = manager.list(&virtual_path);
                if names.is_empty() {
                    if let Some(backing) = manager.resolve_direct(&virtual_path) {
                        if let Ok(entries) = std::fs::read_dir(&backing) {
                            names = entries
                                .filter_map(|e| e.ok())
                                .filter_map(|e| e.file_name().into_string().ok())
                                .collect();
                        }
                    }
                }
                names.retain(|n| self.is_visible(&join_virtual(&virtual_path, n), None));
                names.sort();
                drop(manager);
                self.cache.set(Namespace::Readdir, &virtual_path, CacheValue::Readdir(names.clone()), 512);
                names
            }
        };

        let mut entries: Vec<(String, FileType, u64)> = vec![
            (".".to_string(), FileType::Directory, ino.0),
            ("..".to_string(), FileType::Directory, ino.0),
        ];
        for name in &names {
            let child_path = join_virtual(&virtual_path, name);
            let child_ino = self.inodes.ino_for(&child_path);
            let kind = self
                .resolve(&child_path)
                .and_then(|b| std::fs::symlink_metadata(&b).ok())
                .map(|m| if m.is_dir() { FileType::Directory } else { FileType::RegularFile })
                .unwrap_or(FileType::RegularFile);
            entries.push((name.clone(), kind, child_ino));
        }

        for (i, (name, kind, child_ino)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(INodeNo(child_ino), (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
        debug!(path = %virtual_path, "served readdir");
    }

    fn setattr(
        &self,
        req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let Some(virtual_path) = self.inodes.path_for(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(backing) = self.resolve(&virtual_path) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if self.is_readonly(&backing) {
            reply.error(Errno::EROFS);
            return;
        }
        if let Some(size) = size {
            if let Err(e) = std::fs::OpenOptions::new().write(true).open(&backing).and_then(|f| f.set_len(size)) {
                reply.error(StrataError::from(e).to_errno());
                return;
            }
        }
        if let Some(mode) = mode {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(mode);
                if let Err(e) = std::fs::set_permissions(&backing, perms) {
                    reply.error(StrataError::from(e).to_errno());
                    return;
                }
            }
        }
        #[cfg(unix)]
        if uid.is_some() || gid.is_some() {
            let c_path = std::ffi::CString::new(backing.as_os_str().as_encoded_bytes()).unwrap_or_default();
            let rc = unsafe {
                libc::chown(
                    c_path.as_ptr(),
                    uid.unwrap_or(u32::MAX),
                    gid.unwrap_or(u32::MAX),
                )
            };
            if rc != 0 {
                reply.error(StrataError::from(std::io::Error::last_os_error()).to_errno());
                return;
            }
        }
        self.invalidate_for_write(&virtual_path);
        self.getattr(req, ino, fh, reply);
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        if self.readonly {
            reply.error(Errno::EROFS);
            return;
        }
        let Some(parent_path) = self.inodes.path_for(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name_str) = name.to_str() else {
            reply.error(Errno::EINVAL);
            return;
        };
        let virtual_path = join_virtual(&parent_path, name_str);
        let Some(backing) = self.manager.read().create_target(&virtual_path) else {
            reply.error(Errno::EROFS);
            return;
        };
        let opened = std::fs::OpenOptions::new().write(true).create_new(true).open(&backing);
        let file = match opened {
            Ok(f) => f,
            Err(e) => {
                reply.error(StrataError::from(e).to_errno());
                return;
            }
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(std::fs::Permissions::from_mode(mode));
        }
        drop(file);
        self.invalidate_for_write(&virtual_path);
        let ino = self.inodes.ino_for(&virtual_path);
        let write_requested = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;
        let fh = self.handles.insert(OpenHandle { virtual_path: virtual_path.clone(), backing: backing.clone(), writable: write_requested });
        match self.attr_for(&virtual_path, ino, &backing) {
            Some(attr) => reply.created(&ATTR_TTL, &attr, GENERATION, FileHandle(fh), FopenFlags::empty()),
            None => reply.error(Errno::EIO),
        }
    }

    fn statfs(&self, _req: &Request, ino: INodeNo, reply: fuser::ReplyStatfs) {
        let probe = self
            .inodes
            .path_for(ino.0)
            .and_then(|p| self.resolve(&p))
            .or_else(|| self.manager.read().sources().first().map(|s| s.root.clone()));
        let Some(probe) = probe else {
            reply.statfs(0, 0, 0, 0, 0, 4096, 255, 0);
            return;
        };
        #[cfg(unix)]
        {
            statfs_for(&probe, reply);
        }
        #[cfg(not(unix))]
        {
            let _ = probe;
            reply.statfs(0, 0, 0, 0, 0, 4096, 255, 0);
        }
    }
}

#[cfg(unix)]
fn statfs_for(path: &Path, reply: fuser::ReplyStatfs) {
    use std::mem::MaybeUninit;
    let c_path = match std::ffi::CString::new(path.as_os_str().as_encoded_bytes()) {
        Ok(p) => p,
        Err(_) => {
            reply.error(Errno::EINVAL);
            return;
        }
    };
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        reply.error(StrataError::from(std::io::Error::last_os_error()).to_errno());
        return;
    }
    let stat = unsafe { stat.assume_init() };
    reply.statfs(
        stat.f_blocks,
        stat.f_bfree,
        stat.f_bavail,
        stat.f_files,
        stat.f_ffree,
        stat.f_bsize as u32,
        stat.f_namemax as u32,
        stat.f_frsize as u32,
    );
}

/// Spec-facing statvfs-style snapshot (spec.md §4.8's filesystem stats op),
/// kept separate from the `Filesystem` trait since callers (the control
/// facade) want it without going through a kernel request.
pub fn permissions_string(backing: &Path) -> Option<String> {
    let meta = std::fs::symlink_metadata(backing).ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(format_permissions(meta.mode(), meta.is_dir(), meta.file_type().is_symlink()))
    }
    #[cfg(not(unix))]
    {
        None
    }
}
