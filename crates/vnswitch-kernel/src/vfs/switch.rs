//! The call surface.
//!
//! [`Switch`] ties the registries, the vnode cache and the resolver
//! together and exposes POSIX-shaped calls. Path-taking calls accept an
//! [`At`] base: the caller's working directory or an open descriptor,
//! in the manner of `openat`.

use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::cache::{CacheStats, Vnode, VnodeCache};
use super::fd::{Fd, IoContext, OfileKind, OpenFile};
use super::mount::{MountInfo, MountRequest, NamespaceRegistry, NamespaceTable};
use super::ops::{FileSystem, Walked};
use super::registry::{FsHandle, FsRegistry};
use super::resolve::{Limits, Resolver};
use super::types::{
    AttrInfo, Cookie, DirEntry, FileAttr, MountFlags, NamespaceId, OpenFlags, SetAttr, VnodeKey,
};
use super::{VfsError, VfsResult};
use crate::config::{ConfigError, SwitchConfig};

/// Where a relative path starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum At {
    /// The context's working directory.
    Cwd,
    /// The vnode behind an open descriptor.
    Fd(Fd),
}

/// Entry created by an open that has not been handed out yet.
struct Provisional {
    dir: Vnode,
    name: String,
}

/// The VFS switch.
pub struct Switch {
    config: SwitchConfig,
    filesystems: Arc<FsRegistry>,
    cache: Arc<VnodeCache>,
    namespaces: Arc<NamespaceRegistry>,
    resolver: Resolver,
    /// Serializes two-directory operations (rename, link).
    rename_lock: Mutex<()>,
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switch")
            .field("filesystems", &self.filesystems)
            .field("namespaces", &self.namespaces)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Switch {
    /// Build a switch with an empty filesystem registry.
    pub fn new(config: SwitchConfig) -> Result<Self, ConfigError> {
        Self::with_registry(config, FsRegistry::new())
    }

    /// Build a switch around an existing registry (for on-demand loaders).
    ///
    /// Fails if `config` does not pass [`SwitchConfig::validate`].
    pub fn with_registry(
        config: SwitchConfig,
        filesystems: FsRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = Arc::new(NamespaceTable::new());
        let cache = Arc::new(VnodeCache::new(&config.cache, Arc::clone(&table)));
        let filesystems = Arc::new(filesystems);
        let namespaces = Arc::new(NamespaceRegistry::new(
            table,
            Arc::clone(&cache),
            Arc::clone(&filesystems),
        ));
        let resolver = Resolver::new(
            Arc::clone(&namespaces),
            Arc::clone(&cache),
            Limits::from(&config),
        );
        Ok(Self {
            config,
            filesystems,
            cache,
            namespaces,
            resolver,
            rename_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn register_filesystem(
        &self,
        name: &str,
        fs: Arc<dyn FileSystem>,
        fixed: bool,
    ) -> VfsResult<FsHandle> {
        self.filesystems.register(name, fs, fixed)
    }

    pub fn filesystems(&self) -> &FsRegistry {
        &self.filesystems
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Verify the vnode cache's structural invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.cache.check_invariants()
    }

    pub fn mounts(&self) -> Vec<MountInfo> {
        self.namespaces.list()
    }

    /// Number of cached vnodes belonging to a namespace.
    pub fn namespace_vnodes(&self, ns: NamespaceId) -> usize {
        self.cache.namespace_len(ns)
    }

    // ========================================================================
    // Contexts and bases
    // ========================================================================

    /// Create an I/O context. A child inherits its parent's working
    /// directory and descriptors; a fresh context starts at the root.
    pub fn new_io_context(&self, parent: Option<&IoContext>) -> VfsResult<IoContext> {
        match parent {
            Some(parent) => Ok(parent.fork()),
            None => Ok(IoContext::new(self.namespaces.root()?, self.config.max_fds)),
        }
    }

    fn base(&self, ctx: &IoContext, at: At) -> VfsResult<Vnode> {
        match at {
            At::Cwd => Ok(ctx.cwd()),
            At::Fd(fd) => Ok(ctx.fds().get_fd(fd, None)?.vnode().clone()),
        }
    }

    fn resolve(&self, ctx: &IoContext, at: At, path: &str, follow: bool) -> VfsResult<Vnode> {
        let base = self.base(ctx, at)?;
        self.resolver.resolve(&base, path, follow)
    }

    fn resolve_parent(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<(Vnode, String)> {
        let base = self.base(ctx, at)?;
        self.resolver.resolve_parent(&base, path)
    }

    fn check_writable(&self, vnode: &Vnode) -> VfsResult<()> {
        if self.namespaces.get(vnode.namespace())?.flags().read_only {
            return Err(VfsError::ReadOnly);
        }
        Ok(())
    }

    /// Refuse to remove or rename an entry something is mounted on.
    fn check_not_mount_point(&self, dir: &Vnode, name: &str) -> VfsResult<()> {
        if let Ok(Walked::Node(node)) = dir.volume().walk(dir.data(), name) {
            if let Some(ns) = self.cache.mounted_at(VnodeKey::new(dir.namespace(), node)) {
                return Err(VfsError::busy(format!("{} is the mount point of {}", name, ns)));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn open(
        &self,
        ctx: &IoContext,
        at: At,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<Fd> {
        let base = self.base(ctx, at)?;
        let (vnode, cookie, provisional) = if flags.create {
            self.open_create(&base, path, flags, perm)?
        } else {
            let vnode = self.resolver.resolve(&base, path, !flags.no_traverse)?;
            if flags.writes() {
                self.check_writable(&vnode)?;
            }
            let cookie = vnode.volume().open(vnode.data(), flags)?;
            (vnode, cookie, None)
        };
        drop(base);

        let file = OpenFile::new(OfileKind::File, vnode, Some(cookie), flags);
        match ctx.fds().new_fd(file, None, flags.close_on_exec) {
            Ok(fd) => {
                debug!("opened {} as fd {}", path, fd);
                Ok(fd)
            }
            Err(e) => {
                if let Some(entry) = provisional {
                    self.unwind_create(entry);
                }
                Err(e)
            }
        }
    }

    fn open_create(
        &self,
        base: &Vnode,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<(Vnode, Cookie, Option<Provisional>)> {
        if !flags.exclusive {
            match self.resolver.resolve(base, path, !flags.no_traverse) {
                Ok(vnode) => {
                    if flags.writes() {
                        self.check_writable(&vnode)?;
                    }
                    let cookie = vnode.volume().open(vnode.data(), flags)?;
                    return Ok((vnode, cookie, None));
                }
                Err(VfsError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let (dir, name) = self.resolver.resolve_parent(base, path)?;
        self.check_writable(&dir)?;
        let created = dir.volume().create(dir.data(), &name, flags, perm)?;
        let key = VnodeKey::new(dir.namespace(), created.node);
        let vnode = match self.cache.get(key) {
            Ok(vnode) => vnode,
            Err(e) => {
                // The node never loaded, so its cookie is dropped unclosed.
                warn!("created {} but could not load it: {}", key, e);
                drop(created.cookie);
                if created.created {
                    self.unwind_create(Provisional { dir, name });
                }
                return Err(e);
            }
        };
        let provisional = created.created.then(|| Provisional { dir, name });
        Ok((vnode, created.cookie, provisional))
    }

    fn unwind_create(&self, entry: Provisional) {
        if let Err(e) = entry.dir.volume().unlink(entry.dir.data(), &entry.name) {
            warn!("could not remove {} after failed open: {}", entry.name, e);
        }
    }

    /// Close a descriptor of any kind.
    pub fn close(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        ctx.fds().remove_fd(fd, None)
    }

    fn readable_file(&self, ctx: &IoContext, fd: Fd) -> VfsResult<Arc<OpenFile>> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::File))?;
        if !file.flags().read {
            return Err(VfsError::BadDescriptor(fd));
        }
        Ok(file)
    }

    fn writable_file(&self, ctx: &IoContext, fd: Fd) -> VfsResult<Arc<OpenFile>> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::File))?;
        if !(file.flags().write || file.flags().append) {
            return Err(VfsError::BadDescriptor(fd));
        }
        Ok(file)
    }

    /// Read at the descriptor's position, advancing it.
    pub fn read(&self, ctx: &IoContext, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.readable_file(ctx, fd)?;
        let vnode = file.vnode();
        let cookie = file.cookie()?;
        file.with_pos(|pos| {
            let n = vnode.volume().read(vnode.data(), cookie, pos, buf)?;
            Ok((n, pos + n as u64))
        })
    }

    /// Read at `pos` without moving the descriptor's position.
    pub fn pread(&self, ctx: &IoContext, fd: Fd, pos: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.readable_file(ctx, fd)?;
        let vnode = file.vnode();
        vnode.volume().read(vnode.data(), file.cookie()?, pos, buf)
    }

    /// Write at the descriptor's position (end of file in append mode),
    /// advancing it.
    pub fn write(&self, ctx: &IoContext, fd: Fd, data: &[u8]) -> VfsResult<usize> {
        let file = self.writable_file(ctx, fd)?;
        let vnode = file.vnode();
        let cookie = file.cookie()?;
        let append = file.flags().append;
        file.with_pos(|pos| {
            let n = vnode.volume().write(vnode.data(), cookie, pos, data)?;
            let next = if append {
                vnode.volume().rstat(vnode.data())?.size
            } else {
                pos + n as u64
            };
            Ok((n, next))
        })
    }

    pub fn pwrite(&self, ctx: &IoContext, fd: Fd, pos: u64, data: &[u8]) -> VfsResult<usize> {
        let file = self.writable_file(ctx, fd)?;
        let vnode = file.vnode();
        vnode.volume().write(vnode.data(), file.cookie()?, pos, data)
    }

    pub fn ioctl(&self, ctx: &IoContext, fd: Fd, op: u32, buf: &mut [u8]) -> VfsResult<usize> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::File))?;
        let vnode = file.vnode();
        vnode.volume().ioctl(vnode.data(), file.cookie()?, op, buf)
    }

    /// Reposition a file descriptor; returns the new position.
    pub fn lseek(&self, ctx: &IoContext, fd: Fd, whence: SeekFrom) -> VfsResult<u64> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::File))?;
        let vnode = file.vnode();
        file.with_pos(|pos| {
            let (origin, delta) = match whence {
                SeekFrom::Start(offset) => return Ok((offset, offset)),
                SeekFrom::Current(delta) => (pos, delta),
                SeekFrom::End(delta) => (vnode.volume().rstat(vnode.data())?.size, delta),
            };
            let next = origin
                .checked_add_signed(delta)
                .ok_or_else(|| VfsError::invalid_argument(format!("seek to {} + {}", origin, delta)))?;
            Ok((next, next))
        })
    }

    // ========================================================================
    // Naming
    // ========================================================================

    pub fn mkdir(&self, ctx: &IoContext, at: At, path: &str, perm: u32) -> VfsResult<()> {
        let (dir, name) = self.resolve_parent(ctx, at, path)?;
        self.check_writable(&dir)?;
        dir.volume().mkdir(dir.data(), &name, perm)
    }

    pub fn rmdir(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<()> {
        let (dir, name) = self.resolve_parent(ctx, at, path)?;
        self.check_writable(&dir)?;
        let _mounts = self.namespaces.hold_mounts();
        self.check_not_mount_point(&dir, &name)?;
        dir.volume().rmdir(dir.data(), &name)
    }

    pub fn unlink(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<()> {
        let (dir, name) = self.resolve_parent(ctx, at, path)?;
        self.check_writable(&dir)?;
        let _mounts = self.namespaces.hold_mounts();
        self.check_not_mount_point(&dir, &name)?;
        dir.volume().unlink(dir.data(), &name)
    }

    /// Rename within one namespace.
    pub fn rename(
        &self,
        ctx: &IoContext,
        old_at: At,
        old_path: &str,
        new_at: At,
        new_path: &str,
    ) -> VfsResult<()> {
        let (old_dir, old_name) = self.resolve_parent(ctx, old_at, old_path)?;
        let (new_dir, new_name) = self.resolve_parent(ctx, new_at, new_path)?;
        if old_dir.namespace() != new_dir.namespace() {
            return Err(VfsError::CrossDevice);
        }
        self.check_writable(&old_dir)?;

        let _rename = self.rename_lock.lock();
        let _mounts = self.namespaces.hold_mounts();
        self.check_not_mount_point(&old_dir, &old_name)?;
        self.check_not_mount_point(&new_dir, &new_name)?;
        old_dir
            .volume()
            .rename(old_dir.data(), &old_name, new_dir.data(), &new_name)
    }

    /// Create a hard link at `new_path` to the node at `old_path`.
    pub fn link(
        &self,
        ctx: &IoContext,
        old_at: At,
        old_path: &str,
        new_at: At,
        new_path: &str,
    ) -> VfsResult<()> {
        let target = self.resolve(ctx, old_at, old_path, false)?;
        let (dir, name) = self.resolve_parent(ctx, new_at, new_path)?;
        if target.namespace() != dir.namespace() {
            return Err(VfsError::CrossDevice);
        }
        self.check_writable(&dir)?;

        let _rename = self.rename_lock.lock();
        dir.volume().link(dir.data(), &name, target.data())
    }

    pub fn symlink(&self, ctx: &IoContext, target: &str, at: At, path: &str) -> VfsResult<()> {
        let (dir, name) = self.resolve_parent(ctx, at, path)?;
        self.check_writable(&dir)?;
        dir.volume().symlink(dir.data(), &name, target)
    }

    pub fn readlink(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<String> {
        let vnode = self.resolve(ctx, at, path, false)?;
        vnode.volume().readlink(vnode.data())
    }

    // ========================================================================
    // Directories
    // ========================================================================

    pub fn opendir(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<Fd> {
        let vnode = self.resolve(ctx, at, path, true)?;
        let cookie = vnode.volume().opendir(vnode.data())?;
        let file = OpenFile::new(OfileKind::Directory, vnode, Some(cookie), OpenFlags::read());
        ctx.fds().new_fd(file, None, false)
    }

    /// Next batch of at most `max` entries; empty at the end.
    ///
    /// At the root of a mounted namespace, `..` names the parent of the
    /// covered directory, matching what path resolution does.
    pub fn readdir(&self, ctx: &IoContext, fd: Fd, max: usize) -> VfsResult<Vec<DirEntry>> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::Directory))?;
        let vnode = file.vnode();
        let mut entries = vnode.volume().readdir(vnode.data(), file.cookie()?, max)?;
        if let Some(dotdot) = entries.iter_mut().find(|e| e.name == "..") {
            if let Some(covered) = self.namespaces.mount_target(vnode.key()) {
                let covered = self.cache.get(covered)?;
                match covered.volume().walk(covered.data(), "..")? {
                    Walked::Node(parent) => {
                        dotdot.node = parent;
                        dotdot.namespace = Some(covered.namespace());
                    }
                    Walked::Link { .. } => {
                        return Err(VfsError::other(format!("`..` of {} is a link", covered.key())));
                    }
                }
            }
        }
        Ok(entries)
    }

    pub fn rewinddir(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::Directory))?;
        let vnode = file.vnode();
        vnode.volume().rewinddir(vnode.data(), file.cookie()?)
    }

    pub fn closedir(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        ctx.fds().remove_fd(fd, Some(OfileKind::Directory))
    }

    // ========================================================================
    // Extended attributes
    // ========================================================================

    pub fn open_attr_dir(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<Fd> {
        let vnode = self.resolve(ctx, at, path, true)?;
        let cookie = vnode.volume().open_attr_dir(vnode.data())?;
        let file = OpenFile::new(
            OfileKind::AttributeDirectory,
            vnode,
            Some(cookie),
            OpenFlags::read(),
        );
        ctx.fds().new_fd(file, None, false)
    }

    pub fn read_attr_dir(&self, ctx: &IoContext, fd: Fd, max: usize) -> VfsResult<Vec<String>> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::AttributeDirectory))?;
        let vnode = file.vnode();
        vnode.volume().read_attr_dir(vnode.data(), file.cookie()?, max)
    }

    pub fn rewind_attr_dir(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        let file = ctx.fds().get_fd(fd, Some(OfileKind::AttributeDirectory))?;
        let vnode = file.vnode();
        vnode.volume().rewind_attr_dir(vnode.data(), file.cookie()?)
    }

    pub fn close_attr_dir(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        ctx.fds().remove_fd(fd, Some(OfileKind::AttributeDirectory))
    }

    /// Read attribute `name` of the node behind `fd`.
    pub fn read_attr(
        &self,
        ctx: &IoContext,
        fd: Fd,
        name: &str,
        pos: u64,
        buf: &mut [u8],
    ) -> VfsResult<usize> {
        let file = ctx.fds().get_fd(fd, None)?;
        let vnode = file.vnode();
        vnode.volume().read_attr(vnode.data(), name, pos, buf)
    }

    pub fn write_attr(
        &self,
        ctx: &IoContext,
        fd: Fd,
        name: &str,
        kind: u32,
        pos: u64,
        data: &[u8],
    ) -> VfsResult<usize> {
        let file = ctx.fds().get_fd(fd, None)?;
        let vnode = file.vnode();
        self.check_writable(vnode)?;
        vnode.volume().write_attr(vnode.data(), name, kind, pos, data)
    }

    pub fn remove_attr(&self, ctx: &IoContext, fd: Fd, name: &str) -> VfsResult<()> {
        let file = ctx.fds().get_fd(fd, None)?;
        let vnode = file.vnode();
        self.check_writable(vnode)?;
        vnode.volume().remove_attr(vnode.data(), name)
    }

    pub fn stat_attr(&self, ctx: &IoContext, fd: Fd, name: &str) -> VfsResult<AttrInfo> {
        let file = ctx.fds().get_fd(fd, None)?;
        let vnode = file.vnode();
        vnode.volume().stat_attr(vnode.data(), name)
    }

    // ========================================================================
    // Working directory
    // ========================================================================

    fn enter(&self, ctx: &IoContext, vnode: Vnode) -> VfsResult<()> {
        if !vnode.volume().rstat(vnode.data())?.is_dir() {
            return Err(VfsError::not_a_directory(vnode.key().to_string()));
        }
        ctx.set_cwd(vnode);
        Ok(())
    }

    pub fn chdir(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<()> {
        let vnode = self.resolve(ctx, at, path, true)?;
        self.enter(ctx, vnode)
    }

    pub fn fchdir(&self, ctx: &IoContext, fd: Fd) -> VfsResult<()> {
        let vnode = ctx.fds().get_fd(fd, None)?.vnode().clone();
        self.enter(ctx, vnode)
    }

    /// Open the working directory as a descriptor, for a later `fchdir`.
    pub fn open_cwd(&self, ctx: &IoContext) -> VfsResult<Fd> {
        let file = OpenFile::new(OfileKind::WorkingDirectory, ctx.cwd(), None, OpenFlags::read());
        ctx.fds().new_fd(file, None, false)
    }

    pub fn getcwd(&self, ctx: &IoContext) -> VfsResult<String> {
        self.resolver.path_of(&ctx.cwd())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Stat a path; with `follow` false a terminal symlink is stat'ed itself.
    pub fn rstat(&self, ctx: &IoContext, at: At, path: &str, follow: bool) -> VfsResult<FileAttr> {
        let vnode = self.resolve(ctx, at, path, follow)?;
        vnode.volume().rstat(vnode.data())
    }

    pub fn fstat(&self, ctx: &IoContext, fd: Fd) -> VfsResult<FileAttr> {
        let file = ctx.fds().get_fd(fd, None)?;
        let vnode = file.vnode();
        vnode.volume().rstat(vnode.data())
    }

    pub fn wstat(&self, ctx: &IoContext, at: At, path: &str, attr: &SetAttr) -> VfsResult<()> {
        let vnode = self.resolve(ctx, at, path, true)?;
        self.check_writable(&vnode)?;
        vnode.volume().wstat(vnode.data(), attr)
    }

    // ========================================================================
    // Descriptors
    // ========================================================================

    pub fn dup(&self, ctx: &IoContext, fd: Fd) -> VfsResult<Fd> {
        ctx.fds().dup(fd)
    }

    pub fn dup2(&self, ctx: &IoContext, old: Fd, new: Fd) -> VfsResult<Fd> {
        ctx.fds().dup2(old, new)
    }

    pub fn set_close_on_exec(&self, ctx: &IoContext, fd: Fd, close_on_exec: bool) -> VfsResult<()> {
        ctx.fds().set_close_on_exec(fd, close_on_exec)
    }

    // ========================================================================
    // Mounts
    // ========================================================================

    /// Mount the root namespace. Must precede every other call.
    pub fn mount_root(
        &self,
        fs_name: &str,
        device: Option<&Path>,
        flags: MountFlags,
        params: Option<&str>,
    ) -> VfsResult<NamespaceId> {
        self.namespaces.mount(MountRequest {
            fs_name,
            mount_point: None,
            device,
            flags,
            params,
        })
    }

    /// Mount `fs_name` on the directory at `path`.
    #[allow(clippy::too_many_arguments)]
    pub fn mount(
        &self,
        ctx: &IoContext,
        at: At,
        path: &str,
        fs_name: &str,
        device: Option<&Path>,
        flags: MountFlags,
        params: Option<&str>,
    ) -> VfsResult<NamespaceId> {
        let mount_point = self.resolve(ctx, at, path, true)?;
        let ns = self.namespaces.mount(MountRequest {
            fs_name,
            mount_point: Some(&mount_point),
            device,
            flags,
            params,
        })?;
        info!("{} mounted on {}", fs_name, path);
        Ok(ns)
    }

    /// Unmount the namespace whose root `path` names.
    pub fn unmount(&self, ctx: &IoContext, at: At, path: &str) -> VfsResult<()> {
        let vnode = self.resolve(ctx, at, path, true)?;
        let key = vnode.key();
        drop(vnode);

        if Some(key) == self.namespaces.root_key() {
            return Err(VfsError::busy("cannot unmount the root namespace"));
        }
        if self.namespaces.mount_target(key).is_none() {
            return Err(VfsError::invalid_argument(format!("{} is not a mount point", path)));
        }
        self.namespaces.unmount(key.ns)
    }

    /// Unmount by namespace id.
    pub fn unmount_namespace(&self, ns: NamespaceId) -> VfsResult<()> {
        self.namespaces.unmount(ns)
    }

    /// Flush every mounted namespace.
    pub fn sync(&self) -> VfsResult<()> {
        self.namespaces.sync()
    }

    /// Format `device` with a registered filesystem, without mounting it.
    pub fn initialize(&self, fs_name: &str, device: &Path, params: Option<&str>) -> VfsResult<()> {
        let fs = self
            .filesystems
            .acquire(fs_name)
            .ok_or_else(|| VfsError::UnknownFilesystem(fs_name.to_string()))?;
        let result = fs.fs().initialize(device, params);
        self.filesystems.release(&fs);
        result
    }
}
