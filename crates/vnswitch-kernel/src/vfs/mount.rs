//! Namespace registry.
//!
//! One [`Namespace`] per mounted filesystem instance. A non-root namespace
//! is attached to a vnode of its parent (the mount point); the namespace
//! owns that link and pins the mount-point vnode, which carries only a
//! non-owning back-reference (`Vnode::mounted`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use super::cache::{Vnode, VnodeCache};
use super::ops::{MountContext, Volume};
use super::registry::{FsHandle, FsRegistry};
use super::types::{DeviceId, MountFlags, NamespaceId, NodeId, VnodeKey};
use super::{VfsError, VfsResult};

/// One mounted filesystem instance.
pub struct Namespace {
    id: NamespaceId,
    fs: FsHandle,
    volume: Arc<dyn Volume>,
    device: Option<DeviceId>,
    device_path: Option<PathBuf>,
    root: NodeId,
    /// Vnode in the parent namespace this one is mounted on.
    covers: Option<VnodeKey>,
    flags: MountFlags,
    shutting_down: AtomicBool,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("fs", &self.fs.name())
            .field("device", &self.device_path)
            .field("root", &self.root)
            .field("covers", &self.covers)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Namespace {
    pub fn id(&self) -> NamespaceId {
        self.id
    }

    pub fn fs_name(&self) -> &str {
        self.fs.name()
    }

    pub fn volume(&self) -> &Arc<dyn Volume> {
        &self.volume
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_key(&self) -> VnodeKey {
        VnodeKey::new(self.id, self.root)
    }

    /// Mount-point vnode in the parent namespace; `None` for the root namespace.
    pub fn covers(&self) -> Option<VnodeKey> {
        self.covers
    }

    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    pub fn device_path(&self) -> Option<&Path> {
        self.device_path.as_deref()
    }

    pub fn flags(&self) -> MountFlags {
        self.flags
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}

/// Summary of a mounted namespace.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub id: NamespaceId,
    pub fs_name: String,
    pub device: Option<PathBuf>,
    pub covers: Option<VnodeKey>,
    pub read_only: bool,
}

/// Lookup table of live namespaces, shared with the vnode cache.
#[derive(Debug)]
pub struct NamespaceTable {
    namespaces: DashMap<NamespaceId, Arc<Namespace>>,
    next_id: AtomicU32,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTable {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn get(&self, id: NamespaceId) -> Option<Arc<Namespace>> {
        self.namespaces.get(&id).map(|ns| Arc::clone(ns.value()))
    }

    fn allocate_id(&self) -> NamespaceId {
        NamespaceId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, namespace: Arc<Namespace>) {
        self.namespaces.insert(namespace.id, namespace);
    }

    fn remove(&self, id: NamespaceId) -> Option<Arc<Namespace>> {
        self.namespaces.remove(&id).map(|(_, ns)| ns)
    }

    fn find_device(&self, device: DeviceId) -> Option<NamespaceId> {
        self.namespaces
            .iter()
            .find(|ns| ns.device == Some(device))
            .map(|ns| ns.id)
    }

    /// All live namespaces, ordered by id.
    pub fn all(&self) -> Vec<Arc<Namespace>> {
        let mut all: Vec<_> = self
            .namespaces
            .iter()
            .map(|ns| Arc::clone(ns.value()))
            .collect();
        all.sort_by_key(|ns| ns.id);
        all
    }
}

/// What to mount, and where.
pub struct MountRequest<'a> {
    pub fs_name: &'a str,
    /// Vnode to cover; `None` mounts the root namespace.
    pub mount_point: Option<&'a Vnode>,
    pub device: Option<&'a Path>,
    pub flags: MountFlags,
    pub params: Option<&'a str>,
}

/// Mounts and unmounts namespaces.
pub struct NamespaceRegistry {
    table: Arc<NamespaceTable>,
    cache: Arc<VnodeCache>,
    filesystems: Arc<FsRegistry>,
    /// Serializes mount and unmount.
    mount_op: Mutex<()>,
    root: RwLock<Option<VnodeKey>>,
}

impl fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceRegistry")
            .field("table", &self.table)
            .field("root", &*self.root.read())
            .finish()
    }
}

impl NamespaceRegistry {
    pub fn new(
        table: Arc<NamespaceTable>,
        cache: Arc<VnodeCache>,
        filesystems: Arc<FsRegistry>,
    ) -> Self {
        Self {
            table,
            cache,
            filesystems,
            mount_op: Mutex::new(()),
            root: RwLock::new(None),
        }
    }

    pub fn table(&self) -> &Arc<NamespaceTable> {
        &self.table
    }

    pub fn get(&self, id: NamespaceId) -> VfsResult<Arc<Namespace>> {
        self.table
            .get(id)
            .ok_or_else(|| VfsError::not_found(format!("namespace {}", id)))
    }

    /// Root vnode of the root namespace, referenced.
    pub fn root(&self) -> VfsResult<Vnode> {
        let key = (*self.root.read()).ok_or_else(|| VfsError::not_found("no root filesystem"))?;
        self.cache.get(key)
    }

    pub fn root_key(&self) -> Option<VnodeKey> {
        *self.root.read()
    }

    /// Mount a filesystem instance.
    ///
    /// The first mount must target no vnode and becomes the root namespace.
    /// Later mounts must cover a directory that is not the global root, is
    /// not itself a namespace root and has nothing mounted on it. A device
    /// already backing a live namespace is refused with `Busy`.
    pub fn mount(&self, req: MountRequest<'_>) -> VfsResult<NamespaceId> {
        let _op = self.mount_op.lock();

        let root_key = *self.root.read();
        match (req.mount_point, root_key) {
            (None, Some(_)) => {
                return Err(VfsError::busy("root filesystem already mounted"));
            }
            (Some(_), None) => {
                return Err(VfsError::not_found("no root filesystem"));
            }
            (Some(vnode), Some(root)) => {
                if vnode.key() == root {
                    return Err(VfsError::busy("cannot mount over the global root"));
                }
                if vnode.mounted().is_some() {
                    return Err(VfsError::busy(format!("{} is already a mount point", vnode.key())));
                }
                if self.mount_target(vnode.key()).is_some() {
                    return Err(VfsError::busy(format!("{} is a namespace root", vnode.key())));
                }
                if !vnode.volume().rstat(vnode.data())?.is_dir() {
                    return Err(VfsError::not_a_directory(vnode.key().to_string()));
                }
            }
            (None, None) => {}
        }

        let device = req.device.map(DeviceId::of).transpose()?;
        if let Some(device) = device {
            if let Some(existing) = self.table.find_device(device) {
                return Err(VfsError::busy(format!(
                    "device already mounted as {}",
                    existing
                )));
            }
        }

        let fs = self
            .filesystems
            .acquire(req.fs_name)
            .ok_or_else(|| VfsError::UnknownFilesystem(req.fs_name.to_string()))?;

        let id = self.table.allocate_id();
        let ctx = MountContext {
            ns: id,
            nodes: self.cache.services(id),
        };
        let mounted = match fs.fs().mount(ctx, req.device, req.flags, req.params) {
            Ok(mounted) => mounted,
            Err(e) => {
                self.filesystems.release(&fs);
                return Err(e);
            }
        };

        let namespace = Arc::new(Namespace {
            id,
            fs: fs.clone(),
            volume: mounted.volume,
            device,
            device_path: req.device.map(Path::to_path_buf),
            root: mounted.root,
            covers: req.mount_point.map(Vnode::key),
            flags: req.flags,
            shutting_down: AtomicBool::new(false),
        });
        self.table.insert(Arc::clone(&namespace));

        // The namespace keeps one reference on its root for its lifetime.
        match self.cache.get(namespace.root_key()) {
            Ok(root) => {
                root.pin();
            }
            Err(e) => {
                self.table.remove(id);
                if let Err(unmount_err) = namespace.volume.unmount() {
                    warn!("unmount after failed root load of {}: {}", id, unmount_err);
                }
                self.filesystems.release(&fs);
                return Err(e);
            }
        }

        match req.mount_point {
            Some(vnode) => {
                vnode.pin();
                vnode.set_mounted(Some(id));
            }
            None => *self.root.write() = Some(namespace.root_key()),
        }

        info!(
            "mounted {} as {} (root node {}, covers {:?})",
            req.fs_name, id, namespace.root, namespace.covers
        );
        Ok(id)
    }

    /// Unmount a namespace.
    ///
    /// Refused with `Busy` for the root namespace, and while any of the
    /// namespace's vnodes is referenced or busy.
    pub fn unmount(&self, id: NamespaceId) -> VfsResult<()> {
        let _op = self.mount_op.lock();

        let namespace = self.get(id)?;
        let Some(covers) = namespace.covers else {
            return Err(VfsError::busy("cannot unmount the root namespace"));
        };

        self.cache.retire_namespace(&namespace)?;

        let covered = self.cache.get(covers)?;
        covered.set_mounted(None);
        drop(covered);
        self.cache.release_key(covers, false)?;

        if let Err(e) = namespace.volume.unmount() {
            warn!("backend unmount of {} failed: {}", id, e);
        }
        self.table.remove(id);
        self.filesystems.release(&namespace.fs);

        info!("unmounted {}", id);
        Ok(())
    }

    /// Block mount and unmount until the guard drops.
    ///
    /// Callers that check "not a mount point" and then act on that entry
    /// hold this across both steps.
    pub fn hold_mounts(&self) -> MutexGuard<'_, ()> {
        self.mount_op.lock()
    }

    /// Root of the namespace mounted on `vnode`, referenced.
    pub fn mount_point_root(&self, vnode: &Vnode) -> VfsResult<Option<Vnode>> {
        let Some(child) = vnode.mounted() else {
            return Ok(None);
        };
        let namespace = self.get(child)?;
        self.cache.get(namespace.root_key()).map(Some)
    }

    /// If `key` is the root of a non-root namespace, the vnode it covers.
    pub fn mount_target(&self, key: VnodeKey) -> Option<VnodeKey> {
        let namespace = self.table.get(key.ns)?;
        if namespace.root != key.node {
            return None;
        }
        namespace.covers
    }

    pub fn list(&self) -> Vec<MountInfo> {
        self.table
            .all()
            .into_iter()
            .map(|ns| MountInfo {
                id: ns.id,
                fs_name: ns.fs.name().to_string(),
                device: ns.device_path.clone(),
                covers: ns.covers,
                read_only: ns.flags.read_only,
            })
            .collect()
    }

    /// Ask every backend to flush.
    pub fn sync(&self) -> VfsResult<()> {
        let mut first_err = None;
        for namespace in self.table.all() {
            if let Err(e) = namespace.volume.sync() {
                warn!("sync of {} failed: {}", namespace.id, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
