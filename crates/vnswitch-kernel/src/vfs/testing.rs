//! Test backend that counts node I/O.
//!
//! Every node id names a flat directory-less file, except the root. Walking
//! `"n<id>"` from the root yields node `<id>`, so tests can load arbitrary
//! numbers of distinct vnodes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::cache::VnodeCache;
use super::mount::{MountRequest, NamespaceRegistry, NamespaceTable};
use super::ops::{Created, FileSystem, MountContext, Mounted, Volume, Walked};
use super::registry::FsRegistry;
use super::types::{
    Cookie, DirEntry, FileAttr, FileType, MountFlags, NamespaceId, NodeData, NodeId, OpenFlags,
    SetAttr, VnodeKey,
};
use super::{VfsError, VfsResult};
use crate::config::CacheConfig;

pub const ROOT: NodeId = 1;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounts {
    pub reads: u32,
    pub writes: u32,
    pub removes: u32,
}

#[derive(Default)]
pub struct CountingVolume {
    ns: Mutex<Option<NamespaceId>>,
    counts: Mutex<HashMap<NodeId, NodeCounts>>,
    /// Every `write_vnode` fails while set.
    pub fail_writes: AtomicBool,
    /// Delay inside `read_vnode`, to widen load races.
    pub read_delay: Mutex<Option<Duration>>,
}

impl CountingVolume {
    pub fn counts(&self, node: NodeId) -> NodeCounts {
        self.counts.lock().get(&node).copied().unwrap_or_default()
    }

    fn bump(&self, node: NodeId, f: impl FnOnce(&mut NodeCounts)) {
        f(self.counts.lock().entry(node).or_default());
    }
}

fn id_of(data: &NodeData) -> NodeId {
    *data.downcast_ref::<NodeId>().unwrap()
}

impl Volume for CountingVolume {
    fn unmount(&self) -> VfsResult<()> {
        Ok(())
    }

    fn read_vnode(&self, node: NodeId, _reentrant: bool) -> VfsResult<NodeData> {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.bump(node, |c| c.reads += 1);
        Ok(Arc::new(node))
    }

    fn write_vnode(&self, node: &NodeData, _reentrant: bool) -> VfsResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VfsError::Io(std::io::Error::other("injected write failure")));
        }
        self.bump(id_of(node), |c| c.writes += 1);
        Ok(())
    }

    fn remove_vnode(&self, node: &NodeData, _reentrant: bool) -> VfsResult<()> {
        self.bump(id_of(node), |c| c.removes += 1);
        Ok(())
    }

    fn walk(&self, _dir: &NodeData, name: &str) -> VfsResult<Walked> {
        match name {
            "." | ".." => Ok(Walked::Node(ROOT)),
            _ => name
                .strip_prefix('n')
                .and_then(|n| n.parse().ok())
                .map(Walked::Node)
                .ok_or_else(|| VfsError::not_found(name)),
        }
    }

    fn create(&self, _dir: &NodeData, _name: &str, _flags: OpenFlags, _perm: u32) -> VfsResult<Created> {
        Err(VfsError::NotSupported("create"))
    }

    fn mkdir(&self, _dir: &NodeData, _name: &str, _perm: u32) -> VfsResult<()> {
        Err(VfsError::NotSupported("mkdir"))
    }

    fn rename(&self, _: &NodeData, _: &str, _: &NodeData, _: &str) -> VfsResult<()> {
        Err(VfsError::NotSupported("rename"))
    }

    fn unlink(&self, _dir: &NodeData, _name: &str) -> VfsResult<()> {
        Err(VfsError::NotSupported("unlink"))
    }

    fn rmdir(&self, _dir: &NodeData, _name: &str) -> VfsResult<()> {
        Err(VfsError::NotSupported("rmdir"))
    }

    fn open(&self, _node: &NodeData, _flags: OpenFlags) -> VfsResult<Cookie> {
        Ok(Box::new(()))
    }

    fn opendir(&self, _node: &NodeData) -> VfsResult<Cookie> {
        Ok(Box::new(()))
    }

    fn readdir(&self, _node: &NodeData, _cookie: &Cookie, _max: usize) -> VfsResult<Vec<DirEntry>> {
        Ok(Vec::new())
    }

    fn rewinddir(&self, _node: &NodeData, _cookie: &Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn read(&self, _: &NodeData, _: &Cookie, _: u64, _: &mut [u8]) -> VfsResult<usize> {
        Ok(0)
    }

    fn write(&self, _: &NodeData, _: &Cookie, _: u64, data: &[u8]) -> VfsResult<usize> {
        Ok(data.len())
    }

    fn rstat(&self, node: &NodeData) -> VfsResult<FileAttr> {
        let id = id_of(node);
        let kind = if id == ROOT { FileType::Directory } else { FileType::File };
        let ns = self.ns.lock().unwrap_or(NamespaceId(0));
        Ok(FileAttr::new(ns, id, kind, 0o644))
    }

    fn wstat(&self, _node: &NodeData, _attr: &SetAttr) -> VfsResult<()> {
        Ok(())
    }
}

pub struct CountingFs {
    pub volume: Arc<CountingVolume>,
}

impl FileSystem for CountingFs {
    fn mount(
        &self,
        ctx: MountContext,
        _device: Option<&Path>,
        _flags: MountFlags,
        _params: Option<&str>,
    ) -> VfsResult<Mounted> {
        *self.volume.ns.lock() = Some(ctx.ns);
        Ok(Mounted {
            volume: Arc::clone(&self.volume) as Arc<dyn Volume>,
            root: ROOT,
        })
    }
}

/// A cache with one counting namespace mounted as root.
pub struct Harness {
    pub cache: Arc<VnodeCache>,
    pub namespaces: Arc<NamespaceRegistry>,
    pub volume: Arc<CountingVolume>,
    pub ns: NamespaceId,
}

impl Harness {
    pub fn new(slots: usize, cached_divisor: usize) -> Self {
        let table = Arc::new(NamespaceTable::new());
        let config = CacheConfig {
            slots,
            cached_divisor,
        };
        let cache = Arc::new(VnodeCache::new(&config, Arc::clone(&table)));
        let filesystems = Arc::new(FsRegistry::new());
        let volume = Arc::new(CountingVolume::default());
        filesystems
            .register(
                "counting",
                Arc::new(CountingFs {
                    volume: Arc::clone(&volume),
                }),
                true,
            )
            .unwrap();
        let namespaces = Arc::new(NamespaceRegistry::new(table, Arc::clone(&cache), filesystems));
        let ns = namespaces
            .mount(MountRequest {
                fs_name: "counting",
                mount_point: None,
                device: None,
                flags: MountFlags::default(),
                params: None,
            })
            .unwrap();
        Self {
            cache,
            namespaces,
            volume,
            ns,
        }
    }

    pub fn key(&self, node: NodeId) -> VnodeKey {
        VnodeKey::new(self.ns, node)
    }
}
