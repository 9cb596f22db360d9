//! Backend operation contract.
//!
//! A filesystem module registers a [`FileSystem`]; mounting it yields a
//! [`Volume`], the per-mount object every later call goes through. Node
//! data and cookies are opaque to the switch: it stores what the backend
//! returned and hands it back on each call.
//!
//! Operations that take a `reentrant` flag may be invoked while the backend
//! is itself inside a call into [`NodeServices`](super::NodeServices); a
//! backend must not hold its own locks across such calls.

use std::path::Path;
use std::sync::Arc;

use super::cache::NodeServices;
use super::types::{
    AttrInfo, Cookie, DirEntry, FileAttr, MountFlags, NamespaceId, NodeData, NodeId, OpenFlags,
    SetAttr,
};
use super::{VfsError, VfsResult};

/// What a backend hands to the switch from `mount`.
pub struct Mounted {
    /// The per-mount object (backend-private mount data).
    pub volume: Arc<dyn Volume>,
    /// Node id of the filesystem root.
    pub root: NodeId,
}

/// Per-mount context given to [`FileSystem::mount`].
#[derive(Clone)]
pub struct MountContext {
    /// Namespace id the switch allocated for this mount.
    pub ns: NamespaceId,
    /// Backend-facing vnode calls.
    pub nodes: NodeServices,
}

/// Result of resolving one path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Walked {
    /// The component names a node.
    Node(NodeId),
    /// The component names a symbolic link.
    Link {
        /// The link's own node.
        node: NodeId,
        /// Link contents, spliced into the remaining path when followed.
        target: String,
    },
}

/// Result of `create`.
pub struct Created {
    pub node: NodeId,
    pub cookie: Cookie,
    /// False when a non-exclusive create opened an existing entry.
    pub created: bool,
}

/// A loadable filesystem module.
pub trait FileSystem: Send + Sync {
    /// Mount an instance.
    fn mount(
        &self,
        ctx: MountContext,
        device: Option<&Path>,
        flags: MountFlags,
        params: Option<&str>,
    ) -> VfsResult<Mounted>;

    /// Format a device without mounting it.
    fn initialize(&self, _device: &Path, _params: Option<&str>) -> VfsResult<()> {
        Err(VfsError::NotSupported("initialize"))
    }
}

/// Operations on one mounted filesystem instance.
pub trait Volume: Send + Sync {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    fn unmount(&self) -> VfsResult<()>;

    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Node I/O
    // ========================================================================

    /// Load a node into memory.
    fn read_vnode(&self, node: NodeId, reentrant: bool) -> VfsResult<NodeData>;

    /// Flush and forget a node the cache is evicting.
    fn write_vnode(&self, node: &NodeData, reentrant: bool) -> VfsResult<()>;

    /// Destroy a node that was marked for removal and is no longer used.
    fn remove_vnode(&self, node: &NodeData, reentrant: bool) -> VfsResult<()>;

    // ========================================================================
    // Naming
    // ========================================================================

    /// Resolve one path component inside `dir`.
    ///
    /// `"."` and `".."` are passed through; `".."` at the filesystem root
    /// resolves to the root itself.
    fn walk(&self, dir: &NodeData, name: &str) -> VfsResult<Walked>;

    fn create(
        &self,
        dir: &NodeData,
        name: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<Created>;

    fn mkdir(&self, dir: &NodeData, name: &str, perm: u32) -> VfsResult<()>;

    fn symlink(&self, _dir: &NodeData, _name: &str, _target: &str) -> VfsResult<()> {
        Err(VfsError::NotSupported("symlink"))
    }

    fn link(&self, _dir: &NodeData, _name: &str, _node: &NodeData) -> VfsResult<()> {
        Err(VfsError::NotSupported("link"))
    }

    fn rename(
        &self,
        old_dir: &NodeData,
        old_name: &str,
        new_dir: &NodeData,
        new_name: &str,
    ) -> VfsResult<()>;

    fn unlink(&self, dir: &NodeData, name: &str) -> VfsResult<()>;

    fn rmdir(&self, dir: &NodeData, name: &str) -> VfsResult<()>;

    fn readlink(&self, _node: &NodeData) -> VfsResult<String> {
        Err(VfsError::NotSupported("readlink"))
    }

    // ========================================================================
    // Open handles
    // ========================================================================

    fn open(&self, node: &NodeData, flags: OpenFlags) -> VfsResult<Cookie>;

    fn close(&self, _node: &NodeData, _cookie: &Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn free_cookie(&self, _node: &NodeData, _cookie: Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn opendir(&self, node: &NodeData) -> VfsResult<Cookie>;

    /// Return up to `max` entries, advancing the cookie.
    fn readdir(&self, node: &NodeData, cookie: &Cookie, max: usize) -> VfsResult<Vec<DirEntry>>;

    fn rewinddir(&self, node: &NodeData, cookie: &Cookie) -> VfsResult<()>;

    fn closedir(&self, _node: &NodeData, _cookie: &Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn free_dircookie(&self, _node: &NodeData, _cookie: Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn open_attr_dir(&self, _node: &NodeData) -> VfsResult<Cookie> {
        Err(VfsError::NotSupported("open_attr_dir"))
    }

    /// Return up to `max` attribute names, advancing the cookie.
    fn read_attr_dir(
        &self,
        _node: &NodeData,
        _cookie: &Cookie,
        _max: usize,
    ) -> VfsResult<Vec<String>> {
        Err(VfsError::NotSupported("read_attr_dir"))
    }

    fn rewind_attr_dir(&self, _node: &NodeData, _cookie: &Cookie) -> VfsResult<()> {
        Err(VfsError::NotSupported("rewind_attr_dir"))
    }

    fn close_attr_dir(&self, _node: &NodeData, _cookie: &Cookie) -> VfsResult<()> {
        Ok(())
    }

    fn free_attr_dir_cookie(&self, _node: &NodeData, _cookie: Cookie) -> VfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Read into `buf` at `pos`; returns bytes read (0 at end of file).
    fn read(&self, node: &NodeData, cookie: &Cookie, pos: u64, buf: &mut [u8])
        -> VfsResult<usize>;

    /// Write `data` at `pos`; returns bytes written.
    ///
    /// Backends honoring append mode write at end of file regardless of `pos`.
    fn write(&self, node: &NodeData, cookie: &Cookie, pos: u64, data: &[u8]) -> VfsResult<usize>;

    fn read_attr(
        &self,
        _node: &NodeData,
        _name: &str,
        _pos: u64,
        _buf: &mut [u8],
    ) -> VfsResult<usize> {
        Err(VfsError::NotSupported("read_attr"))
    }

    fn write_attr(
        &self,
        _node: &NodeData,
        _name: &str,
        _kind: u32,
        _pos: u64,
        _data: &[u8],
    ) -> VfsResult<usize> {
        Err(VfsError::NotSupported("write_attr"))
    }

    fn remove_attr(&self, _node: &NodeData, _name: &str) -> VfsResult<()> {
        Err(VfsError::NotSupported("remove_attr"))
    }

    fn stat_attr(&self, _node: &NodeData, _name: &str) -> VfsResult<AttrInfo> {
        Err(VfsError::NotSupported("stat_attr"))
    }

    fn ioctl(
        &self,
        _node: &NodeData,
        _cookie: &Cookie,
        _op: u32,
        _buf: &mut [u8],
    ) -> VfsResult<usize> {
        Err(VfsError::NotSupported("ioctl"))
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn rstat(&self, node: &NodeData) -> VfsResult<FileAttr>;

    fn wstat(&self, node: &NodeData, attr: &SetAttr) -> VfsResult<()>;
}
