//! In-memory filesystem backend.
//!
//! Used as the root filesystem by the CLI and by tests. All data is
//! ephemeral. Each mount gets its own node table; node ids are never reused
//! within a mount.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::vfs::cache::NodeServices;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Created, FileSystem, MountContext, Mounted, Volume, Walked};
use crate::vfs::types::{
    AttrInfo, Cookie, DirEntry, FileAttr, FileType, MountFlags, NamespaceId, NodeData, NodeId,
    OpenFlags, SetAttr,
};

/// `ioctl` op writing the node id, little-endian, into the buffer.
pub const MEMFS_IOCTL_NODE_ID: u32 = 0x6d66_0001;

const ROOT: NodeId = 1;

/// Largest file or attribute value memfs will hold; also fits a 32-bit `usize`.
const MAX_FILE_SIZE: u64 = 1 << 30;

/// Byte range `[start, start + len)`, refused with `NoSpace` past `MAX_FILE_SIZE`.
fn span(start: u64, len: usize) -> VfsResult<Range<usize>> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= MAX_FILE_SIZE)
        .ok_or(VfsError::NoSpace)?;
    Ok(start as usize..end as usize)
}

/// Zero-extend `data` to at least `len` bytes.
fn grow(data: &mut Vec<u8>, len: usize) -> VfsResult<()> {
    if let Some(extra) = len.checked_sub(data.len()) {
        data.try_reserve(extra).map_err(|_| VfsError::NoSpace)?;
        data.resize(len, 0);
    }
    Ok(())
}

/// Backend call counters, shared by every mount of one `MemoryFs`.
#[derive(Debug, Default)]
pub struct MemStats {
    pub read_vnode: AtomicU64,
    pub write_vnode: AtomicU64,
    pub remove_vnode: AtomicU64,
    /// Unlinked nodes freed without a vnode because none could be loaded.
    pub reclaimed: AtomicU64,
}

#[derive(Debug)]
enum Body {
    File(Vec<u8>),
    Directory(BTreeMap<String, NodeId>),
    Symlink(String),
}

#[derive(Debug)]
struct MemNode {
    body: Body,
    parent: NodeId,
    nlink: u32,
    perm: u32,
    uid: Option<u32>,
    gid: Option<u32>,
    mtime: SystemTime,
    atime: SystemTime,
    ctime: SystemTime,
    xattrs: BTreeMap<String, (u32, Vec<u8>)>,
}

impl MemNode {
    fn new(body: Body, parent: NodeId, perm: u32) -> Self {
        let now = SystemTime::now();
        let nlink = if matches!(body, Body::Directory(_)) { 2 } else { 1 };
        Self {
            body,
            parent,
            nlink,
            perm,
            uid: None,
            gid: None,
            mtime: now,
            atime: now,
            ctime: now,
            xattrs: BTreeMap::new(),
        }
    }

    fn kind(&self) -> FileType {
        match self.body {
            Body::File(_) => FileType::File,
            Body::Directory(_) => FileType::Directory,
            Body::Symlink(_) => FileType::Symlink,
        }
    }

    fn size(&self) -> u64 {
        match &self.body {
            Body::File(data) => data.len() as u64,
            Body::Directory(entries) => entries.len() as u64,
            Body::Symlink(target) => target.len() as u64,
        }
    }

    fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

struct MemState {
    nodes: HashMap<NodeId, MemNode>,
    next_id: NodeId,
}

impl MemState {
    fn node(&self, id: NodeId) -> VfsResult<&MemNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> VfsResult<&mut MemNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| VfsError::not_found(format!("node {}", id)))
    }

    fn entries(&self, dir: NodeId) -> VfsResult<&BTreeMap<String, NodeId>> {
        match &self.node(dir)?.body {
            Body::Directory(entries) => Ok(entries),
            _ => Err(VfsError::not_a_directory(format!("node {}", dir))),
        }
    }

    fn entries_mut(&mut self, dir: NodeId) -> VfsResult<&mut BTreeMap<String, NodeId>> {
        match &mut self.node_mut(dir)?.body {
            Body::Directory(entries) => Ok(entries),
            _ => Err(VfsError::not_a_directory(format!("node {}", dir))),
        }
    }

    fn lookup(&self, dir: NodeId, name: &str) -> VfsResult<NodeId> {
        self.entries(dir)?
            .get(name)
            .copied()
            .ok_or_else(|| VfsError::not_found(name.to_string()))
    }

    /// Add a new node under `dir`.
    fn insert(&mut self, dir: NodeId, name: &str, body: Body, perm: u32) -> VfsResult<NodeId> {
        let is_dir = matches!(body, Body::Directory(_));
        if self.entries(dir)?.contains_key(name) {
            return Err(VfsError::already_exists(name.to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, MemNode::new(body, dir, perm));
        self.entries_mut(dir)?.insert(name.to_string(), id);
        let parent = self.node_mut(dir)?;
        parent.touch();
        if is_dir {
            parent.nlink += 1;
        }
        Ok(id)
    }

    /// Drop one link to `id`; returns true when it was the last.
    fn drop_link(&mut self, id: NodeId) -> VfsResult<bool> {
        let node = self.node_mut(id)?;
        node.nlink = node.nlink.saturating_sub(1);
        node.ctime = SystemTime::now();
        Ok(node.nlink == 0)
    }

    /// True if `ancestor` is `node` or one of its parents.
    fn is_ancestor(&self, ancestor: NodeId, mut node: NodeId) -> VfsResult<bool> {
        loop {
            if node == ancestor {
                return Ok(true);
            }
            if node == ROOT {
                return Ok(false);
            }
            node = self.node(node)?.parent;
        }
    }
}

/// Node data handed to the vnode cache.
#[derive(Debug)]
struct MemVnode {
    id: NodeId,
}

#[derive(Debug)]
struct FileCookie {
    flags: OpenFlags,
}

/// Cookie for directory and attribute-directory listings.
#[derive(Debug, Default)]
struct ListCookie {
    pos: AtomicUsize,
}

fn id_of(data: &NodeData) -> VfsResult<NodeId> {
    data.downcast_ref::<MemVnode>()
        .map(|v| v.id)
        .ok_or_else(|| VfsError::other("foreign node data passed to memfs"))
}

fn list_cookie(cookie: &Cookie) -> VfsResult<&ListCookie> {
    cookie
        .downcast_ref::<ListCookie>()
        .ok_or_else(|| VfsError::other("foreign cookie passed to memfs"))
}

fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(VfsError::invalid_argument(format!("bad entry name {:?}", name)));
    }
    if name == "." || name == ".." {
        return Err(VfsError::already_exists(name.to_string()));
    }
    Ok(())
}

/// In-memory filesystem module.
#[derive(Debug, Default)]
pub struct MemoryFs {
    stats: Arc<MemStats>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call counters across all mounts of this module.
    pub fn stats(&self) -> Arc<MemStats> {
        Arc::clone(&self.stats)
    }
}

impl FileSystem for MemoryFs {
    fn mount(
        &self,
        ctx: MountContext,
        _device: Option<&Path>,
        flags: MountFlags,
        _params: Option<&str>,
    ) -> VfsResult<Mounted> {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT, MemNode::new(Body::Directory(BTreeMap::new()), ROOT, 0o755));
        let volume = MemoryVolume {
            ns: ctx.ns,
            services: ctx.nodes,
            read_only: flags.read_only,
            state: Mutex::new(MemState { nodes, next_id: ROOT + 1 }),
            stats: Arc::clone(&self.stats),
        };
        debug!("memfs mounted as {}", ctx.ns);
        Ok(Mounted {
            volume: Arc::new(volume),
            root: ROOT,
        })
    }
}

/// One mounted memfs instance.
pub struct MemoryVolume {
    ns: NamespaceId,
    services: NodeServices,
    read_only: bool,
    state: Mutex<MemState>,
    stats: Arc<MemStats>,
}

impl MemoryVolume {
    fn writable(&self) -> VfsResult<()> {
        if self.read_only {
            return Err(VfsError::ReadOnly);
        }
        Ok(())
    }

    /// Hand a node whose last link is gone to the cache for destruction.
    ///
    /// Must be called without the state lock held: loading the vnode may
    /// call back into `read_vnode`, and the final put may call `remove_vnode`.
    ///
    /// If the vnode cannot be loaded and none is cached, nothing can reach
    /// the node any more, so it is freed here instead.
    fn release_unlinked(&self, id: NodeId) -> VfsResult<()> {
        if let Err(e) = self.services.get_vnode(id) {
            if self.services.is_cached(id)? {
                return Err(e);
            }
            debug!("memfs {}: freeing unlinked node {} directly: {}", self.ns, id, e);
            self.state.lock().nodes.remove(&id);
            self.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let marked = self.services.mark_for_removal(id);
        self.services.put_vnode(id)?;
        marked
    }
}

impl Volume for MemoryVolume {
    fn unmount(&self) -> VfsResult<()> {
        debug!("memfs {} unmounted with {} nodes", self.ns, self.state.lock().nodes.len());
        Ok(())
    }

    fn read_vnode(&self, node: NodeId, _reentrant: bool) -> VfsResult<NodeData> {
        self.state.lock().node(node)?;
        self.stats.read_vnode.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemVnode { id: node }))
    }

    fn write_vnode(&self, _node: &NodeData, _reentrant: bool) -> VfsResult<()> {
        self.stats.write_vnode.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn remove_vnode(&self, node: &NodeData, _reentrant: bool) -> VfsResult<()> {
        let id = id_of(node)?;
        let mut state = self.state.lock();
        if state.nodes.remove(&id).is_none() {
            warn!("memfs {}: removing unknown node {}", self.ns, id);
        }
        self.stats.remove_vnode.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn walk(&self, dir: &NodeData, name: &str) -> VfsResult<Walked> {
        let dir = id_of(dir)?;
        let state = self.state.lock();
        let id = match name {
            "." => {
                state.entries(dir)?;
                dir
            }
            ".." => {
                state.entries(dir)?;
                state.node(dir)?.parent
            }
            _ => state.lookup(dir, name)?,
        };
        match &state.node(id)?.body {
            Body::Symlink(target) => Ok(Walked::Link {
                node: id,
                target: target.clone(),
            }),
            _ => Ok(Walked::Node(id)),
        }
    }

    fn create(
        &self,
        dir: &NodeData,
        name: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<Created> {
        self.writable()?;
        check_name(name)?;
        let dir = id_of(dir)?;
        let mut state = self.state.lock();

        if let Some(&existing) = state.entries(dir)?.get(name) {
            if flags.exclusive {
                return Err(VfsError::already_exists(name.to_string()));
            }
            let node = state.node_mut(existing)?;
            match &mut node.body {
                Body::File(data) => {
                    if flags.truncate {
                        data.clear();
                        node.touch();
                    }
                }
                Body::Directory(_) => return Err(VfsError::is_a_directory(name.to_string())),
                Body::Symlink(_) => return Err(VfsError::already_exists(name.to_string())),
            }
            return Ok(Created {
                node: existing,
                cookie: Box::new(FileCookie { flags }),
                created: false,
            });
        }

        let node = state.insert(dir, name, Body::File(Vec::new()), perm)?;
        Ok(Created {
            node,
            cookie: Box::new(FileCookie { flags }),
            created: true,
        })
    }

    fn mkdir(&self, dir: &NodeData, name: &str, perm: u32) -> VfsResult<()> {
        self.writable()?;
        check_name(name)?;
        let dir = id_of(dir)?;
        self.state
            .lock()
            .insert(dir, name, Body::Directory(BTreeMap::new()), perm)?;
        Ok(())
    }

    fn symlink(&self, dir: &NodeData, name: &str, target: &str) -> VfsResult<()> {
        self.writable()?;
        check_name(name)?;
        let dir = id_of(dir)?;
        self.state
            .lock()
            .insert(dir, name, Body::Symlink(target.to_string()), 0o777)?;
        Ok(())
    }

    fn link(&self, dir: &NodeData, name: &str, node: &NodeData) -> VfsResult<()> {
        self.writable()?;
        check_name(name)?;
        let (dir, target) = (id_of(dir)?, id_of(node)?);
        let mut state = self.state.lock();
        if state.node(target)?.kind().is_dir() {
            return Err(VfsError::permission_denied(format!("hard link to directory {}", target)));
        }
        let entries = state.entries_mut(dir)?;
        if entries.contains_key(name) {
            return Err(VfsError::already_exists(name.to_string()));
        }
        entries.insert(name.to_string(), target);
        let node = state.node_mut(target)?;
        node.nlink += 1;
        node.ctime = SystemTime::now();
        Ok(())
    }

    fn rename(
        &self,
        old_dir: &NodeData,
        old_name: &str,
        new_dir: &NodeData,
        new_name: &str,
    ) -> VfsResult<()> {
        self.writable()?;
        check_name(old_name).map_err(|_| VfsError::invalid_argument(old_name.to_string()))?;
        check_name(new_name).map_err(|_| VfsError::invalid_argument(new_name.to_string()))?;
        let (old_dir, new_dir) = (id_of(old_dir)?, id_of(new_dir)?);

        let unlinked = {
            let mut state = self.state.lock();
            let source = state.lookup(old_dir, old_name)?;
            let source_is_dir = state.node(source)?.kind().is_dir();
            if source_is_dir && state.is_ancestor(source, new_dir)? {
                return Err(VfsError::invalid_argument(format!(
                    "cannot move {} into itself",
                    old_name
                )));
            }

            let mut unlinked = None;
            if let Some(&dest) = state.entries(new_dir)?.get(new_name) {
                if dest == source {
                    return Ok(());
                }
                match (source_is_dir, &state.node(dest)?.body) {
                    (true, Body::Directory(entries)) if !entries.is_empty() => {
                        return Err(VfsError::directory_not_empty(new_name.to_string()));
                    }
                    (true, Body::Directory(_)) => {
                        state.node_mut(new_dir)?.nlink -= 1;
                        state.node_mut(dest)?.nlink = 1;
                    }
                    (true, _) => return Err(VfsError::not_a_directory(new_name.to_string())),
                    (false, Body::Directory(_)) => {
                        return Err(VfsError::is_a_directory(new_name.to_string()));
                    }
                    (false, _) => {}
                }
                if state.drop_link(dest)? {
                    unlinked = Some(dest);
                }
            }

            state.entries_mut(old_dir)?.remove(old_name);
            state.entries_mut(new_dir)?.insert(new_name.to_string(), source);
            if source_is_dir && old_dir != new_dir {
                state.node_mut(source)?.parent = new_dir;
                state.node_mut(old_dir)?.nlink -= 1;
                state.node_mut(new_dir)?.nlink += 1;
            }
            state.node_mut(old_dir)?.touch();
            state.node_mut(new_dir)?.touch();
            unlinked
        };

        if let Some(id) = unlinked {
            self.release_unlinked(id)?;
        }
        Ok(())
    }

    fn unlink(&self, dir: &NodeData, name: &str) -> VfsResult<()> {
        self.writable()?;
        let dir = id_of(dir)?;
        let last = {
            let mut state = self.state.lock();
            let id = state.lookup(dir, name)?;
            if state.node(id)?.kind().is_dir() {
                return Err(VfsError::is_a_directory(name.to_string()));
            }
            state.entries_mut(dir)?.remove(name);
            state.node_mut(dir)?.touch();
            state.drop_link(id)?.then_some(id)
        };
        if let Some(id) = last {
            self.release_unlinked(id)?;
        }
        Ok(())
    }

    fn rmdir(&self, dir: &NodeData, name: &str) -> VfsResult<()> {
        self.writable()?;
        if name == "." || name == ".." {
            return Err(VfsError::invalid_argument(format!("cannot remove {:?}", name)));
        }
        let dir = id_of(dir)?;
        let id = {
            let mut state = self.state.lock();
            let id = state.lookup(dir, name)?;
            match &state.node(id)?.body {
                Body::Directory(entries) if !entries.is_empty() => {
                    return Err(VfsError::directory_not_empty(name.to_string()));
                }
                Body::Directory(_) => {}
                _ => return Err(VfsError::not_a_directory(name.to_string())),
            }
            state.entries_mut(dir)?.remove(name);
            let parent = state.node_mut(dir)?;
            parent.nlink -= 1;
            parent.touch();
            state.node_mut(id)?.nlink = 0;
            id
        };
        self.release_unlinked(id)
    }

    fn readlink(&self, node: &NodeData) -> VfsResult<String> {
        let id = id_of(node)?;
        match &self.state.lock().node(id)?.body {
            Body::Symlink(target) => Ok(target.clone()),
            _ => Err(VfsError::NotASymlink(format!("node {}", id))),
        }
    }

    fn open(&self, node: &NodeData, flags: OpenFlags) -> VfsResult<Cookie> {
        if flags.writes() {
            self.writable()?;
        }
        let id = id_of(node)?;
        let mut state = self.state.lock();
        let node = state.node_mut(id)?;
        match &mut node.body {
            Body::Directory(_) if flags.writes() => {
                return Err(VfsError::is_a_directory(format!("node {}", id)));
            }
            Body::File(data) if flags.truncate => {
                data.clear();
                node.touch();
            }
            _ => {}
        }
        Ok(Box::new(FileCookie { flags }))
    }

    fn opendir(&self, node: &NodeData) -> VfsResult<Cookie> {
        self.state.lock().entries(id_of(node)?)?;
        Ok(Box::new(ListCookie::default()))
    }

    fn readdir(&self, node: &NodeData, cookie: &Cookie, max: usize) -> VfsResult<Vec<DirEntry>> {
        let id = id_of(node)?;
        let cookie = list_cookie(cookie)?;
        let state = self.state.lock();
        let dir = state.node(id)?;
        let Body::Directory(entries) = &dir.body else {
            return Err(VfsError::not_a_directory(format!("node {}", id)));
        };

        let dots = [
            DirEntry::new(".", id, FileType::Directory),
            DirEntry::new("..", dir.parent, FileType::Directory),
        ];
        let children = entries.iter().filter_map(|(name, &child)| {
            let kind = state.nodes.get(&child)?.kind();
            Some(DirEntry::new(name.clone(), child, kind))
        });

        let start = cookie.pos.load(Ordering::Acquire);
        let batch: Vec<DirEntry> = dots.into_iter().chain(children).skip(start).take(max).collect();
        cookie.pos.store(start + batch.len(), Ordering::Release);
        Ok(batch)
    }

    fn rewinddir(&self, _node: &NodeData, cookie: &Cookie) -> VfsResult<()> {
        list_cookie(cookie)?.pos.store(0, Ordering::Release);
        Ok(())
    }

    fn open_attr_dir(&self, node: &NodeData) -> VfsResult<Cookie> {
        self.state.lock().node(id_of(node)?)?;
        Ok(Box::new(ListCookie::default()))
    }

    fn read_attr_dir(&self, node: &NodeData, cookie: &Cookie, max: usize) -> VfsResult<Vec<String>> {
        let id = id_of(node)?;
        let cookie = list_cookie(cookie)?;
        let state = self.state.lock();
        let start = cookie.pos.load(Ordering::Acquire);
        let names: Vec<String> = state
            .node(id)?
            .xattrs
            .keys()
            .skip(start)
            .take(max)
            .cloned()
            .collect();
        cookie.pos.store(start + names.len(), Ordering::Release);
        Ok(names)
    }

    fn rewind_attr_dir(&self, _node: &NodeData, cookie: &Cookie) -> VfsResult<()> {
        list_cookie(cookie)?.pos.store(0, Ordering::Release);
        Ok(())
    }

    fn read(&self, node: &NodeData, _cookie: &Cookie, pos: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let id = id_of(node)?;
        let mut state = self.state.lock();
        let node = state.node_mut(id)?;
        let data = match &node.body {
            Body::File(data) => data,
            Body::Directory(_) => return Err(VfsError::is_a_directory(format!("node {}", id))),
            Body::Symlink(_) => {
                return Err(VfsError::invalid_argument(format!("node {} is a symlink", id)));
            }
        };
        let start = usize::try_from(pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        node.atime = SystemTime::now();
        Ok(n)
    }

    fn write(&self, node: &NodeData, cookie: &Cookie, pos: u64, data: &[u8]) -> VfsResult<usize> {
        self.writable()?;
        let id = id_of(node)?;
        let append = cookie
            .downcast_ref::<FileCookie>()
            .is_some_and(|c| c.flags.append);
        let mut state = self.state.lock();
        let node = state.node_mut(id)?;
        let Body::File(contents) = &mut node.body else {
            return Err(VfsError::is_a_directory(format!("node {}", id)));
        };
        let start = if append { contents.len() as u64 } else { pos };
        let range = span(start, data.len())?;
        grow(contents, range.end)?;
        contents[range].copy_from_slice(data);
        node.touch();
        Ok(data.len())
    }

    fn read_attr(&self, node: &NodeData, name: &str, pos: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let id = id_of(node)?;
        let state = self.state.lock();
        let (_, value) = state
            .node(id)?
            .xattrs
            .get(name)
            .ok_or_else(|| VfsError::not_found(name.to_string()))?;
        let start = usize::try_from(pos).unwrap_or(usize::MAX).min(value.len());
        let n = buf.len().min(value.len() - start);
        buf[..n].copy_from_slice(&value[start..start + n]);
        Ok(n)
    }

    fn write_attr(
        &self,
        node: &NodeData,
        name: &str,
        kind: u32,
        pos: u64,
        data: &[u8],
    ) -> VfsResult<usize> {
        self.writable()?;
        let id = id_of(node)?;
        let range = span(pos, data.len())?;
        let mut state = self.state.lock();
        let node = state.node_mut(id)?;
        let (stored_kind, value) = node.xattrs.entry(name.to_string()).or_default();
        grow(value, range.end)?;
        *stored_kind = kind;
        value[range].copy_from_slice(data);
        node.ctime = SystemTime::now();
        Ok(data.len())
    }

    fn remove_attr(&self, node: &NodeData, name: &str) -> VfsResult<()> {
        self.writable()?;
        let id = id_of(node)?;
        let mut state = self.state.lock();
        state
            .node_mut(id)?
            .xattrs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VfsError::not_found(name.to_string()))
    }

    fn stat_attr(&self, node: &NodeData, name: &str) -> VfsResult<AttrInfo> {
        let id = id_of(node)?;
        let state = self.state.lock();
        state
            .node(id)?
            .xattrs
            .get(name)
            .map(|(kind, value)| AttrInfo {
                kind: *kind,
                size: value.len() as u64,
            })
            .ok_or_else(|| VfsError::not_found(name.to_string()))
    }

    fn ioctl(&self, node: &NodeData, _cookie: &Cookie, op: u32, buf: &mut [u8]) -> VfsResult<usize> {
        match op {
            MEMFS_IOCTL_NODE_ID => {
                let bytes = id_of(node)?.to_le_bytes();
                let out = buf
                    .get_mut(..bytes.len())
                    .ok_or_else(|| VfsError::invalid_argument("ioctl buffer too small"))?;
                out.copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            _ => Err(VfsError::invalid_argument(format!("unknown ioctl {:#x}", op))),
        }
    }

    fn rstat(&self, node: &NodeData) -> VfsResult<FileAttr> {
        let id = id_of(node)?;
        let state = self.state.lock();
        let node = state.node(id)?;
        let mut attr = FileAttr::new(self.ns, id, node.kind(), node.perm);
        attr.size = node.size();
        attr.nlink = node.nlink;
        attr.mtime = node.mtime;
        attr.atime = Some(node.atime);
        attr.ctime = Some(node.ctime);
        attr.uid = node.uid;
        attr.gid = node.gid;
        Ok(attr)
    }

    fn wstat(&self, node: &NodeData, attr: &SetAttr) -> VfsResult<()> {
        self.writable()?;
        let id = id_of(node)?;
        let mut state = self.state.lock();
        let node = state.node_mut(id)?;
        if let Some(size) = attr.size {
            let Body::File(data) = &mut node.body else {
                return Err(VfsError::is_a_directory(format!("node {}", id)));
            };
            let size = span(size, 0)?.end;
            data.truncate(size);
            grow(data, size)?;
            node.touch();
        }
        if let Some(perm) = attr.perm {
            node.perm = perm;
        }
        if let Some(mtime) = attr.mtime {
            node.mtime = mtime;
        }
        if let Some(atime) = attr.atime {
            node.atime = atime;
        }
        if attr.uid.is_some() {
            node.uid = attr.uid;
        }
        if attr.gid.is_some() {
            node.gid = attr.gid;
        }
        node.ctime = SystemTime::now();
        Ok(())
    }
}
