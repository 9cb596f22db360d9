//! Vnode cache.
//!
//! Owns every in-memory node in a fixed arena of slots. Each slot is in
//! exactly one residency state:
//!
//! - **Free**: unused, on the free list.
//! - **Cached**: loaded, unreferenced, evictable oldest-first.
//! - **Active**: referenced at least once.
//!
//! A slot whose `busy` flag is set is being loaded, flushed or destroyed.
//! Backend calls run with the cache lock released; the busy flag keeps other
//! threads off the slot and they wait on the cache condvar until it clears.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use strum::Display;
use tracing::{debug, error, warn};

use super::keyed_store::{Duplicates, KeyedStore};
use super::mount::{Namespace, NamespaceTable};
use super::ops::Volume;
use super::types::{NamespaceId, NodeData, NodeId, VnodeKey};
use super::{VfsError, VfsResult};
use crate::config::CacheConfig;

/// Residency state of a vnode slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Residency {
    #[default]
    Free,
    Cached,
    Active,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub free: usize,
    pub cached: usize,
    pub active: usize,
    /// Successful `read_vnode` calls.
    pub loads: u64,
    /// Cached vnodes flushed and reclaimed.
    pub evictions: u64,
}

#[derive(Default)]
struct Slot {
    key: Option<VnodeKey>,
    data: Option<NodeData>,
    state: Residency,
    refs: u32,
    busy: bool,
    remove_pending: bool,
    /// Non-owning back-reference to a namespace mounted on this vnode.
    mounted: Option<NamespaceId>,
    /// Position in the Cached list.
    cached_at: u64,
}

struct CacheInner {
    slots: Vec<Slot>,
    store: KeyedStore<VnodeKey, usize>,
    free: VecDeque<usize>,
    /// Cached slots keyed by the tick they were parked at; oldest first.
    cached: BTreeMap<u64, usize>,
    tick: u64,
    active: usize,
    loads: u64,
    evictions: u64,
}

impl CacheInner {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            store: KeyedStore::new(Duplicates::Reject),
            free: (0..capacity).collect(),
            cached: BTreeMap::new(),
            tick: 0,
            active: 0,
            loads: 0,
            evictions: 0,
        }
    }

    /// Bind a free slot to `key` as a busy, singly referenced vnode.
    fn claim(&mut self, slot: usize, key: VnodeKey) -> VfsResult<()> {
        if self.store.insert(key, slot).is_err() {
            self.free.push_front(slot);
            return Err(VfsError::other(format!("vnode {} already cached", key)));
        }
        self.slots[slot] = Slot {
            key: Some(key),
            state: Residency::Active,
            refs: 1,
            busy: true,
            ..Slot::default()
        };
        self.active += 1;
        Ok(())
    }

    /// Take a reference on an idle slot.
    fn pin(&mut self, slot: usize) -> VfsResult<NodeData> {
        let s = &mut self.slots[slot];
        let data = s
            .data
            .clone()
            .ok_or_else(|| VfsError::other(format!("vnode slot {} has no data", slot)))?;
        s.refs += 1;
        if s.state == Residency::Cached {
            let cached_at = s.cached_at;
            s.state = Residency::Active;
            self.cached.remove(&cached_at);
            self.active += 1;
        }
        Ok(data)
    }

    /// Append an unreferenced slot to the Cached list.
    fn park(&mut self, slot: usize) {
        self.tick += 1;
        let s = &mut self.slots[slot];
        s.state = Residency::Cached;
        s.cached_at = self.tick;
        self.cached.insert(self.tick, slot);
    }

    /// Forget a slot's identity and return it to the free list.
    fn discard(&mut self, slot: usize) {
        if let Some(key) = self.slots[slot].key.take() {
            self.store.delete(&key);
        }
        self.slots[slot] = Slot::default();
        self.free.push_back(slot);
    }

    fn lookup(&self, key: &VnodeKey) -> VfsResult<usize> {
        self.store
            .find(key)
            .copied()
            .ok_or_else(|| VfsError::not_found(format!("vnode {}", key)))
    }
}

fn namespace_range(ns: NamespaceId) -> RangeInclusive<VnodeKey> {
    VnodeKey::new(ns, NodeId::MIN)..=VnodeKey::new(ns, NodeId::MAX)
}

/// The vnode cache.
pub struct VnodeCache {
    inner: Mutex<CacheInner>,
    /// Notified whenever a busy flag clears.
    idle: Condvar,
    namespaces: Arc<NamespaceTable>,
    max_cached: usize,
}

impl fmt::Debug for VnodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VnodeCache")
            .field("stats", &self.stats())
            .field("max_cached", &self.max_cached)
            .finish()
    }
}

impl VnodeCache {
    pub fn new(config: &CacheConfig, namespaces: Arc<NamespaceTable>) -> Self {
        Self {
            inner: Mutex::new(CacheInner::with_capacity(config.slots)),
            idle: Condvar::new(),
            namespaces,
            max_cached: config.max_cached(),
        }
    }

    /// Get a referenced vnode, loading it from its backend if needed.
    pub fn get(self: &Arc<Self>, key: VnodeKey) -> VfsResult<Vnode> {
        let (slot, data, volume) = self.acquire(key, false)?;
        Ok(Vnode {
            cache: Arc::clone(self),
            slot,
            key,
            data,
            volume,
        })
    }

    /// Backend-facing services for one namespace.
    pub fn services(self: &Arc<Self>, ns: NamespaceId) -> NodeServices {
        NodeServices {
            ns,
            cache: Arc::downgrade(self),
        }
    }

    pub(crate) fn acquire(
        &self,
        key: VnodeKey,
        reentrant: bool,
    ) -> VfsResult<(usize, NodeData, Arc<dyn Volume>)> {
        let namespace = self
            .namespaces
            .get(key.ns)
            .ok_or_else(|| VfsError::not_found(format!("namespace {}", key.ns)))?;
        let volume = Arc::clone(namespace.volume());

        let mut inner = self.inner.lock();
        let mut failed_flushes = 0;
        let slot = loop {
            if namespace.is_shutting_down() {
                return Err(VfsError::busy(format!("{} is unmounting", key.ns)));
            }
            let found = inner.store.find(&key).copied();
            if let Some(slot) = found {
                if inner.slots[slot].busy {
                    self.idle.wait(&mut inner);
                    continue;
                }
                let data = inner.pin(slot)?;
                return Ok((slot, data, volume));
            }
            if let Some(slot) = inner.free.pop_front() {
                inner.claim(slot, key)?;
                break slot;
            }
            if inner.cached.is_empty() || failed_flushes > inner.cached.len() {
                error!(
                    "vnode cache exhausted: {} of {} slots active",
                    inner.active,
                    inner.slots.len()
                );
                return Err(VfsError::out_of_memory(format!("no vnode slot for {}", key)));
            }
            if !self.evict_oldest(&mut inner) {
                failed_flushes += 1;
            }
        };

        debug!("loading vnode {}", key);
        let loaded = MutexGuard::unlocked(&mut inner, || volume.read_vnode(key.node, reentrant));
        let result = match loaded {
            Ok(data) => {
                inner.slots[slot].data = Some(Arc::clone(&data));
                inner.slots[slot].busy = false;
                inner.loads += 1;
                Ok((slot, data, volume))
            }
            Err(e) => {
                inner.active -= 1;
                inner.discard(slot);
                Err(e)
            }
        };
        self.idle.notify_all();
        result
    }

    /// Drop one reference on a slot.
    pub(crate) fn release(&self, slot: usize, reentrant: bool) {
        let mut inner = self.inner.lock();
        let s = &mut inner.slots[slot];
        if s.refs == 0 || s.busy {
            error!("vnode slot {} released while unreferenced or busy", slot);
            return;
        }
        s.refs -= 1;
        if s.refs > 0 {
            return;
        }
        let remove = s.remove_pending;
        inner.active -= 1;

        if remove {
            self.destroy(&mut inner, slot, reentrant);
            return;
        }
        inner.park(slot);
        while inner.cached.len() > self.max_cached {
            if !self.evict_oldest(&mut inner) {
                break;
            }
        }
    }

    pub(crate) fn release_key(&self, key: VnodeKey, reentrant: bool) -> VfsResult<()> {
        let slot = self.inner.lock().lookup(&key)?;
        self.release(slot, reentrant);
        Ok(())
    }

    fn dup(&self, slot: usize) {
        self.inner.lock().slots[slot].refs += 1;
    }

    /// Hand an unreferenced, remove-pending slot to the backend for destruction.
    fn destroy(&self, inner: &mut MutexGuard<'_, CacheInner>, slot: usize, reentrant: bool) {
        let s = &mut inner.slots[slot];
        s.busy = true;
        s.state = Residency::Free;
        let target = s.key.zip(s.data.clone());

        if let Some((key, data)) = target {
            if let Some(namespace) = self.namespaces.get(key.ns) {
                let volume = Arc::clone(namespace.volume());
                let removed = MutexGuard::unlocked(inner, || volume.remove_vnode(&data, reentrant));
                match removed {
                    Ok(()) => debug!("removed vnode {}", key),
                    Err(e) => warn!("backend failed to remove vnode {}: {}", key, e),
                }
            }
        }
        inner.discard(slot);
        self.idle.notify_all();
    }

    /// Flush the oldest Cached vnode and free its slot.
    ///
    /// Returns false if nothing was freed. A vnode whose write-back fails is
    /// re-queued at the tail of the Cached list.
    fn evict_oldest(&self, inner: &mut MutexGuard<'_, CacheInner>) -> bool {
        let Some((_, slot)) = inner.cached.pop_first() else {
            return false;
        };
        let s = &mut inner.slots[slot];
        s.busy = true;
        s.state = Residency::Free;
        let Some((key, data)) = s.key.zip(s.data.clone()) else {
            error!("cached vnode slot {} has no identity", slot);
            inner.discard(slot);
            return true;
        };

        let flushed = match self.namespaces.get(key.ns) {
            Some(namespace) => {
                let volume = Arc::clone(namespace.volume());
                MutexGuard::unlocked(inner, || volume.write_vnode(&data, false))
            }
            None => Ok(()),
        };

        let freed = match flushed {
            Ok(()) => {
                debug!("evicted vnode {}", key);
                inner.discard(slot);
                inner.evictions += 1;
                true
            }
            Err(e) => {
                error!("write-back of vnode {} failed, keeping it cached: {}", key, e);
                inner.slots[slot].busy = false;
                inner.park(slot);
                false
            }
        };
        self.idle.notify_all();
        freed
    }

    /// Flag a vnode so that its last release destroys it.
    pub fn mark_for_removal(&self, key: VnodeKey) -> VfsResult<()> {
        self.set_remove_pending(key, true)
    }

    pub fn unmark_for_removal(&self, key: VnodeKey) -> VfsResult<()> {
        self.set_remove_pending(key, false)
    }

    pub fn is_marked_for_removal(&self, key: VnodeKey) -> VfsResult<bool> {
        let inner = self.inner.lock();
        let slot = inner.lookup(&key)?;
        Ok(inner.slots[slot].remove_pending)
    }

    fn set_remove_pending(&self, key: VnodeKey, pending: bool) -> VfsResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner.lookup(&key)?;
        inner.slots[slot].remove_pending = pending;
        Ok(())
    }

    pub(crate) fn mounted(&self, slot: usize) -> Option<NamespaceId> {
        self.inner.lock().slots[slot].mounted
    }

    pub(crate) fn set_mounted(&self, slot: usize, ns: Option<NamespaceId>) {
        self.inner.lock().slots[slot].mounted = ns;
    }

    /// Whether `key` occupies a slot, in any residency.
    pub fn is_cached(&self, key: VnodeKey) -> bool {
        self.inner.lock().store.find(&key).is_some()
    }

    /// Namespace mounted on `key`, without loading it. Mount points are
    /// pinned, so an uncached key has nothing mounted on it.
    pub fn mounted_at(&self, key: VnodeKey) -> Option<NamespaceId> {
        let inner = self.inner.lock();
        let slot = inner.store.find(&key).copied()?;
        inner.slots[slot].mounted
    }

    /// Tear down every vnode of a namespace that is about to be unmounted.
    ///
    /// Fails with `Busy` if any vnode is busy or referenced, other than the
    /// single reference the namespace holds on its own root. On success the
    /// namespace is flagged as shutting down, its vnodes are flushed with
    /// `write_vnode` and their slots freed.
    pub(crate) fn retire_namespace(&self, namespace: &Namespace) -> VfsResult<()> {
        let ns = namespace.id();
        let root = VnodeKey::new(ns, namespace.root());

        let mut inner = self.inner.lock();
        let members: Vec<usize> = inner
            .store
            .range(namespace_range(ns))
            .map(|(_, &slot)| slot)
            .collect();
        for &slot in &members {
            let s = &inner.slots[slot];
            let pins = if s.key == Some(root) { 1 } else { 0 };
            if s.busy || s.refs != pins {
                return Err(VfsError::busy(format!("{} has vnodes in use", ns)));
            }
        }
        namespace.set_shutting_down();

        let mut doomed = Vec::with_capacity(members.len());
        for slot in members {
            let (state, cached_at) = (inner.slots[slot].state, inner.slots[slot].cached_at);
            match state {
                Residency::Cached => {
                    inner.cached.remove(&cached_at);
                }
                Residency::Active => inner.active -= 1,
                Residency::Free => {}
            }
            let s = &mut inner.slots[slot];
            s.refs = 0;
            s.busy = true;
            s.state = Residency::Free;
            doomed.push((slot, s.data.clone()));
        }

        let volume = Arc::clone(namespace.volume());
        MutexGuard::unlocked(&mut inner, || {
            for data in doomed.iter().filter_map(|(_, data)| data.as_ref()) {
                if let Err(e) = volume.write_vnode(data, false) {
                    error!("write-back during unmount of {} failed: {}", ns, e);
                }
            }
        });
        for (slot, _) in doomed {
            inner.discard(slot);
        }
        self.idle.notify_all();
        Ok(())
    }

    /// Number of slots bound to vnodes of `ns`.
    pub fn namespace_len(&self, ns: NamespaceId) -> usize {
        self.inner.lock().store.range(namespace_range(ns)).count()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            capacity: inner.slots.len(),
            free: inner.free.len(),
            cached: inner.cached.len(),
            active: inner.active,
            loads: inner.loads,
            evictions: inner.evictions,
        }
    }

    /// Verify the structural invariants, returning a description of the
    /// first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let inner = self.inner.lock();

        let mut seen = HashSet::new();
        for (key, &slot) in inner.store.range(..) {
            if !seen.insert(*key) {
                return Err(format!("vnode {} cached twice", key));
            }
            if inner.slots[slot].key != Some(*key) {
                return Err(format!("store maps {} to slot {} holding another key", key, slot));
            }
        }

        let (mut cached, mut active) = (0, 0);
        for (i, s) in inner.slots.iter().enumerate() {
            match s.state {
                Residency::Cached => cached += 1,
                Residency::Active => active += 1,
                Residency::Free => {}
            }
            if !s.busy && (s.state == Residency::Active) != (s.refs > 0) {
                return Err(format!("slot {} is {} with {} references", i, s.state, s.refs));
            }
            if s.state != Residency::Free && s.key.is_none() {
                return Err(format!("slot {} is {} without a key", i, s.state));
            }
        }
        if cached != inner.cached.len() {
            return Err(format!("{} cached slots but {} listed", cached, inner.cached.len()));
        }
        if active != inner.active {
            return Err(format!("{} active slots but counter says {}", active, inner.active));
        }
        if inner.store.len() + inner.free.len() > inner.slots.len() {
            return Err("more bound and free slots than capacity".to_string());
        }
        Ok(())
    }
}

/// A referenced vnode. Dropping it releases the reference.
pub struct Vnode {
    cache: Arc<VnodeCache>,
    slot: usize,
    key: VnodeKey,
    data: NodeData,
    volume: Arc<dyn Volume>,
}

impl Vnode {
    pub fn key(&self) -> VnodeKey {
        self.key
    }

    pub fn namespace(&self) -> NamespaceId {
        self.key.ns
    }

    pub fn node(&self) -> NodeId {
        self.key.node
    }

    /// Backend-private node data.
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// The volume this vnode belongs to.
    pub fn volume(&self) -> &Arc<dyn Volume> {
        &self.volume
    }

    /// Namespace mounted on this vnode, if any.
    pub fn mounted(&self) -> Option<NamespaceId> {
        self.cache.mounted(self.slot)
    }

    pub(crate) fn set_mounted(&self, ns: Option<NamespaceId>) {
        self.cache.set_mounted(self.slot, ns);
    }

    /// Take an extra reference that outlives this guard; undone by
    /// `VnodeCache::release_key`.
    pub(crate) fn pin(&self) -> VnodeKey {
        self.cache.dup(self.slot);
        self.key
    }
}

impl Clone for Vnode {
    fn clone(&self) -> Self {
        self.cache.dup(self.slot);
        Self {
            cache: Arc::clone(&self.cache),
            slot: self.slot,
            key: self.key,
            data: Arc::clone(&self.data),
            volume: Arc::clone(&self.volume),
        }
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        self.cache.release(self.slot, false);
    }
}

impl fmt::Debug for Vnode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vnode")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Backend-facing vnode calls for one namespace.
///
/// Lets a backend pin nodes it references internally and flag nodes for
/// removal. Holds only a weak handle on the cache.
#[derive(Clone)]
pub struct NodeServices {
    ns: NamespaceId,
    cache: Weak<VnodeCache>,
}

impl fmt::Debug for NodeServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeServices").field("ns", &self.ns).finish()
    }
}

impl NodeServices {
    pub fn namespace(&self) -> NamespaceId {
        self.ns
    }

    fn cache(&self) -> VfsResult<Arc<VnodeCache>> {
        self.cache
            .upgrade()
            .ok_or_else(|| VfsError::other("vnode cache is gone"))
    }

    /// Pin a node, loading it if needed. Balance with `put_vnode`.
    pub fn get_vnode(&self, node: NodeId) -> VfsResult<NodeData> {
        let (_, data, _) = self.cache()?.acquire(VnodeKey::new(self.ns, node), true)?;
        Ok(data)
    }

    pub fn put_vnode(&self, node: NodeId) -> VfsResult<()> {
        self.cache()?.release_key(VnodeKey::new(self.ns, node), true)
    }

    /// Whether the node has a vnode, loaded or being loaded.
    pub fn is_cached(&self, node: NodeId) -> VfsResult<bool> {
        Ok(self.cache()?.is_cached(VnodeKey::new(self.ns, node)))
    }

    pub fn mark_for_removal(&self, node: NodeId) -> VfsResult<()> {
        self.cache()?.mark_for_removal(VnodeKey::new(self.ns, node))
    }

    pub fn unmark_for_removal(&self, node: NodeId) -> VfsResult<()> {
        self.cache()?.unmark_for_removal(VnodeKey::new(self.ns, node))
    }

    pub fn is_marked_for_removal(&self, node: NodeId) -> VfsResult<bool> {
        self.cache()?.is_marked_for_removal(VnodeKey::new(self.ns, node))
    }
}
