//! Open files, descriptor tables and I/O contexts.
//!
//! An [`OpenFile`] carries two counts. The open count is the number of
//! descriptor slots naming it and drives the backend `close`; the reference
//! count is the `Arc` strong count (slots plus in-flight operations) and
//! drives `free_cookie` and the vnode release when the last `Arc` drops.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use strum::Display;
use tracing::{debug, warn};

use super::cache::Vnode;
use super::types::{Cookie, OpenFlags};
use super::{VfsError, VfsResult};

/// Descriptor number.
pub type Fd = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OfileKind {
    File,
    Directory,
    AttributeDirectory,
    WorkingDirectory,
}

/// An open instance of a vnode.
pub struct OpenFile {
    kind: OfileKind,
    vnode: Vnode,
    /// `None` only for working-directory handles.
    cookie: Option<Cookie>,
    pos: Mutex<u64>,
    flags: OpenFlags,
    open_count: AtomicUsize,
}

impl OpenFile {
    /// Wrap a freshly opened handle. The caller owns one open count, which
    /// `DescriptorTable::new_fd` consumes.
    pub fn new(kind: OfileKind, vnode: Vnode, cookie: Option<Cookie>, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            kind,
            vnode,
            cookie,
            pos: Mutex::new(0),
            flags,
            open_count: AtomicUsize::new(1),
        })
    }

    pub fn kind(&self) -> OfileKind {
        self.kind
    }

    pub fn vnode(&self) -> &Vnode {
        &self.vnode
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn cookie(&self) -> VfsResult<&Cookie> {
        self.cookie
            .as_ref()
            .ok_or_else(|| VfsError::invalid_argument(format!("{} handle has no cookie", self.kind)))
    }

    pub fn pos(&self) -> u64 {
        *self.pos.lock()
    }

    pub fn set_pos(&self, pos: u64) {
        *self.pos.lock() = pos;
    }

    /// Run `f` with the position locked, storing what it returns.
    pub fn with_pos<T>(&self, f: impl FnOnce(u64) -> VfsResult<(T, u64)>) -> VfsResult<T> {
        let mut pos = self.pos.lock();
        let (value, next) = f(*pos)?;
        *pos = next;
        Ok(value)
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    fn add_open(&self) {
        self.open_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one open count; the last one closes the backend handle.
    fn put_open(&self) {
        if self.open_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let Some(cookie) = self.cookie.as_ref() else {
            return;
        };
        let (volume, data) = (self.vnode.volume(), self.vnode.data());
        let closed = match self.kind {
            OfileKind::File => volume.close(data, cookie),
            OfileKind::Directory => volume.closedir(data, cookie),
            OfileKind::AttributeDirectory => volume.close_attr_dir(data, cookie),
            OfileKind::WorkingDirectory => Ok(()),
        };
        if let Err(e) = closed {
            warn!("close of {} handle on {} failed: {}", self.kind, self.vnode.key(), e);
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        let Some(cookie) = self.cookie.take() else {
            return;
        };
        let (volume, data) = (self.vnode.volume(), self.vnode.data());
        let freed = match self.kind {
            OfileKind::File => volume.free_cookie(data, cookie),
            OfileKind::Directory => volume.free_dircookie(data, cookie),
            OfileKind::AttributeDirectory => volume.free_attr_dir_cookie(data, cookie),
            OfileKind::WorkingDirectory => Ok(()),
        };
        if let Err(e) = freed {
            warn!("freeing {} cookie on {} failed: {}", self.kind, self.vnode.key(), e);
        }
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("kind", &self.kind)
            .field("vnode", &self.vnode.key())
            .field("pos", &self.pos())
            .field("open_count", &self.open_count())
            .finish()
    }
}

#[derive(Clone)]
struct FdSlot {
    file: Arc<OpenFile>,
    close_on_exec: bool,
}

/// Fixed-size table of descriptor slots.
pub struct DescriptorTable {
    slots: Mutex<Vec<Option<FdSlot>>>,
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("DescriptorTable")
            .field("capacity", &slots.len())
            .field("open", &slots.iter().flatten().count())
            .finish()
    }
}

impl DescriptorTable {
    /// Table of `capacity` slots, at most `Fd::MAX` of them.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(Fd::MAX as usize);
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    fn index(slots: &[Option<FdSlot>], fd: Fd) -> VfsResult<usize> {
        usize::try_from(fd)
            .ok()
            .filter(|&i| i < slots.len())
            .ok_or(VfsError::BadDescriptor(fd))
    }

    /// Install `file`, consuming one open count held by the caller.
    ///
    /// With `requested` set, that slot is used and any previous occupant is
    /// closed after the new one is installed. Otherwise the lowest free slot
    /// is taken.
    pub fn new_fd(
        &self,
        file: Arc<OpenFile>,
        requested: Option<Fd>,
        close_on_exec: bool,
    ) -> VfsResult<Fd> {
        let mut slots = self.slots.lock();
        let idx = match requested {
            Some(fd) => Self::index(&slots, fd),
            None => slots
                .iter()
                .position(Option::is_none)
                .ok_or(VfsError::TooManyOpenFiles),
        };
        let idx = match idx {
            Ok(idx) => idx,
            Err(e) => {
                drop(slots);
                file.put_open();
                return Err(e);
            }
        };
        let previous = slots[idx].replace(FdSlot {
            file,
            close_on_exec,
        });
        drop(slots);

        if let Some(previous) = previous {
            previous.file.put_open();
        }
        // Capacity is clamped to Fd::MAX, so every index fits.
        Ok(idx as Fd)
    }

    /// Close a descriptor, optionally requiring a handle kind.
    pub fn remove_fd(&self, fd: Fd, kind: Option<OfileKind>) -> VfsResult<()> {
        let mut slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        match &slots[idx] {
            Some(slot) if kind.is_none_or(|k| slot.file.kind == k) => {}
            _ => return Err(VfsError::BadDescriptor(fd)),
        }
        let removed = slots[idx].take();
        drop(slots);

        if let Some(slot) = removed {
            slot.file.put_open();
            debug!("closed fd {} ({})", fd, slot.file.kind);
        }
        Ok(())
    }

    /// Pin the handle behind a descriptor for one operation. Dropping the
    /// returned `Arc` unpins it.
    pub fn get_fd(&self, fd: Fd, kind: Option<OfileKind>) -> VfsResult<Arc<OpenFile>> {
        let slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        match &slots[idx] {
            Some(slot) if kind.is_none_or(|k| slot.file.kind == k) => Ok(Arc::clone(&slot.file)),
            _ => Err(VfsError::BadDescriptor(fd)),
        }
    }

    /// Duplicate into the lowest free slot. The copy is not close-on-exec.
    pub fn dup(&self, fd: Fd) -> VfsResult<Fd> {
        let file = self.get_fd(fd, None)?;
        file.add_open();
        self.new_fd(file, None, false)
    }

    /// Duplicate into slot `new`, closing whatever was there.
    pub fn dup2(&self, old: Fd, new: Fd) -> VfsResult<Fd> {
        let file = self.get_fd(old, None)?;
        if old == new {
            return Ok(new);
        }
        file.add_open();
        self.new_fd(file, Some(new), false)
    }

    pub fn set_close_on_exec(&self, fd: Fd, close_on_exec: bool) -> VfsResult<()> {
        let mut slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        let slot = slots[idx].as_mut().ok_or(VfsError::BadDescriptor(fd))?;
        slot.close_on_exec = close_on_exec;
        Ok(())
    }

    pub fn close_on_exec(&self, fd: Fd) -> VfsResult<bool> {
        let slots = self.slots.lock();
        let idx = Self::index(&slots, fd)?;
        slots[idx]
            .as_ref()
            .map(|slot| slot.close_on_exec)
            .ok_or(VfsError::BadDescriptor(fd))
    }

    /// Copy every slot into a new table, sharing the open files.
    pub fn fork(&self) -> Self {
        let slots = self.slots.lock().clone();
        for slot in slots.iter().flatten() {
            slot.file.add_open();
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Close every close-on-exec descriptor.
    pub fn exec_cleanup(&self) {
        let mut doomed = Vec::new();
        for slot in self.slots.lock().iter_mut() {
            if slot.as_ref().is_some_and(|s| s.close_on_exec) {
                doomed.extend(slot.take());
            }
        }

        for slot in doomed {
            slot.file.put_open();
        }
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().drain(..).flatten() {
            slot.file.put_open();
        }
    }
}

/// Per-caller session state: working directory and descriptor table.
pub struct IoContext {
    cwd: Mutex<Vnode>,
    fds: DescriptorTable,
}

impl fmt::Debug for IoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoContext")
            .field("cwd", &self.cwd.lock().key())
            .field("fds", &self.fds)
            .finish()
    }
}

impl IoContext {
    pub fn new(cwd: Vnode, max_fds: usize) -> Self {
        Self {
            cwd: Mutex::new(cwd),
            fds: DescriptorTable::new(max_fds),
        }
    }

    /// Child context inheriting the working directory and every descriptor.
    pub fn fork(&self) -> Self {
        Self {
            cwd: Mutex::new(self.cwd()),
            fds: self.fds.fork(),
        }
    }

    pub fn cwd(&self) -> Vnode {
        self.cwd.lock().clone()
    }

    /// Replace the working directory. The old one is released after the
    /// lock is dropped.
    pub fn set_cwd(&self, vnode: Vnode) {
        let old = std::mem::replace(&mut *self.cwd.lock(), vnode);
        drop(old);
    }

    pub fn fds(&self) -> &DescriptorTable {
        &self.fds
    }

    pub fn exec_cleanup(&self) {
        self.fds.exec_cleanup();
    }
}
