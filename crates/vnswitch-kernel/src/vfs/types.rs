//! Core VFS types.
//!
//! Identity types for namespaces and nodes, plus the attribute, entry and
//! flag types exchanged between the switch, its callers and backends.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::error::VfsResult;

/// Backend-assigned node identifier, opaque to the switch.
pub type NodeId = u64;

/// Backend-private per-node data, returned by `read_vnode`.
pub type NodeData = Arc<dyn Any + Send + Sync>;

/// Backend-private cookie for an open file, directory or attribute directory.
pub type Cookie = Box<dyn Any + Send + Sync>;

/// Identifier of one mounted filesystem instance.
///
/// Ids are allocated monotonically and never reused, so a stale id held
/// after unmount fails lookup instead of aliasing a newer namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespaceId(pub u32);

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns{}", self.0)
    }
}

/// Cache-wide identity of a vnode: `(namespace, node)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VnodeKey {
    pub ns: NamespaceId,
    pub node: NodeId,
}

impl VnodeKey {
    pub fn new(ns: NamespaceId, node: NodeId) -> Self {
        Self { ns, node }
    }
}

impl fmt::Display for VnodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns, self.node)
    }
}

/// Identity of the storage resource behind a mount.
///
/// Two mounts with the same device identity are refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub dev: u64,
    pub ino: u64,
}

impl DeviceId {
    /// Derive the identity of a device path.
    #[cfg(unix)]
    pub fn of(path: &Path) -> VfsResult<Self> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Derive the identity of a device path.
    #[cfg(not(unix))]
    pub fn of(path: &Path) -> VfsResult<Self> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let canonical = dunce::canonicalize(path)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(Self {
            dev: 0,
            ino: hasher.finish(),
        })
    }
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

/// File attributes (metadata), as returned by `rstat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    /// Namespace the node lives in.
    pub namespace: NamespaceId,
    /// Backend node id.
    pub node: NodeId,
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions (e.g., 0o644).
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time (optional).
    pub atime: Option<SystemTime>,
    /// Creation time (optional).
    pub ctime: Option<SystemTime>,
    /// Number of hard links.
    pub nlink: u32,
    /// User ID (optional).
    pub uid: Option<u32>,
    /// Group ID (optional).
    pub gid: Option<u32>,
}

impl FileAttr {
    /// Attributes of a fresh node of the given kind.
    pub fn new(namespace: NamespaceId, node: NodeId, kind: FileType, perm: u32) -> Self {
        let now = SystemTime::now();
        Self {
            namespace,
            node,
            size: 0,
            kind,
            perm,
            mtime: now,
            atime: Some(now),
            ctime: Some(now),
            nlink: if kind.is_dir() { 2 } else { 1 }, // . and ..
            uid: None,
            gid: None,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Node the entry refers to.
    pub node: NodeId,
    /// Entry type.
    pub kind: FileType,
    /// Set when `node` belongs to another namespace than the directory
    /// listed, as for `..` at the root of a mount.
    #[serde(default)]
    pub namespace: Option<NamespaceId>,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, node: NodeId, kind: FileType) -> Self {
        Self {
            name: name.into(),
            node,
            kind,
            namespace: None,
        }
    }
}

/// Attributes to set (for `wstat`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetAttr {
    /// New size (truncate/extend).
    pub size: Option<u64>,
    /// New modification time.
    pub mtime: Option<SystemTime>,
    /// New access time.
    pub atime: Option<SystemTime>,
    /// New permissions.
    pub perm: Option<u32>,
    /// New user ID.
    pub uid: Option<u32>,
    /// New group ID.
    pub gid: Option<u32>,
}

impl SetAttr {
    /// Create a new empty SetAttr.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Set permissions.
    pub fn with_perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }
}

/// Metadata of one extended attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrInfo {
    /// Backend-defined type code.
    pub kind: u32,
    /// Size in bytes.
    pub size: u64,
}

/// Flags passed to `mount`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountFlags {
    /// Refuse every mutating operation.
    pub read_only: bool,
}

impl MountFlags {
    /// Read-only mount.
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
    /// Do not follow a terminal symbolic link.
    pub no_traverse: bool,
    /// Close the descriptor on `exec_cleanup`.
    pub close_on_exec: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
            no_traverse: false,
            close_on_exec: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Append-only writes.
    pub fn append() -> Self {
        Self {
            read: true,
            write: true,
            append: true,
            ..Default::default()
        }
    }

    /// Same flags, but a terminal symlink is opened rather than followed.
    pub fn no_traverse(mut self) -> Self {
        self.no_traverse = true;
        self
    }

    /// Same flags, with close-on-exec set on the new descriptor.
    pub fn close_on_exec(mut self) -> Self {
        self.close_on_exec = true;
        self
    }

    /// Returns true if the open may modify the node.
    pub fn writes(&self) -> bool {
        self.write || self.append || self.truncate
    }
}
