//! Virtual filesystem switch.
//!
//! Multiplexes calls across mounted filesystem instances. Key components:
//!
//! - [`KeyedStore`](keyed_store::KeyedStore) - ordered map under the vnode cache
//! - [`FsRegistry`] - reference-counted table of filesystem modules
//! - [`VnodeCache`] - bounded arena of in-memory nodes with eviction
//! - [`NamespaceRegistry`] - mounted instances and their mount points
//! - [`Resolver`] - path walking across symlinks and mounts
//! - [`IoContext`] - working directory plus descriptor table
//! - [`Switch`] - the POSIX-shaped call surface over all of the above
//!
//! ## Design Decisions
//!
//! - **Node ids, not paths**: backends resolve one component at a time and
//!   identify nodes by an opaque 64-bit id. The switch owns caching.
//! - **Guards for references**: a [`Vnode`] or pinned [`OpenFile`] releases
//!   its reference when dropped, so every exit path is balanced.
//! - **No lock across backend calls**: the cache marks a vnode busy and
//!   releases its lock while loading, flushing or destroying it.

pub mod backends;
mod cache;
mod error;
mod fd;
pub mod keyed_store;
mod mount;
mod ops;
mod registry;
mod resolve;
mod switch;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use cache::{CacheStats, NodeServices, Residency, Vnode, VnodeCache};
pub use error::{VfsError, VfsResult};
pub use fd::{DescriptorTable, Fd, IoContext, OfileKind, OpenFile};
pub use mount::{MountInfo, MountRequest, Namespace, NamespaceRegistry, NamespaceTable};
pub use ops::{Created, FileSystem, MountContext, Mounted, Volume, Walked};
pub use registry::{FsHandle, FsLoader, FsRegistry};
pub use resolve::{Limits, Resolver};
pub use switch::{At, Switch};
pub use types::{
    AttrInfo, Cookie, DeviceId, DirEntry, FileAttr, FileType, MountFlags, NamespaceId, NodeData,
    NodeId, OpenFlags, SetAttr, VnodeKey,
};
