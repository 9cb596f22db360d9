//! Filesystem backends.
//!
//! Backends implement [`FileSystem`](super::FileSystem) and
//! [`Volume`](super::Volume).

mod memory;

pub use memory::{MEMFS_IOCTL_NODE_ID, MemStats, MemoryFs, MemoryVolume};
