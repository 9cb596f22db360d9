//! # vnswitch-kernel
//!
//! A virtual filesystem switch: a filesystem-independent layer that
//! multiplexes calls across mounted filesystem instances, caches their
//! in-memory nodes, resolves paths and hands out file descriptors.
//!
//! A switch is built from a [`SwitchConfig`], has filesystem modules
//! registered with it, mounts one of them as `/`, and then serves calls
//! on behalf of [`IoContext`]s:
//!
//! ```
//! use std::sync::Arc;
//! use vnswitch_kernel::{At, MemoryFs, MountFlags, OpenFlags, Switch, SwitchConfig};
//!
//! let switch = Switch::new(SwitchConfig::default()).unwrap();
//! switch.register_filesystem("memfs", Arc::new(MemoryFs::new()), true).unwrap();
//! switch.mount_root("memfs", None, MountFlags::default(), None).unwrap();
//!
//! let ctx = switch.new_io_context(None).unwrap();
//! let fd = switch.open(&ctx, At::Cwd, "/hello", OpenFlags::create(), 0o644).unwrap();
//! switch.write(&ctx, fd, b"hi").unwrap();
//! switch.close(&ctx, fd).unwrap();
//! assert_eq!(switch.rstat(&ctx, At::Cwd, "/hello", true).unwrap().size, 2);
//! ```

pub mod config;
pub mod vfs;

pub use config::{CacheConfig, ConfigError, SwitchConfig};
pub use vfs::{
    At, CacheStats, DirEntry, Fd, FileAttr, FileSystem, FileType, IoContext, MountFlags,
    NamespaceId, OpenFlags, SetAttr, Switch, VfsError, VfsResult, Volume,
    backends::{MEMFS_IOCTL_NODE_ID, MemoryFs},
};
