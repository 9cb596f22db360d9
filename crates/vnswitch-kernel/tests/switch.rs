//! End-to-end tests for the call surface.
//!
//! Every test builds a fresh switch with memfs mounted as `/` and drives
//! it through `Switch` calls only, the way a client would.

use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use vnswitch_kernel::vfs::backends::MemStats;
use vnswitch_kernel::{
    At, ConfigError, IoContext, MemoryFs, MountFlags, NamespaceId, OpenFlags, SetAttr, Switch,
    SwitchConfig, VfsError,
};

// ============================================================================
// Shared test setup
// ============================================================================

struct Fixture {
    switch: Switch,
    ctx: IoContext,
    stats: Arc<MemStats>,
}

fn setup() -> Fixture {
    setup_with(SwitchConfig::default())
}

fn setup_with(config: SwitchConfig) -> Fixture {
    let switch = Switch::new(config).expect("valid config");
    let fs = MemoryFs::new();
    let stats = fs.stats();
    switch
        .register_filesystem("memfs", Arc::new(fs), false)
        .expect("register memfs");
    switch
        .mount_root("memfs", None, MountFlags::default(), None)
        .expect("mount root");
    let ctx = switch.new_io_context(None).expect("io context");
    Fixture { switch, ctx, stats }
}

impl Fixture {
    fn write(&self, path: &str, data: &[u8]) {
        let fd = self
            .switch
            .open(&self.ctx, At::Cwd, path, OpenFlags::create_truncate(), 0o644)
            .unwrap();
        self.switch.write(&self.ctx, fd, data).unwrap();
        self.switch.close(&self.ctx, fd).unwrap();
    }

    fn read(&self, path: &str) -> Vec<u8> {
        let fd = self
            .switch
            .open(&self.ctx, At::Cwd, path, OpenFlags::read(), 0)
            .unwrap();
        let mut buf = vec![0; 4096];
        let n = self.switch.read(&self.ctx, fd, &mut buf).unwrap();
        self.switch.close(&self.ctx, fd).unwrap();
        buf.truncate(n);
        buf
    }

    fn mkdir(&self, path: &str) {
        self.switch.mkdir(&self.ctx, At::Cwd, path, 0o755).unwrap();
    }

    /// Mount a fresh memfs on `path`.
    fn mount(&self, path: &str) -> NamespaceId {
        self.switch
            .mount(&self.ctx, At::Cwd, path, "memfs", None, MountFlags::default(), None)
            .unwrap()
    }
}

// ============================================================================
// Mounts
// ============================================================================

#[test]
fn test_mount_crossing_both_ways() {
    let f = setup();
    let root = f.switch.rstat(&f.ctx, At::Cwd, "/", true).unwrap();
    f.mkdir("/a");
    let covered = f.switch.rstat(&f.ctx, At::Cwd, "/a", true).unwrap();
    let ns = f.mount("/a");

    f.write("/a/x", b"inside");
    let x = f.switch.rstat(&f.ctx, At::Cwd, "/a/x", true).unwrap();
    assert_eq!(x.namespace, ns);

    let mounted = f.switch.rstat(&f.ctx, At::Cwd, "/a", true).unwrap();
    assert_eq!(mounted.namespace, ns);
    assert_ne!(mounted.node, covered.node);

    let up = f.switch.rstat(&f.ctx, At::Cwd, "/a/..", true).unwrap();
    assert_eq!((up.namespace, up.node), (root.namespace, root.node));

    let dot = f.switch.rstat(&f.ctx, At::Cwd, "/a/.", true).unwrap();
    assert_eq!(dot.namespace, ns);
}

#[test]
fn test_unmount_busy_while_file_open() {
    let f = setup();
    f.mkdir("/mnt");
    let ns = f.mount("/mnt");
    f.write("/mnt/file", b"data");

    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/mnt/file", OpenFlags::read(), 0)
        .unwrap();
    let err = f.switch.unmount(&f.ctx, At::Cwd, "/mnt").unwrap_err();
    assert!(matches!(err, VfsError::Busy(_)));
    assert!(err.is_retryable());

    f.switch.close(&f.ctx, fd).unwrap();
    f.switch.unmount(&f.ctx, At::Cwd, "/mnt").unwrap();
    assert_eq!(f.switch.namespace_vnodes(ns), 0);
    assert!(f.switch.mounts().iter().all(|m| m.id != ns));

    // The covered directory is visible again, and empty.
    let fd = f.switch.opendir(&f.ctx, At::Cwd, "/mnt").unwrap();
    let names: Vec<_> = f
        .switch
        .readdir(&f.ctx, fd, 16)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, [".", ".."]);
    f.switch.closedir(&f.ctx, fd).unwrap();
    f.switch.check_invariants().unwrap();
}

#[test]
fn test_unmount_busy_while_cwd_inside() {
    let f = setup();
    f.mkdir("/mnt");
    f.mount("/mnt");
    f.switch.chdir(&f.ctx, At::Cwd, "/mnt").unwrap();

    let err = f.switch.unmount(&f.ctx, At::Cwd, "/mnt").unwrap_err();
    assert!(matches!(err, VfsError::Busy(_)));

    f.switch.chdir(&f.ctx, At::Cwd, "/").unwrap();
    f.switch.unmount(&f.ctx, At::Cwd, "/mnt").unwrap();
}

#[test]
fn test_unmount_rejects_root_and_plain_directories() {
    let f = setup();
    f.mkdir("/d");

    let err = f.switch.unmount(&f.ctx, At::Cwd, "/").unwrap_err();
    assert!(matches!(err, VfsError::Busy(_)));
    let err = f.switch.unmount(&f.ctx, At::Cwd, "/d").unwrap_err();
    assert!(matches!(err, VfsError::InvalidArgument(_)));
}

#[test]
fn test_mount_point_cannot_be_removed_or_renamed() {
    let f = setup();
    f.mkdir("/a");
    f.mount("/a");

    let err = f.switch.rmdir(&f.ctx, At::Cwd, "/a").unwrap_err();
    assert!(matches!(err, VfsError::Busy(_)));
    let err = f
        .switch
        .rename(&f.ctx, At::Cwd, "/a", At::Cwd, "/b")
        .unwrap_err();
    assert!(matches!(err, VfsError::Busy(_)));
}

#[test]
fn test_rename_and_link_across_namespaces() {
    let f = setup();
    f.mkdir("/a");
    f.mount("/a");
    f.write("/f", b"");

    let err = f
        .switch
        .rename(&f.ctx, At::Cwd, "/f", At::Cwd, "/a/f")
        .unwrap_err();
    assert!(matches!(err, VfsError::CrossDevice));
    let err = f
        .switch
        .link(&f.ctx, At::Cwd, "/f", At::Cwd, "/a/g")
        .unwrap_err();
    assert!(matches!(err, VfsError::CrossDevice));
}

#[test]
fn test_readdir_dotdot_at_mount_root() {
    let f = setup();
    f.mkdir("/a");
    f.mkdir("/a/m");
    f.mount("/a/m");
    let parent = f.switch.rstat(&f.ctx, At::Cwd, "/a", true).unwrap();

    let fd = f.switch.opendir(&f.ctx, At::Cwd, "/a/m").unwrap();
    let entries = f.switch.readdir(&f.ctx, fd, 8).unwrap();
    f.switch.closedir(&f.ctx, fd).unwrap();
    let dotdot = entries.iter().find(|e| e.name == "..").unwrap();
    assert_eq!(dotdot.node, parent.node);
    assert_eq!(dotdot.namespace, Some(parent.namespace));
    assert_eq!(entries[0].name, ".");
    assert_eq!(entries[0].namespace, None);

    // An ordinary directory reports its own parent untouched.
    let fd = f.switch.opendir(&f.ctx, At::Cwd, "/a").unwrap();
    let entries = f.switch.readdir(&f.ctx, fd, 8).unwrap();
    f.switch.closedir(&f.ctx, fd).unwrap();
    let dotdot = entries.iter().find(|e| e.name == "..").unwrap();
    assert_eq!(dotdot.namespace, None);
}

#[test]
fn test_module_referenced_per_mount() {
    let f = setup();
    assert_eq!(f.switch.filesystems().refs("memfs"), Some(1));

    f.mkdir("/a");
    f.mount("/a");
    assert_eq!(f.switch.filesystems().refs("memfs"), Some(2));
    assert_eq!(f.switch.mounts().len(), 2);

    f.switch.unmount(&f.ctx, At::Cwd, "/a").unwrap();
    assert_eq!(f.switch.filesystems().refs("memfs"), Some(1));
}

// ============================================================================
// Path resolution
// ============================================================================

#[test]
fn test_symlinks() {
    let f = setup();
    f.mkdir("/dir");
    f.write("/dir/target", b"through the link");
    f.switch
        .symlink(&f.ctx, "/dir/target", At::Cwd, "/abs")
        .unwrap();
    f.switch.symlink(&f.ctx, "dir", At::Cwd, "/rel").unwrap();

    assert_eq!(f.read("/abs"), b"through the link");
    assert_eq!(f.read("/rel/target"), b"through the link");
    assert_eq!(f.switch.readlink(&f.ctx, At::Cwd, "/abs").unwrap(), "/dir/target");

    let link = f.switch.rstat(&f.ctx, At::Cwd, "/abs", false).unwrap();
    assert!(link.is_symlink());
    let target = f.switch.rstat(&f.ctx, At::Cwd, "/abs", true).unwrap();
    assert!(target.is_file());

    let err = f.switch.readlink(&f.ctx, At::Cwd, "/dir").unwrap_err();
    assert!(matches!(err, VfsError::NotASymlink(_)));
}

#[test]
fn test_symlink_loop() {
    let f = setup();
    f.switch.symlink(&f.ctx, "l2", At::Cwd, "/l1").unwrap();
    f.switch.symlink(&f.ctx, "l1", At::Cwd, "/l2").unwrap();

    let err = f
        .switch
        .open(&f.ctx, At::Cwd, "/l1", OpenFlags::read(), 0)
        .unwrap_err();
    assert!(matches!(err, VfsError::TooManySymlinks));

    // Not following the terminal link never walks the loop.
    assert!(f.switch.rstat(&f.ctx, At::Cwd, "/l1", false).is_ok());
}

#[test]
fn test_symlink_chain_at_limit() {
    let config = SwitchConfig {
        max_symlinks: 3,
        ..SwitchConfig::default()
    };
    let f = setup_with(config);
    f.write("/end", b"ok");
    f.switch.symlink(&f.ctx, "end", At::Cwd, "/s1").unwrap();
    f.switch.symlink(&f.ctx, "s1", At::Cwd, "/s2").unwrap();
    f.switch.symlink(&f.ctx, "s2", At::Cwd, "/s3").unwrap();
    f.switch.symlink(&f.ctx, "s3", At::Cwd, "/s4").unwrap();

    assert_eq!(f.read("/s3"), b"ok");
    let err = f
        .switch
        .rstat(&f.ctx, At::Cwd, "/s4", true)
        .unwrap_err();
    assert!(matches!(err, VfsError::TooManySymlinks));
}

#[test]
fn test_path_edge_cases() {
    let f = setup();
    f.mkdir("/d");
    f.write("/d/file", b"");

    assert!(f.switch.rstat(&f.ctx, At::Cwd, "/d/", true).unwrap().is_dir());
    assert!(f.switch.rstat(&f.ctx, At::Cwd, "//d//file", true).unwrap().is_file());

    let err = f
        .switch
        .rstat(&f.ctx, At::Cwd, "/d/file/", true)
        .unwrap_err();
    assert!(matches!(err, VfsError::NotADirectory(_)));

    let err = f.switch.rstat(&f.ctx, At::Cwd, "", true).unwrap_err();
    assert!(matches!(err, VfsError::InvalidArgument(_)));

    let long = "n".repeat(256);
    let err = f
        .switch
        .open(&f.ctx, At::Cwd, &long, OpenFlags::create(), 0o644)
        .unwrap_err();
    assert!(matches!(err, VfsError::NameTooLong));

    let deep = "/x".repeat(600);
    let err = f.switch.rstat(&f.ctx, At::Cwd, &deep, true).unwrap_err();
    assert!(matches!(err, VfsError::NameTooLong));

    let err = f
        .switch
        .rstat(&f.ctx, At::Cwd, "/missing/file", true)
        .unwrap_err();
    assert!(matches!(err, VfsError::NotFound(_)));

    // `..` of the global root is the root.
    let up = f.switch.rstat(&f.ctx, At::Cwd, "/../..", true).unwrap();
    let root = f.switch.rstat(&f.ctx, At::Cwd, "/", true).unwrap();
    assert_eq!(up.node, root.node);
}

#[test]
fn test_relative_paths_from_descriptor() {
    let f = setup();
    f.mkdir("/d");
    f.write("/d/file", b"relative");

    let dir = f.switch.opendir(&f.ctx, At::Cwd, "/d").unwrap();
    let fd = f
        .switch
        .open(&f.ctx, At::Fd(dir), "file", OpenFlags::read(), 0)
        .unwrap();
    let mut buf = [0u8; 16];
    let n = f.switch.read(&f.ctx, fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"relative");

    let err = f
        .switch
        .rstat(&f.ctx, At::Fd(99), "file", true)
        .unwrap_err();
    assert!(matches!(err, VfsError::BadDescriptor(99)));
}

// ============================================================================
// Working directory
// ============================================================================

#[test]
fn test_getcwd_across_mount() {
    let f = setup();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/");

    f.mkdir("/a");
    f.mount("/a");
    f.mkdir("/a/sub");
    f.switch.chdir(&f.ctx, At::Cwd, "/a/sub").unwrap();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/a/sub");

    f.switch.chdir(&f.ctx, At::Cwd, "..").unwrap();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/a");
    f.switch.chdir(&f.ctx, At::Cwd, "..").unwrap();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/");
}

#[test]
fn test_fchdir_and_open_cwd() {
    let f = setup();
    f.mkdir("/d");
    f.write("/file", b"");
    f.switch.chdir(&f.ctx, At::Cwd, "d").unwrap();
    let saved = f.switch.open_cwd(&f.ctx).unwrap();

    f.switch.chdir(&f.ctx, At::Cwd, "/").unwrap();
    f.switch.fchdir(&f.ctx, saved).unwrap();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/d");

    let err = f.switch.chdir(&f.ctx, At::Cwd, "/file").unwrap_err();
    assert!(matches!(err, VfsError::NotADirectory(_)));
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/d");
}

// ============================================================================
// Files and descriptors
// ============================================================================

#[test]
fn test_concurrent_exclusive_create() {
    let f = setup();
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = f.switch.new_io_context(Some(&f.ctx)).unwrap();
                let switch = &f.switch;
                s.spawn(move || {
                    switch
                        .open(&ctx, At::Cwd, "/race", OpenFlags::create_exclusive(), 0o644)
                        .map(|fd| switch.close(&ctx, fd))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let won = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(VfsError::AlreadyExists(_))))
        .count();
    assert_eq!((won, lost), (1, 7));
    f.switch.check_invariants().unwrap();
}

#[test]
fn test_unlink_while_open() {
    let f = setup();
    f.write("/doomed", b"still readable");
    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/doomed", OpenFlags::read(), 0)
        .unwrap();

    f.switch.unlink(&f.ctx, At::Cwd, "/doomed").unwrap();
    assert!(matches!(
        f.switch.rstat(&f.ctx, At::Cwd, "/doomed", true),
        Err(VfsError::NotFound(_))
    ));
    assert_eq!(f.stats.remove_vnode.load(Ordering::Relaxed), 0);

    let mut buf = [0u8; 32];
    let n = f.switch.read(&f.ctx, fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"still readable");
    assert_eq!(f.switch.fstat(&f.ctx, fd).unwrap().nlink, 0);

    f.switch.close(&f.ctx, fd).unwrap();
    assert_eq!(f.stats.remove_vnode.load(Ordering::Relaxed), 1);
    f.switch.check_invariants().unwrap();
}

#[test]
fn test_positions_and_seek() {
    let f = setup();
    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::create(), 0o644)
        .unwrap();
    f.switch.write(&f.ctx, fd, b"hello").unwrap();
    f.switch.write(&f.ctx, fd, b" world").unwrap();

    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Start(6)).unwrap(), 6);
    let mut buf = [0u8; 5];
    f.switch.read(&f.ctx, fd, &mut buf).unwrap();
    assert_eq!(&buf, b"world");

    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::End(-5)).unwrap(), 6);
    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Current(-6)).unwrap(), 0);
    let err = f
        .switch
        .lseek(&f.ctx, fd, SeekFrom::Current(-1))
        .unwrap_err();
    assert!(matches!(err, VfsError::InvalidArgument(_)));

    // pread and pwrite leave the position alone.
    f.switch.pwrite(&f.ctx, fd, 0, b"J").unwrap();
    let n = f.switch.pread(&f.ctx, fd, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Jello");
    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Current(0)).unwrap(), 0);
}

#[test]
fn test_append_mode() {
    let f = setup();
    f.write("/log", b"one\n");
    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/log", OpenFlags::append(), 0)
        .unwrap();
    f.switch.write(&f.ctx, fd, b"two\n").unwrap();
    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Current(0)).unwrap(), 8);
    f.switch.close(&f.ctx, fd).unwrap();
    assert_eq!(f.read("/log"), b"one\ntwo\n");
}

#[test]
fn test_descriptor_kinds_checked() {
    let f = setup();
    f.mkdir("/d");
    let dir = f.switch.opendir(&f.ctx, At::Cwd, "/d").unwrap();

    let mut buf = [0u8; 4];
    let err = f.switch.read(&f.ctx, dir, &mut buf).unwrap_err();
    assert!(matches!(err, VfsError::BadDescriptor(_)));

    f.write("/f", b"");
    let file = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
        .unwrap();
    let err = f.switch.readdir(&f.ctx, file, 1).unwrap_err();
    assert!(matches!(err, VfsError::BadDescriptor(_)));
    let err = f.switch.write(&f.ctx, file, b"x").unwrap_err();
    assert!(matches!(err, VfsError::BadDescriptor(_)));
    let err = f.switch.closedir(&f.ctx, file).unwrap_err();
    assert!(matches!(err, VfsError::BadDescriptor(_)));

    // close accepts any kind.
    f.switch.close(&f.ctx, dir).unwrap();
    f.switch.close(&f.ctx, file).unwrap();
}

#[test]
fn test_dup_shares_position() {
    let f = setup();
    f.write("/f", b"abcdef");
    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
        .unwrap();

    let copy = f.switch.dup(&f.ctx, fd).unwrap();
    assert_ne!(copy, fd);
    let target = f.switch.dup2(&f.ctx, fd, 10).unwrap();
    assert_eq!(target, 10);

    let mut buf = [0u8; 2];
    f.switch.read(&f.ctx, fd, &mut buf).unwrap();
    f.switch.close(&f.ctx, fd).unwrap();
    f.switch.read(&f.ctx, 10, &mut buf).unwrap();
    assert_eq!(&buf, b"cd");
    f.switch.read(&f.ctx, copy, &mut buf).unwrap();
    assert_eq!(&buf, b"ef");

    // dup2 onto itself is a no-op.
    assert_eq!(f.switch.dup2(&f.ctx, copy, copy).unwrap(), copy);
}

#[test]
fn test_descriptor_table_limit() {
    let config = SwitchConfig {
        max_fds: 4,
        ..SwitchConfig::default()
    };
    let f = setup_with(config);
    f.write("/f", b"");
    let fds: Vec<_> = (0..4)
        .map(|_| {
            f.switch
                .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
                .unwrap()
        })
        .collect();
    let err = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
        .unwrap_err();
    assert!(matches!(err, VfsError::TooManyOpenFiles));

    // A create that cannot get a descriptor leaves no entry behind.
    let err = f
        .switch
        .open(&f.ctx, At::Cwd, "/new", OpenFlags::create(), 0o644)
        .unwrap_err();
    assert!(matches!(err, VfsError::TooManyOpenFiles));
    assert!(matches!(
        f.switch.rstat(&f.ctx, At::Cwd, "/new", true),
        Err(VfsError::NotFound(_))
    ));

    f.switch.close(&f.ctx, fds[0]).unwrap();
    assert_eq!(
        f.switch
            .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
            .unwrap(),
        fds[0]
    );
}

#[test]
fn test_fork_and_exec_cleanup() {
    let f = setup();
    f.mkdir("/d");
    f.write("/f", b"");
    f.switch.chdir(&f.ctx, At::Cwd, "/d").unwrap();

    let kept = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::read(), 0)
        .unwrap();
    let dropped = f
        .switch
        .open(&f.ctx, At::Cwd, "/f", OpenFlags::read().close_on_exec(), 0)
        .unwrap();

    let child = f.switch.new_io_context(Some(&f.ctx)).unwrap();
    assert_eq!(f.switch.getcwd(&child).unwrap(), "/d");
    child.exec_cleanup();

    assert!(f.switch.fstat(&child, kept).is_ok());
    assert!(matches!(
        f.switch.fstat(&child, dropped),
        Err(VfsError::BadDescriptor(_))
    ));
    // The parent's table is untouched.
    assert!(f.switch.fstat(&f.ctx, dropped).is_ok());

    // The child's working directory is its own.
    f.switch.chdir(&child, At::Cwd, "/").unwrap();
    assert_eq!(f.switch.getcwd(&f.ctx).unwrap(), "/d");
}

// ============================================================================
// Cache behavior through the call surface
// ============================================================================

#[test]
fn test_small_cache_survives_many_files() {
    let mut config = SwitchConfig::default();
    config.cache.slots = 16;
    config.cache.cached_divisor = 2;
    let f = setup_with(config);

    for i in 0..64 {
        f.write(&format!("/f{}", i), format!("file {}", i).as_bytes());
    }
    for i in (0..64).rev() {
        assert_eq!(f.read(&format!("/f{}", i)), format!("file {}", i).as_bytes());
    }

    let stats = f.switch.cache_stats();
    assert!(stats.cached <= 8);
    assert!(stats.evictions > 0);
    assert_eq!(stats.capacity, 16);
    f.switch.check_invariants().unwrap();
}

#[test]
fn test_sync_and_counts() {
    let f = setup();
    f.mkdir("/a");
    f.write("/a/f", b"");
    f.switch.sync().unwrap();

    let stats = f.switch.cache_stats();
    assert_eq!(stats.free + stats.cached + stats.active, stats.capacity);
    assert!(f.stats.read_vnode.load(Ordering::Relaxed) >= 3);
}

// ============================================================================
// Limits and failing backend steps
// ============================================================================

#[test]
fn test_switch_refuses_invalid_config() {
    let config = SwitchConfig {
        max_fds: usize::MAX,
        ..SwitchConfig::default()
    };
    assert!(matches!(Switch::new(config), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_removals_with_full_cache_free_storage() {
    let mut config = SwitchConfig::default();
    config.cache.slots = 3;
    let f = setup_with(config);
    for name in ["/a", "/b", "/c", "/d", "/e"] {
        f.write(name, name.as_bytes());
    }
    f.mkdir("/dir");

    // Root, /a and /c take every slot.
    let fa = f
        .switch
        .open(&f.ctx, At::Cwd, "/a", OpenFlags::read(), 0)
        .unwrap();
    let fc = f
        .switch
        .open(&f.ctx, At::Cwd, "/c", OpenFlags::read(), 0)
        .unwrap();
    let stats = f.switch.cache_stats();
    assert_eq!((stats.active, stats.cached, stats.free), (3, 0, 0));

    f.switch.unlink(&f.ctx, At::Cwd, "/b").unwrap();
    assert!(matches!(
        f.switch.rstat(&f.ctx, At::Cwd, "/b", true),
        Err(VfsError::NotFound(_))
    ));
    f.switch.rename(&f.ctx, At::Cwd, "/d", At::Cwd, "/e").unwrap();
    f.switch.rmdir(&f.ctx, At::Cwd, "/dir").unwrap();

    assert_eq!(f.stats.reclaimed.load(Ordering::Relaxed), 3);
    assert_eq!(f.stats.remove_vnode.load(Ordering::Relaxed), 0);

    f.switch.close(&f.ctx, fa).unwrap();
    f.switch.close(&f.ctx, fc).unwrap();
    assert_eq!(f.read("/e"), b"/d");
    f.switch.check_invariants().unwrap();
}

#[test]
fn test_offsets_past_file_size_limit() {
    let f = setup();
    let fd = f
        .switch
        .open(&f.ctx, At::Cwd, "/big", OpenFlags::create(), 0o644)
        .unwrap();

    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Start(1 << 63)).unwrap(), 1 << 63);
    assert!(matches!(f.switch.write(&f.ctx, fd, b"x"), Err(VfsError::NoSpace)));
    assert_eq!(f.switch.lseek(&f.ctx, fd, SeekFrom::Current(0)).unwrap(), 1 << 63);
    assert!(matches!(
        f.switch.pwrite(&f.ctx, fd, u64::MAX, b"x"),
        Err(VfsError::NoSpace)
    ));
    assert!(matches!(
        f.switch.write_attr(&f.ctx, fd, "user.x", 0, u64::MAX, b"abc"),
        Err(VfsError::NoSpace)
    ));
    assert!(matches!(
        f.switch.stat_attr(&f.ctx, fd, "user.x"),
        Err(VfsError::NotFound(_))
    ));
    let huge = SetAttr::new().with_size(1 << 40);
    assert!(matches!(
        f.switch.wstat(&f.ctx, At::Cwd, "/big", &huge),
        Err(VfsError::NoSpace)
    ));
    assert_eq!(f.switch.fstat(&f.ctx, fd).unwrap().size, 0);

    assert_eq!(f.switch.pwrite(&f.ctx, fd, 4, b"tail").unwrap(), 4);
    assert_eq!(f.switch.fstat(&f.ctx, fd).unwrap().size, 8);
    f.switch.close(&f.ctx, fd).unwrap();
}
