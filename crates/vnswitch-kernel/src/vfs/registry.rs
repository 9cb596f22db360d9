//! Filesystem registry.
//!
//! Reference-counted table of backend modules, keyed by name. Mounts acquire
//! a reference; releasing the last reference unloads the module unless it
//! was registered as fixed. An optional loader brings modules back in on
//! demand.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::ops::FileSystem;
use super::{VfsError, VfsResult};

/// Loads a filesystem module by name.
pub type FsLoader = Box<dyn Fn(&str) -> Option<Arc<dyn FileSystem>> + Send + Sync>;

/// A handle to a registered filesystem.
#[derive(Clone)]
pub struct FsHandle {
    name: Arc<str>,
    fs: Arc<dyn FileSystem>,
}

impl FsHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }
}

impl fmt::Debug for FsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsHandle").field("name", &self.name).finish()
    }
}

struct Registration {
    handle: FsHandle,
    refs: usize,
    fixed: bool,
}

/// Table of loaded filesystem modules.
///
/// One registry-wide lock; churn happens only at mount and unmount.
pub struct FsRegistry {
    modules: Mutex<HashMap<String, Registration>>,
    loader: Option<FsLoader>,
}

impl fmt::Debug for FsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsRegistry")
            .field("modules", &self.names())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl Default for FsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FsRegistry {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(HashMap::new()),
            loader: None,
        }
    }

    /// Registry that consults `loader` when `acquire` misses.
    pub fn with_loader(loader: FsLoader) -> Self {
        Self {
            modules: Mutex::new(HashMap::new()),
            loader: Some(loader),
        }
    }

    /// Register a module. Fixed modules are never unloaded.
    pub fn register(
        &self,
        name: &str,
        fs: Arc<dyn FileSystem>,
        fixed: bool,
    ) -> VfsResult<FsHandle> {
        let mut modules = self.modules.lock();
        if modules.contains_key(name) {
            return Err(VfsError::already_exists(format!("filesystem {}", name)));
        }
        let handle = FsHandle {
            name: Arc::from(name),
            fs,
        };
        modules.insert(
            name.to_string(),
            Registration {
                handle: handle.clone(),
                refs: 0,
                fixed,
            },
        );
        info!("registered filesystem {} (fixed={})", name, fixed);
        Ok(handle)
    }

    /// Take a reference on a module, loading it if a loader is configured.
    pub fn acquire(&self, name: &str) -> Option<FsHandle> {
        let mut modules = self.modules.lock();
        if !modules.contains_key(name) {
            let fs = self.loader.as_ref().and_then(|load| load(name))?;
            debug!("loaded filesystem {} on demand", name);
            modules.insert(
                name.to_string(),
                Registration {
                    handle: FsHandle {
                        name: Arc::from(name),
                        fs,
                    },
                    refs: 0,
                    fixed: false,
                },
            );
        }
        let reg = modules.get_mut(name)?;
        reg.refs += 1;
        Some(reg.handle.clone())
    }

    /// Drop a reference taken by `acquire`.
    pub fn release(&self, handle: &FsHandle) {
        let mut modules = self.modules.lock();
        let Some(reg) = modules.get_mut(handle.name()) else {
            return;
        };
        reg.refs = reg.refs.saturating_sub(1);
        if reg.refs == 0 && !reg.fixed {
            modules.remove(handle.name());
            info!("unloaded filesystem {}", handle.name());
        }
    }

    /// Current reference count of a module, if loaded.
    pub fn refs(&self, name: &str) -> Option<usize> {
        self.modules.lock().get(name).map(|reg| reg.refs)
    }

    /// Names of loaded modules, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.modules.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
