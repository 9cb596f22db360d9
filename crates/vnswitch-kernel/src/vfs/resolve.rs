//! Path resolution.
//!
//! Walks a slash-separated path one component at a time, delegating each
//! lookup to the backend's `walk`. Handles `..` out of a mounted namespace,
//! crossing into namespaces mounted on a resolved node, and splicing
//! symbolic link targets into the remaining path.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use super::cache::{Vnode, VnodeCache};
use super::mount::NamespaceRegistry;
use super::ops::Walked;
use super::types::{Cookie, NodeId, VnodeKey};
use super::{VfsError, VfsResult};
use crate::config::SwitchConfig;

/// Entries requested per `readdir` call when scanning a directory.
const SCAN_BATCH: usize = 32;

/// Resolver limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_symlinks: usize,
    pub max_name_len: usize,
    pub max_path_len: usize,
}

impl From<&SwitchConfig> for Limits {
    fn from(config: &SwitchConfig) -> Self {
        Self {
            max_symlinks: config.max_symlinks,
            max_name_len: config.max_name_len,
            max_path_len: config.max_path_len,
        }
    }
}

/// Split a path into components. A trailing slash appends `.`.
fn components(path: &str) -> VecDeque<String> {
    let mut parts: VecDeque<String> = path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if path.ends_with('/') && !parts.is_empty() {
        parts.push_back(".".to_string());
    }
    parts
}

#[derive(Debug)]
pub struct Resolver {
    namespaces: Arc<NamespaceRegistry>,
    cache: Arc<VnodeCache>,
    limits: Limits,
}

impl Resolver {
    pub fn new(namespaces: Arc<NamespaceRegistry>, cache: Arc<VnodeCache>, limits: Limits) -> Self {
        Self {
            namespaces,
            cache,
            limits,
        }
    }

    fn check_path(&self, path: &str) -> VfsResult<()> {
        if path.is_empty() {
            return Err(VfsError::invalid_argument("empty path"));
        }
        if path.len() > self.limits.max_path_len {
            return Err(VfsError::NameTooLong);
        }
        if path
            .split('/')
            .any(|c| c.len() > self.limits.max_name_len)
        {
            return Err(VfsError::NameTooLong);
        }
        Ok(())
    }

    /// Resolve `path` to a referenced vnode.
    ///
    /// Relative paths start at `base`, absolute ones at the global root.
    /// With `follow` false a terminal symbolic link is returned itself.
    pub fn resolve(&self, base: &Vnode, path: &str, follow: bool) -> VfsResult<Vnode> {
        self.check_path(path)?;
        let start = if path.starts_with('/') {
            self.namespaces.root()?
        } else {
            base.clone()
        };
        self.walk_components(start, components(path), follow)
    }

    /// Resolve everything but the last component.
    ///
    /// Returns the directory and the leaf name. Trailing slashes are
    /// ignored; a path of only slashes yields the root and `.`.
    pub fn resolve_parent(&self, base: &Vnode, path: &str) -> VfsResult<(Vnode, String)> {
        self.check_path(path)?;
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok((self.namespaces.root()?, ".".to_string()));
        }
        match trimmed.rfind('/') {
            None => Ok((base.clone(), trimmed.to_string())),
            Some(idx) => {
                let (dir, leaf) = (&trimmed[..=idx], &trimmed[idx + 1..]);
                let dir = self.resolve(base, dir, true)?;
                Ok((dir, leaf.to_string()))
            }
        }
    }

    fn walk_components(
        &self,
        mut current: Vnode,
        mut remaining: VecDeque<String>,
        follow: bool,
    ) -> VfsResult<Vnode> {
        let mut links = 0;
        while let Some(name) = remaining.pop_front() {
            if name == ".." {
                if let Some(covered) = self.namespaces.mount_target(current.key()) {
                    current = self.cache.get(covered)?;
                }
            }

            let next = match current.volume().walk(current.data(), &name)? {
                Walked::Node(node) => node,
                Walked::Link { node, target } => {
                    if remaining.is_empty() && !follow {
                        node
                    } else {
                        links += 1;
                        if links > self.limits.max_symlinks {
                            debug!("gave up after {} symlinks at {}", links - 1, name);
                            return Err(VfsError::TooManySymlinks);
                        }
                        if target.is_empty() {
                            return Err(VfsError::not_found(name));
                        }
                        let mut spliced = components(&target);
                        spliced.append(&mut remaining);
                        remaining = spliced;
                        if target.starts_with('/') {
                            current = self.namespaces.root()?;
                        }
                        continue;
                    }
                }
            };

            let mut next = self.cache.get(VnodeKey::new(current.namespace(), next))?;
            while let Some(root) = self.namespaces.mount_point_root(&next)? {
                next = root;
            }
            current = next;
        }
        Ok(current)
    }

    /// Rebuild the absolute path of a directory vnode.
    ///
    /// Walks `..` up to the global root, stepping out of mounted namespaces
    /// onto their mount points, and scans each parent for the child's entry.
    pub fn path_of(&self, vnode: &Vnode) -> VfsResult<String> {
        let root = self.namespaces.root_key();
        let mut names = Vec::new();
        let mut current = vnode.clone();
        loop {
            if Some(current.key()) == root {
                break;
            }
            if let Some(covered) = self.namespaces.mount_target(current.key()) {
                current = self.cache.get(covered)?;
                continue;
            }
            let parent = match current.volume().walk(current.data(), "..")? {
                Walked::Node(node) => node,
                Walked::Link { .. } => {
                    return Err(VfsError::other(format!("`..` of {} is a link", current.key())));
                }
            };
            if parent == current.node() {
                // Root of a namespace that is neither global root nor mounted.
                return Err(VfsError::not_found(format!("{} is detached", current.key())));
            }
            let parent = self.cache.get(VnodeKey::new(current.namespace(), parent))?;
            names.push(self.entry_name(&parent, current.node())?);
            current = parent;
        }

        if names.is_empty() {
            return Ok("/".to_string());
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Ok(path)
    }

    /// Name under which `dir` lists `child`.
    fn entry_name(&self, dir: &Vnode, child: NodeId) -> VfsResult<String> {
        let volume = dir.volume();
        let cookie = volume.opendir(dir.data())?;
        let found = self.scan(dir, &cookie, child);
        if let Err(e) = volume.closedir(dir.data(), &cookie) {
            debug!("closedir of {} during scan failed: {}", dir.key(), e);
        }
        if let Err(e) = volume.free_dircookie(dir.data(), cookie) {
            debug!("free_dircookie of {} during scan failed: {}", dir.key(), e);
        }
        found?.ok_or_else(|| VfsError::not_found(format!("node {} in {}", child, dir.key())))
    }

    fn scan(&self, dir: &Vnode, cookie: &Cookie, child: NodeId) -> VfsResult<Option<String>> {
        loop {
            let batch = dir.volume().readdir(dir.data(), cookie, SCAN_BATCH)?;
            if batch.is_empty() {
                return Ok(None);
            }
            if let Some(entry) = batch
                .into_iter()
                .find(|e| e.node == child && e.name != "." && e.name != "..")
            {
                return Ok(Some(entry.name));
            }
        }
    }
}
