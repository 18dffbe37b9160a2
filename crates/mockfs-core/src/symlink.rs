//! Symbolic link resolution
//!
//! Links are ordinary file or directory nodes carrying a recorded target.
//! Resolution walks the chain iteratively: every hop bumps a counter checked
//! against the profile limit and a visited set catches cycles early.

use std::collections::HashSet;

use crate::error::{FsError, FsResult};
use crate::path::{fold_name, NormalizedPath, PathNormalizer};
use crate::store::NodeStore;

#[derive(Clone, Copy, Debug)]
pub(crate) struct SymlinkResolver {
    normalizer: PathNormalizer,
    max_hops: u32,
}

impl SymlinkResolver {
    pub fn new(normalizer: PathNormalizer, max_hops: u32) -> Self {
        Self {
            normalizer,
            max_hops,
        }
    }

    /// Recorded target of the link at `link`, normalized against the link's directory.
    pub fn target_of(&self, store: &NodeStore, link: &NormalizedPath) -> FsResult<NormalizedPath> {
        let id = store
            .lookup(link)
            .ok_or_else(|| FsError::file_not_found(link.as_str()))?;
        let target = store
            .get(id)?
            .link_target
            .clone()
            .ok_or_else(|| FsError::NotALink {
                path: link.to_string(),
            })?;
        self.normalize_target(link, &target)
    }

    fn normalize_target(&self, link: &NormalizedPath, target: &str) -> FsResult<NormalizedPath> {
        let base = link.parent().unwrap_or_else(|| link.clone());
        self.normalizer.normalize(target, &base)
    }

    /// Resolve `link` one hop, or through the whole chain when `follow` is set.
    pub fn resolve(
        &self,
        store: &NodeStore,
        link: &NormalizedPath,
        follow: bool,
    ) -> FsResult<NormalizedPath> {
        let mut current = self.target_of(store, link)?;
        if !follow {
            return Ok(current);
        }

        let case = store.case();
        let mut visited = HashSet::new();
        visited.insert(fold_name(link.as_str(), case));
        let mut hops = 1u32;

        loop {
            let Some(id) = store.lookup(&current) else {
                return Err(FsError::LinkTargetNotFound {
                    path: link.to_string(),
                });
            };
            let Some(next) = store.get(id)?.link_target.clone() else {
                return Ok(current);
            };

            hops += 1;
            if hops > self.max_hops || !visited.insert(fold_name(current.as_str(), case)) {
                tracing::warn!(link = %link, hops, limit = self.max_hops, "symlink chain too deep or cyclic");
                return Err(FsError::TooManyLinks {
                    path: link.to_string(),
                });
            }
            current = self.normalize_target(&current, &next)?;
        }
    }

    /// Follow `path` while it names a link; non-links come back unchanged.
    pub fn dereference(&self, store: &NodeStore, path: &NormalizedPath) -> FsResult<NormalizedPath> {
        let is_link = store
            .lookup(path)
            .and_then(|id| store.node(id))
            .is_some_and(|n| n.link_target.is_some());
        if is_link {
            self.resolve(store, path, true)
        } else {
            Ok(path.clone())
        }
    }
}
