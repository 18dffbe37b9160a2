//! Hierarchical node store for mockfs
//!
//! Nodes live in an arena keyed by [`NodeId`]; directories map case-folded
//! child names to ids. Moving a subtree only rewires one parent link, so node
//! identity (content, attributes, open-handle state) survives the move and
//! open handles keep working. Deleted files that still have open handles stay
//! in the arena detached from the tree until their last handle closes.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::config::CaseSensitivity;
use crate::error::{FsError, FsResult};
use crate::path::{fold_name, NormalizedPath};
use crate::share::ShareGuard;
use crate::times::{self, TimeUpdate};
use crate::types::{EntryInfo, EntryKind, FileAttributes, FileTimes};

/// Internal node ID for filesystem nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(u64);

/// Filesystem node types
#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    File {
        content: Vec<u8>,
        share: ShareGuard,
    },
    Directory {
        children: BTreeMap<String, NodeId>,
    },
}

/// Filesystem node
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub id: NodeId,
    /// Display name as first entered; volume roots carry their root string.
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub attributes: FileAttributes,
    pub times: FileTimes,
    pub link_target: Option<String>,
    pub access_control: Vec<u8>,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self.kind {
            NodeKind::File { .. } => EntryKind::File,
            NodeKind::Directory { .. } => EntryKind::Directory,
        }
    }

    pub fn len(&self) -> u64 {
        match &self.kind {
            NodeKind::File { content, .. } => content.len() as u64,
            NodeKind::Directory { .. } => 0,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(FileAttributes::READ_ONLY)
    }

    /// Attributes as reported to callers.
    pub fn visible_attributes(&self) -> FileAttributes {
        let mut attrs = self.attributes;
        if self.is_dir() {
            attrs.insert(FileAttributes::DIRECTORY);
        }
        if self.link_target.is_some() {
            attrs.insert(FileAttributes::REPARSE_POINT);
        }
        if attrs.is_empty() {
            FileAttributes::NORMAL
        } else {
            attrs
        }
    }

    pub fn share(&self) -> Option<&ShareGuard> {
        match &self.kind {
            NodeKind::File { share, .. } => Some(share),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn share_mut(&mut self) -> Option<&mut ShareGuard> {
        match &mut self.kind {
            NodeKind::File { share, .. } => Some(share),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&Vec<u8>> {
        match &self.kind {
            NodeKind::File { content, .. } => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }

    pub fn content_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.kind {
            NodeKind::File { content, .. } => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }

    fn children(&self) -> Option<&BTreeMap<String, NodeId>> {
        match &self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }
}

fn created_times(now: DateTime<Utc>) -> FileTimes {
    let mut times = times::missing_file_times();
    times::apply(&mut times, TimeUpdate::Created, now);
    times
}

/// Result of walking a path through the tree
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lookup {
    Found(NodeId),
    /// Every ancestor exists; only the final segment is missing.
    MissingLeaf { parent: NodeId },
    /// An intermediate segment is missing or is not a directory.
    MissingParent,
}

/// The node tree
#[derive(Debug)]
pub(crate) struct NodeStore {
    case: CaseSensitivity,
    nodes: HashMap<NodeId, Node>,
    roots: BTreeMap<String, NodeId>,
    next_node_id: u64,
}

impl NodeStore {
    pub fn new(case: CaseSensitivity) -> Self {
        Self {
            case,
            nodes: HashMap::new(),
            roots: BTreeMap::new(),
            next_node_id: 1,
        }
    }

    pub fn case(&self) -> CaseSensitivity {
        self.case
    }

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn key(&self, name: &str) -> String {
        fold_name(name, self.case)
    }

    /// Root directory for the volume of `path`, created on first reference.
    pub fn ensure_root(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> NodeId {
        let key = path.volume_key();
        if let Some(id) = self.roots.get(&key) {
            return *id;
        }
        let id = self.allocate_node_id();
        self.nodes.insert(
            id,
            Node {
                id,
                name: path.root().to_string(),
                parent: None,
                kind: NodeKind::Directory {
                    children: BTreeMap::new(),
                },
                attributes: FileAttributes::empty(),
                times: created_times(now),
                link_target: None,
                access_control: Vec::new(),
            },
        );
        self.roots.insert(key, id);
        tracing::trace!(root = path.root(), "created volume root");
        id
    }

    pub fn root_of(&self, path: &NormalizedPath) -> Option<NodeId> {
        self.roots.get(&path.volume_key()).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn get(&self, id: NodeId) -> FsResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| FsError::invalid_state("node vanished from the store"))
    }

    pub fn get_mut(&mut self, id: NodeId) -> FsResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| FsError::invalid_state("node vanished from the store"))
    }

    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(&parent)?
            .children()?
            .get(&self.key(name))
            .copied()
    }

    /// Children of a directory in key order.
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&parent)
            .and_then(Node::children)
            .map(|c| c.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .and_then(Node::children)
            .is_some_and(|c| !c.is_empty())
    }

    /// Walk `path` applying the store's case rule.
    pub fn locate(&self, path: &NormalizedPath) -> Lookup {
        let Some(mut current) = self.root_of(path) else {
            return Lookup::MissingParent;
        };
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            match self.child(current, segment) {
                Some(child) => current = child,
                None => {
                    let parent_is_dir = self.nodes.get(&current).is_some_and(Node::is_dir);
                    return if is_last && parent_is_dir {
                        Lookup::MissingLeaf { parent: current }
                    } else {
                        Lookup::MissingParent
                    };
                }
            }
        }
        Lookup::Found(current)
    }

    pub fn lookup(&self, path: &NormalizedPath) -> Option<NodeId> {
        match self.locate(path) {
            Lookup::Found(id) => Some(id),
            _ => None,
        }
    }

    /// Display path of an attached node, rebuilt from stored names.
    pub fn path_of(&self, id: NodeId, separator: char) -> Option<NormalizedPath> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            segments.push(current.name.clone());
            current = self.nodes.get(&parent)?;
        }
        if !self.roots.values().any(|r| *r == current.id) {
            return None;
        }
        segments.reverse();
        Some(NormalizedPath::new(
            current.name.clone(),
            segments,
            separator,
        ))
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            match self.nodes.get(&current) {
                Some(node) => match node.parent {
                    Some(parent) => current = parent,
                    None => return self.roots.values().any(|r| *r == current),
                },
                None => return false,
            }
        }
    }

    /// Create a node under `parent`.
    pub fn insert(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        now: DateTime<Utc>,
    ) -> FsResult<NodeId> {
        let key = self.key(name);
        let parent_node = self.get(parent)?;
        match parent_node.children() {
            Some(children) if children.contains_key(&key) => {
                return Err(FsError::already_exists(name));
            }
            Some(_) => {}
            None => return Err(FsError::io(format!("'{}' is not a directory", parent_node.name))),
        }

        let id = self.allocate_node_id();
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                parent: Some(parent),
                kind,
                attributes: FileAttributes::empty(),
                times: created_times(now),
                link_target: None,
                access_control: Vec::new(),
            },
        );
        self.link_child(parent, key, id)?;
        Ok(id)
    }

    fn link_child(&mut self, parent: NodeId, key: String, child: NodeId) -> FsResult<()> {
        match &mut self.get_mut(parent)?.kind {
            NodeKind::Directory { children } => {
                children.insert(key, child);
                Ok(())
            }
            NodeKind::File { .. } => Err(FsError::invalid_state("parent is not a directory")),
        }
    }

    fn unlink_child(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let Some(parent) = node.parent else {
            return;
        };
        let key = self.key(&node.name);
        if let Some(NodeKind::Directory { children }) =
            self.nodes.get_mut(&parent).map(|p| &mut p.kind)
        {
            children.remove(&key);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = None;
        }
    }

    /// Rehome `id` under `new_parent` as `new_name`, keeping its identity.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, new_name: &str) -> FsResult<()> {
        let key = self.key(new_name);
        if let Some(existing) = self.child(new_parent, new_name) {
            if existing != id {
                return Err(FsError::already_exists(new_name));
            }
        }
        self.unlink_child(id);
        let node = self.get_mut(id)?;
        node.name = new_name.to_string();
        node.parent = Some(new_parent);
        self.link_child(new_parent, key, id)
    }

    /// Deep copy `src` under `dst_parent` as `dst_name`; content buffers are duplicated.
    pub fn copy_subtree(
        &mut self,
        src: NodeId,
        dst_parent: NodeId,
        dst_name: &str,
        now: DateTime<Utc>,
    ) -> FsResult<NodeId> {
        let source = self.get(src)?.clone();
        let kind = match &source.kind {
            NodeKind::File { content, .. } => NodeKind::File {
                content: content.clone(),
                share: ShareGuard::default(),
            },
            NodeKind::Directory { .. } => NodeKind::Directory {
                children: BTreeMap::new(),
            },
        };
        let copy = self.insert(dst_parent, dst_name, kind, now)?;
        {
            let node = self.get_mut(copy)?;
            node.attributes = source.attributes;
            node.link_target = source.link_target.clone();
            node.access_control = source.access_control.clone();
            times::apply(
                &mut node.times,
                TimeUpdate::CopiedFrom {
                    source_written: source.times.written,
                },
                now,
            );
        }
        for child in self.children(src) {
            let name = self.get(child)?.name.clone();
            self.copy_subtree(child, copy, &name, now)?;
        }
        Ok(copy)
    }

    /// `id` and everything below it, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.children(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Unlink `id` from the tree and drop its subtree. Files that still
    /// have open handles stay in the arena, detached, until released.
    pub fn remove(&mut self, id: NodeId) {
        let subtree = self.subtree(id);
        self.unlink_child(id);
        for node_id in subtree {
            let keep = self
                .nodes
                .get(&node_id)
                .and_then(Node::share)
                .is_some_and(ShareGuard::is_open);
            if keep {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.parent = None;
                }
            } else {
                self.nodes.remove(&node_id);
            }
        }
    }

    /// Drop a detached node once nothing references it.
    pub fn collect_if_orphaned(&mut self, id: NodeId) {
        let orphaned = self.nodes.get(&id).is_some_and(|n| {
            n.parent.is_none()
                && !n.share().is_some_and(ShareGuard::is_open)
                && !self.roots.values().any(|r| *r == id)
        });
        if orphaned {
            self.nodes.remove(&id);
        }
    }

    pub fn entry_info(&self, id: NodeId, separator: char) -> Option<EntryInfo> {
        let node = self.nodes.get(&id)?;
        let path = self.path_of(id, separator)?;
        Some(EntryInfo {
            path: path.as_str().to_string(),
            name: path.file_name().unwrap_or(path.root()).to_string(),
            kind: node.entry_kind(),
            len: node.len(),
            attributes: node.visible_attributes(),
            times: node.times,
            link_target: node.link_target.clone(),
        })
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// (files, directories) reachable from the roots.
    pub fn counts(&self) -> (usize, usize) {
        let mut files = 0;
        let mut dirs = 0;
        for root in self.roots.values() {
            for id in self.subtree(*root) {
                match self.nodes.get(&id).map(Node::is_dir) {
                    Some(true) => dirs += 1,
                    Some(false) => files += 1,
                    None => {}
                }
            }
        }
        (files, dirs)
    }
}
