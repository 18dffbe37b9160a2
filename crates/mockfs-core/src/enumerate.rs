//! Lazy directory enumeration
//!
//! An [`Enumeration`] is a recipe, not a snapshot: every pass starts from the
//! root again and reads each directory from the live tree only when the
//! iterator reaches it.

use std::collections::VecDeque;

use crate::path::NormalizedPath;
use crate::pattern::SearchPattern;
use crate::store::NodeId;
use crate::types::SearchOption;
use crate::vfs::FsCore;

/// Entry kinds an enumeration yields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryFilter {
    Files,
    Directories,
    Both,
}

/// One directory entry as seen while walking
#[derive(Clone, Debug)]
pub(crate) struct ChildEntry {
    pub id: NodeId,
    pub name: String,
    pub is_dir: bool,
    pub is_link: bool,
}

/// Restartable sequence of absolute paths below a directory
#[derive(Debug)]
pub struct Enumeration<'fs> {
    fs: &'fs FsCore,
    display_root: NormalizedPath,
    root: NodeId,
    pattern: SearchPattern,
    option: SearchOption,
    filter: EntryFilter,
}

impl<'fs> Enumeration<'fs> {
    pub(crate) fn new(
        fs: &'fs FsCore,
        display_root: NormalizedPath,
        root: NodeId,
        pattern: SearchPattern,
        option: SearchOption,
        filter: EntryFilter,
    ) -> Self {
        Self {
            fs,
            display_root,
            root,
            pattern,
            option,
            filter,
        }
    }

    /// Directory the enumeration starts from, as the caller named it.
    pub fn root(&self) -> &NormalizedPath {
        &self.display_root
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn iter(&self) -> Iter<'_, 'fs> {
        Iter {
            enumeration: self,
            walk: Walk::start(self),
        }
    }

    fn wants(&self, entry: &ChildEntry) -> bool {
        let kind_ok = match self.filter {
            EntryFilter::Files => !entry.is_dir,
            EntryFilter::Directories => entry.is_dir,
            EntryFilter::Both => true,
        };
        kind_ok && self.pattern.matches(&entry.name)
    }
}

#[derive(Debug)]
struct Walk {
    pending: VecDeque<(NormalizedPath, NodeId)>,
    ready: VecDeque<String>,
}

impl Walk {
    fn start(enumeration: &Enumeration<'_>) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back((enumeration.display_root.clone(), enumeration.root));
        Self {
            pending,
            ready: VecDeque::new(),
        }
    }

    fn next(&mut self, enumeration: &Enumeration<'_>) -> Option<String> {
        loop {
            if let Some(path) = self.ready.pop_front() {
                return Some(path);
            }
            let (dir_path, dir_id) = self.pending.pop_front()?;
            // A directory removed since it was queued simply contributes nothing.
            let Some(children) = enumeration.fs.list_children(dir_id) else {
                continue;
            };
            for child in children {
                let child_path = dir_path.join(&child.name);
                if enumeration.wants(&child) {
                    self.ready.push_back(child_path.as_str().to_string());
                }
                if enumeration.option == SearchOption::AllDirectories
                    && child.is_dir
                    && !child.is_link
                {
                    self.pending.push_back((child_path, child.id));
                }
            }
        }
    }
}

/// Borrowing iterator over an [`Enumeration`]
#[derive(Debug)]
pub struct Iter<'e, 'fs> {
    enumeration: &'e Enumeration<'fs>,
    walk: Walk,
}

impl Iterator for Iter<'_, '_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.walk.next(self.enumeration)
    }
}

/// Owning iterator over an [`Enumeration`]
#[derive(Debug)]
pub struct IntoIter<'fs> {
    enumeration: Enumeration<'fs>,
    walk: Walk,
}

impl Iterator for IntoIter<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.walk.next(&self.enumeration)
    }
}

impl<'fs> IntoIterator for Enumeration<'fs> {
    type Item = String;
    type IntoIter = IntoIter<'fs>;

    fn into_iter(self) -> IntoIter<'fs> {
        let walk = Walk::start(&self);
        IntoIter {
            enumeration: self,
            walk,
        }
    }
}

impl<'e, 'fs> IntoIterator for &'e Enumeration<'fs> {
    type Item = String;
    type IntoIter = Iter<'e, 'fs>;

    fn into_iter(self) -> Iter<'e, 'fs> {
        self.iter()
    }
}
