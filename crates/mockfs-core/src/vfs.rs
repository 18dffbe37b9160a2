//! Virtual filesystem engine for mockfs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, Utc};

use crate::config::{CaseSensitivity, FsConfig, Profile};
use crate::enumerate::{ChildEntry, EntryFilter, Enumeration};
use crate::error::{FsError, FsResult};
use crate::events::{EventBus, EventFilter, EventSink, FileOperation, OperationEvent, Phase, Subscription};
use crate::path::{NormalizedPath, PathNormalizer};
use crate::pattern::SearchPattern;
use crate::share::{Access, Share, ShareGuard};
use crate::store::{Lookup, Node, NodeId, NodeKind, NodeStore};
use crate::symlink::SymlinkResolver;
use crate::times::{self, Clock, SystemClock, TimeUpdate};
use crate::types::{
    EntryInfo, FileAttributes, FileTimes, FsStats, HandleId, OpenOptions, SearchOption, TimeKind,
};

/// Open file handle
#[derive(Debug)]
pub(crate) struct Handle {
    pub node_id: NodeId,
    pub access: Access,
    pub append: bool,
}

/// Everything guarded by the engine lock
#[derive(Debug)]
struct FsState {
    store: NodeStore,
    handles: HashMap<HandleId, Handle>,
    cwd: NormalizedPath,
    next_handle_id: u64,
}

impl FsState {
    fn allocate_handle_id(&mut self) -> HandleId {
        let id = HandleId::new(self.next_handle_id);
        self.next_handle_id += 1;
        id
    }

    fn locate(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> Lookup {
        self.store.ensure_root(path, now);
        self.store.locate(path)
    }

    fn existing(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> FsResult<NodeId> {
        match self.locate(path, now) {
            Lookup::Found(id) => Ok(id),
            missing => Err(not_found(missing, path, false)),
        }
    }

    fn existing_file(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> FsResult<NodeId> {
        let id = self.existing(path, now)?;
        if self.store.get(id)?.is_dir() {
            return Err(FsError::access_denied(path.as_str()));
        }
        Ok(id)
    }

    fn existing_dir(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> FsResult<NodeId> {
        match self.locate(path, now) {
            Lookup::Found(id) if self.store.node(id).is_some_and(Node::is_dir) => Ok(id),
            _ => Err(FsError::directory_not_found(path.as_str())),
        }
    }

    fn create_directory_all(&mut self, path: &NormalizedPath, now: DateTime<Utc>) -> FsResult<NodeId> {
        let mut current = self.store.ensure_root(path, now);
        for segment in path.segments() {
            current = match self.store.child(current, segment) {
                Some(id) if self.store.node(id).is_some_and(Node::is_dir) => id,
                Some(_) => return Err(FsError::already_exists(path.as_str())),
                None => self.store.insert(current, segment, empty_directory(), now)?,
            };
        }
        Ok(current)
    }
}

fn not_found(lookup: Lookup, path: &NormalizedPath, want_dir: bool) -> FsError {
    match lookup {
        Lookup::MissingLeaf { .. } if !want_dir => FsError::file_not_found(path.as_str()),
        _ => FsError::directory_not_found(path.as_str()),
    }
}

fn empty_file() -> NodeKind {
    NodeKind::File {
        content: Vec::new(),
        share: ShareGuard::default(),
    }
}

fn empty_directory() -> NodeKind {
    NodeKind::Directory {
        children: BTreeMap::new(),
    }
}

/// Zero-extend `content` to `len` bytes, refusing sizes that cannot be allocated.
fn grow(content: &mut Vec<u8>, len: usize) -> FsResult<()> {
    content
        .try_reserve(len - content.len())
        .map_err(|_| FsError::invalid_argument("length out of range"))?;
    content.resize(len, 0);
    Ok(())
}

fn leaf_name(path: &NormalizedPath) -> FsResult<&str> {
    path.file_name()
        .ok_or_else(|| FsError::invalid_argument(format!("'{path}' names a volume root")))
}

/// The main filesystem core implementation
pub struct FsCore {
    config: FsConfig,
    normalizer: PathNormalizer,
    resolver: SymlinkResolver,
    clock: Arc<dyn Clock>,
    state: Mutex<FsState>,
    events: EventBus,
}

impl fmt::Debug for FsCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsCore")
            .field("config", &self.config)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl FsCore {
    pub fn new(config: FsConfig) -> FsResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine whose timestamps all come from `clock`.
    pub fn with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> FsResult<Self> {
        let profile = config.profile;
        let normalizer = PathNormalizer::new(profile);
        let resolver = SymlinkResolver::new(normalizer, config.max_symlink_hops());
        let now = clock.now();

        let cwd = match &config.current_directory {
            Some(dir) => normalizer.normalize_absolute(dir)?,
            None => normalizer.default_root(),
        };

        let mut state = FsState {
            store: NodeStore::new(config.case_sensitivity()),
            handles: HashMap::new(),
            cwd: cwd.clone(),
            next_handle_id: 1,
        };
        state.store.ensure_root(&normalizer.default_root(), now);
        state.create_directory_all(&cwd, now)?;

        tracing::debug!(?profile, cwd = %cwd, "mockfs engine created");

        Ok(Self {
            events: EventBus::new(config.track_events),
            config,
            normalizer,
            resolver,
            clock,
            state: Mutex::new(state),
        })
    }

    pub fn windows() -> FsResult<Self> {
        Self::new(FsConfig::windows())
    }

    pub fn unix() -> FsResult<Self> {
        Self::new(FsConfig::unix())
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.config.case_sensitivity()
    }

    fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn separator(&self) -> char {
        self.config.profile.separator()
    }

    fn sharing_violation(&self, path: &NormalizedPath) -> FsError {
        FsError::sharing_violation(path.as_str(), self.config.profile.sharing_violation_code())
    }

    /// Run `perform` between the Before and After notifications for `operation`.
    fn intercept<T>(
        &self,
        operation: FileOperation,
        path: &NormalizedPath,
        destination: Option<&NormalizedPath>,
        perform: impl FnOnce() -> FsResult<T>,
    ) -> FsResult<T> {
        let before = OperationEvent::new(
            operation,
            path.as_str(),
            destination.map(|d| d.as_str().to_string()),
            Phase::Before,
        );
        self.events.publish(&before)?;
        let value = perform()?;
        self.events.publish(&before.after())?;
        Ok(value)
    }

    // Paths

    /// Normalize `path` against the current directory.
    pub fn resolve(&self, path: &str) -> FsResult<NormalizedPath> {
        let cwd = self.lock().cwd.clone();
        self.normalizer.normalize(path, &cwd)
    }

    pub fn current_directory(&self) -> NormalizedPath {
        self.lock().cwd.clone()
    }

    pub fn set_current_directory(&self, path: &str) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::SetCurrentDirectory, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            state.existing_dir(&path, now)?;
            state.cwd = path.clone();
            Ok(())
        })
    }

    // Queries

    fn kind_at(&self, path: &str) -> Option<bool> {
        let path = self.resolve(path).ok()?;
        let now = self.now();
        let mut state = self.lock();
        match state.locate(&path, now) {
            Lookup::Found(id) => state.store.node(id).map(Node::is_dir),
            _ => None,
        }
    }

    /// Whether anything exists at `path`. Malformed paths simply do not exist.
    pub fn exists(&self, path: &str) -> bool {
        self.kind_at(path).is_some()
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.kind_at(path) == Some(false)
    }

    pub fn directory_exists(&self, path: &str) -> bool {
        self.kind_at(path) == Some(true)
    }

    pub fn get_node(&self, path: &str) -> FsResult<Option<EntryInfo>> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        Ok(match state.locate(&path, now) {
            Lookup::Found(id) => state.store.entry_info(id, self.separator()),
            _ => None,
        })
    }

    // Files

    /// Create an empty file, truncating an existing one.
    pub fn create_file(&self, path: &str) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::CreateFile, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            self.write_whole(&mut state, &path, &[], false, now)?;
            tracing::debug!(path = %path, "created file");
            Ok(())
        })
    }

    fn write_whole(
        &self,
        state: &mut FsState,
        path: &NormalizedPath,
        data: &[u8],
        append: bool,
        now: DateTime<Utc>,
    ) -> FsResult<()> {
        let id = match state.locate(path, now) {
            Lookup::Found(id) => {
                let node = state.store.get(id)?;
                if node.is_dir() {
                    return Err(FsError::already_exists(path.as_str()));
                }
                if node.is_read_only() {
                    return Err(FsError::access_denied(path.as_str()));
                }
                if !node
                    .share()
                    .is_some_and(|s| s.can_open(Access::WRITE, Share::READ))
                {
                    return Err(self.sharing_violation(path));
                }
                id
            }
            Lookup::MissingLeaf { parent } => {
                state.store.insert(parent, leaf_name(path)?, empty_file(), now)?
            }
            Lookup::MissingParent => {
                return Err(FsError::directory_not_found(path.as_str()));
            }
        };

        let node = state.store.get_mut(id)?;
        if let Some(content) = node.content_mut() {
            if !append {
                content.clear();
            }
            content.extend_from_slice(data);
        }
        times::apply(&mut node.times, TimeUpdate::Written, now);
        Ok(())
    }

    pub fn write_all_bytes(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::Write, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            self.write_whole(&mut state, &path, data, false, now)?;
            tracing::debug!(path = %path, len = data.len(), "wrote file");
            Ok(())
        })
    }

    pub fn write_all_text(&self, path: &str, text: &str) -> FsResult<()> {
        self.write_all_bytes(path, text.as_bytes())
    }

    pub fn append_all_bytes(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::Write, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            self.write_whole(&mut state, &path, data, true, now)?;
            tracing::debug!(path = %path, len = data.len(), "appended to file");
            Ok(())
        })
    }

    pub fn append_all_text(&self, path: &str, text: &str) -> FsResult<()> {
        self.append_all_bytes(path, text.as_bytes())
    }

    pub fn read_all_bytes(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::Read, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing_file(&path, now)?;
            let node = state.store.get_mut(id)?;
            if !node
                .share()
                .is_some_and(|s| s.can_open(Access::READ, Share::READ))
            {
                return Err(self.sharing_violation(&path));
            }
            times::apply(&mut node.times, TimeUpdate::Read, now);
            Ok(node.content().cloned().unwrap_or_default())
        })
    }

    /// Read a file as UTF-8, dropping a leading byte order mark.
    pub fn read_all_text(&self, path: &str) -> FsResult<String> {
        let bytes = self.read_all_bytes(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
    }

    pub fn read_all_lines(&self, path: &str) -> FsResult<Vec<String>> {
        Ok(self
            .read_all_text(path)?
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Delete a file. A missing file inside an existing directory is not an error.
    pub fn delete_file(&self, path: &str) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::Delete, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = match state.locate(&path, now) {
                Lookup::Found(id) => id,
                Lookup::MissingLeaf { .. } => return Ok(()),
                Lookup::MissingParent => {
                    return Err(FsError::directory_not_found(path.as_str()));
                }
            };
            let node = state.store.get(id)?;
            if node.is_dir() || node.is_read_only() {
                return Err(FsError::access_denied(path.as_str()));
            }
            if !node.share().is_some_and(ShareGuard::can_delete) {
                return Err(self.sharing_violation(&path));
            }
            state.store.remove(id);
            tracing::debug!(path = %path, "deleted file");
            Ok(())
        })
    }

    pub fn move_file(&self, source: &str, destination: &str) -> FsResult<()> {
        let src = self.resolve(source)?;
        let dst = self.resolve(destination)?;
        self.intercept(FileOperation::Move, &src, Some(&dst), || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing_file(&src, now)?;
            if src == dst {
                return Ok(());
            }
            if !src.same_volume(&dst) {
                return Err(FsError::DifferentVolumes);
            }
            let parent = self.move_target_parent(&mut state, id, &dst, now)?;
            if !state.store.get(id)?.share().is_some_and(ShareGuard::can_delete) {
                return Err(self.sharing_violation(&src));
            }
            state.store.move_node(id, parent, leaf_name(&dst)?)?;
            times::apply(&mut state.store.get_mut(id)?.times, TimeUpdate::Moved, now);
            tracing::debug!(from = %src, to = %dst, "moved file");
            Ok(())
        })
    }

    /// Parent that `id` will live under after moving to `dst`.
    fn move_target_parent(
        &self,
        state: &mut FsState,
        id: NodeId,
        dst: &NormalizedPath,
        now: DateTime<Utc>,
    ) -> FsResult<NodeId> {
        match state.locate(dst, now) {
            // Same node under another spelling: a case-only rename.
            Lookup::Found(existing) if existing == id => state
                .store
                .get(id)?
                .parent
                .ok_or_else(|| FsError::io(format!("cannot rename volume root '{dst}'"))),
            Lookup::Found(_) => Err(FsError::already_exists(dst.as_str())),
            Lookup::MissingLeaf { parent } => Ok(parent),
            Lookup::MissingParent => Err(FsError::directory_not_found(dst.as_str())),
        }
    }

    pub fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> FsResult<()> {
        let src = self.resolve(source)?;
        let dst = self.resolve(destination)?;
        self.intercept(FileOperation::Copy, &src, Some(&dst), || {
            let now = self.now();
            let mut state = self.lock();
            let src_id = state.existing_file(&src, now)?;
            let source_node = state.store.get(src_id)?;
            if !source_node
                .share()
                .is_some_and(|s| s.can_open(Access::READ, Share::READ))
            {
                return Err(self.sharing_violation(&src));
            }

            match state.locate(&dst, now) {
                Lookup::Found(dst_id) if dst_id == src_id => Err(FsError::io(format!(
                    "The file '{dst}' cannot be copied onto itself."
                ))),
                Lookup::Found(dst_id) => {
                    let target = state.store.get(dst_id)?;
                    if target.is_dir() || !overwrite {
                        return Err(FsError::already_exists(dst.as_str()));
                    }
                    if target.is_read_only() {
                        return Err(FsError::access_denied(dst.as_str()));
                    }
                    if !target
                        .share()
                        .is_some_and(|s| s.can_open(Access::WRITE, Share::NONE))
                    {
                        return Err(self.sharing_violation(&dst));
                    }

                    let source_node = state.store.get(src_id)?;
                    let content = source_node.content().cloned().unwrap_or_default();
                    let attributes = source_node.attributes;
                    let source_written = source_node.times.written;

                    let target = state.store.get_mut(dst_id)?;
                    if let Some(existing) = target.content_mut() {
                        *existing = content;
                    }
                    target.attributes = attributes;
                    times::apply(&mut target.times, TimeUpdate::CopiedFrom { source_written }, now);
                    tracing::debug!(from = %src, to = %dst, "copied file over existing");
                    Ok(())
                }
                Lookup::MissingLeaf { parent } => {
                    state.store.copy_subtree(src_id, parent, leaf_name(&dst)?, now)?;
                    times::apply(&mut state.store.get_mut(src_id)?.times, TimeUpdate::CopySource, now);
                    tracing::debug!(from = %src, to = %dst, "copied file");
                    Ok(())
                }
                Lookup::MissingParent => Err(FsError::directory_not_found(dst.as_str())),
            }
        })
    }

    // Directories

    /// Create `path` and any missing parents. Existing directories are fine.
    pub fn create_directory(&self, path: &str) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::CreateDirectory, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            state.create_directory_all(&path, now)?;
            tracing::debug!(path = %path, "created directory");
            Ok(())
        })
    }

    /// Fail unless every node below `id` may be deleted.
    fn check_subtree_deletable(&self, state: &FsState, id: NodeId) -> FsResult<()> {
        for node_id in state.store.subtree(id) {
            let node = state.store.get(node_id)?;
            let display = || {
                state
                    .store
                    .path_of(node_id, self.separator())
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_else(|| node.name.clone())
            };
            if node.is_read_only() {
                return Err(FsError::access_denied(display()));
            }
            if node.share().is_some_and(|s| !s.can_delete()) {
                return Err(FsError::sharing_violation(
                    display(),
                    self.config.profile.sharing_violation_code(),
                ));
            }
        }
        Ok(())
    }

    /// Fail unless every open file below `id` shares delete access.
    fn check_subtree_movable(&self, state: &FsState, id: NodeId) -> FsResult<()> {
        for node_id in state.store.subtree(id) {
            let node = state.store.get(node_id)?;
            if node.share().is_some_and(|s| !s.can_delete()) {
                let path = state
                    .store
                    .path_of(node_id, self.separator())
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_else(|| node.name.clone());
                return Err(FsError::sharing_violation(
                    path,
                    self.config.profile.sharing_violation_code(),
                ));
            }
        }
        Ok(())
    }

    /// Remove a directory. With `recursive`, the whole subtree goes or nothing does.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::Delete, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing_dir(&path, now)?;
            if path.is_root() {
                return Err(FsError::io(format!("cannot delete volume root '{path}'")));
            }
            if state.store.has_children(id) {
                if !recursive {
                    return Err(FsError::directory_not_empty(path.as_str()));
                }
                self.check_subtree_deletable(&state, id)?;
            } else if state.store.get(id)?.is_read_only() {
                return Err(FsError::access_denied(path.as_str()));
            }
            state.store.remove(id);
            tracing::debug!(path = %path, recursive, "deleted directory");
            Ok(())
        })
    }

    pub fn move_directory(&self, source: &str, destination: &str) -> FsResult<()> {
        let src = self.resolve(source)?;
        let dst = self.resolve(destination)?;
        self.intercept(FileOperation::Move, &src, Some(&dst), || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing_dir(&src, now)?;
            if src == dst {
                return Ok(());
            }
            if src.is_root() {
                return Err(FsError::io(format!("cannot move volume root '{src}'")));
            }
            if !src.same_volume(&dst) {
                return Err(FsError::DifferentVolumes);
            }
            if src.is_ancestor_of(&dst, state.store.case()) {
                return Err(FsError::io(format!(
                    "Cannot move '{src}' into its own subdirectory '{dst}'."
                )));
            }
            let parent = self.move_target_parent(&mut state, id, &dst, now)?;
            self.check_subtree_movable(&state, id)?;
            state.store.move_node(id, parent, leaf_name(&dst)?)?;
            tracing::debug!(from = %src, to = %dst, "moved directory");
            Ok(())
        })
    }

    /// Deep copy a directory tree to a new location.
    pub fn copy_directory(&self, source: &str, destination: &str) -> FsResult<()> {
        let src = self.resolve(source)?;
        let dst = self.resolve(destination)?;
        self.intercept(FileOperation::Copy, &src, Some(&dst), || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing_dir(&src, now)?;
            if src.eq_with(&dst, state.store.case()) || src.is_ancestor_of(&dst, state.store.case()) {
                return Err(FsError::io(format!(
                    "Cannot copy '{src}' into itself at '{dst}'."
                )));
            }
            let parent = match state.locate(&dst, now) {
                Lookup::Found(_) => return Err(FsError::already_exists(dst.as_str())),
                Lookup::MissingLeaf { parent } => parent,
                Lookup::MissingParent => return Err(FsError::directory_not_found(dst.as_str())),
            };
            for node_id in state.store.subtree(id) {
                let readable = state
                    .store
                    .get(node_id)?
                    .share()
                    .map_or(true, |s| s.can_open(Access::READ, Share::READ));
                if !readable {
                    return Err(self.sharing_violation(&src));
                }
            }
            state.store.copy_subtree(id, parent, leaf_name(&dst)?, now)?;
            tracing::debug!(from = %src, to = %dst, "copied directory");
            Ok(())
        })
    }

    /// Delete whatever is at `path`.
    pub fn delete(&self, path: &str, recursive: bool) -> FsResult<()> {
        let resolved = self.resolve(path)?;
        let is_dir = {
            let now = self.now();
            let mut state = self.lock();
            match state.locate(&resolved, now) {
                Lookup::Found(id) => state.store.get(id)?.is_dir(),
                missing => return Err(not_found(missing, &resolved, false)),
            }
        };
        if is_dir {
            self.delete_directory(path, recursive)
        } else {
            self.delete_file(path)
        }
    }

    // Handles

    pub fn open(&self, path: &str, options: &OpenOptions) -> FsResult<HandleId> {
        if (options.create || options.create_new || options.truncate) && !options.writes() {
            return Err(FsError::invalid_argument(
                "creating or truncating a file requires write access",
            ));
        }
        if options.append && options.truncate {
            return Err(FsError::invalid_argument("append and truncate are mutually exclusive"));
        }

        let path = self.resolve(path)?;
        self.intercept(FileOperation::Open, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            if state.handles.len() >= self.config.limits.max_open_handles as usize {
                return Err(FsError::io("too many open files"));
            }

            let access = Access::from_options(options);
            let share = Share::from_modes(&options.share);

            let (id, created) = match state.locate(&path, now) {
                Lookup::Found(id) => {
                    let node = state.store.get(id)?;
                    if options.create_new {
                        return Err(FsError::already_exists(path.as_str()));
                    }
                    if node.is_dir() || (access.write && node.is_read_only()) {
                        return Err(FsError::access_denied(path.as_str()));
                    }
                    if !node.share().is_some_and(|s| s.can_open(access, share)) {
                        return Err(self.sharing_violation(&path));
                    }
                    (id, false)
                }
                Lookup::MissingLeaf { parent } if options.create || options.create_new => {
                    (state.store.insert(parent, leaf_name(&path)?, empty_file(), now)?, true)
                }
                missing => return Err(not_found(missing, &path, false)),
            };

            let handle_id = state.allocate_handle_id();
            let node = state.store.get_mut(id)?;
            if let Some(guard) = node.share_mut() {
                guard.grant(handle_id, access, share);
            }
            if options.truncate {
                if let Some(content) = node.content_mut() {
                    content.clear();
                }
            }
            if !created {
                let update = if access.write {
                    TimeUpdate::OpenedForWrite
                } else {
                    TimeUpdate::OpenedForRead
                };
                times::apply(&mut node.times, update, now);
            }

            state.handles.insert(
                handle_id,
                Handle {
                    node_id: id,
                    access,
                    append: options.append,
                },
            );
            tracing::debug!(path = %path, handle = handle_id.as_u64(), ?access, "opened file");
            Ok(handle_id)
        })
    }

    fn unknown_handle(handle_id: HandleId) -> FsError {
        FsError::invalid_argument(format!("unknown handle {}", handle_id.as_u64()))
    }

    pub fn read(&self, handle_id: HandleId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let state = self.lock();
        let handle = state
            .handles
            .get(&handle_id)
            .ok_or_else(|| Self::unknown_handle(handle_id))?;
        if !handle.access.read {
            return Err(FsError::access_denied(format!("handle {}", handle_id.as_u64())));
        }
        let content = state
            .store
            .get(handle.node_id)?
            .content()
            .ok_or_else(|| FsError::invalid_state("handle does not refer to a file"))?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        Ok(n)
    }

    /// Write `data` at `offset`; append handles always write at the end.
    pub fn write(&self, handle_id: HandleId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let now = self.now();
        let mut state = self.lock();
        let FsState { handles, store, .. } = &mut *state;
        let handle = handles
            .get(&handle_id)
            .ok_or_else(|| Self::unknown_handle(handle_id))?;
        if !handle.access.write {
            return Err(FsError::access_denied(format!("handle {}", handle_id.as_u64())));
        }

        let node = store.get_mut(handle.node_id)?;
        let content = node
            .content_mut()
            .ok_or_else(|| FsError::invalid_state("handle does not refer to a file"))?;
        let start = if handle.append {
            content.len()
        } else {
            usize::try_from(offset).map_err(|_| FsError::invalid_argument("offset out of range"))?
        };
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| FsError::invalid_argument("offset out of range"))?;
        if content.len() < end {
            grow(content, end)?;
        }
        content[start..end].copy_from_slice(data);
        times::apply(&mut node.times, TimeUpdate::Written, now);
        Ok(data.len())
    }

    pub fn set_len(&self, handle_id: HandleId, len: u64) -> FsResult<()> {
        let now = self.now();
        let mut state = self.lock();
        let FsState { handles, store, .. } = &mut *state;
        let handle = handles
            .get(&handle_id)
            .ok_or_else(|| Self::unknown_handle(handle_id))?;
        if !handle.access.write {
            return Err(FsError::access_denied(format!("handle {}", handle_id.as_u64())));
        }
        let len = usize::try_from(len).map_err(|_| FsError::invalid_argument("length out of range"))?;
        let node = store.get_mut(handle.node_id)?;
        if let Some(content) = node.content_mut() {
            if content.len() < len {
                grow(content, len)?;
            } else {
                content.truncate(len);
            }
        }
        times::apply(&mut node.times, TimeUpdate::Written, now);
        Ok(())
    }

    /// Current length of the file behind a handle.
    pub fn handle_len(&self, handle_id: HandleId) -> FsResult<u64> {
        let state = self.lock();
        let handle = state
            .handles
            .get(&handle_id)
            .ok_or_else(|| Self::unknown_handle(handle_id))?;
        Ok(state.store.get(handle.node_id)?.len())
    }

    pub fn close(&self, handle_id: HandleId) -> FsResult<()> {
        let mut state = self.lock();
        let handle = state
            .handles
            .remove(&handle_id)
            .ok_or_else(|| Self::unknown_handle(handle_id))?;
        if let Some(guard) = state.store.node_mut(handle.node_id).and_then(Node::share_mut) {
            guard.release(handle_id);
        }
        // A file deleted while open goes away with its last handle.
        state.store.collect_if_orphaned(handle.node_id);
        tracing::debug!(handle = handle_id.as_u64(), "closed handle");
        Ok(())
    }

    // Enumeration

    pub fn enumerate_files(
        &self,
        path: &str,
        pattern: &str,
        option: SearchOption,
    ) -> FsResult<Enumeration<'_>> {
        self.enumerate(path, pattern, option, EntryFilter::Files)
    }

    pub fn enumerate_directories(
        &self,
        path: &str,
        pattern: &str,
        option: SearchOption,
    ) -> FsResult<Enumeration<'_>> {
        self.enumerate(path, pattern, option, EntryFilter::Directories)
    }

    pub fn enumerate_entries(
        &self,
        path: &str,
        pattern: &str,
        option: SearchOption,
    ) -> FsResult<Enumeration<'_>> {
        self.enumerate(path, pattern, option, EntryFilter::Both)
    }

    fn enumerate(
        &self,
        path: &str,
        pattern: &str,
        option: SearchOption,
        filter: EntryFilter,
    ) -> FsResult<Enumeration<'_>> {
        let pattern = SearchPattern::compile(pattern, self.profile(), self.case_sensitivity())?;
        let mut dir = self.resolve(path)?;
        if let Some(sub) = pattern.directory() {
            dir = self.normalizer.normalize(sub, &dir)?;
        }

        let root = self.intercept(FileOperation::Enumerate, &dir, None, || {
            let now = self.now();
            let mut state = self.lock();
            state.store.ensure_root(&dir, now);
            let target = self.resolver.dereference(&state.store, &dir)?;
            state.existing_dir(&target, now)
        })?;
        Ok(Enumeration::new(self, dir, root, pattern, option, filter))
    }

    pub(crate) fn list_children(&self, id: NodeId) -> Option<Vec<ChildEntry>> {
        let state = self.lock();
        if !state.store.node(id)?.is_dir() || !state.store.is_attached(id) {
            return None;
        }
        Some(
            state
                .store
                .children(id)
                .into_iter()
                .filter_map(|child| state.store.node(child))
                .map(|node| ChildEntry {
                    id: node.id,
                    name: node.name.clone(),
                    is_dir: node.is_dir(),
                    is_link: node.link_target.is_some(),
                })
                .collect(),
        )
    }

    // Symbolic links

    pub fn create_file_symlink(&self, path: &str, target: &str) -> FsResult<()> {
        self.create_symlink(path, target, empty_file())
    }

    pub fn create_directory_symlink(&self, path: &str, target: &str) -> FsResult<()> {
        self.create_symlink(path, target, empty_directory())
    }

    fn create_symlink(&self, path: &str, target: &str, kind: NodeKind) -> FsResult<()> {
        if target.trim().is_empty() {
            return Err(FsError::invalid_argument(
                "Path cannot be the empty string or all whitespace.",
            ));
        }
        let path = self.resolve(path)?;
        let base = path.parent().unwrap_or_else(|| path.clone());
        let resolved_target = self.normalizer.normalize(target, &base)?;

        self.intercept(FileOperation::CreateSymlink, &path, Some(&resolved_target), || {
            let now = self.now();
            let mut state = self.lock();
            let parent = match state.locate(&path, now) {
                Lookup::Found(_) => return Err(FsError::already_exists(path.as_str())),
                Lookup::MissingLeaf { parent } => parent,
                Lookup::MissingParent => return Err(FsError::directory_not_found(path.as_str())),
            };
            let id = state.store.insert(parent, leaf_name(&path)?, kind, now)?;
            state.store.get_mut(id)?.link_target = Some(target.to_string());
            tracing::debug!(path = %path, link_target = target, "created symlink");
            Ok(())
        })
    }

    /// Target recorded on the link at `path`, or `None` for a regular node.
    pub fn link_target(&self, path: &str) -> FsResult<Option<String>> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        let id = state.existing(&path, now)?;
        Ok(state.store.get(id)?.link_target.clone())
    }

    /// Resolve the link at `path`, one hop or through the whole chain.
    pub fn resolve_link_target(&self, path: &str, follow_to_final_target: bool) -> FsResult<NormalizedPath> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        state.store.ensure_root(&path, now);
        self.resolver.resolve(&state.store, &path, follow_to_final_target)
    }

    // Attributes

    pub fn get_attributes(&self, path: &str) -> FsResult<FileAttributes> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        let id = state.existing(&path, now)?;
        Ok(state.store.get(id)?.visible_attributes())
    }

    /// Replace the caller-controlled attribute bits. DIRECTORY and
    /// REPARSE_POINT always reflect the node itself.
    pub fn set_attributes(&self, path: &str, attributes: FileAttributes) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::SetAttributes, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing(&path, now)?;
            let node = state.store.get_mut(id)?;
            let mut stored = attributes;
            stored.remove(FileAttributes::DIRECTORY);
            stored.remove(FileAttributes::REPARSE_POINT);
            stored.remove(FileAttributes::NORMAL);
            node.attributes = stored;
            times::apply(&mut node.times, TimeUpdate::AttributesChanged, now);
            Ok(())
        })
    }

    // Times

    /// Timestamps at `path`; missing paths report the 1601-01-01 sentinel.
    pub fn get_times(&self, path: &str) -> FsResult<FileTimes> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        Ok(match state.locate(&path, now) {
            Lookup::Found(id) => state.store.get(id)?.times,
            _ => times::missing_file_times(),
        })
    }

    pub fn get_time_utc(&self, path: &str, kind: TimeKind) -> FsResult<DateTime<Utc>> {
        Ok(self.get_times(path)?.get(kind))
    }

    pub fn get_time_local(&self, path: &str, kind: TimeKind) -> FsResult<DateTime<Local>> {
        Ok(self.get_times(path)?.get_local(kind))
    }

    pub fn set_time_utc(&self, path: &str, kind: TimeKind, value: DateTime<Utc>) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::SetTimes, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing(&path, now)?;
            state.store.get_mut(id)?.times.set(kind, value);
            Ok(())
        })
    }

    pub fn set_time_local(&self, path: &str, kind: TimeKind, value: DateTime<Local>) -> FsResult<()> {
        self.set_time_utc(path, kind, value.with_timezone(&Utc))
    }

    // Access control

    pub fn get_access_control(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = self.resolve(path)?;
        let now = self.now();
        let mut state = self.lock();
        let id = state.existing(&path, now)?;
        Ok(state.store.get(id)?.access_control.clone())
    }

    /// Store an opaque security descriptor. Timestamps are left alone.
    pub fn set_access_control(&self, path: &str, descriptor: Vec<u8>) -> FsResult<()> {
        let path = self.resolve(path)?;
        self.intercept(FileOperation::SetAccessControl, &path, None, || {
            let now = self.now();
            let mut state = self.lock();
            let id = state.existing(&path, now)?;
            let node = state.store.get_mut(id)?;
            node.access_control = descriptor;
            times::apply(&mut node.times, TimeUpdate::AccessControlChanged, now);
            Ok(())
        })
    }

    // Events

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe<F, S>(&self, filter: F, sink: S) -> Subscription
    where
        F: Into<EventFilter>,
        S: EventSink + 'static,
    {
        self.events.subscribe(filter, sink)
    }

    // Statistics

    /// Counts of reachable nodes; volume roots count as directories.
    pub fn stats(&self) -> FsStats {
        let state = self.lock();
        let (files, directories) = state.store.counts();
        FsStats {
            roots: state.store.root_count() as u32,
            files: files as u32,
            directories: directories as u32,
            open_handles: state.handles.len() as u32,
            subscriptions: self.events.subscription_count() as u32,
        }
    }
}
