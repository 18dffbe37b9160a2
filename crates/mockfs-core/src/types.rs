//! Core type definitions for mockfs

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Access a handle lets *other* handles have while it stays open
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareMode {
    Read,
    Write,
    Delete,
}

/// Options for [`FsCore::open`](crate::FsCore::open)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub share: Vec<ShareMode>,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            share: vec![ShareMode::Read],
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn with_share(mut self, share: &[ShareMode]) -> Self {
        self.share = share.to_vec();
        self
    }

    /// Whether the handle may modify the file (write, append or truncate).
    pub fn writes(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

/// Windows-style attribute bit set
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const READ_ONLY: Self = Self(0x1);
    pub const HIDDEN: Self = Self(0x2);
    pub const SYSTEM: Self = Self(0x4);
    pub const DIRECTORY: Self = Self(0x10);
    pub const ARCHIVE: Self = Self(0x20);
    pub const NORMAL: Self = Self(0x80);
    pub const TEMPORARY: Self = Self(0x100);
    pub const REPARSE_POINT: Self = Self(0x400);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FileAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FileAttributes, &str); 8] = [
            (FileAttributes::READ_ONLY, "READ_ONLY"),
            (FileAttributes::HIDDEN, "HIDDEN"),
            (FileAttributes::SYSTEM, "SYSTEM"),
            (FileAttributes::DIRECTORY, "DIRECTORY"),
            (FileAttributes::ARCHIVE, "ARCHIVE"),
            (FileAttributes::NORMAL, "NORMAL"),
            (FileAttributes::TEMPORARY, "TEMPORARY"),
            (FileAttributes::REPARSE_POINT, "REPARSE_POINT"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "FileAttributes(empty)")
        } else {
            write!(f, "FileAttributes({})", names.join(" | "))
        }
    }
}

/// File timestamps, stored in UTC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileTimes {
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub written: DateTime<Utc>,
}

impl FileTimes {
    pub fn uniform(at: DateTime<Utc>) -> Self {
        Self {
            created: at,
            accessed: at,
            written: at,
        }
    }

    pub fn get(&self, kind: TimeKind) -> DateTime<Utc> {
        match kind {
            TimeKind::Creation => self.created,
            TimeKind::LastAccess => self.accessed,
            TimeKind::LastWrite => self.written,
        }
    }

    pub fn get_local(&self, kind: TimeKind) -> DateTime<Local> {
        self.get(kind).with_timezone(&Local)
    }

    pub(crate) fn set(&mut self, kind: TimeKind, value: DateTime<Utc>) {
        match kind {
            TimeKind::Creation => self.created = value,
            TimeKind::LastAccess => self.accessed = value,
            TimeKind::LastWrite => self.written = value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeKind {
    Creation,
    LastAccess,
    LastWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Whether enumeration descends into subdirectories
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchOption {
    #[default]
    TopDirectoryOnly,
    AllDirectories,
}

/// Point-in-time view of a node
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub len: u64,
    pub attributes: FileAttributes,
    pub times: FileTimes,
    pub link_target: Option<String>,
}

impl EntryInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.link_target.is_some()
    }
}

/// Engine statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsStats {
    pub roots: u32,
    pub files: u32,
    pub directories: u32,
    pub open_handles: u32,
    pub subscriptions: u32,
}
