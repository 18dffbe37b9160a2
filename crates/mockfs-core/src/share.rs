//! Windows-style share modes
//!
//! Each open file carries a [`ShareGuard`] listing its outstanding handles.
//! A new open must be compatible in both directions: its share flags must
//! allow what existing handles already do, and every existing handle's share
//! flags must allow what the new handle wants to do.

use crate::types::{HandleId, OpenOptions, ShareMode};

/// Access a handle actually uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Access {
    pub read: bool,
    pub write: bool,
}

impl Access {
    pub const READ: Access = Access {
        read: true,
        write: false,
    };
    pub const WRITE: Access = Access {
        read: false,
        write: true,
    };

    pub fn from_options(options: &OpenOptions) -> Self {
        let write = options.writes();
        Self {
            // An open with no explicit access still observes the file.
            read: options.read || !write,
            write,
        }
    }
}

/// Access a handle lets other handles have
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Share {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Share {
    pub const NONE: Share = Share {
        read: false,
        write: false,
        delete: false,
    };
    pub const READ: Share = Share {
        read: true,
        write: false,
        delete: false,
    };

    pub fn from_modes(modes: &[ShareMode]) -> Self {
        Self {
            read: modes.contains(&ShareMode::Read),
            write: modes.contains(&ShareMode::Write),
            delete: modes.contains(&ShareMode::Delete),
        }
    }

    fn permits(self, access: Access) -> bool {
        (!access.read || self.read) && (!access.write || self.write)
    }
}

#[derive(Clone, Debug)]
struct Grant {
    handle: HandleId,
    access: Access,
    share: Share,
}

/// Outstanding opens on one file
#[derive(Clone, Debug, Default)]
pub(crate) struct ShareGuard {
    grants: Vec<Grant>,
}

impl ShareGuard {
    pub fn is_open(&self) -> bool {
        !self.grants.is_empty()
    }

    /// Whether a new open with `access`/`share` is compatible with every existing handle.
    pub fn can_open(&self, access: Access, share: Share) -> bool {
        self.grants
            .iter()
            .all(|g| share.permits(g.access) && g.share.permits(access))
    }

    /// Record a granted open. Callers check [`can_open`](Self::can_open) first.
    pub fn grant(&mut self, handle: HandleId, access: Access, share: Share) {
        self.grants.push(Grant {
            handle,
            access,
            share,
        });
    }

    /// Delete and move need every outstanding handle to share delete.
    pub fn can_delete(&self) -> bool {
        self.grants.iter().all(|g| g.share.delete)
    }

    pub fn release(&mut self, handle: HandleId) {
        self.grants.retain(|g| g.handle != handle);
    }
}
