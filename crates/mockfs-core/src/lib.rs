//! mockfs core: a deterministic in-memory filesystem engine
//!
//! [`FsCore`] stands in for real OS file I/O in tests. It models drive and
//! UNC volumes (or a single Unix root), case rules, attributes, timestamps
//! driven by an injectable [`Clock`], Windows-style share modes, symbolic
//! links and wildcard search, and lets subscribers intercept every operation
//! before and after it runs.
//!
//! ```
//! use mockfs_core::{FsConfig, FsCore, SearchOption};
//!
//! let fs = FsCore::new(FsConfig::windows()).unwrap();
//! fs.create_directory("C:\\logs").unwrap();
//! fs.write_all_text("c:/LOGS/today.txt", "hello").unwrap();
//!
//! let files: Vec<String> = fs
//!     .enumerate_files("C:\\logs", "*.txt", SearchOption::TopDirectoryOnly)
//!     .unwrap()
//!     .into_iter()
//!     .collect();
//! assert_eq!(files, vec!["C:\\logs\\today.txt".to_string()]);
//! ```

pub mod config;
pub mod enumerate;
pub mod error;
pub mod events;
pub mod path;
pub mod pattern;
pub(crate) mod share;
pub(crate) mod store;
pub(crate) mod symlink;
pub mod times;
pub mod types;
pub mod vfs;

// Re-export key types for convenience
pub use config::{CaseSensitivity, FsConfig, FsLimits, Profile};
pub use enumerate::Enumeration;
pub use error::{AggregateError, ConfigError, ErrorKind, FsError, FsResult};
pub use events::{
    EventBus, EventFilter, EventSink, FileOperation, OperationEvent, Phase, Subscription,
    SubscriptionId,
};
pub use path::{NormalizedPath, PathNormalizer};
pub use pattern::SearchPattern;
pub use times::{Clock, ManualClock, SystemClock};
pub use types::*;
pub use vfs::FsCore;
