//! Clocks and the timestamp update policy

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::types::FileTimes;

/// Source of "now" for every timestamp the engine writes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Time reported for paths that do not exist: 1601-01-01T00:00:00Z.
pub fn missing_file_time() -> DateTime<Utc> {
    DateTime::from_timestamp(-FILETIME_EPOCH_OFFSET_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn missing_file_times() -> FileTimes {
    FileTimes::uniform(missing_file_time())
}

/// What happened to a node, as far as its timestamps are concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUpdate {
    Created,
    Written,
    Read,
    OpenedForRead,
    OpenedForWrite,
    AttributesChanged,
    /// The node is a fresh copy of a source last written at `source_written`.
    CopiedFrom { source_written: DateTime<Utc> },
    CopySource,
    Moved,
    AccessControlChanged,
}

/// Apply `update` to `times` with `now` from the engine clock.
pub fn apply(times: &mut FileTimes, update: TimeUpdate, now: DateTime<Utc>) {
    match update {
        TimeUpdate::Created => *times = FileTimes::uniform(now),
        TimeUpdate::Written | TimeUpdate::OpenedForWrite => {
            times.accessed = now;
            times.written = now;
        }
        TimeUpdate::Read | TimeUpdate::OpenedForRead | TimeUpdate::AttributesChanged => {
            times.accessed = now;
        }
        TimeUpdate::CopiedFrom { source_written } => {
            times.created = now;
            times.accessed = now;
            times.written = source_written;
        }
        // Moves keep the node itself, so its times travel unchanged.
        TimeUpdate::CopySource | TimeUpdate::Moved | TimeUpdate::AccessControlChanged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(t(0));
        assert_eq!(clock.now(), t(0));
        assert_eq!(clock.advance(Duration::seconds(5)), t(5));
        clock.set(t(100));
        assert_eq!(clock.now(), t(100));
    }

    #[test]
    fn test_sentinel() {
        assert_eq!(missing_file_time().to_rfc3339(), "1601-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_update_matrix() {
        let base = FileTimes {
            created: t(0),
            accessed: t(1),
            written: t(2),
        };
        let now = t(50);

        let cases = [
            (TimeUpdate::Created, (now, now, now)),
            (TimeUpdate::Written, (t(0), now, now)),
            (TimeUpdate::Read, (t(0), now, t(2))),
            (TimeUpdate::OpenedForRead, (t(0), now, t(2))),
            (TimeUpdate::OpenedForWrite, (t(0), now, now)),
            (TimeUpdate::AttributesChanged, (t(0), now, t(2))),
            (
                TimeUpdate::CopiedFrom {
                    source_written: t(7),
                },
                (now, now, t(7)),
            ),
            (TimeUpdate::CopySource, (t(0), t(1), t(2))),
            (TimeUpdate::Moved, (t(0), t(1), t(2))),
            (TimeUpdate::AccessControlChanged, (t(0), t(1), t(2))),
        ];

        for (update, (created, accessed, written)) in cases {
            let mut times = base;
            apply(&mut times, update, now);
            assert_eq!(
                times,
                FileTimes {
                    created,
                    accessed,
                    written
                },
                "{update:?}"
            );
        }
    }
}
