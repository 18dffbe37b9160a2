#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use mockfs_core::{FsConfig, FsCore, ManualClock};

/// Route engine logs to the test harness when RUST_LOG is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes)
}

pub fn windows_fs() -> FsCore {
    init_tracing();
    FsCore::new(FsConfig::windows()).unwrap()
}

pub fn unix_fs() -> FsCore {
    init_tracing();
    FsCore::new(FsConfig::unix()).unwrap()
}

pub fn fs_with_clock(config: FsConfig) -> (FsCore, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new(t0()));
    let fs = FsCore::with_clock(config, clock.clone()).unwrap();
    (fs, clock)
}

pub fn sorted<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut v: Vec<String> = items.into_iter().collect();
    v.sort();
    v
}
