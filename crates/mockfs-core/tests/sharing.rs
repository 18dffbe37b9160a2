mod common;

use common::{unix_fs, windows_fs};
use mockfs_core::*;

fn read_sharing(share: &[ShareMode]) -> OpenOptions {
    OpenOptions::read_only().with_share(share)
}

#[test]
fn test_exclusive_open_blocks_everything() {
    let fs = windows_fs();
    fs.write_all_text("C:\\locked.txt", "x").unwrap();
    let h = fs
        .open("C:\\locked.txt", &OpenOptions::read_only().with_share(&[]))
        .unwrap();

    let err = fs.open("C:\\locked.txt", &OpenOptions::read_only()).unwrap_err();
    assert!(matches!(err, FsError::SharingViolation { code: 32, .. }));
    assert_eq!(err.raw_code(), Some(32));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert!(fs.read_all_text("C:\\locked.txt").is_err());
    assert!(fs.write_all_text("C:\\locked.txt", "y").is_err());

    fs.close(h).unwrap();
    assert_eq!(fs.read_all_text("C:\\locked.txt").unwrap(), "x");
}

#[test]
fn test_new_open_must_share_with_existing_handles() {
    let fs = windows_fs();
    fs.create_file("C:\\f").unwrap();
    let h = fs.open("C:\\f", &OpenOptions::read_only()).unwrap();

    // The second open would refuse to share read with the first.
    assert!(matches!(
        fs.open("C:\\f", &read_sharing(&[])),
        Err(FsError::SharingViolation { .. })
    ));
    fs.close(h).unwrap();
}

#[test]
fn test_readers_share_with_readers() {
    let fs = windows_fs();
    fs.write_all_text("C:\\shared.txt", "abc").unwrap();
    let a = fs.open("C:\\shared.txt", &OpenOptions::read_only()).unwrap();
    let b = fs.open("C:\\shared.txt", &OpenOptions::read_only()).unwrap();
    assert_eq!(fs.read_all_text("C:\\shared.txt").unwrap(), "abc");
    assert_eq!(fs.stats().open_handles, 2);
    fs.close(a).unwrap();
    fs.close(b).unwrap();
}

#[test]
fn test_writer_blocked_by_read_only_sharer() {
    let fs = windows_fs();
    fs.write_all_text("C:\\doc", "v1").unwrap();
    let reader = fs.open("C:\\doc", &OpenOptions::read_only()).unwrap();

    let writer = OpenOptions::read_write().with_share(&[ShareMode::Read, ShareMode::Write]);
    assert!(matches!(fs.open("C:\\doc", &writer), Err(FsError::SharingViolation { .. })));
    assert!(matches!(
        fs.write_all_text("C:\\doc", "v2"),
        Err(FsError::SharingViolation { .. })
    ));

    fs.close(reader).unwrap();
    let w = fs.open("C:\\doc", &writer).unwrap();
    fs.write(w, 0, b"v3").unwrap();
    fs.close(w).unwrap();
    assert_eq!(fs.read_all_text("C:\\doc").unwrap(), "v3");
}

#[test]
fn test_write_sharing_allows_concurrent_writers() {
    let fs = windows_fs();
    fs.create_file("C:\\log").unwrap();
    let opts = OpenOptions {
        append: true,
        ..OpenOptions::default()
    }
    .with_share(&[ShareMode::Read, ShareMode::Write]);
    let a = fs.open("C:\\log", &opts).unwrap();
    let b = fs.open("C:\\log", &opts).unwrap();
    fs.write(a, 0, b"a").unwrap();
    fs.write(b, 0, b"b").unwrap();
    fs.close(a).unwrap();
    fs.close(b).unwrap();
    assert_eq!(fs.read_all_text("C:\\log").unwrap(), "ab");
}

#[test]
fn test_delete_and_move_need_delete_share() {
    let fs = windows_fs();
    fs.create_directory("C:\\dir").unwrap();
    fs.write_all_text("C:\\dir\\f", "x").unwrap();
    let h = fs.open("C:\\dir\\f", &OpenOptions::read_only()).unwrap();

    assert!(matches!(fs.delete_file("C:\\dir\\f"), Err(FsError::SharingViolation { .. })));
    assert!(matches!(
        fs.move_file("C:\\dir\\f", "C:\\dir\\g"),
        Err(FsError::SharingViolation { .. })
    ));
    assert!(matches!(
        fs.move_directory("C:\\dir", "C:\\moved"),
        Err(FsError::SharingViolation { .. })
    ));
    assert!(matches!(
        fs.delete_directory("C:\\dir", true),
        Err(FsError::SharingViolation { .. })
    ));
    assert!(fs.file_exists("C:\\dir\\f"));

    // Copying only reads the source.
    fs.copy_file("C:\\dir\\f", "C:\\copy", false).unwrap();

    fs.close(h).unwrap();
    fs.move_directory("C:\\dir", "C:\\moved").unwrap();
    assert!(fs.file_exists("C:\\moved\\f"));
}

#[test]
fn test_copy_over_open_destination_is_refused() {
    let fs = windows_fs();
    fs.write_all_text("C:\\a", "a").unwrap();
    fs.write_all_text("C:\\b", "b").unwrap();
    let h = fs.open("C:\\b", &OpenOptions::read_only()).unwrap();
    assert!(matches!(
        fs.copy_file("C:\\a", "C:\\b", true),
        Err(FsError::SharingViolation { .. })
    ));
    fs.close(h).unwrap();
    fs.copy_file("C:\\a", "C:\\b", true).unwrap();
    assert_eq!(fs.read_all_text("C:\\b").unwrap(), "a");
}

#[test]
fn test_unix_profile_uses_its_own_code() {
    let fs = unix_fs();
    fs.create_file("/x").unwrap();
    let h = fs.open("/x", &OpenOptions::read_write()).unwrap();
    let err = fs.open("/x", &OpenOptions::read_only()).unwrap_err();
    assert!(matches!(err, FsError::SharingViolation { code: 11, .. }));

    let io: std::io::Error = err.into();
    assert_eq!(io.raw_os_error(), None);
    fs.close(h).unwrap();
}

#[test]
fn test_open_modes() {
    let fs = windows_fs();
    assert!(matches!(
        fs.open("C:\\absent", &OpenOptions::read_only()),
        Err(FsError::FileNotFound { .. })
    ));

    let create_new = OpenOptions {
        create_new: true,
        ..OpenOptions::read_write()
    };
    let h = fs.open("C:\\fresh", &create_new).unwrap();
    fs.close(h).unwrap();
    assert!(matches!(
        fs.open("C:\\fresh", &create_new),
        Err(FsError::AlreadyExists { .. })
    ));

    fs.write_all_text("C:\\fresh", "contents").unwrap();
    let truncate = OpenOptions {
        truncate: true,
        ..OpenOptions::read_write()
    };
    let h = fs.open("C:\\fresh", &truncate).unwrap();
    assert_eq!(fs.handle_len(h).unwrap(), 0);
    fs.close(h).unwrap();

    let bad = OpenOptions {
        append: true,
        truncate: true,
        ..OpenOptions::default()
    };
    assert!(matches!(fs.open("C:\\fresh", &bad), Err(FsError::InvalidArgument { .. })));

    fs.create_directory("C:\\dir").unwrap();
    assert!(matches!(
        fs.open("C:\\dir", &OpenOptions::read_only()),
        Err(FsError::AccessDenied { .. })
    ));
}

#[test]
fn test_handle_access_is_enforced() {
    let fs = windows_fs();
    fs.write_all_text("C:\\r", "r").unwrap();
    let h = fs.open("C:\\r", &OpenOptions::read_only()).unwrap();
    assert!(matches!(fs.write(h, 0, b"x"), Err(FsError::AccessDenied { .. })));
    assert!(matches!(fs.set_len(h, 0), Err(FsError::AccessDenied { .. })));
    fs.close(h).unwrap();
}
