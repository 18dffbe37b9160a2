mod common;

use common::{sorted, unix_fs, windows_fs};
use mockfs_core::*;

#[test]
fn test_create_read_then_delete_tree() {
    let fs = unix_fs();
    fs.create_directory("/a/b").unwrap();
    fs.write_all_text("/a/b/c.txt", "hi").unwrap();
    assert_eq!(fs.read_all_text("/a/b/c.txt").unwrap(), "hi");

    let err = fs.delete_directory("/a/b", false).unwrap_err();
    assert!(matches!(err, FsError::DirectoryNotEmpty { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(fs.file_exists("/a/b/c.txt"));

    fs.delete_directory("/a/b", true).unwrap();
    assert!(!fs.exists("/a/b"));
    assert!(!fs.exists("/a/b/c.txt"));
    assert!(fs.directory_exists("/a"));
}

#[test]
fn test_move_directory_then_rename_file() {
    let fs = unix_fs();
    fs.create_directory("/a/sub").unwrap();
    fs.write_all_text("/a/x.txt", "x").unwrap();
    fs.write_all_text("/a/sub/z", "z").unwrap();

    fs.move_directory("/a", "/a2").unwrap();
    fs.move_file("/a2/x.txt", "/a2/y.txt").unwrap();

    assert!(!fs.exists("/a"));
    let entries = fs
        .enumerate_entries("/a2", "*", SearchOption::AllDirectories)
        .unwrap();
    assert_eq!(
        sorted(entries),
        vec!["/a2/sub", "/a2/sub/z", "/a2/y.txt"]
    );
    assert_eq!(fs.read_all_text("/a2/y.txt").unwrap(), "x");
    assert_eq!(fs.read_all_text("/a2/sub/z").unwrap(), "z");
}

#[test]
fn test_copy_is_independent_both_ways() {
    let fs = windows_fs();
    fs.write_all_text("C:\\src.txt", "original").unwrap();
    fs.copy_file("C:\\src.txt", "C:\\dst.txt", false).unwrap();

    fs.append_all_text("C:\\src.txt", "+src").unwrap();
    assert_eq!(fs.read_all_text("C:\\dst.txt").unwrap(), "original");

    fs.write_all_text("C:\\dst.txt", "changed").unwrap();
    assert_eq!(fs.read_all_text("C:\\src.txt").unwrap(), "original+src");
}

#[test]
fn test_copy_overwrite_rules() {
    let fs = windows_fs();
    fs.write_all_text("C:\\a", "a").unwrap();
    fs.write_all_text("C:\\b", "b").unwrap();

    assert!(matches!(
        fs.copy_file("C:\\a", "C:\\b", false),
        Err(FsError::AlreadyExists { .. })
    ));
    fs.copy_file("C:\\a", "C:\\b", true).unwrap();
    assert_eq!(fs.read_all_text("C:\\b").unwrap(), "a");

    assert!(matches!(fs.copy_file("C:\\a", "C:\\A", true), Err(FsError::Io { .. })));
    assert!(matches!(
        fs.copy_file("C:\\missing", "C:\\c", false),
        Err(FsError::FileNotFound { .. })
    ));
    assert!(matches!(
        fs.copy_file("C:\\a", "C:\\no\\c", false),
        Err(FsError::DirectoryNotFound { .. })
    ));
}

#[test]
fn test_copy_directory_is_deep() {
    let fs = windows_fs();
    fs.create_directory("C:\\src\\inner").unwrap();
    fs.write_all_text("C:\\src\\inner\\f.txt", "one").unwrap();

    fs.copy_directory("C:\\src", "C:\\dst").unwrap();
    fs.write_all_text("C:\\src\\inner\\f.txt", "two").unwrap();

    assert_eq!(fs.read_all_text("C:\\dst\\inner\\f.txt").unwrap(), "one");
    assert!(matches!(
        fs.copy_directory("C:\\src", "C:\\src\\inner\\again"),
        Err(FsError::Io { .. })
    ));
    assert!(matches!(
        fs.copy_directory("C:\\src", "C:\\dst"),
        Err(FsError::AlreadyExists { .. })
    ));
}

#[test]
fn test_windows_lookup_ignores_case_but_keeps_display() {
    let fs = windows_fs();
    fs.create_directory("C:\\Foo").unwrap();
    fs.write_all_text("c:\\foo\\Bar.TXT", "data").unwrap();

    assert!(fs.directory_exists("c:\\foo"));
    assert!(fs.file_exists("C:\\FOO\\bar.txt"));

    let node = fs.get_node("c:/FOO/bar.txt").unwrap().unwrap();
    assert_eq!(node.path, "C:\\Foo\\Bar.TXT");
    assert_eq!(node.name, "Bar.TXT");
    assert_eq!(node.len, 4);

    assert!(matches!(fs.create_file("C:\\FOO"), Err(FsError::AlreadyExists { .. })));
}

#[test]
fn test_unix_lookup_is_exact() {
    let fs = unix_fs();
    fs.create_directory("/Foo").unwrap();
    assert!(fs.directory_exists("/Foo"));
    assert!(!fs.exists("/foo"));

    fs.create_directory("/foo").unwrap();
    fs.write_all_text("/foo/x", "lower").unwrap();
    assert!(!fs.exists("/Foo/x"));
}

#[test]
fn test_case_only_rename() {
    let fs = windows_fs();
    fs.write_all_text("C:\\readme.md", "r").unwrap();
    fs.move_file("C:\\readme.md", "C:\\README.md").unwrap();

    let node = fs.get_node("C:\\readme.md").unwrap().unwrap();
    assert_eq!(node.name, "README.md");
    let files = fs
        .enumerate_files("C:\\", "*.md", SearchOption::TopDirectoryOnly)
        .unwrap();
    assert_eq!(sorted(files), vec!["C:\\README.md"]);
}

#[test]
fn test_move_edge_cases() {
    let fs = windows_fs();
    fs.create_directory("C:\\a\\b").unwrap();
    fs.write_all_text("C:\\f.txt", "f").unwrap();
    fs.write_all_text("C:\\g.txt", "g").unwrap();

    fs.move_file("C:\\f.txt", "C:\\f.txt").unwrap();
    assert!(fs.file_exists("C:\\f.txt"));

    assert!(matches!(
        fs.move_file("C:\\f.txt", "C:\\g.txt"),
        Err(FsError::AlreadyExists { .. })
    ));
    assert!(matches!(
        fs.move_file("C:\\f.txt", "D:\\f.txt"),
        Err(FsError::DifferentVolumes)
    ));
    assert!(matches!(
        fs.move_directory("C:\\a", "D:\\a"),
        Err(FsError::DifferentVolumes)
    ));
    assert!(matches!(
        fs.move_directory("C:\\a", "C:\\a\\b\\c"),
        Err(FsError::Io { .. })
    ));
    assert!(matches!(
        fs.move_file("C:\\f.txt", "C:\\nowhere\\f.txt"),
        Err(FsError::DirectoryNotFound { .. })
    ));
    assert!(matches!(
        fs.move_directory("C:\\missing", "C:\\x"),
        Err(FsError::DirectoryNotFound { .. })
    ));

    // Nothing above changed the tree.
    assert!(fs.directory_exists("C:\\a\\b"));
    assert_eq!(fs.read_all_text("C:\\g.txt").unwrap(), "g");
}

#[test]
fn test_unc_volumes() {
    let fs = windows_fs();
    fs.create_directory("\\\\server\\share\\docs").unwrap();
    fs.write_all_text("//server/share/docs/a.txt", "unc").unwrap();
    assert_eq!(
        fs.read_all_text("\\\\SERVER\\share\\docs\\a.txt").unwrap(),
        "unc"
    );
    assert!(matches!(
        fs.move_file("\\\\server\\share\\docs\\a.txt", "C:\\a.txt"),
        Err(FsError::DifferentVolumes)
    ));
    assert!(matches!(
        fs.create_directory("\\\\server"),
        Err(FsError::InvalidArgument { .. })
    ));
}

#[test]
fn test_path_errors_surface_from_operations() {
    let fs = windows_fs();
    assert!(matches!(fs.create_file(""), Err(FsError::NotLegalForm)));
    assert!(matches!(fs.create_file("C:\\a<b"), Err(FsError::IllegalCharacters)));
    assert!(matches!(fs.create_file("C:\\a:b"), Err(FsError::Unsupported { .. })));
    assert!(!fs.exists("C:\\a|b"));
}

#[test]
fn test_trailing_dots_and_spaces_name_the_same_file() {
    let fs = windows_fs();
    fs.write_all_text("C:\\file.txt. . ", "x").unwrap();
    assert!(fs.file_exists("C:\\file.txt"));
    assert_eq!(
        fs.get_node("C:\\file.txt").unwrap().unwrap().name,
        "file.txt"
    );
}

#[test]
fn test_recursive_delete_is_atomic_with_read_only_descendant() {
    let fs = windows_fs();
    fs.create_directory("C:\\r\\s").unwrap();
    fs.write_all_text("C:\\r\\one.txt", "1").unwrap();
    fs.write_all_text("C:\\r\\s\\locked.txt", "2").unwrap();
    fs.set_attributes("C:\\r\\s\\locked.txt", FileAttributes::READ_ONLY)
        .unwrap();

    let err = fs.delete_directory("C:\\r", true).unwrap_err();
    assert!(matches!(err, FsError::AccessDenied { .. }));
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    assert!(fs.file_exists("C:\\r\\one.txt"));
    assert!(fs.file_exists("C:\\r\\s\\locked.txt"));
    assert!(fs.directory_exists("C:\\r\\s"));
}

#[test]
fn test_generic_delete() {
    let fs = windows_fs();
    fs.create_directory("C:\\d\\e").unwrap();
    fs.write_all_text("C:\\d\\f", "f").unwrap();

    fs.delete("C:\\d\\f", false).unwrap();
    assert!(!fs.exists("C:\\d\\f"));
    assert!(matches!(
        fs.delete("C:\\d", false),
        Err(FsError::DirectoryNotEmpty { .. })
    ));
    fs.delete("C:\\d", true).unwrap();
    assert!(!fs.exists("C:\\d"));
    assert!(matches!(fs.delete("C:\\d", true), Err(FsError::FileNotFound { .. })));
}

#[test]
fn test_delete_file_edge_cases() {
    let fs = windows_fs();
    fs.create_directory("C:\\dir").unwrap();
    fs.delete_file("C:\\dir\\absent.txt").unwrap();
    assert!(matches!(fs.delete_file("C:\\dir"), Err(FsError::AccessDenied { .. })));
    assert!(matches!(
        fs.delete_directory("C:\\", true),
        Err(FsError::Io { .. })
    ));
}

#[test]
fn test_handles_survive_a_move() {
    let fs = windows_fs();
    fs.create_directory("C:\\old").unwrap();
    fs.write_all_text("C:\\old\\f.txt", "abc").unwrap();
    let share_all = [ShareMode::Read, ShareMode::Write, ShareMode::Delete];
    let h = fs
        .open("C:\\old\\f.txt", &OpenOptions::read_write().with_share(&share_all))
        .unwrap();

    fs.move_directory("C:\\old", "C:\\new").unwrap();
    fs.write(h, 3, b"def").unwrap();
    fs.close(h).unwrap();

    assert_eq!(fs.read_all_text("C:\\new\\f.txt").unwrap(), "abcdef");
}

#[test]
fn test_deleted_file_stays_usable_through_open_handle() {
    let fs = windows_fs();
    fs.write_all_text("C:\\temp.dat", "payload").unwrap();
    let h = fs
        .open(
            "C:\\temp.dat",
            &OpenOptions::read_only().with_share(&[ShareMode::Read, ShareMode::Delete]),
        )
        .unwrap();

    fs.delete_file("C:\\temp.dat").unwrap();
    assert!(!fs.exists("C:\\temp.dat"));

    let mut buf = [0u8; 16];
    let n = fs.read(h, 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"payload");

    fs.write_all_text("C:\\temp.dat", "fresh").unwrap();
    fs.close(h).unwrap();

    // Closing the old handle neither resurrects nor disturbs the new file.
    assert_eq!(fs.read_all_text("C:\\temp.dat").unwrap(), "fresh");
    assert_eq!(fs.stats().open_handles, 0);
}
