#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
//! Integration tests for archive-backed file resolution
//!
//! Builds a game-style root directory with loose files and zip archives,
//! then checks what the server resolves with archives mounted, shadowed,
//! unmounted and with the archive file system switched off.

use nebula_io::{AccessMode, IoConfig, IoContext, IoError, IoServer, SeekOrigin, Stream};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).expect("create archive"));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, contents) in files {
        zip.start_file(*name, options).expect("start entry");
        zip.write_all(contents).expect("write entry");
    }
    zip.finish().expect("finish archive");
}

fn setup(platform: &str) -> (TempDir, IoServer) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = IoConfig::new(dir.path()).with_platform_name(platform);
    let server = IoServer::new(IoContext::new(config).expect("context"));
    (dir, server)
}

fn read_all(server: &IoServer, path: &str) -> Vec<u8> {
    let mut stream = server.create_stream(path).expect("create stream");
    stream.set_access_mode(AccessMode::Read);
    stream.open().expect("open stream");
    let mut data = vec![0u8; stream.size() as usize];
    let n = stream.read(&mut data).expect("read stream");
    assert_eq!(n, data.len());
    assert!(stream.eof());
    stream.close();
    data
}

// --- Standard archive lifecycle ---

#[test]
fn standard_archive_mount_read_unmount() {
    let (dir, server) = setup("win32");
    write_archive(
        &dir.path().join("export_win32.zip"),
        &[("data/hello.txt", &b"hello"[..])],
    );

    assert!(!server.file_exists("root:data/hello.txt"));

    server.mount_standard_archives().unwrap();
    assert!(server.file_exists("root:data/hello.txt"));
    assert!(server.directory_exists("root:data"));
    assert_eq!(read_all(&server, "home:data/hello.txt"), b"hello");

    let stream = server.create_stream("root:data/hello.txt").unwrap();
    assert_eq!(stream.uri().scheme(), "zip");
    assert_eq!(stream.uri().query_value("file"), Some("data/hello.txt"));

    server.unmount_standard_archives().unwrap();
    assert!(!server.file_exists("root:data/hello.txt"));
    assert!(matches!(
        server.create_stream("root:data/hello.txt").unwrap().open(),
        Err(IoError::NotFound(_))
    ));
}

// --- Archive precedence over loose files ---

#[test]
fn archive_precedence_enabled_and_disabled() {
    let (dir, server) = setup("linux");
    std::fs::create_dir(dir.path().join("cfg")).unwrap();
    std::fs::write(dir.path().join("cfg/game.ini"), b"loose").unwrap();
    write_archive(&dir.path().join("patch.zip"), &[("cfg/game.ini", &b"packed"[..])]);
    server.mount_archive("root:patch.zip").unwrap();

    assert_eq!(read_all(&server, "root:cfg/game.ini"), b"packed");
    assert!(server.is_read_only("root:cfg/game.ini"));

    server.set_archive_file_system_enabled(false);
    assert_eq!(read_all(&server, "root:cfg/game.ini"), b"loose");
    assert!(!server.is_read_only("root:cfg/game.ini"));

    server.set_archive_file_system_enabled(true);
    assert_eq!(read_all(&server, "root:cfg/game.ini"), b"packed");
}

#[test]
fn archive_only_file_invisible_when_disabled() {
    let (dir, server) = setup("linux");
    write_archive(&dir.path().join("pack.zip"), &[("only/in/zip.txt", &b"z"[..])]);
    server.mount_archive("root:pack.zip").unwrap();

    assert!(server.file_exists("root:only/in/zip.txt"));
    server.set_archive_file_system_enabled(false);
    assert!(!server.file_exists("root:only/in/zip.txt"));
    assert!(!server.directory_exists("root:only/in"));
}

// --- Mount order ---

#[test]
fn later_mount_shadows_earlier() {
    let (dir, server) = setup("linux");
    write_archive(
        &dir.path().join("base.zip"),
        &[("p.txt", &b"base"[..]), ("base_only.txt", &b"b"[..])],
    );
    write_archive(&dir.path().join("override.zip"), &[("p.txt", &b"override"[..])]);

    server.mount_archive("root:base.zip").unwrap();
    assert_eq!(read_all(&server, "root:p.txt"), b"base");

    server.mount_archive("root:override.zip").unwrap();
    assert_eq!(read_all(&server, "root:p.txt"), b"override");
    assert_eq!(read_all(&server, "root:base_only.txt"), b"b");

    server.unmount_archive("root:override.zip").unwrap();
    assert_eq!(read_all(&server, "root:p.txt"), b"base");
}

// --- Seek semantics ---

#[test]
fn archive_stream_seeks_forward_only() {
    let (dir, server) = setup("linux");
    std::fs::write(dir.path().join("loose.bin"), b"0123456789").unwrap();
    write_archive(&dir.path().join("pack.zip"), &[("packed.bin", &b"0123456789"[..])]);
    server.mount_archive("root:pack.zip").unwrap();

    let mut packed = server.create_stream("root:packed.bin").unwrap();
    packed.open().unwrap();
    packed.seek(6, SeekOrigin::Begin).unwrap();
    assert!(matches!(
        packed.seek(2, SeekOrigin::Begin),
        Err(IoError::BackwardSeek { .. })
    ));
    let mut byte = [0u8; 1];
    packed.read(&mut byte).unwrap();
    assert_eq!(byte[0], b'6');

    let mut loose = server.create_stream("root:loose.bin").unwrap();
    loose.open().unwrap();
    loose.seek(6, SeekOrigin::Begin).unwrap();
    loose.seek(2, SeekOrigin::Begin).unwrap();
    loose.read(&mut byte).unwrap();
    assert_eq!(byte[0], b'2');
}

// --- Writes never go into archives ---

#[test]
fn write_stream_bypasses_archive_only_for_copy_targets() {
    let (dir, server) = setup("linux");
    write_archive(&dir.path().join("pack.zip"), &[("save.dat", &b"packed"[..])]);
    server.mount_archive("root:pack.zip").unwrap();

    let mut stream = server.create_stream("root:save.dat").unwrap();
    stream.set_access_mode(AccessMode::Write);
    assert!(matches!(stream.open(), Err(IoError::UnsupportedAccess { .. })));

    server.copy_file("root:save.dat", "root:copy.dat").unwrap();
    assert_eq!(std::fs::read(dir.path().join("copy.dat")).unwrap(), b"packed");
}
