//! Integration tests for the nio CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, contents) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
}

fn nio(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nio").unwrap();
    cmd.arg("--root").arg(root).env_remove("NIO_ROOT");
    cmd
}

#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("nio").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("exists"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("cat"))
        .stdout(predicate::str::contains("crc"));
}

#[test]
fn test_version_command() {
    let mut cmd = Command::cargo_bin("nio").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nio"));
}

#[test]
fn test_cat_from_standard_archive() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(
        &dir.path().join("export_test.zip"),
        &[("data/hello.txt", &b"hello"[..])],
    );

    nio(dir.path())
        .args(["--platform", "test", "--standard-archives", "cat", "root:data/hello.txt"])
        .assert()
        .success()
        .stdout("hello");

    nio(dir.path())
        .args(["--platform", "test", "exists", "root:data/hello.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_ls_archive_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(
        &dir.path().join("pack.zip"),
        &[
            ("textures/a.dds", &b"a"[..]),
            ("textures/b.dds", &b"b"[..]),
            ("textures/readme.txt", &b"r"[..]),
            ("textures/ui/c.dds", &b"c"[..]),
        ],
    );

    nio(dir.path())
        .args(["--mount", "root:pack.zip", "ls", "root:textures", "--pattern", "*.dds"])
        .assert()
        .success()
        .stdout("a.dds\nb.dds\n");

    nio(dir.path())
        .args(["-m", "root:pack.zip", "ls", "root:textures"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ui/"))
        .stdout(predicate::str::contains("readme.txt"));
}

#[test]
fn test_cp_and_crc() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.bin"), b"123456789").unwrap();

    nio(dir.path())
        .args(["cp", "root:in.bin", "root:out.bin"])
        .assert()
        .success();
    assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"123456789");

    // Standard CRC-32 check value
    nio(dir.path())
        .args(["crc", "root:out.bin"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("cbf43926"));
}

#[test]
fn test_mkdir_and_custom_assign() {
    let dir = tempfile::tempdir().unwrap();

    nio(dir.path())
        .args(["--assign", "save=root:saves/", "mkdir", "save:slot1/screens"])
        .assert()
        .success();
    assert!(dir.path().join("saves/slot1/screens").is_dir());

    nio(dir.path())
        .args(["-a", "save=root:saves/", "assigns"])
        .assert()
        .success()
        .stdout(predicate::str::contains("save: root:saves/"))
        .stdout(predicate::str::contains("root: file://"));
}

#[test]
fn test_no_archive_fs_reads_loose_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.txt"), b"loose").unwrap();
    write_archive(&dir.path().join("pack.zip"), &[("x.txt", &b"packed"[..])]);

    nio(dir.path())
        .args(["-m", "root:pack.zip", "cat", "root:x.txt"])
        .assert()
        .success()
        .stdout("packed");

    nio(dir.path())
        .args(["-m", "root:pack.zip", "--no-archive-fs", "cat", "root:x.txt"])
        .assert()
        .success()
        .stdout("loose");
}

#[test]
fn test_invalid_assign_argument() {
    let dir = tempfile::tempdir().unwrap();
    nio(dir.path())
        .args(["--assign", "nonsense", "assigns"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected name=path"));
}

#[test]
fn test_log_level_after_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    nio(dir.path())
        .args(["assigns", "--log-level", "debug"])
        .assert()
        .success()
        .stdout(predicate::str::contains("root: file://"));
}
