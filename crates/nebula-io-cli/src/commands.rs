//! Command handlers

use anyhow::{Context, Result, bail};
use nebula_io::{IoConfig, IoContext, IoServer};
use std::io::Write;
use tracing::info;

/// Build the server and apply the requested mounts.
pub fn setup_server(config: IoConfig, standard_archives: bool, mounts: &[String]) -> Result<IoServer> {
    let context = IoContext::new(config).context("creating I/O context")?;
    let server = IoServer::new(context);

    if standard_archives {
        server.mount_standard_archives()?;
    }
    for archive in mounts {
        server
            .mount_archive(archive)
            .with_context(|| format!("mounting {archive}"))?;
        info!("Mounted {}", archive);
    }
    Ok(server)
}

pub fn exists(server: &IoServer, path: &str) -> Result<()> {
    let uri = server.resolve_uri(path)?;
    if server.file_exists(path) {
        println!("file {uri}");
    } else if server.directory_exists(path) {
        println!("directory {uri}");
    } else {
        bail!("{path} does not exist ({uri})");
    }
    Ok(())
}

pub fn list(server: &IoServer, path: &str, pattern: &str, full: bool) -> Result<()> {
    if !server.directory_exists(path) {
        bail!("{path} is not a directory");
    }
    for dir in server.list_directories(path, pattern, full)? {
        println!("{dir}/");
    }
    for file in server.list_files(path, pattern, full)? {
        println!("{file}");
    }
    Ok(())
}

pub fn cat(server: &IoServer, path: &str) -> Result<()> {
    let data = server
        .read_file(path)
        .with_context(|| format!("reading {path}"))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

pub fn copy(server: &IoServer, from: &str, to: &str) -> Result<()> {
    server
        .copy_file(from, to)
        .with_context(|| format!("copying {from} to {to}"))
}

pub fn crc(server: &IoServer, path: &str) -> Result<()> {
    let crc = server
        .compute_file_crc(path)
        .with_context(|| format!("checksumming {path}"))?;
    println!("{crc:08x}  {path}");
    Ok(())
}

pub fn mkdir(server: &IoServer, path: &str) -> Result<()> {
    server
        .create_directory(path)
        .with_context(|| format!("creating {path}"))
}

pub fn assigns(server: &IoServer) -> Result<()> {
    for assign in server.context().assigns().assigns() {
        println!("{}: {}", assign.name, assign.path);
    }
    Ok(())
}
