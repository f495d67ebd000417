use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "nio",
    about = "Inspect files, assigns and zip archives through the nebula-io server",
    version,
    author,
    long_about = "A command-line tool over the nebula-io virtual filesystem. Paths may use assigns (root:, home:, ...), full URIs or native paths, and resolve into mounted archives before the real filesystem."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the root: assign points to
    #[arg(short, long, global = true, env = "NIO_ROOT")]
    root: Option<PathBuf>,

    /// Platform name used for the standard archive
    #[arg(long, global = true)]
    platform: Option<String>,

    /// Define an assign, as name=path
    #[arg(short, long = "assign", global = true, value_parser = parse_assign)]
    assigns: Vec<(String, String)>,

    /// Mount an archive before running the command (repeatable)
    #[arg(short, long = "mount", global = true)]
    mounts: Vec<String>,

    /// Mount root:export_<platform>.zip before running the command
    #[arg(long, global = true)]
    standard_archives: bool,

    /// Ignore mounted archives and use the real filesystem only
    #[arg(long, global = true)]
    no_archive_fs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether a path is a file, a directory or missing
    Exists {
        /// Path to check
        path: String,
    },

    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = "root:")]
        path: String,

        /// Wildcard pattern (* and ?)
        #[arg(short, long, default_value = "*")]
        pattern: String,

        /// Print full URIs instead of names
        #[arg(short, long)]
        full: bool,
    },

    /// Write a file's contents to stdout
    Cat {
        /// File to print
        path: String,
    },

    /// Copy a file, possibly out of an archive
    Cp {
        /// Source file
        from: String,
        /// Target file
        to: String,
    },

    /// Print the CRC-32 of a file
    Crc {
        /// File to checksum
        path: String,
    },

    /// Create a directory and its missing parents
    Mkdir {
        /// Directory to create
        path: String,
    },

    /// List all assigns
    Assigns,
}

fn parse_assign(s: &str) -> Result<(String, String), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{s}'"))?;
    if name.len() < 2 {
        return Err(format!("assign name '{name}' must be at least two characters"));
    }
    Ok((name.to_string(), path.to_string()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG directives refine the --log-level default
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(Level::from(cli.log_level)).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => nebula_io::IoConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => nebula_io::IoConfig::default(),
    };
    if let Some(root) = &cli.root {
        config = config.with_root(root);
    }
    if let Some(platform) = &cli.platform {
        config = config.with_platform_name(platform.clone());
    }
    for (name, path) in &cli.assigns {
        config = config.with_assign(name.clone(), path.clone());
    }
    if cli.no_archive_fs {
        config = config.with_archive_file_system(false);
    }

    let server = commands::setup_server(config, cli.standard_archives, &cli.mounts)?;

    match cli.command {
        Commands::Exists { path } => commands::exists(&server, &path),
        Commands::Ls {
            path,
            pattern,
            full,
        } => commands::list(&server, &path, &pattern, full),
        Commands::Cat { path } => commands::cat(&server, &path),
        Commands::Cp { from, to } => commands::copy(&server, &from, &to),
        Commands::Crc { path } => commands::crc(&server, &path),
        Commands::Mkdir { path } => commands::mkdir(&server, &path),
        Commands::Assigns => commands::assigns(&server),
    }
}
