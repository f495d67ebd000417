//! Archive-backed virtual filesystem and I/O server.
//!
//! This crate puts plain OS file access and in-archive (zip) access behind
//! one URI-addressed stream abstraction:
//!
//! - **Assigns**: symbolic path prefixes such as `root:` or `home:` that
//!   resolve to real locations
//! - **Schemes**: the URI scheme (`file`, `zip`, ...) selects the stream
//!   implementation that handles a URI
//! - **Archives**: mounted zip containers shadow the real filesystem at their
//!   mount point, most recently mounted first
//! - **Streams**: seekable byte ranges over files, archive entries or memory,
//!   optionally memory-mapped
//! - **Binary codec**: typed readers and writers with byte-order conversion
//!
//! All shared state lives in one [`IoContext`] created at startup. Any number
//! of [`IoServer`] handles borrow it.
//!
//! # Example
//!
//! ```rust,no_run
//! use nebula_io::{AccessMode, IoConfig, IoContext, IoServer};
//!
//! # fn example() -> nebula_io::Result<()> {
//! let context = IoContext::new(IoConfig::new("/path/to/game"))?;
//! let server = IoServer::new(context);
//!
//! server.mount_standard_archives()?;
//! if server.file_exists("root:data/config.txt") {
//!     let mut stream = server.create_stream("root:data/config.txt")?;
//!     stream.set_access_mode(AccessMode::Read);
//!     stream.open()?;
//!     let mut contents = vec![0u8; stream.size() as usize];
//!     stream.read(&mut contents)?;
//!     stream.close();
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::path::PathBuf;
use thiserror::Error;

// Resource addressing
pub mod assign;
pub mod scheme;
pub mod uri;

// Real filesystem access
pub mod fs;

// Mounted archives
pub mod archive;

// Byte streams and typed codecs
pub mod binary;
pub mod stream;

// Server wiring
pub mod config;
pub mod context;
pub mod server;

pub use archive::{Archive, ArchiveEntry, ArchiveFileSystem, ArchiveState, EntryReader};
pub use assign::{Assign, AssignRegistry, MAX_ASSIGN_DEPTH};
pub use binary::{BinaryReader, BinaryWriter, ByteOrder};
pub use config::IoConfig;
pub use context::{IoContext, IoContextBuilder};
pub use fs::{FilesystemBackend, NativeFilesystem};
pub use scheme::{SchemeRegistry, StreamFactory};
pub use server::IoServer;
pub use stream::{AccessMode, FileStream, MemoryStream, SeekOrigin, Stream, ZipStream};
pub use uri::Uri;

/// Result type for I/O server operations.
pub type Result<T> = std::result::Result<T, IoError>;

/// Errors that can occur in the I/O subsystem.
///
/// Configuration errors (unknown schemes, duplicate registrations, unbalanced
/// mounts) indicate a startup sequencing bug and should be treated as fatal
/// by the caller. Not-found errors are recoverable. State errors indicate
/// misuse of a stream.
#[derive(Debug, Error)]
pub enum IoError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem primitive failed on a specific path.
    #[error("{op} failed for {}: {source}", path.display())]
    Filesystem {
        /// Operation that failed.
        op: &'static str,
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// String could not be parsed as a URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// No stream factory registered for a scheme.
    #[error("No stream class registered for URI scheme '{0}'")]
    UnknownScheme(String),

    /// A stream factory is already registered for a scheme.
    #[error("URI scheme '{0}' is already registered")]
    SchemeAlreadyRegistered(String),

    /// Assign lookup failed.
    #[error("Assign not found: {0}")]
    AssignNotFound(String),

    /// Assign substitution did not terminate within the depth limit.
    #[error("Cyclic assign while resolving '{path}' (gave up after {depth} substitutions)")]
    CyclicAssign {
        /// The string being resolved.
        path: String,
        /// Number of substitutions performed.
        depth: usize,
    },

    /// Archive container could not be opened or has an invalid layout.
    #[error("Failed to open archive {uri}: {reason}")]
    ArchiveOpen {
        /// Location of the archive file.
        uri: String,
        /// What went wrong.
        reason: String,
    },

    /// Archive is already mounted or in a mount transition.
    #[error("Archive already mounted: {0}")]
    AlreadyMounted(String),

    /// Archive is not mounted.
    #[error("Archive not mounted: {0}")]
    NotMounted(String),

    /// Standard archives were mounted twice.
    #[error("Standard archives are already mounted")]
    StandardArchivesMounted,

    /// Standard archives were unmounted without being mounted.
    #[error("Standard archives are not mounted")]
    StandardArchivesNotMounted,

    /// File, directory or archive entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stream operation attempted before `open` or after `close`.
    #[error("Stream is not open: {0}")]
    NotOpen(String),

    /// `open` called on a stream that is already open.
    #[error("Stream is already open: {0}")]
    AlreadyOpen(String),

    /// Access mode does not permit the requested operation.
    #[error("Access mode {mode:?} does not permit {op} on {uri}")]
    UnsupportedAccess {
        /// Stream location.
        uri: String,
        /// Configured access mode.
        mode: AccessMode,
        /// Operation attempted.
        op: &'static str,
    },

    /// Backward seek on a forward-only stream.
    #[error("Stream {uri} only seeks forward (position {position}, requested {target})")]
    BackwardSeek {
        /// Stream location.
        uri: String,
        /// Current position.
        position: u64,
        /// Requested position.
        target: u64,
    },

    /// Seek target lies outside the stream.
    #[error("Seek out of range: target {target}, size {size}")]
    SeekOutOfRange {
        /// Requested position.
        target: i64,
        /// Stream size.
        size: u64,
    },

    /// Read past the end of a mapped region or stream.
    #[error("Read out of bounds: requested {requested} bytes, {available} available")]
    OutOfBounds {
        /// Bytes requested.
        requested: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// Stream cannot be memory-mapped.
    #[error("Stream cannot be mapped: {0}")]
    NotMappable(String),

    /// String does not fit the 16-bit length prefix.
    #[error("String too long for binary encoding: {0} bytes")]
    StringTooLong(usize),

    /// Malformed data.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the zip decoder.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
