//! ServerSync change-set archives.
//!
//! An archive is a deflate-compressed zip whose entry names are the
//! slash-separated paths of files relative to the watched directory:
//! - `changes_<timestamp>.zip`: only the files of one change-set
//! - `server_files.zip`: the full tree, used to bootstrap a new machine
//! - `backup_latest.zip`: single-slot local backup taken before applying
//!
//! Entries are written in path order so that packing the same files twice
//! yields the same entry list. Packing and extraction stream file contents
//! rather than buffering whole trees. Extraction refuses entry names that would
//! escape the destination directory.

mod archive;
mod error;

pub use archive::{
    ArchiveBuilder, ChangeArchive, pack_files, pack_files_to, pack_tree, pack_tree_to,
    relative_slash_path,
};
pub use error::ArchiveError;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
