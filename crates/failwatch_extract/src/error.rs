//! Error types for archive extraction

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Extraction error type
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Source archive missing: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("Corrupt archive {}: {source}", path.display())]
    CorruptArchive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("Failed to open archive {}: {source}", path.display())]
    OpenArchive { path: PathBuf, source: io::Error },

    #[error("Unreadable member '{member}' in {}: {reason}", archive.display())]
    UnreadableMember {
        archive: PathBuf,
        member: String,
        reason: String,
    },

    #[error("Member '{member}' in {} has no usable file name", archive.display())]
    UnsafeMemberName { archive: PathBuf, member: String },

    #[error("Failed to write artifact {}: {source}", path.display())]
    WriteArtifact { path: PathBuf, source: io::Error },
}

impl ExtractError {
    /// Member-level errors skip one entry; everything else aborts the archive.
    pub fn is_member_level(&self) -> bool {
        matches!(
            self,
            ExtractError::UnreadableMember { .. } | ExtractError::UnsafeMemberName { .. }
        )
    }

    /// Short machine-friendly label used in log fields and statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::SourceMissing { .. } => "source_missing",
            ExtractError::CorruptArchive { .. } => "corrupt_archive",
            ExtractError::OpenArchive { .. } => "open_failed",
            ExtractError::UnreadableMember { .. } => "unreadable_member",
            ExtractError::UnsafeMemberName { .. } => "unsafe_member_name",
            ExtractError::WriteArtifact { .. } => "write_failed",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ExtractError>;
