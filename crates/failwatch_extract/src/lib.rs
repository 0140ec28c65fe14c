//! failwatch extract - failing log extraction from zip archives
//!
//! Opens an archive read-only, selects members whose name ends in the log
//! suffix and whose bytes contain a failure keyword, and copies each of them
//! to `destination / basename(member)`.
//!
//! # Core Concepts
//!
//! - **MatchRules**: log suffix + failure keywords, both case-insensitive
//! - **FailedLogs**: lazy iterator over matching members, one artifact per item
//! - **ExtractedArtifact**: a byte-for-byte copy of one member on disk
//!
//! Destination names come from the member's base name only, so entries such
//! as `../../etc/x.log` land at `destination/x.log`.

pub mod engine;
pub mod error;
pub mod matcher;

// Re-exports for convenience
pub use engine::{
    extract_failed_logs, write_artifact, ArchiveMember, ExtractedArtifact, ExtractionReport,
    FailedLogs,
};
pub use error::{ExtractError, Result};
pub use matcher::{member_basename, MatchRules, DEFAULT_KEYWORD, DEFAULT_LOG_SUFFIX};
