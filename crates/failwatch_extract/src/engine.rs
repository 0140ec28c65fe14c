//! Archive scanning and artifact writing
//!
//! [`FailedLogs`] walks the archive's entry table in order and yields one
//! [`ExtractedArtifact`] per matching member, committing each file before it
//! is yielded. Member-level problems are yielded as errors and scanning
//! continues; a write failure ends the sequence.

use crate::error::{ExtractError, Result};
use crate::matcher::{member_basename, MatchRules};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cap on the up-front buffer reservation for a member; larger members grow on demand.
const MAX_PREALLOC_BYTES: u64 = 16 * 1024 * 1024;

/// One archive entry selected for a content check. Dropped after the check.
#[derive(Debug)]
pub struct ArchiveMember {
    /// Entry name as stored in the archive
    pub name: String,
    /// Safe file name derived from `name`
    pub file_name: String,
    /// Uncompressed size from the entry table
    pub size: u64,
    pub content: Vec<u8>,
}

/// A file written to the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedArtifact {
    /// Where the copy was written
    pub path: PathBuf,
    /// Source member name inside the archive
    pub member: String,
    /// Number of bytes written
    pub bytes: u64,
}

/// Outcome of scanning one archive to completion.
#[derive(Debug)]
pub struct ExtractionReport {
    pub archive: PathBuf,
    /// Log members whose content was checked
    pub members_scanned: usize,
    /// Artifacts in archive table order
    pub artifacts: Vec<ExtractedArtifact>,
    /// Members skipped because they could not be read or named safely
    pub skipped: Vec<ExtractError>,
}

impl ExtractionReport {
    pub fn bytes_written(&self) -> u64 {
        self.artifacts.iter().map(|a| a.bytes).sum()
    }
}

/// Lazy, single-pass iterator over the failing log members of one archive.
pub struct FailedLogs {
    archive_path: PathBuf,
    archive: zip::ZipArchive<File>,
    destination: PathBuf,
    rules: MatchRules,
    index: usize,
    members_scanned: usize,
    halted: bool,
}

impl FailedLogs {
    /// Open `archive_path` read-only. Nothing is written until iteration.
    pub fn open(archive_path: &Path, destination: &Path, rules: &MatchRules) -> Result<Self> {
        let file = File::open(archive_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExtractError::SourceMissing {
                    path: archive_path.to_path_buf(),
                }
            } else {
                ExtractError::OpenArchive {
                    path: archive_path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let archive = zip::ZipArchive::new(file).map_err(|source| ExtractError::CorruptArchive {
            path: archive_path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            archive,
            destination: destination.to_path_buf(),
            rules: rules.clone(),
            index: 0,
            members_scanned: 0,
            halted: false,
        })
    }

    /// Number of entries in the archive table.
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    pub fn members_scanned(&self) -> usize {
        self.members_scanned
    }

    /// Read entry `index` if it is a log member containing a failure keyword.
    fn read_member(&mut self, index: usize) -> Result<Option<ArchiveMember>> {
        let mut entry = self
            .archive
            .by_index(index)
            .map_err(|e| ExtractError::UnreadableMember {
                archive: self.archive_path.clone(),
                member: format!("#{}", index),
                reason: e.to_string(),
            })?;

        if entry.is_dir() || !self.rules.is_log_member(entry.name()) {
            return Ok(None);
        }

        let name = entry.name().to_string();
        let file_name = match member_basename(&name) {
            Some(base) => base.to_string(),
            None => {
                return Err(ExtractError::UnsafeMemberName {
                    archive: self.archive_path.clone(),
                    member: name,
                })
            }
        };

        self.members_scanned += 1;
        let size = entry.size();
        let mut content = Vec::with_capacity(size.min(MAX_PREALLOC_BYTES) as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| ExtractError::UnreadableMember {
                archive: self.archive_path.clone(),
                member: name.clone(),
                reason: e.to_string(),
            })?;

        if !self.rules.contains_failure(&content) {
            return Ok(None);
        }

        Ok(Some(ArchiveMember {
            name,
            file_name,
            size,
            content,
        }))
    }
}

impl Iterator for FailedLogs {
    type Item = Result<ExtractedArtifact>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.halted && self.index < self.archive.len() {
            let index = self.index;
            self.index += 1;

            match self.read_member(index) {
                Ok(None) => continue,
                Ok(Some(member)) => {
                    return match write_artifact(&self.destination, &member.file_name, &member.content)
                    {
                        Ok(path) => Some(Ok(ExtractedArtifact {
                            path,
                            member: member.name,
                            bytes: member.content.len() as u64,
                        })),
                        Err(e) => {
                            self.halted = true;
                            Some(Err(e))
                        }
                    };
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Scan `archive` and copy every failing log member into `destination`.
///
/// Skipped members are logged and collected in the report. Artifacts written
/// before an aborting error stay on disk.
pub fn extract_failed_logs(
    archive: &Path,
    destination: &Path,
    rules: &MatchRules,
) -> Result<ExtractionReport> {
    let mut logs = FailedLogs::open(archive, destination, rules)?;
    let mut artifacts = Vec::new();
    let mut skipped = Vec::new();

    for item in logs.by_ref() {
        match item {
            Ok(artifact) => {
                debug!(
                    archive = %archive.display(),
                    member = %artifact.member,
                    artifact = %artifact.path.display(),
                    bytes = artifact.bytes,
                    "Extracted failing log"
                );
                artifacts.push(artifact);
            }
            Err(err) if err.is_member_level() => {
                warn!(archive = %archive.display(), error = %err, "Skipping archive member");
                skipped.push(err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(ExtractionReport {
        archive: archive.to_path_buf(),
        members_scanned: logs.members_scanned(),
        artifacts,
        skipped,
    })
}

/// Write `content` to `dir/file_name`, replacing any existing file.
///
/// The bytes go to a temporary file in `dir` that is renamed over the target,
/// so readers never observe a half-written artifact.
pub fn write_artifact(dir: &Path, file_name: &str, content: &[u8]) -> Result<PathBuf> {
    let target = dir.join(file_name);
    let write_err = |source: io::Error| ExtractError::WriteArtifact {
        path: dir.join(file_name),
        source,
    };

    fs::create_dir_all(dir).map_err(write_err)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".failwatch-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(write_err)?;
    staged.write_all(content).map_err(write_err)?;
    staged.flush().map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }

    staged.persist(&target).map_err(|e| write_err(e.error))?;
    Ok(target)
}
