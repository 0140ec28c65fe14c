//! Archive handlers run by pool workers

use failwatch_extract::{extract_failed_logs, ExtractError, ExtractionReport, MatchRules};
use std::path::PathBuf;

/// One unit of extraction work. Owns its paths; shares nothing with other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub archive: PathBuf,
    pub destination: PathBuf,
}

/// Processes a stable archive.
///
/// Implementations run on pool worker threads and may block.
pub trait ArchiveHandler: Send + Sync {
    fn handle(&self, task: &ExtractionTask) -> Result<ExtractionReport, ExtractError>;
}

/// Copies failing log members into the task's destination.
#[derive(Debug, Clone, Default)]
pub struct FailLogHandler {
    rules: MatchRules,
}

impl FailLogHandler {
    pub fn new(rules: MatchRules) -> Self {
        Self { rules }
    }
}

impl ArchiveHandler for FailLogHandler {
    fn handle(&self, task: &ExtractionTask) -> Result<ExtractionReport, ExtractError> {
        extract_failed_logs(&task.archive, &task.destination, &self.rules)
    }
}
