//! Member selection: log suffix, failure keywords and safe file names

use std::path::{Component, Path};

/// Default log member suffix
pub const DEFAULT_LOG_SUFFIX: &str = ".log";

/// Default failure keyword
pub const DEFAULT_KEYWORD: &str = "fail";

/// Rules deciding which archive members become artifacts.
///
/// Suffix and keywords are stored lowercased; matching lowercases the member
/// name and content (ASCII only) so no text decoding is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRules {
    log_suffix: String,
    keywords: Vec<Vec<u8>>,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_SUFFIX, [DEFAULT_KEYWORD])
    }
}

impl MatchRules {
    /// Build rules from a suffix and a keyword list. Blank keywords are dropped.
    pub fn new<I, S>(log_suffix: &str, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .map(String::into_bytes)
            .collect();
        Self {
            log_suffix: log_suffix.to_ascii_lowercase(),
            keywords,
        }
    }

    pub fn log_suffix(&self) -> &str {
        &self.log_suffix
    }

    /// Whether a member name looks like a log file.
    pub fn is_log_member(&self, name: &str) -> bool {
        name.to_ascii_lowercase().ends_with(&self.log_suffix)
    }

    /// Case-insensitive containment of any failure keyword in raw bytes.
    pub fn contains_failure(&self, content: &[u8]) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lowered = content.to_ascii_lowercase();
        self.keywords
            .iter()
            .any(|keyword| contains_subslice(&lowered, keyword))
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Final path segment of an archive member name.
///
/// Both `/` and `\` count as separators, whatever the host platform. Returns
/// `None` when the remainder is not a single plain file name (`..`, `.`,
/// empty, a drive prefix, embedded NUL).
pub fn member_basename(name: &str) -> Option<&str> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next()?;
    if base.is_empty() || base.contains('\0') {
        return None;
    }
    let mut components = Path::new(base).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(base),
        _ => None,
    }
}
