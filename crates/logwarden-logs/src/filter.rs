/// Default keywords marking a line as error-bearing. Matching is case-sensitive,
/// so each casing that should count is listed.
pub const DEFAULT_ERROR_KEYWORDS: &[&str] = &[
    "error", "Error", "ERROR", "Fail", "fail", "Failed", "FAILED", "failure", "FAILURE", "retry",
    "Retry", "RETRY",
];

/// Selects lines containing at least one error keyword
#[derive(Clone, Debug)]
pub struct KeywordFilter {
    /// Substrings to look for (case-sensitive)
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Create a filter from a keyword list. Empty keywords are dropped, since
    /// they would match every line.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.is_empty())
                .collect(),
        }
    }

    /// Check if a line qualifies. Blank lines never do.
    pub fn matches(&self, line: &str) -> bool {
        !line.trim().is_empty() && self.keywords.iter().any(|k| line.contains(k.as_str()))
    }

    /// Get the configured keywords
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_KEYWORDS.iter().copied())
    }
}
