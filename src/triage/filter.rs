//! Fast local pre-filter applied before the classification call.

use regex::{Regex, RegexBuilder};

/// Stems matched by default (case-insensitive, anywhere in the text)
pub const DEFAULT_KEYWORDS: &[&str] = &["серф", "сёрф", "surf"];

/// Case-insensitive keyword matcher
///
/// An empty keyword list matches nothing.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    pattern: Option<Regex>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern
            .as_ref()
            .map(|p| p.is_match(text))
            .unwrap_or(false)
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        let alternatives: Vec<String> = DEFAULT_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
        Self {
            pattern: RegexBuilder::new(&alternatives.join("|"))
                .case_insensitive(true)
                .build()
                .ok(),
        }
    }
}
