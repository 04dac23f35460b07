use regex::{Regex, RegexBuilder};
use std::fmt;
use std::str::FromStr;

use crate::FilterError;

/// Anything that can decide whether a piece of text is wanted
pub trait TextMatcher: Send + Sync {
    fn matches(&self, candidate: &str) -> bool;
}

impl<F> TextMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, candidate: &str) -> bool {
        self(candidate)
    }
}

/// How a [`TextFilter`] compares its pattern against a candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextMode {
    #[default]
    Contains,
    NotContains,
    Equals,
    Regex,
}

impl FromStr for TextMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "not-contains" | "not_contains" | "excludes" => Ok(Self::NotContains),
            "equals" | "exact" => Ok(Self::Equals),
            "regex" | "re" => Ok(Self::Regex),
            _ => Err(FilterError::UnknownTextMode(s.to_string())),
        }
    }
}

/// Compiled text filter.
///
/// Every mode is backed by a regex so case folding behaves the same way for
/// plain substrings and for user-supplied expressions.
#[derive(Clone)]
pub struct TextFilter {
    regex: Regex,
    pattern: String,
    mode: TextMode,
    case_insensitive: bool,
}

impl TextFilter {
    pub fn new(mode: TextMode, pattern: &str, case_insensitive: bool) -> Result<Self, FilterError> {
        let source = match mode {
            TextMode::Contains | TextMode::NotContains => regex::escape(pattern),
            TextMode::Equals => format!("^{}$", regex::escape(pattern)),
            TextMode::Regex => pattern.to_string(),
        };

        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            mode,
            case_insensitive,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> TextMode {
        self.mode
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

impl TextMatcher for TextFilter {
    fn matches(&self, candidate: &str) -> bool {
        let found = self.regex.is_match(candidate);
        match self.mode {
            TextMode::NotContains => !found,
            _ => found,
        }
    }
}

impl fmt::Debug for TextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextFilter")
            .field("pattern", &self.pattern)
            .field("mode", &self.mode)
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}
