//! Expression search over particle texts
//!
//! A malformed pattern is the one *recoverable* error in the system: the
//! render cycle aborts before any state is touched, the control is flagged,
//! and the next keystroke retries cleanly.

use regex::Regex;
use thiserror::Error;

/// User-input error: the search box holds an invalid regular expression.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Compiled search filter; an empty search box compiles to the inactive
/// filter, which matches nothing and paints no subset bars.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pattern: Option<Regex>,
}

impl SearchFilter {
    pub fn compile(input: &str) -> Result<SearchFilter, SearchError> {
        if input.is_empty() {
            return Ok(SearchFilter { pattern: None });
        }
        Ok(SearchFilter {
            pattern: Some(Regex::new(input)?),
        })
    }

    pub fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    pub fn matches(&self, expr: &str) -> bool {
        match &self.pattern {
            Some(re) => re.is_match(expr),
            None => false,
        }
    }
}
