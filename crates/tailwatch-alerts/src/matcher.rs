use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use tracing::error;

use crate::error::PatternError;

/// A rule pattern compiled for case-insensitive matching
#[derive(Clone)]
pub struct CompiledPattern {
    /// Compiled regex
    regex: Regex,

    /// Original pattern string
    pattern: String,
}

impl CompiledPattern {
    /// Compile `pattern`; case is always ignored
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| PatternError {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }

    /// Whether the pattern occurs anywhere in `line`
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// The whole match followed by each capture group, or empty if no match.
    /// Groups that did not participate are `None`.
    pub fn groups(&self, line: &str) -> Vec<Option<String>> {
        match self.regex.captures(line) {
            Some(caps) => caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl std::fmt::Debug for CompiledPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPattern")
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Evaluates rule patterns against lines, caching compiled regexes
#[derive(Clone, Default)]
pub struct PatternMatcher {
    cache: Arc<RwLock<HashMap<String, CompiledPattern>>>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a pattern, reusing an earlier compilation of the same string
    pub fn compile(&self, pattern: &str) -> Result<CompiledPattern, PatternError> {
        if let Some(compiled) = self.cache.read().get(pattern) {
            return Ok(compiled.clone());
        }

        let compiled = CompiledPattern::new(pattern)?;
        self.cache
            .write()
            .insert(pattern.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Check if a line matches a pattern. An invalid pattern never matches.
    pub fn matches(&self, line: &str, pattern: &str) -> bool {
        match self.compile(pattern) {
            Ok(compiled) => compiled.is_match(line),
            Err(e) => {
                error!(error = %e, "Error matching pattern");
                false
            }
        }
    }

    /// Captured groups of the first match, see [`CompiledPattern::groups`]
    pub fn extract_groups(&self, line: &str, pattern: &str) -> Vec<Option<String>> {
        match self.compile(pattern) {
            Ok(compiled) => compiled.groups(line),
            Err(e) => {
                error!(error = %e, "Error extracting groups from pattern");
                Vec::new()
            }
        }
    }

    /// Drop every cached pattern for which `keep` returns false
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.cache.write().retain(|pattern, _| keep(pattern));
    }

    /// Number of distinct patterns currently cached
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}
