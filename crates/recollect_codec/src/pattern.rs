//! Regular-expression values.
//!
//! A [`Pattern`] is the stored form of a regular expression: its source text and
//! the three flags that participate in equality. Patterns are plain data here;
//! compiling them into a matcher is the query layer's job.

use crate::error::{CodecError, CodecResult};
use std::fmt;

/// Flags attached to a [`Pattern`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternFlags {
    /// `g`: recorded for equality only, matching is always a single test.
    pub global: bool,
    /// `i`: case-insensitive matching.
    pub ignore_case: bool,
    /// `m`: `^` and `$` match at line boundaries.
    pub multiline: bool,
}

impl PatternFlags {
    /// No flags set.
    pub const NONE: Self = Self {
        global: false,
        ignore_case: false,
        multiline: false,
    };

    /// Parses a flag string such as `"gi"`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] on an unknown or repeated flag.
    pub fn parse(flags: &str) -> CodecResult<Self> {
        let mut parsed = Self::NONE;
        for flag in flags.chars() {
            let slot = match flag {
                'g' => &mut parsed.global,
                'i' => &mut parsed.ignore_case,
                'm' => &mut parsed.multiline,
                other => {
                    return Err(CodecError::invalid_pattern(format!(
                        "unknown flag '{other}'"
                    )))
                }
            };
            if *slot {
                return Err(CodecError::invalid_pattern(format!(
                    "repeated flag '{flag}'"
                )));
            }
            *slot = true;
        }
        Ok(parsed)
    }

    /// Returns the canonical flag string (`g`, `i`, `m` in that order).
    #[must_use]
    pub fn as_string(self) -> String {
        let mut out = String::with_capacity(3);
        if self.global {
            out.push('g');
        }
        if self.ignore_case {
            out.push('i');
        }
        if self.multiline {
            out.push('m');
        }
        out
    }
}

/// A regular expression stored as source text plus flags.
///
/// Two patterns are equal iff their sources and all flags are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern {
    source: String,
    flags: PatternFlags,
}

impl Pattern {
    /// Creates a pattern without flags.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: PatternFlags::NONE,
        }
    }

    /// Creates a pattern with explicit flags.
    pub fn with_flags(source: impl Into<String>, flags: PatternFlags) -> Self {
        Self {
            source: source.into(),
            flags,
        }
    }

    /// Parses a literal of the form `/source/flags`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPattern`] if the literal is not delimited by
    /// slashes or carries unknown flags.
    pub fn parse_literal(literal: &str) -> CodecResult<Self> {
        let body = literal
            .strip_prefix('/')
            .ok_or_else(|| CodecError::invalid_pattern("literal must start with '/'"))?;
        let end = body
            .rfind('/')
            .ok_or_else(|| CodecError::invalid_pattern("literal must end with '/flags'"))?;
        let flags = PatternFlags::parse(&body[end + 1..])?;
        Ok(Self::with_flags(&body[..end], flags))
    }

    /// Returns the pattern source.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the pattern flags.
    #[must_use]
    pub fn flags(&self) -> PatternFlags {
        self.flags
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags.as_string())
    }
}
