//! Hierarchical subscription patterns.
//!
//! Patterns are dot-delimited like event types. A segment is either a
//! literal, `*` (exactly one segment) or `**` (this segment and everything
//! after it).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl EventPattern {
    /// Parse a pattern.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` for an empty pattern, empty segments, or
    /// segments that mix wildcards with literal text (`a*`).
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::invalid_pattern(pattern, "pattern must not be empty"));
        }

        let segments = pattern
            .split('.')
            .map(|segment| match segment {
                "" => Err(Error::invalid_pattern(pattern, "empty segment")),
                "*" => Ok(Segment::Single),
                "**" => Ok(Segment::Rest),
                literal if literal.contains('*') => Err(Error::invalid_pattern(
                    pattern,
                    format!("segment '{literal}' mixes wildcard and text"),
                )),
                literal => Ok(Segment::Literal(literal.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Pattern matching every event.
    pub fn all() -> Self {
        Self {
            raw: "**".to_string(),
            segments: vec![Segment::Rest],
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether an event type matches this pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        let parts: Vec<&str> = event_type.split('.').collect();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                // Needs at least one segment left to consume.
                Segment::Rest => return i < parts.len(),
                Segment::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                Segment::Literal(literal) => match parts.get(i) {
                    Some(part) if part == literal => {}
                    _ => return false,
                },
            }
        }

        self.segments.len() == parts.len()
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EventPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn matches(pattern: &str, event_type: &str) -> bool {
        EventPattern::parse(pattern).unwrap().matches(event_type)
    }

    #[test]
    fn should_match_hierarchy_with_wildcards() {
        assert!(matches("a.b.c", "a.b.c"));
        assert!(matches("a.b.*", "a.b.c"));
        assert!(matches("a.**", "a.b.c"));
        assert!(matches("**", "a.b.c"));
        assert!(matches("*.b.*", "a.b.c"));
    }

    #[test]
    fn should_not_match_different_shapes() {
        assert!(!matches("a.b", "a.b.c"));
        assert!(!matches("a.x.*", "a.b.c"));
        assert!(!matches("a.b.c.d", "a.b.c"));
        assert!(!matches("a.b.*", "a.b"));
    }

    #[test]
    fn should_require_a_segment_for_double_wildcard() {
        assert!(!matches("a.**", "a"));
        assert!(matches("a.**", "a.b"));
    }

    #[test]
    fn should_succeed_immediately_at_double_wildcard() {
        // Everything after ** is never consulted.
        assert!(matches("a.**.z", "a.b.c"));
    }

    #[test]
    fn should_reject_malformed_patterns() {
        assert!(EventPattern::parse("").is_err());
        assert!(EventPattern::parse("a..b").is_err());
        assert!(EventPattern::parse("a.b*").is_err());
        assert!(EventPattern::parse(".a").is_err());
    }

    #[test]
    fn should_display_original_text() {
        let pattern: EventPattern = "svc.*.created".parse().unwrap();
        assert_eq!(pattern.to_string(), "svc.*.created");
        assert_eq!(EventPattern::all().as_str(), "**");
    }
}
