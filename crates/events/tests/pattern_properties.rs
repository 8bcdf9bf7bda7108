//! Property-based tests for hierarchical pattern matching using proptest.
//!
//! Properties verified:
//! - Every valid event type matches itself and `**`
//! - Replacing any one segment with `*` still matches
//! - A pattern without `**` never matches a type of different length
//! - `prefix.**` matches exactly the types strictly below `prefix`

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use converge_events::EventPattern;
use converge_events::event::validate_event_type;
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,6}"
}

fn event_type() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..6)
}

fn parse(pattern: &str) -> EventPattern {
    match EventPattern::parse(pattern) {
        Ok(pattern) => pattern,
        Err(e) => panic!("pattern '{pattern}' should parse: {e}"),
    }
}

proptest! {
    #[test]
    fn prop_type_matches_itself_and_catch_all(segments in event_type()) {
        let event_type = segments.join(".");
        prop_assert!(validate_event_type(&event_type).is_ok());
        prop_assert!(parse(&event_type).matches(&event_type));
        prop_assert!(EventPattern::all().matches(&event_type));
    }

    #[test]
    fn prop_single_wildcard_substitutes_any_segment(
        segments in event_type(),
        index in any::<prop::sample::Index>(),
    ) {
        let event_type = segments.join(".");
        let mut pattern = segments.clone();
        let i = index.index(pattern.len());
        pattern[i] = "*".to_string();

        prop_assert!(parse(&pattern.join(".")).matches(&event_type));
    }

    #[test]
    fn prop_length_mismatch_never_matches(
        pattern in event_type(),
        event in event_type(),
    ) {
        prop_assume!(pattern.len() != event.len());
        let wildcarded: Vec<&str> = pattern.iter().map(|_| "*").collect();

        prop_assert!(!parse(&wildcarded.join(".")).matches(&event.join(".")));
        prop_assert!(!parse(&pattern.join(".")).matches(&event.join(".")));
    }

    #[test]
    fn prop_double_wildcard_matches_strict_descendants(
        prefix in event_type(),
        rest in prop::collection::vec(segment(), 0..4),
    ) {
        let pattern = parse(&format!("{}.**", prefix.join(".")));
        let mut full = prefix.clone();
        full.extend(rest.iter().cloned());

        prop_assert_eq!(pattern.matches(&full.join(".")), !rest.is_empty());
    }
}
