//! Deterministic story selection.

use std::collections::HashSet;

use crate::core::types::{Backlog, Story};

/// Select the pending story with the lowest priority value.
///
/// Ties are broken by declaration order. Returns `None` when every story passes.
pub fn next_story(backlog: &Backlog) -> Option<&Story> {
    next_story_excluding(backlog, &HashSet::new())
}

/// Like [`next_story`], but ignores stories whose ids are in `skip`.
///
/// The loop uses this to avoid re-selecting a story it already attempted in the
/// current run (failed or awaiting merge).
pub fn next_story_excluding<'a>(backlog: &'a Backlog, skip: &HashSet<String>) -> Option<&'a Story> {
    backlog
        .user_stories
        .iter()
        .enumerate()
        .filter(|(_, story)| !story.passes && !skip.contains(&story.id))
        .min_by_key(|(index, story)| (story.priority, *index))
        .map(|(_, story)| story)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{backlog_of, story};

    #[test]
    fn selects_lowest_priority_then_declaration_order() {
        let backlog = backlog_of(vec![
            story("US-003", 2),
            story("US-001", 1),
            story("US-002", 1),
        ]);
        let selected = next_story(&backlog).expect("story");
        assert_eq!(selected.id, "US-001");
    }

    #[test]
    fn advances_once_first_story_passes() {
        let mut backlog = backlog_of(vec![story("A", 1), story("B", 2)]);
        assert_eq!(next_story(&backlog).expect("story").id, "A");

        backlog.user_stories[0].passes = true;
        assert_eq!(next_story(&backlog).expect("story").id, "B");
    }

    #[test]
    fn returns_none_when_all_pass() {
        let mut backlog = backlog_of(vec![story("A", 1)]);
        backlog.user_stories[0].passes = true;
        assert!(next_story(&backlog).is_none());
    }

    #[test]
    fn skips_excluded_ids() {
        let backlog = backlog_of(vec![story("A", 1), story("B", 2)]);
        let skip: HashSet<String> = ["A".to_string()].into_iter().collect();
        assert_eq!(
            next_story_excluding(&backlog, &skip).expect("story").id,
            "B"
        );

        let skip_all: HashSet<String> = ["A".to_string(), "B".to_string()].into_iter().collect();
        assert!(next_story_excluding(&backlog, &skip_all).is_none());
    }
}
