//! Backlog transition checks applied after the agent has run.
//!
//! The backlog is append-only except for flipping `passes` from false to true,
//! and only the in-flight story may flip during an iteration.

use crate::core::types::{Backlog, Story};

/// Validate the transition from `prev` (before invocation) to `next` (read back
/// from disk afterwards).
///
/// Returns stable error messages in backlog declaration order.
pub fn check_backlog_transition(prev: &Backlog, next: &Backlog, in_flight_id: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if prev.project_name != next.project_name {
        errors.push(format!(
            "projectName changed from '{}' to '{}'",
            prev.project_name, next.project_name
        ));
    }

    for (index, before) in prev.user_stories.iter().enumerate() {
        let Some(after) = next.user_stories.get(index) else {
            errors.push(format!("story '{}' removed from backlog", before.id));
            continue;
        };
        if after.id != before.id {
            match next.find(&before.id) {
                Some(_) => errors.push(format!(
                    "story '{}' moved from position {index}",
                    before.id
                )),
                None => errors.push(format!("story '{}' removed from backlog", before.id)),
            }
            continue;
        }
        check_story(before, after, in_flight_id, &mut errors);
    }

    for appended in next.user_stories.iter().skip(prev.user_stories.len()) {
        if prev.find(&appended.id).is_some() {
            continue;
        }
        if appended.passes {
            errors.push(format!(
                "appended story '{}' must start with passes=false",
                appended.id
            ));
        }
    }

    errors
}

fn check_story(before: &Story, after: &Story, in_flight_id: &str, errors: &mut Vec<String>) {
    if before.passes && !after.passes {
        errors.push(format!("story '{}' reverted from passes=true", before.id));
    }
    if !before.passes && after.passes && before.id != in_flight_id {
        errors.push(format!(
            "story '{}' marked passed but '{}' was in flight",
            before.id, in_flight_id
        ));
    }
    let mut normalized = after.clone();
    normalized.passes = before.passes;
    if &normalized != before {
        errors.push(format!("story '{}' fields changed (only passes may change)", before.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{backlog_of, story};

    #[test]
    fn in_flight_story_may_flip_to_passed() {
        let prev = backlog_of(vec![story("A", 1), story("B", 2)]);
        let mut next = prev.clone();
        next.user_stories[0].passes = true;

        assert!(check_backlog_transition(&prev, &next, "A").is_empty());
    }

    #[test]
    fn passes_never_reverts() {
        let mut prev = backlog_of(vec![story("A", 1)]);
        prev.user_stories[0].passes = true;
        let mut next = prev.clone();
        next.user_stories[0].passes = false;

        let errors = check_backlog_transition(&prev, &next, "A");
        assert!(errors.iter().any(|err| err.contains("reverted")));
    }

    #[test]
    fn other_stories_may_not_flip() {
        let prev = backlog_of(vec![story("A", 1), story("B", 2)]);
        let mut next = prev.clone();
        next.user_stories[1].passes = true;

        let errors = check_backlog_transition(&prev, &next, "A");
        assert_eq!(
            errors,
            vec!["story 'B' marked passed but 'A' was in flight"]
        );
    }

    #[test]
    fn removal_and_edits_are_rejected() {
        let prev = backlog_of(vec![story("A", 1), story("B", 2)]);
        let mut next = backlog_of(vec![story("A", 1)]);
        next.user_stories[0].title = "rewritten".to_string();

        let errors = check_backlog_transition(&prev, &next, "A");
        assert!(errors.iter().any(|err| err.contains("'B' removed")));
        assert!(errors.iter().any(|err| err.contains("'A' fields changed")));
    }

    #[test]
    fn appending_pending_stories_is_allowed() {
        let prev = backlog_of(vec![story("A", 1)]);
        let mut next = prev.clone();
        next.user_stories.push(story("C", 5));
        assert!(check_backlog_transition(&prev, &next, "A").is_empty());

        next.user_stories[1].passes = true;
        let errors = check_backlog_transition(&prev, &next, "A");
        assert!(errors.iter().any(|err| err.contains("appended story 'C'")));
    }
}
