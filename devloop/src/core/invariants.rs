//! Semantic backlog invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::Backlog;

/// Check semantic invariants:
/// - No duplicate story ids
/// - Ids are safe to embed in branch names
/// - Titles are non-empty
pub fn validate_invariants(backlog: &Backlog) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, story) in backlog.user_stories.iter().enumerate() {
        if !seen.insert(story.id.as_str()) {
            errors.push(format!("duplicate story id '{}'", story.id));
        }
        if let Err(err) = validate_story_id(&story.id) {
            errors.push(format!("userStories[{index}]: {err}"));
        }
        if story.title.trim().is_empty() {
            errors.push(format!("story '{}': title must not be empty", story.id));
        }
    }
    errors
}

/// Validate that an id is safe for use in `<prefix><id>` branch names.
pub fn validate_story_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("id must not be empty".to_string());
    }
    if id.contains('/') {
        return Err(format!("id must not contain '/' (got '{id}')"));
    }
    if id.starts_with('.') || id.starts_with('-') || id.ends_with(".lock") || id.contains("..") {
        return Err(format!("id is not a valid ref component (got '{id}')"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(format!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}
