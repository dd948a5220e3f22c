//! Intent Classifier
//!
//! Decides whether an operator message targets self-modification and which
//! live files are relevant context. Pure functions over fixed keyword
//! tables: case-insensitive substring matching, no side effects, stable
//! deterministic output.

use crate::types::ChangeRequest;

// ---------------------------------------------------------------------------
// Keyword tables
// ---------------------------------------------------------------------------

/// Phrases that mark a message as a self-update request. The set is an
/// unordered disjunction; matching any member is sufficient.
pub static SELF_UPDATE_KEYWORDS: &[&str] = &[
    "fix ui",
    "update frontend",
    "change style",
    "modify interface",
    "update backend",
    "fix bug in",
    "improve",
    "enhance",
];

/// Topic keywords mapped to the fixed context file list for that area.
/// Groups are scanned in this order so the unioned file list is stable.
static CONTEXT_GROUPS: &[(&[&str], &[&str])] = &[
    (
        &["ui", "frontend", "interface", "style"],
        &["frontend/index.html", "frontend/chat.js"],
    ),
    (
        &["backend", "api"],
        &["backend/main.py", "backend/api/routes.py"],
    ),
    (
        &["connector", "llm"],
        &["backend/models/llm_connector.py"],
    ),
];

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify one operator message into an immutable [`ChangeRequest`].
///
/// File-group matching is only consulted when the message matched a
/// self-update keyword; plain chat always yields an empty context set.
pub fn classify(text: &str) -> ChangeRequest {
    let is_self_update = is_self_update_request(text);
    let context_files = if is_self_update {
        context_files_for(text)
    } else {
        Vec::new()
    };

    ChangeRequest {
        raw_text: text.to_string(),
        is_self_update,
        context_files,
    }
}

/// Returns `true` iff the lower-cased text contains any self-update keyword.
pub fn is_self_update_request(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SELF_UPDATE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// Union the context file lists of every topic group mentioned in the text,
/// in group order, with duplicates removed.
pub fn context_files_for(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut files: Vec<String> = Vec::new();

    for (keywords, group_files) in CONTEXT_GROUPS {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            for file in *group_files {
                if !files.iter().any(|f| f == file) {
                    files.push((*file).to_string());
                }
            }
        }
    }

    files
}
