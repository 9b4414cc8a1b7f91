//! Autocomplete sources for prompts.
//!
//! Suggestion functions run inline with every keystroke, so they only read
//! immutable snapshots (the files prefix index, captured name lists) and never
//! take a domain lock.

use std::sync::Arc;

use crate::model::{Model, PathIndex};

const MAX_SUGGESTIONS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suggestion {
    /// Inserted into the prompt when accepted.
    pub value: String,
    /// Shown in the suggestions list.
    pub label: String,
}

impl Suggestion {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

pub type SuggestionsFn = Arc<dyn Fn(&str) -> Vec<Suggestion> + Send + Sync>;

/// Files whose path starts with the input, in Files order.
pub fn matching_files(index: &PathIndex, input: &str) -> Vec<Suggestion> {
    index
        .with_prefix(input, MAX_SUGGESTIONS)
        .into_iter()
        .map(Suggestion::new)
        .collect()
}

/// Suggest paths from the current files. Each call reads the latest index.
pub fn file_suggestions(model: &Arc<Model>) -> SuggestionsFn {
    let model = model.clone();
    Arc::new(move |input: &str| matching_files(&model.files_index(), input))
}

/// Fuzzy-match branch names, best match first.
pub fn branch_suggestions(names: Vec<String>) -> SuggestionsFn {
    Arc::new(move |input: &str| {
        let needle = input.trim().to_lowercase();
        let mut scored: Vec<(i32, &String)> = names
            .iter()
            .filter_map(|name| fuzzy_score(&name.to_lowercase(), &needle).map(|s| (s, name)))
            .collect();
        if !needle.is_empty() {
            // Stable, so equal scores keep their original order.
            scored.sort_by(|a, b| b.0.cmp(&a.0));
        }
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, name)| Suggestion::new(name.clone()))
            .collect()
    })
}

/// Previously run commands containing the input, newest first.
pub fn history_suggestions(history: Vec<String>) -> SuggestionsFn {
    Arc::new(move |input: &str| {
        history
            .iter()
            .filter(|cmd| cmd.contains(input))
            .take(MAX_SUGGESTIONS)
            .map(|cmd| Suggestion::new(cmd.clone()))
            .collect()
    })
}

/// Subsequence match score; higher is better. Consecutive matches and an
/// early first match score more. `None` when `needle` is not a subsequence.
pub fn fuzzy_score(haystack: &str, needle: &str) -> Option<i32> {
    let n = needle.trim();
    if n.is_empty() {
        return Some(0);
    }

    let mut score: i32 = 0;
    let mut last_match: Option<usize> = None;
    let mut pos = 0usize;

    for ch in n.chars() {
        let idx = haystack[pos..]
            .char_indices()
            .find(|(_, hc)| *hc == ch)
            .map(|(i, _)| pos + i)?;

        score += 10;
        match last_match {
            Some(prev) if idx == prev + 1 => score += 15,
            Some(_) => {}
            None => score += (30 - idx as i32).max(0),
        }

        last_match = Some(idx);
        pos = idx + ch.len_utf8();
    }

    Some(score)
}
