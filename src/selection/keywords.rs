//! Keyword extraction from free text.
//!
//! Text is split on whitespace runs, each token is lowercased and stripped of
//! every non-alphanumeric character, and the survivors are filtered by length
//! and against a fixed stop-word set. Characters inside a token are removed,
//! not treated as separators, so `file.json` yields the single keyword
//! `filejson`.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Keywords must be strictly longer than this many characters.
const MIN_KEYWORD_EXCLUSIVE_LENGTH: usize = 2;

/// Articles, auxiliaries, pronouns, fillers and query boilerplate.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "new", "now", "old", "see",
    "two", "who", "did", "does", "doing", "done", "get", "got", "let", "put", "say", "she", "too",
    "use", "this", "that", "these", "those", "with", "from", "into", "onto", "about", "above",
    "below", "after", "before", "again", "there", "here", "then", "than", "them", "they", "their",
    "theirs", "what", "when", "where", "which", "while", "whom", "whose", "why", "will", "would",
    "could", "should", "shall", "might", "must", "been", "being", "were", "some", "such", "only",
    "own", "same", "very", "just", "also", "each", "every", "both", "few", "more", "most", "other",
    "your", "yours", "mine", "ours", "him", "hers", "itself", "myself", "yourself", "want",
    "wants", "need", "needs", "please", "help", "like", "thanks", "thank", "cant", "dont",
    "lets", "show", "tell", "give", "make",
    "something", "anything", "everything", "thing", "things", "way", "through", "over", "under",
    "because", "until", "during", "between", "via", "per", "using",
];

static STOP_WORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

/// Returns whether `word` is in the stop-word set.
///
/// The check expects an already-normalized (lowercased) word.
#[must_use]
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORD_SET.contains(word)
}

/// Extracts normalized keywords from `text` in order of occurrence.
///
/// Duplicates are preserved. Empty input yields an empty vector.
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter_map(normalize_token)
        .collect()
}

/// Extracts keywords from an identifier such as `read_file` or `listDir`.
///
/// Underscores, hyphens, dots, slashes and lower-to-upper case boundaries are
/// treated as word breaks before the regular keyword rules are applied.
#[must_use]
pub fn extract_identifier_keywords(identifier: &str) -> Vec<String> {
    let mut spaced = String::with_capacity(identifier.len() + 8);
    let mut previous_lowercase = false;
    for character in identifier.chars() {
        if matches!(character, '_' | '-' | '.' | '/' | ':') {
            spaced.push(' ');
            previous_lowercase = false;
            continue;
        }
        if character.is_ascii_uppercase() && previous_lowercase {
            spaced.push(' ');
        }
        previous_lowercase = character.is_ascii_lowercase() || character.is_ascii_digit();
        spaced.push(character);
    }
    extract_keywords(&spaced)
}

fn normalize_token(token: &str) -> Option<String> {
    let cleaned: String = token
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|character| character.to_ascii_lowercase())
        .collect();

    if cleaned.len() <= MIN_KEYWORD_EXCLUSIVE_LENGTH || is_stop_word(&cleaned) {
        return None;
    }
    Some(cleaned)
}
