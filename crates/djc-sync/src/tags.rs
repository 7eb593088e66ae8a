//! Category text to canonical tags.

use std::collections::HashSet;
use std::sync::Arc;

use djc_core::TechTag;
use djc_storage::{PostingStore, StoreError};
use tracing::debug;

pub const MIN_TAG_CHARS: usize = 2;
pub const MAX_TAG_CHARS: usize = 50;

fn is_delimiter(c: char) -> bool {
    matches!(c, ',' | '/' | '·' | '.') || c.is_whitespace()
}

fn is_hangul_syllable(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Splits category text on `,` `/` `·` `.` and whitespace. A dot that starts a token and is
/// followed by an alphanumeric stays in the token, so `.NET` survives while `Java.Spring` splits.
/// Invalid tokens are dropped and duplicates collapse to their first occurrence.
pub fn split_tag_names(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '.' && current.is_empty() && chars.peek().is_some_and(|n| n.is_alphanumeric()) {
            current.push(c);
            continue;
        }
        if is_delimiter(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| is_valid_tag_name(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

pub fn is_valid_tag_name(token: &str) -> bool {
    let len = token.chars().count();
    if !(MIN_TAG_CHARS..=MAX_TAG_CHARS).contains(&len) {
        return false;
    }
    if token.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    token
        .chars()
        .any(|c| c.is_ascii_alphanumeric() || is_hangul_syllable(c))
}

/// Resolves tag names against the store, creating unseen names once.
#[derive(Clone)]
pub struct TagNormalizer {
    store: Arc<dyn PostingStore>,
}

impl TagNormalizer {
    pub fn new(store: Arc<dyn PostingStore>) -> Self {
        Self { store }
    }

    /// Tags for `raw` in first-occurrence order.
    pub async fn resolve(&self, raw: &str) -> Result<Vec<TechTag>, StoreError> {
        let mut tags = Vec::new();
        for name in split_tag_names(raw) {
            tags.push(self.get_or_create(&name).await?);
        }
        Ok(tags)
    }

    /// A concurrent creator winning the unique constraint is not an error: its row is used.
    pub async fn get_or_create(&self, name: &str) -> Result<TechTag, StoreError> {
        if let Some(tag) = self.store.find_tag_by_name(name).await? {
            return Ok(tag);
        }
        match self.store.create_tag(name).await {
            Ok(tag) => {
                debug!(tag = %tag.name, id = tag.id, "created tag");
                Ok(tag)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(tag = name, "tag created concurrently; re-reading");
                self.store
                    .find_tag_by_name(name)
                    .await?
                    .ok_or_else(|| StoreError::Conflict(name.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}
