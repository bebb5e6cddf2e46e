use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix every word-book document's `spec` tag must carry.
pub const SPEC_PREFIX: &str = "wordbook/";
/// Schema revision this crate reads and writes.
pub const CURRENT_SPEC: &str = "wordbook/2";
/// Highest star rating a word can hold.
pub const MAX_STARS: u8 = 3;
/// Star rating given to freshly added words.
pub const DEFAULT_STARS: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default)]
    pub stars: u8,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(rename = "type", default)]
    pub kinds: BTreeSet<String>,
    #[serde(default)]
    pub created_on: i64,
    #[serde(default)]
    pub last_modified: i64,
}

impl Word {
    /// Builds a new word with the default rating and both timestamps set to `now`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into().trim().to_string(),
            remark: String::new(),
            example: String::new(),
            translation: String::new(),
            stars: DEFAULT_STARS,
            starred: DEFAULT_STARS > 0,
            bookmarked: false,
            kinds: BTreeSet::new(),
            created_on: now,
            last_modified: now,
        }
    }

    /// Sets the rating (clamped to `MAX_STARS`) and re-derives `starred`.
    pub fn set_stars(&mut self, stars: u8) {
        self.stars = stars.min(MAX_STARS);
        self.starred = self.stars > 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBook {
    pub spec: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(alias = "_words")]
    pub words: Vec<Word>,
}

impl WordBook {
    pub fn empty(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            spec: CURRENT_SPEC.to_string(),
            id: id.into(),
            name: name.into(),
            version: 0,
            words: Vec::new(),
        }
    }

    pub fn overview(&self) -> WordBookOverview {
        WordBookOverview {
            id: self.id.clone(),
            name: self.name.clone(),
            word_count: self.words.len(),
            version: self.version,
        }
    }

    pub fn position_by_id(&self, id: &str) -> Option<usize> {
        self.words.iter().position(|word| word.id == id)
    }

    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.words.iter().position(|word| word.name == name)
    }

    /// Moves `version` forward to the current time, or one tick past its
    /// previous value when the clock has not advanced.
    pub fn bump_version(&mut self) -> i64 {
        self.version = next_timestamp(self.version);
        self.version
    }
}

/// Row shown in the book picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordBookOverview {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub version: i64,
}

/// Sorts overviews newest first.
pub fn sort_overviews(rows: &mut [WordBookOverview]) {
    rows.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));
}

/// Editor payload for `save_word`; `None` fields are left untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordDraft {
    pub name: String,
    pub remark: Option<String>,
    pub example: Option<String>,
    pub translation: Option<String>,
}

impl WordDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn translation(mut self, translation: impl Into<String>) -> Self {
        self.translation = Some(translation.into());
        self
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Returns a timestamp strictly greater than `previous`.
pub fn next_timestamp(previous: i64) -> i64 {
    now_millis().max(previous.saturating_add(1))
}
