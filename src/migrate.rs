//! Upgrades loaded word-book documents to the current schema.
//!
//! Documents carry a `spec` tag (`wordbook/<rev>`). Each known revision owns
//! one transform that rewrites the raw JSON into the next revision's shape;
//! transforms run in a bounded loop until the tag reaches [`CURRENT_SPEC`].
//! The result is then regularized so that running the normalizer again on its
//! own output changes nothing.

use crate::error::DocumentError;
use crate::model::{CURRENT_SPEC, MAX_STARS, SPEC_PREFIX, WordBook, now_millis};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

const MAX_MIGRATION_STEPS: usize = 8;
const UI_ONLY_KEYS: &[&str] = &[
    "dirty",
    "pointer",
    "filterStarred",
    "remarkVisible",
    "editor",
    "uiState",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecVersion {
    /// Browser-era documents: words under `_words`, boolean `starred`, no ids.
    V1,
    V2,
}

impl SpecVersion {
    pub const CURRENT: SpecVersion = SpecVersion::V2;

    pub fn parse(tag: &str) -> Result<Self, DocumentError> {
        let Some(revision) = tag.strip_prefix(SPEC_PREFIX) else {
            return Err(DocumentError::UnrecognizedSpec(tag.to_string()));
        };
        match revision {
            "1" => Ok(SpecVersion::V1),
            "2" => Ok(SpecVersion::V2),
            _ => Err(DocumentError::UnsupportedVersion(tag.to_string())),
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SpecVersion::V1 => "wordbook/1",
            SpecVersion::V2 => CURRENT_SPEC,
        }
    }

    fn upgrade(self, doc: &mut Map<String, Value>, now: i64) -> Result<Self, DocumentError> {
        match self {
            SpecVersion::V1 => {
                upgrade_v1(doc, now)?;
                Ok(SpecVersion::V2)
            }
            SpecVersion::V2 => Ok(SpecVersion::V2),
        }
    }
}

/// Returns true when `doc` carries a spec tag with the word-book prefix.
pub fn has_recognized_spec(doc: &Value) -> bool {
    doc.get("spec")
        .and_then(Value::as_str)
        .is_some_and(|spec| spec.starts_with(SPEC_PREFIX))
}

/// Upgrades `raw` to the current schema using the wall clock for backfills.
pub fn normalize(raw: Value) -> Result<WordBook, DocumentError> {
    normalize_at(raw, now_millis())
}

/// Same as [`normalize`] with an explicit backfill timestamp.
pub fn normalize_at(raw: Value, now: i64) -> Result<WordBook, DocumentError> {
    let Value::Object(mut doc) = raw else {
        return Err(DocumentError::NotAnObject);
    };
    let tag = doc
        .get("spec")
        .and_then(Value::as_str)
        .ok_or(DocumentError::MissingSpec)?
        .to_string();
    if !tag.starts_with(SPEC_PREFIX) {
        warn!(spec = %tag, "unknown document, refusing to load");
        return Err(DocumentError::UnrecognizedSpec(tag));
    }
    if !doc.contains_key("words") && !doc.contains_key("_words") {
        return Err(DocumentError::MissingWords);
    }

    let mut version = SpecVersion::parse(&tag)?;
    let mut steps = 0usize;
    while version != SpecVersion::CURRENT {
        if steps >= MAX_MIGRATION_STEPS {
            return Err(DocumentError::MigrationDidNotConverge(steps));
        }
        let next = version.upgrade(&mut doc, now)?;
        debug!(from = version.tag(), to = next.tag(), "migrated document");
        doc.insert("spec".to_string(), Value::from(next.tag()));
        version = next;
        steps += 1;
    }

    let mut book: WordBook = serde_json::from_value(Value::Object(doc))?;
    regularize(&mut book, now);
    Ok(book)
}

fn upgrade_v1(doc: &mut Map<String, Value>, now: i64) -> Result<(), DocumentError> {
    let words = doc
        .remove("_words")
        .or_else(|| doc.remove("words"))
        .ok_or(DocumentError::MissingWords)?;
    let Value::Array(items) = words else {
        return Err(DocumentError::MissingWords);
    };

    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(word) = item else {
            debug!("skipping non-object word entry");
            continue;
        };
        let name = trimmed_str(&word, "name");
        if name.is_empty() {
            debug!("dropping word without a name");
            continue;
        }
        let id = trimmed_str(&word, "id");
        kept.push((word, id, name));
    }
    let ids = assign_ids(kept.iter().map(|(_, id, name)| (id.as_str(), name.as_str())));

    let mut upgraded = Vec::with_capacity(kept.len());
    for ((mut word, _, name), id) in kept.into_iter().zip(ids) {
        let remark = trimmed_str(&word, "remark");

        let stars = match word.get("stars").and_then(Value::as_u64) {
            Some(stars) => stars.min(u64::from(MAX_STARS)),
            None => {
                let starred = word.get("starred").and_then(Value::as_bool).unwrap_or(false);
                u64::from(starred)
            }
        };

        let created_on = positive_i64(&word, "createdOn").unwrap_or(now);
        let last_modified = positive_i64(&word, "lastModified").unwrap_or(created_on);

        word.insert("id".to_string(), Value::from(id));
        word.insert("name".to_string(), Value::from(name));
        word.insert("remark".to_string(), Value::from(remark));
        word.insert("stars".to_string(), Value::from(stars));
        word.insert("starred".to_string(), Value::from(stars > 0));
        word.insert("createdOn".to_string(), Value::from(created_on));
        word.insert("lastModified".to_string(), Value::from(last_modified));
        for key in ["example", "translation"] {
            if !word.get(key).is_some_and(Value::is_string) {
                word.insert(key.to_string(), Value::from(""));
            }
        }
        if !word.get("bookmarked").is_some_and(Value::is_boolean) {
            word.insert("bookmarked".to_string(), Value::from(false));
        }
        if !word.get("type").is_some_and(Value::is_array) {
            word.insert("type".to_string(), Value::Array(Vec::new()));
        }
        upgraded.push(Value::Object(word));
    }

    doc.insert("words".to_string(), Value::Array(upgraded));
    for key in UI_ONLY_KEYS {
        doc.remove(*key);
    }
    Ok(())
}

/// Enforces the invariants of a current document. Idempotent.
fn regularize(book: &mut WordBook, now: i64) {
    book.spec = CURRENT_SPEC.to_string();
    book.words.retain_mut(|word| {
        word.name = word.name.trim().to_string();
        word.remark = word.remark.trim().to_string();
        !word.name.is_empty()
    });

    let ids = assign_ids(
        book.words
            .iter()
            .map(|word| (word.id.trim(), word.name.as_str())),
    );
    for (word, id) in book.words.iter_mut().zip(ids) {
        word.id = id;
        word.set_stars(word.stars);
        if word.created_on <= 0 {
            word.created_on = now;
        }
        if word.last_modified <= 0 {
            word.last_modified = word.created_on;
        }
    }
}

fn trimmed_str(word: &Map<String, Value>, key: &str) -> String {
    word.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn positive_i64(word: &Map<String, Value>, key: &str) -> Option<i64> {
    word.get(key)
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
        .filter(|ts| *ts > 0)
}

/// Explicit ids are reserved before any name-derived id is handed out, so a
/// word never loses an id it already had to a sibling named the same.
fn assign_ids<'a>(words: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    let words: Vec<_> = words.collect();
    let mut seen = HashSet::with_capacity(words.len());
    let reserved: Vec<bool> = words
        .iter()
        .map(|(id, _)| !id.is_empty() && seen.insert(id.to_string()))
        .collect();
    words
        .into_iter()
        .zip(reserved)
        .map(|((id, name), reserved)| match (reserved, id.is_empty()) {
            (true, _) => id.to_string(),
            (false, true) => unique_id(name.to_string(), &mut seen),
            (false, false) => unique_id(id.to_string(), &mut seen),
        })
        .collect()
}

fn unique_id(id: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(id.clone()) {
        return id;
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{id}-{suffix}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_600_000_000_000;

    #[test]
    fn legacy_starred_flag_becomes_a_rating() {
        let book = normalize(json!({
            "spec": "wordbook/1",
            "words": [{ "name": "a", "starred": true }]
        }))
        .unwrap();
        assert_eq!(book.spec, CURRENT_SPEC);
        let word = &book.words[0];
        assert_eq!(word.stars, 1);
        assert!(word.starred);
        assert!(word.created_on > 0);
        assert_eq!(word.last_modified, word.created_on);
    }

    #[test]
    fn browser_state_dump_is_upgraded() {
        let book = normalize_at(
            json!({
                "spec": "wordbook/1",
                "dirty": true,
                "pointer": 4,
                "filterStarred": true,
                "version": 77,
                "_words": [
                    { "id": "x1", "name": "  fluster ", "remark": " agitated\n", "starred": false, "createdOn": 0 },
                    { "name": "resolute", "stars": 3, "starred": true, "createdOn": 5, "lastModified": 0 },
                    { "name": "   ", "remark": "dropped" },
                    { "name": "resolute", "remark": "duplicate name" }
                ]
            }),
            NOW,
        )
        .unwrap();

        assert_eq!(book.version, 77);
        assert_eq!(book.words.len(), 3);
        let fluster = &book.words[0];
        assert_eq!(fluster.id, "x1");
        assert_eq!(fluster.name, "fluster");
        assert_eq!(fluster.remark, "agitated");
        assert_eq!(fluster.stars, 0);
        assert!(!fluster.starred);
        assert_eq!(fluster.created_on, NOW);
        assert_eq!(fluster.last_modified, NOW);

        let resolute = &book.words[1];
        assert_eq!(resolute.id, "resolute");
        assert_eq!(resolute.stars, 3);
        assert_eq!(resolute.created_on, 5);
        assert_eq!(resolute.last_modified, 5);
        assert_eq!(book.words[2].id, "resolute-2");
    }

    #[test]
    fn explicit_ids_survive_name_derived_ones() {
        let book = normalize_at(
            json!({
                "spec": "wordbook/2",
                "words": [
                    { "id": "", "name": "a" },
                    { "id": "a", "name": "b" },
                    { "id": "a", "name": "c" }
                ]
            }),
            NOW,
        )
        .unwrap();
        let ids: Vec<_> = book.words.iter().map(|word| word.id.as_str()).collect();
        assert_eq!(ids, ["a-2", "a", "a-3"]);

        let legacy = normalize_at(
            json!({
                "spec": "wordbook/1",
                "words": [{ "name": "keen" }, { "id": "keen", "name": "eager" }]
            }),
            NOW,
        )
        .unwrap();
        assert_eq!(legacy.words[0].id, "keen-2");
        assert_eq!(legacy.words[1].id, "keen");
    }

    #[test]
    fn normalize_is_idempotent_on_current_documents() {
        let once = normalize_at(
            json!({
                "spec": "wordbook/1",
                "id": "demo",
                "name": "Demo",
                "_words": [
                    { "name": "cardigan", "remark": "knitted jacket", "starred": true },
                    { "name": "fluster", "stars": 2 }
                ]
            }),
            NOW,
        )
        .unwrap();
        let again = normalize_at(serde_json::to_value(&once).unwrap(), NOW + 1_000).unwrap();
        assert_eq!(once, again);
    }

    #[test]
    fn current_documents_have_starred_rederived() {
        let book = normalize_at(
            json!({
                "spec": CURRENT_SPEC,
                "id": "b",
                "words": [{ "id": "w", "name": "w", "stars": 0, "starred": true, "createdOn": 3, "lastModified": 4 }]
            }),
            NOW,
        )
        .unwrap();
        assert!(!book.words[0].starred);
        assert_eq!(book.words[0].created_on, 3);
    }

    #[test]
    fn unknown_revision_is_rejected() {
        let err = normalize(json!({ "spec": "wordbook/9", "words": [] })).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedVersion(tag) if tag == "wordbook/9"));
    }

    #[test]
    fn foreign_documents_are_rejected() {
        let err = normalize(json!({ "spec": "notebook/1", "words": [] })).unwrap_err();
        assert!(matches!(err, DocumentError::UnrecognizedSpec(_)));
        let err = normalize(json!({ "words": [] })).unwrap_err();
        assert!(matches!(err, DocumentError::MissingSpec));
        let err = normalize(json!({ "spec": "wordbook/1" })).unwrap_err();
        assert!(matches!(err, DocumentError::MissingWords));
        let err = normalize(json!(["wordbook/1"])).unwrap_err();
        assert!(matches!(err, DocumentError::NotAnObject));
    }

    #[test]
    fn malformed_current_document_is_an_error() {
        let err =
            normalize(json!({ "spec": CURRENT_SPEC, "words": [{ "name": 7 }] })).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed(_)));
    }

    #[test]
    fn recognized_spec_check() {
        assert!(has_recognized_spec(&json!({ "spec": "wordbook/1" })));
        assert!(!has_recognized_spec(&json!({ "spec": "other" })));
        assert!(!has_recognized_spec(&json!({})));
    }
}
