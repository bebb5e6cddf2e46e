//! Server-side persistence of word-book documents.
//!
//! Documents are kept as raw JSON so older revisions round-trip untouched;
//! the only gate on the way in is the `wordbook/` spec prefix. Every write
//! replaces the whole document and the last writer wins.

use crate::api::CreateBookRequest;
use crate::error::{DocumentError, StoreError};
use crate::migrate::normalize;
use crate::model::{SPEC_PREFIX, WordBook, WordBookOverview, now_millis, sort_overviews};
use lru::LruCache;
use parking_lot::Mutex;
use rand::{Rng, seq::index, thread_rng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CACHE_CAPACITY: usize = 64;
const MAX_ID_LEN: usize = 64;
const RANDOM_ID_LEN: usize = 12;
const HEX_DIGITS: &[u8] = b"0123456789abcdef";

/// A stored word-book document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    /// Accepts any JSON object whose `spec` carries the word-book prefix.
    pub fn new(value: Value) -> Result<Self, DocumentError> {
        if !value.is_object() {
            return Err(DocumentError::NotAnObject);
        }
        match value.get("spec").and_then(Value::as_str) {
            None => Err(DocumentError::MissingSpec),
            Some(spec) if !spec.starts_with(SPEC_PREFIX) => {
                Err(DocumentError::UnrecognizedSpec(spec.to_string()))
            }
            Some(_) => Ok(Self(value)),
        }
    }

    pub fn from_book(book: &WordBook) -> Result<Self, DocumentError> {
        Self::new(serde_json::to_value(book)?)
    }

    pub fn to_book(&self) -> Result<WordBook, DocumentError> {
        normalize(self.0.clone())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.0.get("name").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn version(&self) -> i64 {
        self.0
            .get("version")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0)
    }

    pub fn word_count(&self) -> usize {
        self.0
            .get(self.words_key())
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn overview(&self) -> WordBookOverview {
        WordBookOverview {
            id: self.id().to_string(),
            name: self.name().to_string(),
            word_count: self.word_count(),
            version: self.version(),
        }
    }

    fn words_key(&self) -> &'static str {
        if self.0.get("words").is_none() && self.0.get("_words").is_some() {
            "_words"
        } else {
            "words"
        }
    }

    fn set_field(&mut self, key: &str, value: Value) {
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.to_string(), value);
        }
    }
}

pub trait BookStore: Send + Sync {
    /// All books, newest `version` first.
    fn list(&self) -> Result<Vec<WordBookOverview>, StoreError>;

    fn get(&self, id: &str) -> Result<Document, StoreError>;

    fn contains(&self, id: &str) -> Result<bool, StoreError>;

    /// Persists a brand-new document under its own id.
    fn insert(&self, doc: Document) -> Result<(), StoreError>;

    /// Overwrites an existing book; the stored id is always `id`.
    fn update(&self, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Removes a book. Unknown ids are not an error.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    fn create_from_template(
        &self,
        request: &CreateBookRequest,
    ) -> Result<WordBookOverview, StoreError> {
        let template = self.get(&request.template_id)?;
        let mut rng = thread_rng();
        let id = derive_book_id(&request.name, &mut rng, |candidate| {
            self.contains(candidate).unwrap_or(true)
        });
        let doc = sample_template(&template, &id, &request.name, request.words_ratio, &mut rng);
        let overview = doc.overview();
        self.insert(doc)?;
        info!(
            book_id = %overview.id,
            template = %request.template_id,
            words = overview.word_count,
            "created book from template"
        );
        Ok(overview)
    }
}

/// Clones `template`, keeping `round(count * ratio / 100)` of its words
/// drawn without replacement (relative order preserved).
pub fn sample_template<R: Rng>(
    template: &Document,
    id: &str,
    name: &str,
    ratio_percent: f64,
    rng: &mut R,
) -> Document {
    let mut doc = template.clone();
    let key = doc.words_key();
    let words = doc
        .0
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let ratio = if ratio_percent.is_finite() {
        ratio_percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let amount = ((words.len() as f64 * ratio) / 100.0).round() as usize;
    let mut picked = index::sample(rng, words.len(), amount.min(words.len())).into_vec();
    picked.sort_unstable();
    let sampled = picked.into_iter().map(|idx| words[idx].clone()).collect();

    doc.set_field(key, Value::Array(sampled));
    doc.set_field("id", Value::from(id));
    doc.set_field("name", Value::from(name));
    doc.set_field("version", Value::from(now_millis()));
    doc
}

/// Purely alphabetic names become the (lower-cased) id unless taken;
/// everything else gets a random hex id.
pub fn derive_book_id<R, F>(name: &str, rng: &mut R, taken: F) -> String
where
    R: Rng,
    F: Fn(&str) -> bool,
{
    let candidate = name.trim();
    if !candidate.is_empty()
        && candidate.len() <= MAX_ID_LEN
        && candidate.chars().all(|ch| ch.is_ascii_alphabetic())
    {
        let lowered = candidate.to_ascii_lowercase();
        if !taken(&lowered) {
            return lowered;
        }
    }
    loop {
        let id: String = (0..RANDOM_ID_LEN)
            .map(|_| HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())] as char)
            .collect();
        if !taken(&id) {
            return id;
        }
    }
}

pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// One `<id>.json` file per book.
pub struct DirectoryStore {
    root: PathBuf,
    cache: Mutex<LruCache<String, Document>>,
}

impl DirectoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            root,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.json")))
    }

    fn write(&self, id: &str, doc: Document) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        write_json(&path, doc.as_value())?;
        self.cache.lock().put(id.to_string(), doc);
        Ok(())
    }
}

impl BookStore for DirectoryStore {
    fn list(&self) -> Result<Vec<WordBookOverview>, StoreError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        let mut rows: Vec<WordBookOverview> = paths
            .par_iter()
            .filter_map(|path| match read_document(path) {
                Ok(doc) => {
                    let mut row = doc.overview();
                    row.id = file_stem(path);
                    Some(row)
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable book");
                    None
                }
            })
            .collect();
        sort_overviews(&mut rows);
        Ok(rows)
    }

    fn get(&self, id: &str) -> Result<Document, StoreError> {
        let path = self.path_for(id)?;
        if let Some(doc) = self.cache.lock().get(id).cloned() {
            return Ok(doc);
        }
        let mut doc = read_document(&path).map_err(|err| not_found_as(err, id))?;
        doc.set_field("id", Value::from(id));
        self.cache.lock().put(id.to_string(), doc.clone());
        Ok(doc)
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        match self.path_for(id) {
            Ok(path) => Ok(path.is_file()),
            Err(StoreError::InvalidId(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn insert(&self, doc: Document) -> Result<(), StoreError> {
        let id = doc.id().to_string();
        self.write(&id, doc)
    }

    fn update(&self, id: &str, mut doc: Document) -> Result<(), StoreError> {
        if !self.contains(id)? {
            validate_id(id)?;
            return Err(StoreError::NotFound(id.to_string()));
        }
        doc.set_field("id", Value::from(id));
        self.write(id, doc)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        self.cache.lock().pop(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordFile {
    #[serde(default)]
    books: Vec<Value>,
}

/// All books as records of a single `{"books": [...]}` JSON file.
pub struct RecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Every record as stored, recognized or not. Writes go back through
    /// this list so records of other kinds are carried along untouched.
    fn read_raw(&self) -> Result<Vec<Value>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let file: RecordFile = serde_json::from_slice(&bytes)?;
        Ok(file.books)
    }

    fn write_raw(&self, books: Vec<Value>) -> Result<(), StoreError> {
        write_json(&self.path, &serde_json::to_value(RecordFile { books })?)
    }

    fn documents(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .read_raw()?
            .into_iter()
            .filter_map(|value| match Document::new(value) {
                Ok(doc) => Some(doc),
                Err(err) => {
                    warn!(error = %err, "skipping unrecognized record");
                    None
                }
            })
            .collect())
    }
}

fn record_id(record: &Value) -> &str {
    record.get("id").and_then(Value::as_str).unwrap_or_default()
}

impl BookStore for RecordStore {
    fn list(&self) -> Result<Vec<WordBookOverview>, StoreError> {
        let _guard = self.lock.lock();
        let mut rows: Vec<_> = self.documents()?.iter().map(Document::overview).collect();
        sort_overviews(&mut rows);
        Ok(rows)
    }

    fn get(&self, id: &str) -> Result<Document, StoreError> {
        let _guard = self.lock.lock();
        self.documents()?
            .into_iter()
            .find(|doc| doc.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_raw()?.iter().any(|record| record_id(record) == id))
    }

    fn insert(&self, doc: Document) -> Result<(), StoreError> {
        validate_id(doc.id())?;
        let _guard = self.lock.lock();
        let mut records = self.read_raw()?;
        records.retain(|record| record_id(record) != doc.id());
        records.push(doc.into_value());
        self.write_raw(records)
    }

    fn update(&self, id: &str, mut doc: Document) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut records = self.read_raw()?;
        let slot = records
            .iter_mut()
            .find(|record| record_id(record) == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.set_field("id", Value::from(id));
        *slot = doc.into_value();
        self.write_raw(records)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut records = self.read_raw()?;
        let before = records.len();
        records.retain(|record| record_id(record) != id);
        if records.len() == before {
            return Ok(());
        }
        self.write_raw(records)
    }
}

/// The single-document `state.json` used before books had ids.
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<Document, StoreError> {
        read_document(&self.path).map_err(|err| not_found_as(err, "state"))
    }

    pub fn write(&self, doc: Document) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json(&self.path, doc.as_value())
    }
}

fn read_document(path: &Path) -> Result<Document, StoreError> {
    let bytes = fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes)?;
    Ok(Document::new(value)?)
}

fn write_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes)?;
    Ok(())
}

fn not_found_as(err: StoreError, id: &str) -> StoreError {
    match err {
        StoreError::Io(io) if io.kind() == ErrorKind::NotFound => {
            StoreError::NotFound(id.to_string())
        }
        other => other,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}
