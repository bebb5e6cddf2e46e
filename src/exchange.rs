//! Book files on disk: pretty JSON, or zstd-compressed JSON for `.zst` paths.

use crate::error::ExchangeError;
use crate::migrate::normalize;
use crate::model::WordBook;
use serde_json::Value;
use std::fs;
use std::path::Path;
use zstd::bulk::compress as zstd_compress;
use zstd::stream::decode_all;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const COMPRESSION_LEVEL: i32 = 19;

pub fn is_compressed_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zst"))
}

pub fn export_book(book: &WordBook, path: &Path) -> Result<(), ExchangeError> {
    let json = serde_json::to_vec_pretty(book)?;
    let bytes = if is_compressed_path(path) {
        zstd_compress(&json, COMPRESSION_LEVEL)?
    } else {
        json
    };
    fs::write(path, bytes)?;
    Ok(())
}

/// Reads a book file in any supported revision, sniffing compression from
/// the content rather than the extension.
pub fn import_book(path: &Path) -> Result<WordBook, ExchangeError> {
    let raw = fs::read(path)?;
    let bytes = if raw.starts_with(&ZSTD_MAGIC) {
        decode_all(raw.as_slice())?
    } else {
        raw
    };
    let value: Value = serde_json::from_slice(&bytes)?;
    Ok(normalize(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentError;
    use crate::model::{CURRENT_SPEC, Word};

    fn sample_book() -> WordBook {
        let mut book = WordBook::empty("travel", "Travel");
        book.version = 7;
        let mut word = Word::new("w1", "itinerary", 5);
        word.remark = "a planned route".to_string();
        book.words.push(word);
        book
    }

    #[test]
    fn plain_and_compressed_exports_import_back() {
        let dir = tempfile::tempdir().unwrap();
        let book = sample_book();
        for name in ["travel.json", "travel.json.zst"] {
            let path = dir.path().join(name);
            export_book(&book, &path).unwrap();
            assert_eq!(import_book(&path).unwrap(), book);
        }
        let packed = fs::read(dir.path().join("travel.json.zst")).unwrap();
        assert!(packed.starts_with(&ZSTD_MAGIC));
    }

    #[test]
    fn compressed_content_is_detected_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let packed = dir.path().join("travel.zst");
        export_book(&sample_book(), &packed).unwrap();
        let renamed = dir.path().join("travel.bin");
        fs::rename(&packed, &renamed).unwrap();
        assert_eq!(import_book(&renamed).unwrap().name, "Travel");
    }

    #[test]
    fn legacy_files_are_upgraded_on_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        fs::write(
            &path,
            r#"{"spec":"wordbook/1","_words":[{"name":" fluster ","starred":true}]}"#,
        )
        .unwrap();
        let book = import_book(&path).unwrap();
        assert_eq!(book.spec, CURRENT_SPEC);
        assert_eq!(book.words[0].name, "fluster");
        assert_eq!(book.words[0].stars, 1);
    }

    #[test]
    fn foreign_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, r#"{"spec":"notes/1","words":[]}"#).unwrap();
        assert!(matches!(
            import_book(&path),
            Err(ExchangeError::Document(DocumentError::UnrecognizedSpec(_)))
        ));
    }
}
