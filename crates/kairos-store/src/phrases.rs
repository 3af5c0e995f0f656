//! TOML phrase libraries and a swappable shared snapshot.
//!
//! ```toml
//! [[bank]]
//! key = "bridge:holding:low"
//! phrases = [
//!     { text = "We can just be here with this.", weight = 2.0 },
//!     { text = "Nothing needs fixing right now.", field = { emotional = 0.7, pattern = 0.1, vulnerability = 0.6 } },
//! ]
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use kairos_core::{BankKey, PhraseBook, PhraseSource, WeightedPhrase};
use serde::Deserialize;

use crate::error::{Result, StoreError};

#[derive(Deserialize)]
struct PhraseFile {
    #[serde(default)]
    bank: Vec<BankEntry>,
}

#[derive(Deserialize)]
struct BankEntry {
    key: String,
    #[serde(default)]
    phrases: Vec<WeightedPhrase>,
}

/// Parse a phrase library. Banks with unrecognised keys are skipped with a
/// warning; repeated keys are merged.
pub fn parse_phrases(content: &str) -> Result<PhraseBook> {
    let file: PhraseFile = toml::from_str(content)?;
    let mut book = PhraseBook::new();
    for entry in file.bank {
        let Some(key) = BankKey::parse(&entry.key) else {
            tracing::warn!(key = %entry.key, "unrecognised phrase bank key, skipping");
            continue;
        };
        let offered = entry.phrases.len();
        let before = book.phrase_count();
        book.insert(key, entry.phrases);
        let kept = book.phrase_count() - before;
        if kept < offered {
            tracing::warn!(
                key = %entry.key,
                dropped = offered - kept,
                "phrases with empty text or bad weight dropped"
            );
        }
    }
    Ok(book)
}

pub fn load_phrases(path: &Path) -> Result<PhraseBook> {
    let content = std::fs::read_to_string(path)?;
    let book = parse_phrases(&content)?;
    tracing::info!(
        banks = book.bank_count(),
        phrases = book.phrase_count(),
        "loaded phrases from {}",
        path.display()
    );
    Ok(book)
}

/// Phrase library shared between concurrent turns.
///
/// Readers take an `Arc` snapshot; `swap` replaces the whole library at
/// once, so a reader never sees a half-loaded one.
pub struct SharedPhraseStore {
    path: Option<PathBuf>,
    book: RwLock<Arc<PhraseBook>>,
}

impl SharedPhraseStore {
    pub fn new(book: PhraseBook) -> Self {
        Self {
            path: None,
            book: RwLock::new(Arc::new(book)),
        }
    }

    /// Load from `path` and remember it for `reload`.
    pub fn open(path: &Path) -> Result<Self> {
        let book = load_phrases(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            book: RwLock::new(Arc::new(book)),
        })
    }

    pub fn snapshot(&self) -> Arc<PhraseBook> {
        match self.book.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the library, returning the previous one.
    pub fn swap(&self, book: PhraseBook) -> Arc<PhraseBook> {
        let next = Arc::new(book);
        let mut guard = match self.book.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    /// Re-read the file this store was opened from. On failure the current
    /// library stays in place.
    pub fn reload(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| StoreError::InvalidData("store was not opened from a file".into()))?;
        let book = load_phrases(path)?;
        self.swap(book);
        Ok(())
    }
}

impl PhraseSource for SharedPhraseStore {
    fn phrases(&self, key: &BankKey) -> Vec<WeightedPhrase> {
        self.snapshot().phrases(key)
    }
}
