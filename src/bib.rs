//! Bibliography ingestion boundary.
//!
//! The bibliography arrives already parsed, as a JSON object mapping each
//! paper key to `{ "type", "fields": {..}, "authors": [[first, last], ..] }`.
//! Entries are validated here into [`BibEntry`] so nothing downstream unpacks
//! loosely-typed fields.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BibError {
    #[error("entry {key}: missing required field `{field}`")]
    MissingField { key: String, field: &'static str },
    #[error("entry {key}: year `{value}` is not a number")]
    BadYear { key: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
struct RawBibEntry {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    authors: Vec<(String, String)>,
}

/// One author as written in the bibliography. The bibliography is the only
/// source whose authorship order is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibAuthor {
    pub first: String,
    pub last: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibEntry {
    pub key: String,
    pub entry_type: String,
    pub title: String,
    pub venue: Option<String>,
    pub month: Option<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
    pub authors: Vec<BibAuthor>,
}

impl BibEntry {
    fn from_raw(key: &str, mut raw: RawBibEntry) -> Result<Self, BibError> {
        let title = raw
            .fields
            .remove("title")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BibError::MissingField { key: key.to_string(), field: "title" })?;
        let year = match raw.fields.remove("year") {
            Some(y) => Some(y.trim().parse::<i32>().map_err(|_| BibError::BadYear {
                key: key.to_string(),
                value: y.clone(),
            })?),
            None => None,
        };
        let venue = raw
            .fields
            .remove("booktitle")
            .or_else(|| raw.fields.remove("journal"));

        Ok(Self {
            key: key.to_string(),
            entry_type: raw.entry_type,
            title,
            venue,
            month: raw.fields.remove("month"),
            year,
            url: raw.fields.remove("url"),
            authors: raw
                .authors
                .into_iter()
                .map(|(first, last)| BibAuthor { first, last })
                .collect(),
        })
    }

    pub fn is_proceedings(&self) -> bool {
        self.entry_type.eq_ignore_ascii_case("proceedings")
    }
}

/// Parse a bibliography JSON document. Proceedings volumes are dropped and
/// invalid entries are logged and skipped.
pub fn parse_bibliography(json: &str) -> Result<Vec<BibEntry>> {
    let raw: BTreeMap<String, RawBibEntry> =
        serde_json::from_str(json).context("Bibliography is not a paper-key map")?;

    let mut entries = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for (key, raw_entry) in raw {
        match BibEntry::from_raw(&key, raw_entry) {
            Ok(entry) if entry.is_proceedings() => {}
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Skipping bibliography entry: {}", e);
                skipped += 1;
            }
        }
    }
    tracing::info!("Loaded {} bibliography entries ({} invalid)", entries.len(), skipped);
    Ok(entries)
}

pub fn load_bibliography(path: &Path) -> Result<Vec<BibEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read bibliography {}", path.display()))?;
    parse_bibliography(&json)
}
