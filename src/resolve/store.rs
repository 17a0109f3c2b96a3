use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::review::{ConfidenceTier, FilteredResolution};
use super::{RequestType, Resolution};
use crate::apis::AuthorRef;
use crate::persist::{self, sanitize_field};

const NO_AUTHOR_ID: &str = "None";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to replace {0}: {1}")]
    Persist(PathBuf, #[source] tempfile::PersistError),
    #[error("Malformed row: {0}")]
    Malformed(String),
}

/// Append-only table of resolutions keyed by bibliography title.
///
/// Columns: paper id, bib title, canonical title, authors
/// (`id#name%id#name`), fuzzy score, request type code. When one title has
/// several rows the most confident wins, and on ties the earliest.
pub struct ResolutionStore {
    rows: HashMap<String, Resolution>,
    order: Vec<String>,
    file: File,
    confident: usize,
}

impl ResolutionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut rows: HashMap<String, Resolution> = HashMap::new();
        let mut order = Vec::new();
        for line in persist::read_committed_lines(path)? {
            let res = match decode_row(&line) {
                Ok(res) => res,
                Err(e) => {
                    tracing::warn!("Skipping resolution row in {}: {}", path.display(), e);
                    continue;
                }
            };
            match rows.get(&res.bib_title) {
                Some(existing) if res.confidence_key() <= existing.confidence_key() => {}
                Some(_) => {
                    rows.insert(res.bib_title.clone(), res);
                }
                None => {
                    order.push(res.bib_title.clone());
                    rows.insert(res.bib_title.clone(), res);
                }
            }
        }
        let confident = rows.values().filter(|r| r.is_confident()).count();
        let file = persist::open_append(path)?;
        tracing::info!("Loaded {} resolved titles from {}", rows.len(), path.display());
        Ok(Self { rows, order, file, confident })
    }

    pub fn get(&self, bib_title: &str) -> Option<&Resolution> {
        self.rows.get(&sanitize_field(bib_title))
    }

    pub fn contains(&self, bib_title: &str) -> bool {
        self.rows.contains_key(&sanitize_field(bib_title))
    }

    /// Record a first resolution for a title. Returns `false` without writing
    /// anything if the title is already resolved.
    pub fn insert(&mut self, mut res: Resolution) -> Result<bool, StoreError> {
        res.bib_title = sanitize_field(&res.bib_title);
        if self.rows.contains_key(&res.bib_title) {
            return Ok(false);
        }
        persist::append_line(&mut self.file, &encode_row(&res))?;
        if res.is_confident() {
            self.confident += 1;
        }
        self.order.push(res.bib_title.clone());
        self.rows.insert(res.bib_title.clone(), res);
        Ok(true)
    }

    /// Offer a re-resolution; it replaces the stored row only when strictly
    /// more confident.
    pub fn offer(&mut self, mut res: Resolution) -> Result<bool, StoreError> {
        res.bib_title = sanitize_field(&res.bib_title);
        let Some(existing) = self.rows.get(&res.bib_title) else {
            return self.insert(res);
        };
        if res.confidence_key() <= existing.confidence_key() {
            return Ok(false);
        }
        persist::append_line(&mut self.file, &encode_row(&res))?;
        self.confident = self.confident + usize::from(res.is_confident())
            - usize::from(existing.is_confident());
        self.rows.insert(res.bib_title.clone(), res);
        Ok(true)
    }

    /// Rows in first-resolution order.
    pub fn iter(&self) -> impl Iterator<Item = &Resolution> {
        self.order.iter().filter_map(|t| self.rows.get(t))
    }

    /// `(confident, total)` over everything stored so far.
    pub fn confidence_counts(&self) -> (usize, usize) {
        (self.confident, self.rows.len())
    }
}

fn encode_authors(authors: &[AuthorRef]) -> String {
    authors
        .iter()
        .map(|a| {
            format!(
                "{}#{}",
                a.author_id.as_deref().unwrap_or(NO_AUTHOR_ID),
                sanitize_field(&a.name).replace('%', " ")
            )
        })
        .collect::<Vec<_>>()
        .join("%")
}

fn decode_authors(field: &str) -> Vec<AuthorRef> {
    if field.trim().is_empty() {
        return Vec::new();
    }
    field
        .split('%')
        .map(|pair| {
            let (id, name) = pair.split_once('#').unwrap_or((NO_AUTHOR_ID, pair));
            let id = id.trim();
            AuthorRef {
                author_id: (id != NO_AUTHOR_ID && !id.is_empty()).then(|| id.to_string()),
                name: name.trim().to_string(),
            }
        })
        .collect()
}

pub(crate) fn encode_row(res: &Resolution) -> String {
    [
        sanitize_field(&res.paper_id),
        sanitize_field(&res.bib_title),
        sanitize_field(&res.canonical_title),
        encode_authors(&res.authors),
        res.fuzzy_score.to_string(),
        res.request_type.code().to_string(),
    ]
    .join("\t")
}

pub(crate) fn decode_row(line: &str) -> Result<Resolution, StoreError> {
    let cols: Vec<&str> = line.split('\t').collect();
    decode_columns(&cols, line)
}

fn decode_columns(cols: &[&str], line: &str) -> Result<Resolution, StoreError> {
    let [paper_id, bib_title, canonical_title, authors, score, request_type] = cols else {
        return Err(StoreError::Malformed(format!("expected 6 columns: {:?}", line)));
    };
    let fuzzy_score = score
        .trim()
        .parse::<f64>()
        .map_err(|_| StoreError::Malformed(format!("bad fuzzy score {:?}", score)))?
        .round()
        .clamp(0.0, 100.0) as u8;
    let request_type = RequestType::from_code(request_type)
        .ok_or_else(|| StoreError::Malformed(format!("bad request type {:?}", request_type)))?;
    Ok(Resolution {
        paper_id: paper_id.to_string(),
        bib_title: bib_title.to_string(),
        canonical_title: canonical_title.to_string(),
        authors: decode_authors(authors),
        fuzzy_score,
        request_type,
    })
}

/// Rewrite the filtered table in one atomic replace. Columns are those of the
/// resolution table plus the confidence tier.
pub fn write_filtered(path: &Path, rows: &[FilteredResolution]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for row in rows {
        writeln!(tmp, "{}\t{}", encode_row(&row.resolution), row.tier.as_str())?;
    }
    tmp.as_file().sync_data()?;
    tmp.persist(path)
        .map_err(|e| StoreError::Persist(path.to_path_buf(), e))?;
    Ok(())
}

pub fn load_filtered(path: &Path) -> Result<Vec<FilteredResolution>, StoreError> {
    let mut out = Vec::new();
    for line in persist::read_committed_lines(path)? {
        let cols: Vec<&str> = line.split('\t').collect();
        let Some((tier, rest)) = cols.split_last() else { continue };
        let parsed = ConfidenceTier::parse(tier)
            .ok_or_else(|| StoreError::Malformed(format!("bad tier {:?}", tier)))
            .and_then(|tier| Ok((tier, decode_columns(rest, &line)?)));
        match parsed {
            Ok((tier, resolution)) => out.push(FilteredResolution { resolution, tier }),
            Err(e) => tracing::warn!("Skipping filtered row in {}: {}", path.display(), e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn res(title: &str, id: &str, rt: RequestType, score: u8) -> Resolution {
        Resolution {
            paper_id: id.into(),
            bib_title: title.into(),
            canonical_title: title.into(),
            authors: vec![
                AuthorRef { author_id: Some("42".into()), name: "Ada Lovelace".into() },
                AuthorRef { author_id: None, name: "Anon".into() },
            ],
            fuzzy_score: score,
            request_type: rt,
        }
    }

    #[test]
    fn test_row_roundtrip_keeps_missing_author_ids() {
        let r = res("A, title with\ttab", "p1", RequestType::Search, 91);
        let decoded = decode_row(&encode_row(&r)).unwrap();
        assert_eq!(decoded.bib_title, "A, title with tab");
        assert_eq!(decoded.authors, r.authors);
        assert_eq!(decoded.request_type, RequestType::Search);
        assert_eq!(decoded.fuzzy_score, 91);
    }

    #[test]
    fn test_reads_legacy_float_scores() {
        let line = "None\tLost Paper\tNone\t\t0.0\t-1";
        let r = decode_row(line).unwrap();
        assert_eq!(r.request_type, RequestType::Failed);
        assert!(r.authors.is_empty());
    }

    #[test]
    fn test_insert_is_first_writer_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.tsv");
        let mut store = ResolutionStore::open(&path).unwrap();
        assert!(store.insert(res("T", "p1", RequestType::Search, 60)).unwrap());
        assert!(!store.insert(res("T", "p2", RequestType::Direct, 100)).unwrap());
        assert_eq!(store.get("T").unwrap().paper_id, "p1");
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_filtered_table_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("filtered.tsv");
        let rows = vec![
            FilteredResolution { resolution: res("A", "p1", RequestType::Direct, 100), tier: ConfidenceTier::Exact },
            FilteredResolution { resolution: res("B", "p2", RequestType::Search, 70), tier: ConfidenceTier::FuzzyLowReviewed },
        ];
        write_filtered(&path, &rows).unwrap();
        assert_eq!(load_filtered(&path).unwrap(), rows);
    }
}
