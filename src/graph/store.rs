use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::persist;
use crate::resolve::store::StoreError;

/// Append-only reference table: one `source,target,target,..` line per paper
/// whose references were fetched. A paper without a line has not been fetched
/// yet (or its fetch failed) and is retried on the next run.
pub struct ReferenceStore {
    references: HashMap<String, Vec<String>>,
    file: File,
}

impl ReferenceStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut references = HashMap::new();
        for line in persist::read_committed_lines(path)? {
            let mut parts = line.trim().split(',');
            let Some(source) = parts.next().filter(|s| !s.is_empty()) else {
                continue;
            };
            let targets: Vec<String> = parts
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            references.entry(source.to_string()).or_insert(targets);
        }
        let file = persist::open_append(path)?;
        tracing::info!("Loaded references for {} papers from {}", references.len(), path.display());
        Ok(Self { references, file })
    }

    pub fn contains(&self, source: &str) -> bool {
        self.references.contains_key(source)
    }

    pub fn get(&self, source: &str) -> Option<&[String]> {
        self.references.get(source).map(Vec::as_slice)
    }

    /// Persist the references of `source`. A source already on file is left
    /// untouched.
    pub fn record(&mut self, source: &str, targets: Vec<String>) -> Result<bool, StoreError> {
        if self.contains(source) {
            return Ok(false);
        }
        let mut line = source.to_string();
        for t in &targets {
            line.push(',');
            line.push_str(t);
        }
        persist::append_line(&mut self.file, &line)?;
        self.references.insert(source.to_string(), targets);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ref_paper_ids.csv");
        {
            let mut store = ReferenceStore::open(&path).unwrap();
            assert!(store.record("A", vec!["B".into(), "Z".into()]).unwrap());
            assert!(store.record("B", vec![]).unwrap());
            assert!(!store.record("A", vec!["C".into()]).unwrap());
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A,B,Z\nB\n");

        let store = ReferenceStore::open(&path).unwrap();
        assert_eq!(store.get("A").unwrap(), ["B".to_string(), "Z".to_string()]);
        assert_eq!(store.get("B").unwrap().len(), 0);
        assert!(!store.contains("C"));
    }

    #[test]
    fn test_reads_trailing_comma_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.csv");
        std::fs::write(&path, "A,\nB,A,\n").unwrap();
        let store = ReferenceStore::open(&path).unwrap();
        assert!(store.get("A").unwrap().is_empty());
        assert_eq!(store.get("B").unwrap(), ["A".to_string()]);
    }
}
