//! Tiered name → gender lookup.
//!
//! Tier 1 is an exact (first, last) table, tiers 2 and 3 are first-name
//! tables of decreasing precision. Lookups always run in that order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::persist;

pub const FULL_NAME_TABLE: &str = "full_names.tsv";
pub const SECOND_TIER_TABLES: (&str, &str) = ("ssa_male_first_names.txt", "ssa_female_first_names.txt");
pub const THIRD_TIER_TABLES: (&str, &str) = (
    "pubmed_genni_male_first_names.txt",
    "pubmed_genni_female_first_names.txt",
);

/// Raw counts the first-name lists are derived from when the lists are
/// absent: a directory of SSA `yobYYYY.txt` files (`Name,G,count`) and the
/// Genni author-name table (tab-separated, one row per author).
pub const SSA_COUNTS_DIR: &str = "ssa";
pub const GENNI_COUNTS_FILE: &str = "genni-ethnea-authority2009.tsv";

/// Share of a name's mass one gender needs before the name is assigned.
pub const DEFAULT_AGREEMENT_PERCENT: f64 = 95.0;
/// Genni rows are single observations; a name seen once is left out.
pub const GENNI_MIN_SUPPORT: u64 = 2;
const GENNI_COLUMNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "m" | "male" => Some(Gender::Male),
            "f" | "female" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Lowercased letters only, e.g. "Jean-Luc" -> "jeanluc".
pub fn name_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}

/// First given name of a bibliography first-name field ("John A." -> "john").
fn given_name_key(first: &str) -> String {
    first.split_whitespace().next().map(name_key).unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct FirstNameTable {
    names: HashMap<String, Gender>,
}

impl FirstNameTable {
    /// Build from male and female name lists. A name present in both is
    /// ambiguous and left out.
    pub fn from_lists<'a>(
        male: impl IntoIterator<Item = &'a str>,
        female: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let male: HashSet<String> = male.into_iter().map(name_key).filter(|n| !n.is_empty()).collect();
        let female: HashSet<String> = female.into_iter().map(name_key).filter(|n| !n.is_empty()).collect();
        let mut names = HashMap::new();
        for name in male.difference(&female) {
            names.insert(name.clone(), Gender::Male);
        }
        for name in female.difference(&male) {
            names.insert(name.clone(), Gender::Female);
        }
        Self { names }
    }

    /// Build from `(name, gender, count)` observations. A name is assigned
    /// when at least `agreement_percent` of its mass agrees and its total
    /// count reaches `min_support`.
    pub fn from_frequency_counts<'a>(
        rows: impl IntoIterator<Item = (&'a str, Gender, u64)>,
        agreement_percent: f64,
        min_support: u64,
    ) -> Self {
        let mut counts: HashMap<String, (u64, u64)> = HashMap::new();
        for (name, gender, count) in rows {
            let key = name_key(name);
            if key.is_empty() {
                continue;
            }
            let entry = counts.entry(key).or_default();
            match gender {
                Gender::Male => entry.0 += count,
                Gender::Female => entry.1 += count,
                Gender::Unknown => {}
            }
        }

        let mut names = HashMap::new();
        for (name, (m, f)) in counts {
            let total = m + f;
            if total == 0 || total < min_support {
                continue;
            }
            let male_percent = 100.0 * m as f64 / total as f64;
            if male_percent >= agreement_percent {
                names.insert(name, Gender::Male);
            } else if 100.0 - male_percent >= agreement_percent {
                names.insert(name, Gender::Female);
            }
        }
        Self { names }
    }

    /// Parse `Name,G,count` lines (the name-frequency format).
    pub fn parse_frequency_rows(text: &str) -> Vec<(&str, Gender, u64)> {
        text.lines()
            .filter_map(|line| {
                let mut parts = line.trim().split(',');
                let name = parts.next()?;
                let gender = Gender::parse(parts.next()?)?;
                let count = parts.next()?.trim().parse().ok()?;
                Some((name, gender, count))
            })
            .collect()
    }

    /// Parse Genni author rows (header first). Each row is one observation
    /// of its first name with the Genni gender; `-` rows are skipped.
    pub fn parse_genni_rows(text: &str) -> Vec<(&str, Gender, u64)> {
        text.lines()
            .skip(1)
            .filter_map(|line| {
                let cols: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
                if cols.len() != GENNI_COLUMNS {
                    tracing::debug!("Ignoring Genni row with {} columns", cols.len());
                    return None;
                }
                Some((cols[5], Gender::parse(cols[7])?, 1))
            })
            .collect()
    }

    pub fn get(&self, first: &str) -> Option<Gender> {
        self.names.get(&given_name_key(first)).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    fn names_of(&self, gender: Gender) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .names
            .iter()
            .filter(|(_, g)| **g == gender)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Write the table as a male and a female name list, one name per line.
    pub fn write_lists(&self, dir: &Path, (male, female): (&str, &str)) -> Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        for (file, gender) in [(male, Gender::Male), (female, Gender::Female)] {
            let path = dir.join(file);
            let body: String = self.names_of(gender).iter().map(|n| format!("{}\n", n)).collect();
            persist::write_atomic(&path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    /// SSA year-of-birth files under `dir`, if any.
    pub fn from_ssa_dir(dir: &Path) -> Result<Option<Self>> {
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut texts = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            let is_year_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("yob") && n.ends_with(".txt"));
            if is_year_file {
                texts.push(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                );
            }
        }
        if texts.is_empty() {
            return Ok(None);
        }
        let rows = texts.iter().flat_map(|t| Self::parse_frequency_rows(t));
        Ok(Some(Self::from_frequency_counts(rows, DEFAULT_AGREEMENT_PERCENT, 1)))
    }

    /// The Genni author table at `path`, if present.
    pub fn from_genni_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(Self::from_frequency_counts(
            Self::parse_genni_rows(&text),
            DEFAULT_AGREEMENT_PERCENT,
            GENNI_MIN_SUPPORT,
        )))
    }

    /// Read the tier's name lists. When neither list exists the tier is
    /// derived from its raw counts and the lists are written for later runs.
    fn load(
        dir: &Path,
        lists: (&str, &str),
        derive: impl FnOnce() -> Result<Option<Self>>,
    ) -> Result<Self> {
        let (male, female) = (dir.join(lists.0), dir.join(lists.1));
        if !male.exists() && !female.exists() {
            if let Some(table) = derive()? {
                table.write_lists(dir, lists)?;
                tracing::info!(
                    "Derived {} first names from counts into {} and {}",
                    table.len(),
                    lists.0,
                    lists.1
                );
                return Ok(table);
            }
        }
        let male = read_optional(&male)?;
        let female = read_optional(&female)?;
        Ok(Self::from_lists(male.lines(), female.lines()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenderResolver {
    full_names: HashMap<(String, String), Gender>,
    second: FirstNameTable,
    third: FirstNameTable,
}

impl GenderResolver {
    pub fn new(
        full_names: impl IntoIterator<Item = ((String, String), Gender)>,
        second: FirstNameTable,
        third: FirstNameTable,
    ) -> Self {
        let full_names = full_names
            .into_iter()
            .map(|((first, last), g)| ((given_name_key(&first), name_key(&last)), g))
            .collect();
        Self { full_names, second, third }
    }

    /// Load the three tables from `dir`. Missing files give empty tiers.
    pub fn load(dir: &Path) -> Result<Self> {
        let raw = read_optional(&dir.join(FULL_NAME_TABLE))?;
        let full_names = raw.lines().filter_map(|line| {
            let mut cols = line.split('\t');
            let first = cols.next()?.to_string();
            let last = cols.next()?.to_string();
            let gender = Gender::parse(cols.next()?)?;
            Some(((first, last), gender))
        });
        let second = FirstNameTable::load(dir, SECOND_TIER_TABLES, || {
            FirstNameTable::from_ssa_dir(&dir.join(SSA_COUNTS_DIR))
        })?;
        let third = FirstNameTable::load(dir, THIRD_TIER_TABLES, || {
            FirstNameTable::from_genni_file(&dir.join(GENNI_COUNTS_FILE))
        })?;
        let resolver = Self::new(full_names, second, third);
        tracing::info!(
            "Gender tables: {} full names, {} + {} first names",
            resolver.full_names.len(),
            resolver.second.len(),
            resolver.third.len()
        );
        Ok(resolver)
    }

    pub fn resolve(&self, first: &str, last: &str) -> Gender {
        let key = (given_name_key(first), name_key(last));
        if let Some(g) = self.full_names.get(&key) {
            return *g;
        }
        self.second
            .get(first)
            .or_else(|| self.third.get(first))
            .unwrap_or(Gender::Unknown)
    }
}

fn read_optional(path: &Path) -> Result<String> {
    if !path.exists() {
        tracing::warn!("Name table {} not found, tier left empty", path.display());
        return Ok(String::new());
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> GenderResolver {
        GenderResolver::new(
            [(("Andrea".to_string(), "Rossi".to_string()), Gender::Male)],
            FirstNameTable::from_lists(["john"], ["andrea", "mary"]),
            FirstNameTable::from_lists(["mary", "wei"], Vec::<&str>::new()),
        )
    }

    #[test]
    fn test_tiers_run_in_order() {
        let r = resolver();
        // tier 1 overrides tier 2
        assert_eq!(r.resolve("Andrea", "Rossi"), Gender::Male);
        assert_eq!(r.resolve("Andrea", "Bianchi"), Gender::Female);
        // tier 2 overrides tier 3
        assert_eq!(r.resolve("Mary", "Smith"), Gender::Female);
        assert_eq!(r.resolve("Wei", "Zhang"), Gender::Male);
        assert_eq!(r.resolve("Xyz", "Zhang"), Gender::Unknown);
    }

    #[test]
    fn test_names_are_normalized() {
        let r = resolver();
        assert_eq!(r.resolve("John A.", "Doe"), Gender::Male);
        assert_eq!(r.resolve("  MARY ", "x"), Gender::Female);
    }

    #[test]
    fn test_frequency_threshold_and_support() {
        let text = "Mary,F,950\nMary,M,50\nJordan,M,60\nJordan,F,40\nZed,M,1\n";
        let rows = FirstNameTable::parse_frequency_rows(text);
        assert_eq!(rows.len(), 5);

        let table = FirstNameTable::from_frequency_counts(rows.clone(), DEFAULT_AGREEMENT_PERCENT, 1);
        assert_eq!(table.get("Mary"), Some(Gender::Female));
        assert_eq!(table.get("Jordan"), None);
        assert_eq!(table.get("Zed"), Some(Gender::Male));

        let table = FirstNameTable::from_frequency_counts(rows, DEFAULT_AGREEMENT_PERCENT, 2);
        assert_eq!(table.get("Zed"), None);
    }

    #[test]
    fn test_genni_rows() {
        let text = "auid\tname\tEthnicSeer\tprop\tlastname\tfirstname\tEthnea\tGenni\tSexMac\tSSNgender\n\
                    1\tWei Zhang\tx\t1\tZhang\tWei\tx\tM\tx\tM\n\
                    2\tNa Li\tx\t1\tLi\tNa\tx\t-\tx\tF\n\
                    3\tshort row\n";
        let rows = FirstNameTable::parse_genni_rows(text);
        assert_eq!(rows, vec![("Wei", Gender::Male, 1)]);
    }

    #[test]
    fn test_tiers_derived_from_counts_when_lists_absent() {
        let tmp = TempDir::new().unwrap();
        let ssa = tmp.path().join(SSA_COUNTS_DIR);
        std::fs::create_dir_all(&ssa).unwrap();
        std::fs::write(ssa.join("yob1990.txt"), "Mary,F,950\nJohn,M,700\nJordan,M,60\n").unwrap();
        std::fs::write(ssa.join("yob1991.txt"), "Mary,M,50\nJordan,F,40\n").unwrap();
        std::fs::write(ssa.join("NationalReadMe.pdf"), "not counts").unwrap();

        let row = |id: u32, first: &str, g: &str| format!("{id}\tn\tx\t1\tlast\t{first}\tx\t{g}\tx\t-\n");
        let genni = format!(
            "auid\tname\tEthnicSeer\tprop\tlastname\tfirstname\tEthnea\tGenni\tSexMac\tSSNgender\n{}{}{}",
            row(1, "Wei", "M"),
            row(2, "Wei", "M"),
            row(3, "Na", "F"),
        );
        std::fs::write(tmp.path().join(GENNI_COUNTS_FILE), genni).unwrap();

        let r = GenderResolver::load(tmp.path()).unwrap();
        assert_eq!(r.resolve("Mary", "Smith"), Gender::Female);
        assert_eq!(r.resolve("John", "Doe"), Gender::Male);
        assert_eq!(r.resolve("Jordan", "Doe"), Gender::Unknown);
        assert_eq!(r.resolve("Wei", "Zhang"), Gender::Male);
        // seen once in Genni
        assert_eq!(r.resolve("Na", "Li"), Gender::Unknown);

        let read = |name: &str| std::fs::read_to_string(tmp.path().join(name)).unwrap();
        assert_eq!(read(SECOND_TIER_TABLES.0), "john\n");
        assert_eq!(read(SECOND_TIER_TABLES.1), "mary\n");
        assert_eq!(read(THIRD_TIER_TABLES.0), "wei\n");
        assert_eq!(read(THIRD_TIER_TABLES.1), "");

        // later runs read the written lists
        let again = GenderResolver::load(tmp.path()).unwrap();
        assert_eq!(again.resolve("Wei", "Zhang"), Gender::Male);
    }

    #[test]
    fn test_load_from_dir_with_missing_tier() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(FULL_NAME_TABLE), "Kim\tLee\tf\n").unwrap();
        std::fs::write(tmp.path().join(SECOND_TIER_TABLES.0), "kim\nbob\n").unwrap();
        let r = GenderResolver::load(tmp.path()).unwrap();
        assert_eq!(r.resolve("Kim", "Lee"), Gender::Female);
        assert_eq!(r.resolve("Kim", "Park"), Gender::Male);
        assert_eq!(r.resolve("Alice", "Park"), Gender::Unknown);
    }
}
