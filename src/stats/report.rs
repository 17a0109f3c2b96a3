use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::persist;

use super::{pair_key, CountSummary, PairStats, StatsEngine};

/// Country × country matrix, rows citing, columns cited, values in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl HeatmapMatrix {
    fn from_pairs(
        countries: &[String],
        pairs: &BTreeMap<String, PairStats>,
        value: impl Fn(&PairStats) -> f64,
    ) -> Self {
        let values = countries
            .iter()
            .map(|a| {
                countries
                    .iter()
                    .map(|b| pairs.get(&pair_key(a, b)).map_or(0.0, |s| 100.0 * value(s)))
                    .collect()
            })
            .collect();
        Self {
            labels: countries.to_vec(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heatmaps {
    pub fraction: HeatmapMatrix,
    pub density_with_year: HeatmapMatrix,
    pub density_without_year: HeatmapMatrix,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryReport {
    pub generated_at: DateTime<Utc>,
    pub year_threshold: Option<i32>,
    pub papers: usize,
    pub countries: Vec<String>,
    pub publications: BTreeMap<String, usize>,
    /// Papers behind each country's publication count.
    pub country_papers: BTreeMap<String, Vec<String>>,
    pub cited_counts: BTreeMap<String, CountSummary>,
    pub cited_counts_within_window: Option<BTreeMap<String, CountSummary>>,
    pub pairs: BTreeMap<String, PairStats>,
    pub gini: BTreeMap<String, f64>,
    pub gini_series: BTreeMap<String, BTreeMap<i32, f64>>,
    pub heatmaps: Heatmaps,
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub top_k: usize,
    pub excluded_countries: Vec<String>,
    /// Optional citing-age window for the stratified cited counts.
    pub citation_window: Option<i32>,
}

impl CountryReport {
    pub fn build(engine: &StatsEngine<'_>, options: &ReportOptions) -> Self {
        let countries = engine.top_countries(options.top_k, &options.excluded_countries);
        let pairs = engine.pair_stats(&countries);
        let gini = countries
            .iter()
            .map(|c| (c.clone(), engine.citation_gini(c, &countries)))
            .collect();
        let gini_series = countries
            .iter()
            .map(|c| (c.clone(), engine.gini_series(c, &countries)))
            .collect();
        let heatmaps = Heatmaps {
            fraction: HeatmapMatrix::from_pairs(&countries, &pairs, |s| s.fraction),
            density_with_year: HeatmapMatrix::from_pairs(&countries, &pairs, |s| s.density_with_year),
            density_without_year: HeatmapMatrix::from_pairs(&countries, &pairs, |s| s.density_without_year),
        };
        Self {
            generated_at: Utc::now(),
            year_threshold: engine.year_threshold(),
            papers: engine.paper_count(),
            publications: engine.publication_counts(),
            country_papers: engine.country_publications(),
            cited_counts: engine.country_cited_summary(None),
            cited_counts_within_window: options.citation_window.map(|w| engine.country_cited_summary(Some(w))),
            countries,
            pairs,
            gini,
            gini_series,
            heatmaps,
        }
    }

    pub fn country_table(&self) -> String {
        let mut out = String::from("country|publications|support|total|mean|median\n");
        for (country, summary) in &self.cited_counts {
            out.push_str(&format!(
                "{}|{}|{}|{}|{:.4}|{:.1}\n",
                country,
                self.publications.get(country).copied().unwrap_or(0),
                summary.support,
                summary.total,
                summary.mean,
                summary.median
            ));
        }
        out
    }

    pub fn pair_table(&self) -> String {
        let mut out = String::from(
            "citing|cited|citing_papers|outbound|to_cited|fraction|density_with_year|density_without_year\n",
        );
        for a in &self.countries {
            for b in &self.countries {
                let Some(s) = self.pairs.get(&pair_key(a, b)) else { continue };
                out.push_str(&format!(
                    "{}|{}|{}|{}|{}|{:.6}|{:.6}|{:.6}\n",
                    a, b, s.citing_papers, s.outbound, s.to_target, s.fraction, s.density_with_year, s.density_without_year
                ));
            }
        }
        out
    }

    /// Write `<stem>.json`, `<stem>_countries.psv` and `<stem>_pairs.psv`
    /// into `dir`; returns the paths written.
    pub fn write(&self, dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let json = serde_json::to_string_pretty(self)?;
        let files = [
            (dir.join(format!("{}.json", stem)), json),
            (dir.join(format!("{}_countries.psv", stem)), self.country_table()),
            (dir.join(format!("{}_pairs.psv", stem)), self.pair_table()),
        ];
        let mut written = Vec::new();
        for (path, body) in files {
            persist::write_atomic(&path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }
        tracing::info!("Wrote country report for {} countries to {}", self.countries.len(), dir.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::corpus::tests::record;
    use crate::features::Corpus;
    use crate::graph::CitationGraph;
    use tempfile::TempDir;

    fn engine_fixture() -> (Corpus, CitationGraph) {
        let corpus = Corpus::from_records([
            record("U1", 2016, &["a1"], &["usa"]),
            record("U2", 2017, &["a2"], &["usa"]),
            record("C1", 2016, &["a3"], &["china"]),
            record("M1", 2017, &["a4"], &["microsoft"]),
        ])
        .unwrap();
        let mut graph = CitationGraph::new(corpus.paper_ids());
        graph.merge_references("U2", &["U1", "C1"]);
        graph.merge_references("C1", &["U1"]);
        graph.merge_references("M1", &["U1"]);
        (corpus, graph)
    }

    fn options() -> ReportOptions {
        ReportOptions {
            top_k: 10,
            excluded_countries: vec!["microsoft".into()],
            citation_window: Some(1),
        }
    }

    #[test]
    fn test_report_heatmaps_are_percentages() {
        let (corpus, graph) = engine_fixture();
        let engine = StatsEngine::new(&corpus, &graph, None);
        let report = CountryReport::build(&engine, &options());

        assert_eq!(report.countries, vec!["usa".to_string(), "china".to_string()]);
        let fraction = &report.heatmaps.fraction;
        assert_eq!(fraction.labels, report.countries);
        // usa cites: U2 -> U1 (usa), U2 -> C1 (china)
        assert_eq!(fraction.values[0], vec![50.0, 50.0]);
        assert_eq!(fraction.values[1], vec![100.0, 0.0]);
        assert_eq!(report.cited_counts["usa"].total, 3);
        let windowed = report.cited_counts_within_window.as_ref().unwrap();
        assert_eq!(windowed["usa"].total, 3);
        assert!(report.pairs.contains_key("usa#china"));
        assert_eq!(report.country_papers["usa"], vec!["U1".to_string(), "U2".to_string()]);
        assert_eq!(report.country_papers["microsoft"], vec!["M1".to_string()]);
    }

    #[test]
    fn test_report_files() {
        let tmp = TempDir::new().unwrap();
        let (corpus, graph) = engine_fixture();
        let engine = StatsEngine::new(&corpus, &graph, Some(2016));
        let report = CountryReport::build(&engine, &options());
        let written = report.write(&tmp.path().join("reports"), "countries_2016").unwrap();
        assert_eq!(written.len(), 3);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(json["year_threshold"], 2016);
        assert!(json["pairs"]["china#usa"]["fraction"].is_number());

        let pairs = std::fs::read_to_string(&written[2]).unwrap();
        assert_eq!(pairs.lines().count(), 1 + 4);
        assert!(pairs.contains("china|usa|1|1|1|1.000000|"));
    }
}
