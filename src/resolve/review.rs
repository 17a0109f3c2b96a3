//! Filtering of resolutions into the set trusted for graph construction.
//!
//! Direct lookups are always kept, search hits at or above the fuzzy
//! threshold are kept, failures are always dropped. Search hits below the
//! threshold go to a [`Reviewer`], which decides same/different.

use std::cmp::Reverse;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use super::{RequestType, Resolution};

pub const DEFAULT_FUZZY_THRESHOLD: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceTier {
    Unresolved,
    FuzzyLowRejected,
    FuzzyLowReviewed,
    FuzzyHigh,
    Exact,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::Exact => "exact",
            ConfidenceTier::FuzzyHigh => "fuzzy-high",
            ConfidenceTier::FuzzyLowReviewed => "fuzzy-low-reviewed",
            ConfidenceTier::FuzzyLowRejected => "fuzzy-low-rejected",
            ConfidenceTier::Unresolved => "unresolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "exact" => Some(ConfidenceTier::Exact),
            "fuzzy-high" => Some(ConfidenceTier::FuzzyHigh),
            "fuzzy-low-reviewed" => Some(ConfidenceTier::FuzzyLowReviewed),
            "fuzzy-low-rejected" => Some(ConfidenceTier::FuzzyLowRejected),
            "unresolved" => Some(ConfidenceTier::Unresolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredResolution {
    pub resolution: Resolution,
    pub tier: ConfidenceTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Keep,
    Exclude,
}

/// Same/different judgment for a low-scoring search hit.
pub trait Reviewer {
    fn review(&mut self, candidate: &Resolution) -> ReviewDecision;
}

/// Non-interactive policy: give the same answer for every candidate.
pub struct FixedReviewer(pub ReviewDecision);

impl Reviewer for FixedReviewer {
    fn review(&mut self, _candidate: &Resolution) -> ReviewDecision {
        self.0
    }
}

/// Asks a human on a terminal, re-prompting until the answer is y or n.
/// End of input counts as "different".
pub struct TerminalReviewer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, candidate: &Resolution) -> std::io::Result<ReviewDecision> {
        writeln!(self.output, "Do these match?")?;
        writeln!(self.output, "Fuzzy Score: {}", candidate.fuzzy_score)?;
        writeln!(self.output, "{} - canonical title", candidate.canonical_title)?;
        writeln!(self.output, "{} - bib title", candidate.bib_title)?;
        self.output.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(ReviewDecision::Exclude);
            }
            match line.trim() {
                "y" | "Y" => return Ok(ReviewDecision::Keep),
                "n" | "N" => return Ok(ReviewDecision::Exclude),
                _ => {
                    write!(self.output, "Please answer y or n: ")?;
                    self.output.flush()?;
                }
            }
        }
    }
}

impl<R: BufRead, W: Write> Reviewer for TerminalReviewer<R, W> {
    fn review(&mut self, candidate: &Resolution) -> ReviewDecision {
        self.prompt(candidate).unwrap_or_else(|e| {
            tracing::warn!("Review prompt failed, excluding {:?}: {}", candidate.bib_title, e);
            ReviewDecision::Exclude
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOutcome {
    pub kept: Vec<FilteredResolution>,
    pub excluded: usize,
    pub reviewed: usize,
}

/// Review order: direct lookups, then search hits by descending score,
/// then failures. Ties break on title so input order never matters.
pub fn review_order(rows: &mut [Resolution]) {
    rows.sort_by(|a, b| {
        let rank = |r: &Resolution| match r.request_type {
            RequestType::Direct => (0u8, Reverse(101u8)),
            RequestType::Search => (1, Reverse(r.fuzzy_score)),
            RequestType::Failed => (2, Reverse(0)),
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.bib_title.cmp(&b.bib_title))
            .then_with(|| a.paper_id.cmp(&b.paper_id))
    });
}

pub fn filter_resolutions(
    rows: impl IntoIterator<Item = Resolution>,
    threshold: u8,
    reviewer: &mut dyn Reviewer,
) -> FilterOutcome {
    let mut rows: Vec<Resolution> = rows.into_iter().collect();
    review_order(&mut rows);

    let mut outcome = FilterOutcome::default();
    for resolution in rows {
        let tier = match resolution.request_type {
            RequestType::Failed => ConfidenceTier::Unresolved,
            RequestType::Direct => ConfidenceTier::Exact,
            RequestType::Search if resolution.fuzzy_score >= threshold => ConfidenceTier::FuzzyHigh,
            RequestType::Search => {
                outcome.reviewed += 1;
                match reviewer.review(&resolution) {
                    ReviewDecision::Keep => ConfidenceTier::FuzzyLowReviewed,
                    ReviewDecision::Exclude => ConfidenceTier::FuzzyLowRejected,
                }
            }
        };
        match tier {
            ConfidenceTier::Unresolved | ConfidenceTier::FuzzyLowRejected => outcome.excluded += 1,
            _ => outcome.kept.push(FilteredResolution { resolution, tier }),
        }
    }
    tracing::info!(
        "Filtering kept {} resolutions, excluded {}, {} sent to review",
        outcome.kept.len(),
        outcome.excluded,
        outcome.reviewed
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::UNRESOLVED_PAPER_ID;
    use std::io::Cursor;

    fn res(title: &str, rt: RequestType, score: u8) -> Resolution {
        Resolution {
            paper_id: if rt == RequestType::Failed { UNRESOLVED_PAPER_ID.into() } else { format!("id-{}", title) },
            bib_title: title.into(),
            canonical_title: format!("{} (canonical)", title),
            authors: vec![],
            fuzzy_score: score,
            request_type: rt,
        }
    }

    fn sample() -> Vec<Resolution> {
        vec![
            res("low", RequestType::Search, 40),
            res("fail", RequestType::Failed, 0),
            res("direct", RequestType::Direct, 30),
            res("high", RequestType::Search, 92),
            res("mid", RequestType::Search, 84),
        ]
    }

    #[test]
    fn test_filtering_is_order_independent() {
        let a = filter_resolutions(sample(), 85, &mut FixedReviewer(ReviewDecision::Keep));
        let mut reversed = sample();
        reversed.reverse();
        let b = filter_resolutions(reversed, 85, &mut FixedReviewer(ReviewDecision::Keep));
        assert_eq!(a, b);

        let titles: Vec<&str> = a.kept.iter().map(|r| r.resolution.bib_title.as_str()).collect();
        assert_eq!(titles, vec!["direct", "high", "mid", "low"]);
        assert_eq!(a.excluded, 1);
        assert_eq!(a.reviewed, 2);
    }

    #[test]
    fn test_direct_always_kept_failed_always_dropped() {
        let out = filter_resolutions(sample(), 85, &mut FixedReviewer(ReviewDecision::Exclude));
        assert!(out.kept.iter().any(|r| r.tier == ConfidenceTier::Exact));
        assert!(out.kept.iter().all(|r| r.resolution.request_type != RequestType::Failed));
        let titles: Vec<&str> = out.kept.iter().map(|r| r.resolution.bib_title.as_str()).collect();
        assert_eq!(titles, vec!["direct", "high"]);
        assert_eq!(out.excluded, 3);
    }

    #[test]
    fn test_terminal_reviewer_rejects_on_n() {
        let candidate = Resolution {
            paper_id: "nmt".into(),
            bib_title: "Neural Machine Translation".into(),
            canonical_title: "Neural Machine Translation by Jointly Learning to Align and Translate".into(),
            authors: vec![],
            fuzzy_score: 38,
            request_type: RequestType::Search,
        };
        let mut out = Vec::new();
        let mut reviewer = TerminalReviewer::new(Cursor::new("maybe\nn\n"), &mut out);
        let outcome = filter_resolutions(vec![candidate], 85, &mut reviewer);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.excluded, 1);

        let transcript = String::from_utf8(out).unwrap();
        assert!(transcript.contains("Fuzzy Score: 38"));
        assert!(transcript.contains("Please answer y or n"));
    }

    #[test]
    fn test_terminal_reviewer_keeps_on_y_and_excludes_on_eof() {
        let mut reviewer = TerminalReviewer::new(Cursor::new("Y\n"), Vec::new());
        assert_eq!(reviewer.review(&res("x", RequestType::Search, 50)), ReviewDecision::Keep);
        assert_eq!(reviewer.review(&res("x", RequestType::Search, 50)), ReviewDecision::Exclude);
    }
}
