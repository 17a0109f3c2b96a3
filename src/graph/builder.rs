use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::{CitationGraph, ReferenceStore};
use crate::apis::MetadataLookup;
use crate::resolve::store::StoreError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub known_papers: usize,
    pub already_fetched: usize,
    pub fetched: usize,
    pub failed: usize,
    pub null_references: usize,
    pub external_references: usize,
    pub edges: usize,
}

/// Build the citation graph for `known` papers, extending `store` with the
/// references of every paper not fetched in an earlier run.
///
/// Fetches run concurrently, at most `workers` at a time. Results are merged
/// one by one in this task, which is the only writer of both the graph and
/// the reference file. A failed fetch leaves no line behind, so the paper is
/// retried next run.
pub async fn build_or_extend<S: AsRef<str>>(
    lookup: &dyn MetadataLookup,
    known: &[S],
    store: &mut ReferenceStore,
    workers: usize,
) -> Result<(CitationGraph, BuildSummary), StoreError> {
    let mut graph = CitationGraph::new(known.iter().map(|id| id.as_ref()));
    let mut summary = BuildSummary {
        known_papers: graph.paper_count(),
        ..BuildSummary::default()
    };

    let mut pending: Vec<String> = Vec::new();
    for id in known.iter().map(|id| id.as_ref()) {
        match store.get(id) {
            Some(targets) => {
                let stats = graph.merge_references(id, targets);
                summary.external_references += stats.external;
                summary.already_fetched += 1;
            }
            None => pending.push(id.to_string()),
        }
    }
    pending.sort_unstable();
    pending.dedup();
    tracing::info!(
        "Citation graph: {} papers already fetched, {} to fetch with {} workers",
        summary.already_fetched,
        pending.len(),
        workers
    );

    let total = pending.len();
    let mut fetches = stream::iter(pending)
        .map(|id: String| async move {
            let result = lookup.get_references(&id).await;
            (id, result)
        })
        .buffer_unordered(workers.max(1));

    let mut done = 0usize;
    while let Some((id, result)) = fetches.next().await {
        done += 1;
        match result {
            Ok(Some(refs)) => {
                let listed = refs.len();
                let targets: Vec<String> = refs.into_iter().flatten().collect();
                summary.null_references += listed - targets.len();

                store.record(&id, targets.clone())?;
                let stats = graph.merge_references(&id, &targets);
                summary.external_references += stats.external;
                summary.fetched += 1;
            }
            Ok(None) => {
                tracing::warn!("References couldn't be fetched for paper id: {}", id);
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!("Reference fetch for {} failed: {}", id, e);
                summary.failed += 1;
            }
        }
        if done % 100 == 0 || done == total {
            tracing::info!("Fetched references {}/{} ({} failed)", done, total, summary.failed);
        }
    }

    summary.edges = graph.edge_count();
    tracing::info!(
        "Citation graph built: {} papers, {} edges, {} external and {} null references dropped",
        summary.known_papers,
        summary.edges,
        summary.external_references,
        summary.null_references
    );
    Ok((graph, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::mock::MockLookup;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_merge_across_two_runs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ref_paper_ids.csv");

        let mut lookup = MockLookup::default();
        lookup.references.insert("A".into(), vec![Some("B".into()), Some("OUT".into()), None]);
        lookup.references.insert("B".into(), vec![Some("A".into())]);

        // run 1: B's fetch fails, as if the process stopped before it
        lookup.failing.insert("B".into());
        {
            let mut store = ReferenceStore::open(&path).unwrap();
            let (graph, summary) = build_or_extend(&lookup, &["A", "B"], &mut store, 4).await.unwrap();
            assert!(graph.cites("A", "B"));
            assert_eq!(summary.fetched, 1);
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.null_references, 1);
            assert_eq!(summary.external_references, 1);
        }

        // run 2: A is not re-fetched, B is
        lookup.failing.clear();
        let mut store = ReferenceStore::open(&path).unwrap();
        let (graph, summary) = build_or_extend(&lookup, &["A", "B"], &mut store, 4).await.unwrap();
        assert_eq!(summary.already_fetched, 1);
        assert_eq!(summary.fetched, 1);
        assert!(graph.cites("A", "B"));
        assert!(graph.cites("B", "A"));
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(lookup.reference_calls_for("A"), 1);
        assert_eq!(lookup.reference_calls_for("B"), 2);
    }

    fn assert_send<T: Send>(value: T) -> T {
        value
    }

    #[tokio::test]
    async fn test_build_future_is_send() {
        let tmp = TempDir::new().unwrap();
        let mut lookup = MockLookup::default();
        lookup.references.insert("A".into(), vec![Some("B".into())]);
        let lookup: &dyn MetadataLookup = &lookup;
        let mut store = ReferenceStore::open(&tmp.path().join("refs.csv")).unwrap();
        let known = vec!["A".to_string(), "B".to_string()];

        // tool handlers hold this future across awaits on a multi-threaded runtime
        let (graph, summary) = assert_send(build_or_extend(lookup, known.as_slice(), &mut store, 2))
            .await
            .unwrap();
        assert!(graph.cites("A", "B"));
        assert_eq!(summary.fetched, 1);
        assert_eq!(store.get("A").unwrap(), ["B".to_string()]);
    }

    #[tokio::test]
    async fn test_not_found_is_retried_later() {
        let tmp = TempDir::new().unwrap();
        let lookup = MockLookup::default();
        let mut store = ReferenceStore::open(&tmp.path().join("refs.csv")).unwrap();
        let (_, summary) = build_or_extend(&lookup, &["A"], &mut store, 2).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!store.contains("A"));
    }

    #[tokio::test]
    async fn test_many_concurrent_fetches_lose_nothing() {
        let tmp = TempDir::new().unwrap();
        let ids: Vec<String> = (0..200).map(|i| format!("P{}", i)).collect();
        let mut lookup = MockLookup::default();
        for (i, id) in ids.iter().enumerate() {
            let next = format!("P{}", (i + 1) % ids.len());
            lookup.references.insert(id.clone(), vec![Some(next)]);
        }
        let mut store = ReferenceStore::open(&tmp.path().join("refs.csv")).unwrap();
        let (graph, summary) = build_or_extend(&lookup, ids.as_slice(), &mut store, 32).await.unwrap();
        assert_eq!(summary.fetched, 200);
        assert_eq!(graph.edge_count(), 200);
        assert_eq!(store.len(), 200);
        assert_eq!(graph.derive_reverse().len(), 200);
    }
}
