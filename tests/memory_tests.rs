use std::path::PathBuf;
use std::sync::Arc;

use vigil::config::MemoryConfig;
use vigil::memory::{HybridRetriever, MemoryRecord, MemoryStore, Reranker};

fn config_at(dir: &tempfile::TempDir, max_records: usize) -> MemoryConfig {
    MemoryConfig {
        path: dir.path().join("memory.json"),
        max_records,
        ..MemoryConfig::default()
    }
}

#[test]
fn add_then_search_finds_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));

    store.add("the garage code is 4821", &["user"]);
    let hits = store.search("garage", 5);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "the garage code is 4821");
}

#[test]
fn search_is_most_recent_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));

    store.add("meeting at 9", &[]);
    store.add("meeting moved to 10", &[]);
    let hits = store.search("meeting", 5);
    assert_eq!(hits[0].text, "meeting moved to 10");
    assert_eq!(hits[1].text, "meeting at 9");
}

#[test]
fn cap_evicts_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 3));

    for i in 0..5 {
        store.add(&format!("fact {i}"), &[]);
    }
    assert_eq!(store.len(), 3);
    assert!(store.search("fact 0", 5).is_empty());
    assert_eq!(store.search("fact 4", 5).len(), 1);
}

#[test]
fn corrupt_file_degrades_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_at(&dir, 100);
    std::fs::write(&config.path, "{not valid json").unwrap();

    let store = MemoryStore::open(&config);
    assert!(store.is_empty());
    // The store still works after the bad load.
    store.add("fresh start", &[]);
    assert_eq!(store.len(), 1);
}

#[test]
fn flush_and_reopen_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_at(&dir, 100);

    let store = MemoryStore::open(&config);
    store.add("persisted fact", &["test"]);
    store.flush();

    let reopened = MemoryStore::open(&config);
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.search("persisted", 5)[0].tags, vec!["test"]);
}

#[test]
fn clear_persists_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_at(&dir, 100);

    let store = MemoryStore::open(&config);
    store.add("soon gone", &[]);
    store.clear();

    let reopened = MemoryStore::open(&config);
    assert!(reopened.is_empty());
}

#[test]
fn contains_text_ignores_case_and_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));

    store.add("The cat is  Orange", &[]);
    assert!(store.contains_text("the cat is orange"));
    assert!(!store.contains_text("the cat is black"));
}

#[test]
fn empty_and_blank_inputs_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));

    store.add("", &[]);
    store.add("   ", &[]);
    assert!(store.is_empty());
    assert!(store.search("", 5).is_empty());
    assert!(store.search("anything", 0).is_empty());
}

struct FailingReranker;

impl Reranker for FailingReranker {
    fn rerank(
        &self,
        _query: &str,
        _candidates: &[MemoryRecord],
        _limit: usize,
    ) -> anyhow::Result<Vec<MemoryRecord>> {
        anyhow::bail!("rerank backend offline")
    }
}

#[test]
fn retrieval_degrades_when_rerank_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));
    store.add("coffee order is a flat white", &[]);

    let retriever = HybridRetriever::new(Arc::clone(&store), Some(Arc::new(FailingReranker)), 30);
    let hits = retriever.search("coffee", 5);
    assert_eq!(hits.len(), 1);
}

#[test]
fn retrieval_deduplicates_and_bounds_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::open(&config_at(&dir, 100));
    for i in 0..10 {
        store.add(&format!("note {i} about tea"), &[]);
    }

    let retriever = HybridRetriever::new(Arc::clone(&store), None, 30);
    let hits = retriever.search("tea", 3);
    assert_eq!(hits.len(), 3);
    let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
    let mut deduped = texts.clone();
    deduped.dedup();
    assert_eq!(texts, deduped);
}

#[test]
fn missing_history_path_is_not_an_error() {
    let config = MemoryConfig {
        path: PathBuf::from("/nonexistent/never/memory.json"),
        ..MemoryConfig::default()
    };
    let store = MemoryStore::open(&config);
    assert!(store.is_empty());
    // Flush failure is logged, never raised.
    store.add("unwritable", &[]);
    store.flush();
}
