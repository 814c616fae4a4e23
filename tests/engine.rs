//! End-to-end tests of the indexing controller against a temporary corpus
//! and a deterministic in-process embedding gateway.

mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{Env, HashGateway, POISON};
use corpus_index::catalog::Catalog;
use corpus_index::chunk::chunk_id;
use corpus_index::embedding::DisabledGateway;
use corpus_index::vector_index::VectorIndex;
use corpus_index::{IndexError, IndexingController};

fn text(len: usize, word: &str) -> String {
    let mut s = String::new();
    while s.len() < len {
        s.push_str(word);
        s.push(' ');
    }
    s.truncate(len);
    s
}

#[tokio::test]
async fn initialize_indexes_every_supported_file() {
    let env = Env::new();
    env.write("alpha.txt", text(100, "alpha"), 1_000);
    env.write("sub/charlie.txt", text(30, "charlie"), 1_000);
    env.write("ignored.md", "markdown is not indexed", 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    let report = ctl.initialize().await.unwrap();

    assert_eq!(report.documents_found, 2);
    assert_eq!(report.documents_processed, 2);
    assert_eq!(report.documents_failed, 0);
    assert_eq!(report.chunks_written, 3 + 1);

    let stats = ctl.stats().await;
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.chunks, 4);
    assert_eq!(stats.stale_documents, Some(0));
    assert_eq!(stats.documents_by_format.get("txt"), Some(&2));
    assert_eq!(stats.chunks_by_source.get("sub/charlie.txt"), Some(&1));
    assert_eq!(stats.embedding_model.as_deref(), Some("hash"));
    assert_eq!(stats.embedding_dims, Some(16));
    assert!(stats.index_size_bytes.unwrap() > 0);
    assert_eq!(stats.state, "idle");

    let entry = ctl.catalog_entry("alpha.txt").await.unwrap();
    assert_eq!(entry.chunk_count, 3);
    assert!(env.vectors_path().exists());
    assert!(env.catalog_path().exists());
}

#[tokio::test]
async fn second_refresh_is_a_no_op() {
    let env = Env::new();
    env.write("a.txt", text(120, "apple"), 1_000);
    env.write("b.txt", text(60, "banana"), 1_000);

    let gateway = HashGateway::new("hash", 16);
    let ctl = env.open(gateway.clone());
    ctl.refresh().await.unwrap();
    let calls = gateway.calls.load(Ordering::SeqCst);
    let chunks = ctl.stats().await.chunks;

    let again = ctl.refresh().await.unwrap();
    assert_eq!(again.documents_processed, 0);
    assert_eq!(again.documents_unchanged, 2);
    assert_eq!(again.chunks_written, 0);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), calls);

    let stats = ctl.stats().await;
    assert_eq!(stats.chunks, chunks);
    assert_eq!(stats.documents, 2);
}

#[tokio::test]
async fn modified_file_has_its_chunks_replaced() {
    let env = Env::new();
    let path = env.write("notes.txt", text(100, "old"), 1_000);
    env.write("other.txt", text(40, "other"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();
    for i in 0..3 {
        assert!(ctl.chunk(&chunk_id("notes.txt", i)).await.is_some());
    }

    fs::write(&path, "fresh content").unwrap();
    common::set_mtime(&path, 2_000);

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.documents_unchanged, 1);

    let first = ctl.chunk(&chunk_id("notes.txt", 0)).await.unwrap();
    assert_eq!(first.text, "fresh content");
    assert!(ctl.chunk(&chunk_id("notes.txt", 1)).await.is_none());
    assert!(ctl.chunk(&chunk_id("notes.txt", 2)).await.is_none());

    let stats = ctl.stats().await;
    assert_eq!(stats.chunks_by_source.get("notes.txt"), Some(&1));
    assert_eq!(stats.chunks, 2);
    assert!(ctl.validate().await.is_consistent());
}

#[tokio::test]
async fn search_ranks_matching_document_first() {
    let env = Env::new();
    env.write("alpha.txt", "alpha alpha alpha bravo", 1_000);
    env.write("charlie.txt", "charlie delta echo", 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();

    let hits = ctl.search("alpha", None, None).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk.source_path, "alpha.txt");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let limited = ctl.search("alpha", Some(1), None).await.unwrap();
    assert_eq!(limited.len(), 1);

    let strict = ctl.search("alpha", None, Some(0.99)).await.unwrap();
    assert!(strict.len() <= hits.len());
    assert!(strict.iter().all(|h| h.score >= 0.99));
}

#[tokio::test]
async fn raising_min_score_never_adds_results() {
    let env = Env::new();
    env.write("one.txt", text(200, "river stone"), 1_000);
    env.write("two.txt", text(200, "stone wall garden"), 1_000);
    env.write("three.txt", text(200, "garden river"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 32));
    ctl.initialize().await.unwrap();

    let mut previous = usize::MAX;
    for min in [-1.0, 0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
        let hits = ctl.search("river stone", Some(100), Some(min)).await.unwrap();
        assert!(hits.iter().all(|h| h.score >= min));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.len() <= previous);
        previous = hits.len();
    }
}

#[tokio::test]
async fn reopened_index_returns_identical_results() {
    let env = Env::new();
    env.write("a.txt", text(150, "mountain lake"), 1_000);
    env.write("b.txt", text(150, "lake shore forest"), 1_000);

    let first = env.open(HashGateway::new("hash", 16));
    first.initialize().await.unwrap();
    let before = first.search("lake forest", Some(10), Some(-1.0)).await.unwrap();
    drop(first);

    let second = env.open(HashGateway::new("hash", 16));
    let after = second.search("lake forest", Some(10), Some(-1.0)).await.unwrap();
    assert_eq!(before, after);

    let report = second.refresh().await.unwrap();
    assert_eq!(report.documents_processed, 0);
}

#[tokio::test]
async fn model_mismatch_fails_without_touching_files() {
    let env = Env::new();
    env.write("a.txt", text(80, "gamma"), 1_000);

    let ctl = env.open(HashGateway::new("model-a", 16));
    ctl.initialize().await.unwrap();
    drop(ctl);

    let vectors = fs::read(env.vectors_path()).unwrap();
    let catalog = fs::read(env.catalog_path()).unwrap();

    let err = IndexingController::open(env.config(), HashGateway::new("model-b", 8))
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::Configuration(_)), "{}", err);

    let err = IndexingController::open(env.config(), HashGateway::new("model-b", 16))
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::Configuration(_)), "{}", err);

    assert_eq!(fs::read(env.vectors_path()).unwrap(), vectors);
    assert_eq!(fs::read(env.catalog_path()).unwrap(), catalog);
}

#[tokio::test]
async fn reset_state_recovers_from_model_change() {
    let env = Env::new();
    env.write("a.txt", text(80, "gamma"), 1_000);

    env.open(HashGateway::new("model-a", 16))
        .initialize()
        .await
        .unwrap();

    IndexingController::reset_state(&env.config()).unwrap();
    assert!(!env.vectors_path().exists());

    let ctl = env.open(HashGateway::new("model-b", 8));
    let report = ctl.initialize().await.unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(ctl.stats().await.embedding_model.as_deref(), Some("model-b"));
}

#[tokio::test]
async fn corrupt_index_is_discarded_and_rebuilt() {
    let env = Env::new();
    env.write("a.txt", text(100, "delta"), 1_000);
    env.write("b.txt", text(100, "epsilon"), 1_000);

    env.open(HashGateway::new("hash", 16))
        .initialize()
        .await
        .unwrap();

    let mut bytes = fs::read(env.vectors_path()).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5a;
    fs::write(env.vectors_path(), &bytes).unwrap();

    let ctl = env.open(HashGateway::new("hash", 16));
    let stats = ctl.stats().await;
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.documents, 0);
    assert!(stats.last_error.unwrap().contains("corruption"));
    assert!(ctl.validate().await.last_error.is_some());

    let report = ctl.initialize().await.unwrap();
    assert_eq!(report.documents_processed, 2);
    assert!(ctl.stats().await.last_error.is_none());
    assert!(ctl.validate().await.is_consistent());
}

#[tokio::test]
async fn truncated_index_is_never_loaded() {
    let env = Env::new();
    env.write("a.txt", text(100, "zeta"), 1_000);
    env.open(HashGateway::new("hash", 16))
        .initialize()
        .await
        .unwrap();

    let bytes = fs::read(env.vectors_path()).unwrap();
    fs::write(env.vectors_path(), &bytes[..bytes.len() - 10]).unwrap();

    let ctl = env.open(HashGateway::new("hash", 16));
    assert_eq!(ctl.stats().await.chunks, 0);
    assert!(ctl.chunk(&chunk_id("a.txt", 0)).await.is_none());
}

#[tokio::test]
async fn catalog_ahead_of_index_is_reprocessed() {
    let env = Env::new();
    env.write("alpha.txt", text(40, "alpha"), 1_000);
    env.write("beta.txt", text(40, "beta"), 1_000);
    env.open(HashGateway::new("hash", 16))
        .initialize()
        .await
        .unwrap();

    // Index rewritten empty while the catalog still lists both files.
    VectorIndex::new().persist(&env.vectors_path()).unwrap();

    let ctl = env.open(HashGateway::new("hash", 16));
    assert!(!ctl.validate().await.is_consistent());
    assert_eq!(ctl.stats().await.stale_documents, Some(2));

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_processed, 2);
    assert_eq!(report.documents_unchanged, 0);
    assert!(!ctl.search("alpha", None, None).await.unwrap().is_empty());
    assert!(ctl.validate().await.is_consistent());

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_processed, 0);
    assert_eq!(report.documents_unchanged, 2);
}

#[tokio::test]
async fn missing_index_file_next_to_catalog_is_rebuilt() {
    let env = Env::new();
    env.write("a.txt", text(100, "omega"), 1_000);
    env.open(HashGateway::new("hash", 16))
        .initialize()
        .await
        .unwrap();
    fs::remove_file(env.vectors_path()).unwrap();

    let ctl = env.open(HashGateway::new("hash", 16));
    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_processed, 1);
    assert_eq!(ctl.stats().await.chunks, 3);
}

#[tokio::test]
async fn remove_writes_catalog_before_index() {
    let env = Env::new();
    env.write("a.txt", text(100, "sigma"), 1_000);
    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();
    ctl.remove_document(Path::new("a.txt")).await.unwrap();

    assert!(Catalog::load(&env.catalog_path()).unwrap().get("a.txt").is_none());
    let index = VectorIndex::load(&env.vectors_path()).unwrap().unwrap();
    assert!(index.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_subtree_is_not_pruned() {
    let env = Env::new();
    env.write("shared/report.txt", text(90, "quarterly"), 1_000);
    env.write("local.txt", text(90, "local"), 1_000);

    let mut config = env.config();
    config.corpus.follow_symlinks = true;
    let ctl = IndexingController::open(config, HashGateway::new("hash", 16)).unwrap();
    ctl.initialize().await.unwrap();

    // The directory becomes a dangling link, as with an unmounted share.
    let parked = env.tmp.path().join("parked");
    fs::rename(env.root.join("shared"), &parked).unwrap();
    std::os::unix::fs::symlink(env.tmp.path().join("offline"), env.root.join("shared")).unwrap();

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_removed, 0);
    assert!(ctl.catalog_entry("shared/report.txt").await.is_some());
    assert!(ctl.stats().await.chunks_by_source.contains_key("shared/report.txt"));
    assert!(!ctl.validate().await.warnings.is_empty());

    // Once the entry is gone for real, the document is pruned.
    fs::remove_file(env.root.join("shared")).unwrap();
    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_removed, 1);
    assert!(ctl.catalog_entry("shared/report.txt").await.is_none());
}

#[tokio::test]
async fn deleted_files_are_pruned() {
    let env = Env::new();
    let gone = env.write("gone.txt", text(90, "vanish"), 1_000);
    env.write("stay.txt", text(90, "remain"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();
    fs::remove_file(&gone).unwrap();

    assert_eq!(ctl.stats().await.stale_documents, Some(1));
    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_removed, 1);
    assert_eq!(report.documents_processed, 0);

    let stats = ctl.stats().await;
    assert_eq!(stats.documents, 1);
    assert!(stats.chunks_by_source.get("gone.txt").is_none());
    assert!(ctl.catalog_entry("gone.txt").await.is_none());
    assert!(ctl.validate().await.is_consistent());
}

#[tokio::test]
async fn extraction_failure_skips_only_that_document() {
    let env = Env::new();
    env.write("broken.docx", b"this is not a zip archive", 1_000);
    env.write("fine.txt", text(60, "fine"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    let report = ctl.initialize().await.unwrap();

    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.documents_failed, 1);
    assert_eq!(report.failures[0].path, "broken.docx");
    assert!(ctl.catalog_entry("broken.docx").await.is_none());
    assert!(ctl.last_error().is_none());

    let validation = ctl.validate().await;
    assert!(validation.is_consistent());
    assert_eq!(validation.stale, vec!["broken.docx".to_string()]);

    // Still stale, so the next refresh retries it.
    let again = ctl.refresh().await.unwrap();
    assert_eq!(again.documents_failed, 1);
    assert_eq!(again.documents_unchanged, 1);
}

#[tokio::test]
async fn embedding_failure_keeps_previous_chunks() {
    let env = Env::new();
    let path = env.write("doc.txt", text(100, "stable"), 1_000);
    env.write("z.txt", text(40, "later"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();
    let before = ctl.catalog_entry("doc.txt").await.unwrap();

    fs::write(&path, format!("{} {}", text(60, "changed"), POISON)).unwrap();
    common::set_mtime(&path, 2_000);
    env.write("new.txt", text(40, "newcomer"), 1_000);

    let report = ctl.refresh().await.unwrap();
    assert_eq!(report.documents_failed, 1);
    assert_eq!(report.documents_processed, 1);
    assert!(report.failures[0].error.contains("embedding provider"));

    assert_eq!(ctl.catalog_entry("doc.txt").await.unwrap(), before);
    let kept = ctl.chunk(&chunk_id("doc.txt", 2)).await.unwrap();
    assert!(kept.text.contains("stable"));
    assert!(ctl.catalog_entry("new.txt").await.is_some());

    let validation = ctl.validate().await;
    assert!(validation.is_consistent());
    assert_eq!(validation.stale, vec!["doc.txt".to_string()]);
}

#[tokio::test]
async fn empty_documents_are_recorded_with_zero_chunks() {
    let env = Env::new();
    env.write("blank.txt", "   \n\n  ", 1_000);

    let gateway = HashGateway::new("hash", 16);
    let ctl = env.open(gateway.clone());
    let report = ctl.initialize().await.unwrap();

    assert_eq!(report.documents_processed, 1);
    assert_eq!(report.chunks_written, 0);
    assert_eq!(ctl.catalog_entry("blank.txt").await.unwrap().chunk_count, 0);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

    assert_eq!(ctl.refresh().await.unwrap().documents_unchanged, 1);
}

#[tokio::test]
async fn empty_corpus_and_index_yield_empty_results() {
    let env = Env::new();
    let ctl = IndexingController::open(env.config(), Arc::new(DisabledGateway)).unwrap();

    let report = ctl.initialize().await.unwrap();
    assert_eq!(report.documents_found, 0);
    assert!(ctl.search("anything", None, None).await.unwrap().is_empty());
    assert!(ctl.validate().await.is_consistent());
}

#[tokio::test]
async fn missing_corpus_root_is_reported_in_stats() {
    let env = Env::new();
    let ctl = env.open(HashGateway::new("hash", 16));
    fs::remove_dir_all(&env.root).unwrap();

    let err = ctl.refresh().await.unwrap_err();
    assert!(matches!(err, IndexError::Configuration(_)));
    let stats = ctl.stats().await;
    assert!(stats.last_error.unwrap().contains("corpus root"));
    assert_eq!(stats.stale_documents, None);
}

#[tokio::test]
async fn reindex_and_remove_single_documents() {
    let env = Env::new();
    let path = env.write("deck.txt", text(90, "slide"), 1_000);
    env.write("keep.txt", text(40, "keep"), 1_000);

    let gateway = HashGateway::new("hash", 16);
    let ctl = env.open(gateway.clone());
    ctl.initialize().await.unwrap();
    let calls = gateway.calls.load(Ordering::SeqCst);

    let report = ctl.reindex_document(Path::new("deck.txt")).await.unwrap();
    assert_eq!(report.documents_processed, 1);
    assert!(gateway.calls.load(Ordering::SeqCst) > calls);

    let report = ctl.reindex_document(&path).await.unwrap();
    assert_eq!(report.documents_processed, 1);

    assert!(ctl.remove_document(Path::new("deck.txt")).await.unwrap());
    assert!(!ctl.remove_document(Path::new("deck.txt")).await.unwrap());
    assert!(ctl.catalog_entry("deck.txt").await.is_none());
    assert!(ctl.chunk(&chunk_id("deck.txt", 0)).await.is_none());

    // The file is still on disk, so it is stale until the next refresh.
    assert_eq!(ctl.stats().await.stale_documents, Some(1));
    assert_eq!(ctl.refresh().await.unwrap().documents_processed, 1);

    fs::remove_file(&path).unwrap();
    let report = ctl.reindex_document(Path::new("deck.txt")).await.unwrap();
    assert_eq!(report.documents_removed, 1);
}

#[tokio::test]
async fn clear_empties_index_and_catalog() {
    let env = Env::new();
    env.write("a.txt", text(100, "theta"), 1_000);

    let ctl = env.open(HashGateway::new("hash", 16));
    ctl.initialize().await.unwrap();
    ctl.clear().await.unwrap();

    let stats = ctl.stats().await;
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.chunks, 0);
    assert!(stats.embedding_model.is_none());
    assert!(Catalog::load(&env.catalog_path()).unwrap().is_empty());

    let reopened = env.open(HashGateway::new("other", 4));
    assert_eq!(reopened.stats().await.chunks, 0);
}

#[tokio::test]
async fn validate_flags_catalog_count_mismatch() {
    let env = Env::new();
    env.write("a.txt", text(100, "kappa"), 1_000);

    env.open(HashGateway::new("hash", 16))
        .initialize()
        .await
        .unwrap();

    let mut catalog = Catalog::load(&env.catalog_path()).unwrap();
    let mut entry = catalog.get("a.txt").cloned().unwrap();
    entry.chunk_count = 7;
    catalog.put("a.txt", entry);
    catalog.persist(&env.catalog_path()).unwrap();

    let ctl = env.open(HashGateway::new("hash", 16));
    let report = ctl.validate().await;
    assert!(!report.is_consistent());
    assert!(report.corruption[0].contains("a.txt"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_run_alongside_a_refresh() {
    let env = Env::new();
    for i in 0..8 {
        env.write(&format!("doc{}.txt", i), text(300, "parallel search"), 1_000);
    }
    let ctl = Arc::new(env.open(HashGateway::new("hash", 16)));
    ctl.initialize().await.unwrap();

    for i in 0..8 {
        let path = env.root.join(format!("doc{}.txt", i));
        common::set_mtime(&path, 2_000);
    }

    let writer = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.refresh().await })
    };
    let readers: Vec<_> = (0..16)
        .map(|_| {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.search("parallel", Some(3), None).await })
        })
        .collect();

    let report = writer.await.unwrap().unwrap();
    assert_eq!(report.documents_processed, 8);
    for reader in readers {
        let hits = reader.await.unwrap().unwrap();
        assert!(hits.len() <= 3);
    }
    assert!(ctl.validate().await.is_consistent());
}
