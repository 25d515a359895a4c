use std::path::Path;

use archivit::{
    Config,
    Error,
    HashingEmbedder,
    IndexStore,
    context,
    loader,
    search,
    sync::{self, SyncOptions},
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write(root: &Path, rel: &str, content: &str) -> std::io::Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

/// A knowledge base of three tweets-turned-markdown plus the matching config.
fn setup_fixture(root: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let kb = root.join("kb");
    write(
        &kb,
        "twitter/doc1.md",
        "---\nid: doc1\nsource: twitter\ntags: [fruit]\n---\napple banana\n",
    )?;
    write(
        &kb,
        "twitter/doc2.md",
        "---\nid: doc2\nsource: twitter\n---\nbanana cherry\n",
    )?;
    write(
        &kb,
        "web/doc3.md",
        "---\nid: doc3\nsource: web\n---\ncherry date\n",
    )?;

    Ok(Config::new(kb, root.join("index")))
}

fn load(config: &Config) -> Vec<archivit::Document> {
    loader::load_documents(&config.knowledge_base, &config.excludes().unwrap())
        .unwrap()
}

#[test]
fn rebuild_is_idempotent() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);

    let first = store.rebuild(&load(&config))?;
    let first_docs = first.search_index().all_documents()?;
    drop(first);

    let second = store.rebuild(&load(&config))?;
    let second_docs = second.search_index().all_documents()?;

    assert_eq!(first_docs.len(), 3);
    assert_eq!(first_docs.len(), second_docs.len());
    for (a, b) in first_docs.iter().zip(&second_docs) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.text, b.text);
        assert_eq!(a.metadata, b.metadata);
    }
    Ok(())
}

#[test]
fn upsert_adds_disjoint_documents() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);
    let mut index = store.rebuild(&load(&config))?;

    write(
        &config.knowledge_base,
        "web/doc4.md",
        "---\nid: doc4\n---\nelderberry fig\n",
    )?;
    let all = load(&config);
    let fresh = sync::find_new_documents(&all, &index)?;
    assert_eq!(fresh.len(), 1);

    assert_eq!(store.upsert(&mut index, &fresh)?, 1);
    store.save(&mut index)?;

    assert_eq!(store.count(&index)?, 4);
    let hits = search::search("elderberry", &index, store.embedder(), 5)?;
    assert_eq!(hits[0].id, "doc4");
    Ok(())
}

#[test]
fn upsert_does_not_duplicate() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);
    let docs = load(&config);
    let mut index = store.rebuild(&docs)?;

    let mut edited = docs[0].clone();
    edited.text = "completely different".to_string();
    assert_eq!(store.upsert(&mut index, &[edited])?, 0);
    store.save(&mut index)?;

    assert_eq!(store.count(&index)?, 3);
    let stored = index.get("doc1")?.ok_or("doc1 missing")?;
    assert_eq!(stored.text, "apple banana\n");
    Ok(())
}

#[test]
fn export_respects_token_budget_and_order() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let kb = tmp.path().join("kb");
    for i in 0..10 {
        write(
            &kb,
            &format!("note{i:02}.md"),
            &format!(
                "---\nid: note{i:02}\n---\n{}",
                "archive entry ".repeat(150)
            ),
        )?;
    }
    let config = Config::new(kb, tmp.path().join("index"));
    let store = IndexStore::new(&config);
    let index = store.rebuild(&load(&config))?;

    let results = search::search("archive", &index, store.embedder(), 10)?;
    assert_eq!(results.len(), 10);

    let report = context::build_context(
        &archivit::CharEstimator,
        &results,
        "archive",
        1000,
        true,
    );
    assert!(report.estimated_tokens <= 1000);
    assert!(report.included < 10);

    let mut last = 0;
    for r in &results[..report.included] {
        let at = report
            .markdown
            .find(&format!("`{}`", r.id))
            .ok_or("included result missing")?;
        assert!(at > last);
        last = at;
    }
    Ok(())
}

#[test]
fn front_matter_id_round_trips() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let kb = tmp.path().join("kb");
    write(
        &kb,
        "some-file-name.md",
        "---\nid: \"abc123\"\n---\nunique zebra\n",
    )?;
    let config = Config::new(kb, tmp.path().join("index"));
    let store = IndexStore::new(&config);
    let index = store.rebuild(&load(&config))?;

    let results = search::search("zebra", &index, store.embedder(), 1)?;
    assert_eq!(results[0].id, "abc123");
    assert_eq!(results[0].metadata["filepath"], "some-file-name.md");
    Ok(())
}

#[test]
fn empty_knowledge_base_searches_empty() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let kb = tmp.path().join("kb");
    std::fs::create_dir_all(&kb)?;
    let config = Config::new(kb, tmp.path().join("index"));
    let store = IndexStore::new(&config);
    let index = store.rebuild(&load(&config))?;

    let results = search::search("anything", &index, store.embedder(), 10)?;
    assert!(results.is_empty());
    Ok(())
}

#[test]
fn banana_finds_exactly_two() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);
    let index = store.rebuild(&load(&config))?;

    let results = search::search("banana", &index, store.embedder(), 2)?;
    let mut ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["doc1", "doc2"]);
    Ok(())
}

#[test]
fn sync_propagates_edits() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);
    drop(store.rebuild(&load(&config))?);

    write(
        &config.knowledge_base,
        "twitter/doc1.md",
        "---\nid: doc1\nsource: twitter\n---\napple kiwi\n",
    )?;
    let report = sync::sync(&store, &load(&config), SyncOptions::default())?;
    assert_eq!(report.replaced, 1);
    assert_eq!(report.total, 3);

    let index = store.load()?.ok_or("index missing")?;
    let results = search::search("kiwi", &index, store.embedder(), 5)?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "doc1");
    assert!(search::search("banana", &index, store.embedder(), 5)?
        .iter()
        .all(|r| r.id != "doc1"));
    Ok(())
}

#[test]
fn corrupt_index_is_surfaced() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store = IndexStore::new(&config);
    drop(store.rebuild(&load(&config))?);

    std::fs::write(config.index.path.join("tantivy").join("meta.json"), "{")?;

    assert!(matches!(store.load(), Err(Error::IndexCorrupt { .. })));
    assert!(matches!(
        sync::sync(&store, &load(&config), SyncOptions::default()),
        Err(Error::IndexCorrupt { .. })
    ));
    Ok(())
}

#[test]
fn embedding_dimension_change_is_never_silent() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = setup_fixture(tmp.path())?;
    let store_with = |dimension| {
        IndexStore::with_embedder(
            config.index.path.clone(),
            config.index.writer_memory_bytes,
            Box::new(HashingEmbedder::new(dimension)),
        )
    };

    let index = store_with(32).rebuild(&load(&config))?;
    let wide = HashingEmbedder::new(64);
    let results = search::search("banana", &index, &wide, 2)?;
    let mut ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["doc1", "doc2"]);
    drop(index);

    let wider = store_with(64);
    assert!(matches!(
        wider.load(),
        Err(Error::EmbeddingDimension {
            stored: 32,
            configured: 64,
            ..
        })
    ));
    assert!(matches!(
        sync::sync(&wider, &load(&config), SyncOptions::default()),
        Err(Error::EmbeddingDimension { .. })
    ));
    Ok(())
}

#[test]
fn missing_config_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let err = Config::load(&tmp.path().join("config.json")).unwrap_err();
    assert!(matches!(err, Error::ConfigMissing(_)));
    assert_eq!(err.exit_code(), 2);
}
