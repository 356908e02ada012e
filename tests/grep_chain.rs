use std::sync::Arc;

use bytes::Bytes;
use mrlite::format::{read_part, OutputFormat};
use mrlite::standalone::{Engine, EngineConfig, JobChain};
use mrlite::storage::{LocalStorage, MemoryStorage, Storage};
use mrlite::utils::u64_from_bytes;
use mrlite::workload::grep;
use mrlite::Error;

async fn memory_engine(files: &[(&str, &str)]) -> Engine {
    let storage = Arc::new(MemoryStorage::new());
    for (name, text) in files {
        storage.put(name, Bytes::from(text.to_string())).await.unwrap();
    }
    Engine::new(storage, EngineConfig::default())
}

async fn read_text(storage: &dyn Storage, name: &str) -> String {
    String::from_utf8(storage.open(name).await.unwrap().to_vec()).unwrap()
}

async fn temp_names(storage: &dyn Storage) -> Vec<String> {
    storage
        .list("")
        .await
        .unwrap()
        .into_iter()
        .filter(|name| name.starts_with("grep-temp-"))
        .collect()
}

#[tokio::test]
async fn search_counts_each_match() {
    let engine = memory_engine(&[("in/lines.txt", "the cat sat\nthe dog ran\n")]).await;
    let job = grep::search_stage("the", 0)
        .unwrap()
        .input("in")
        .output("counts")
        .build()
        .unwrap();
    let report = engine.run(job).await.unwrap();

    assert_eq!(report.parts, vec!["counts/mr-out-00000"]);
    let data = engine.storage().open(&report.parts[0]).await.unwrap();
    let records = read_part(OutputFormat::Sequence, data).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, "the");
    assert_eq!(u64_from_bytes(&records[0].value).unwrap(), 2);
    assert_eq!(report.counters.combine_input_records, 2);
}

#[tokio::test]
async fn chain_writes_a_single_sorted_file() {
    let engine = memory_engine(&[("in/lines.txt", "the cat sat\nthe dog ran\n")]).await;
    let chain = grep::chain("the", 0, 1).unwrap();
    let report = chain.run(&engine, &["in".to_string()], "out").await.unwrap();

    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.stages[1].parts, vec!["out/mr-out-00000"]);
    assert_eq!(read_text(engine.storage().as_ref(), "out/mr-out-00000").await, "2\tthe\n");
    assert!(engine.storage().exists("out/_SUCCESS").await.unwrap());
    assert!(temp_names(engine.storage().as_ref()).await.is_empty());
}

#[tokio::test]
async fn sorts_by_decreasing_frequency() {
    let text = "b a c a b a\nd c a\n";
    let engine = memory_engine(&[("in/a.txt", text)]).await;
    let chain = grep::chain(r"\w+", 0, 1).unwrap();
    chain.run(&engine, &["in".to_string()], "out").await.unwrap();

    // ties keep the ascending order the search stage wrote
    assert_eq!(
        read_text(engine.storage().as_ref(), "out/mr-out-00000").await,
        "4\ta\n2\tb\n2\tc\n1\td\n"
    );
}

#[tokio::test]
async fn capture_group_is_counted() {
    let engine = memory_engine(&[("in/mail.txt", "ann@home bob@work\ncid@home\n")]).await;
    let chain = grep::chain(r"(\w+)@(\w+)", 2, 3).unwrap();
    chain.run(&engine, &["in".to_string()], "out").await.unwrap();
    assert_eq!(
        read_text(engine.storage().as_ref(), "out/mr-out-00000").await,
        "2\thome\n1\twork\n"
    );
}

#[tokio::test]
async fn stage_two_failure_still_removes_intermediates() {
    let engine = memory_engine(&[
        ("in/lines.txt", "the cat sat\nthe dog ran\n"),
        ("out/keep.txt", "already here"),
    ])
    .await;
    let chain = grep::chain("the", 0, 1).unwrap();
    let err = chain
        .run(&engine, &["in".to_string()], "out")
        .await
        .unwrap_err();

    match err {
        Error::PartialWrite { path, .. } => assert_eq!(path, "out"),
        other => panic!("expected the stage-2 failure, got {other}"),
    }
    assert!(temp_names(engine.storage().as_ref()).await.is_empty());
    assert_eq!(read_text(engine.storage().as_ref(), "out/keep.txt").await, "already here");
}

#[tokio::test]
async fn stage_one_failure_is_reported_and_cleaned_up() {
    let engine = memory_engine(&[]).await;
    let err = grep::chain("the", 0, 1)
        .unwrap()
        .run(&engine, &["missing".to_string()], "out")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(temp_names(engine.storage().as_ref()).await.is_empty());
    assert!(!engine.storage().exists("out").await.unwrap());
}

#[tokio::test]
async fn concurrent_chains_do_not_collide() {
    let engine = memory_engine(&[("in/a.txt", "x y x\n")]).await;
    let chain: JobChain = grep::chain("x", 0, 2).unwrap();
    let inputs = vec!["in".to_string()];
    let (a, b) = tokio::join!(
        chain.run(&engine, &inputs, "out-a"),
        chain.run(&engine, &inputs, "out-b"),
    );
    a.unwrap();
    b.unwrap();
    for out in ["out-a", "out-b"] {
        let part = format!("{out}/mr-out-00000");
        assert_eq!(read_text(engine.storage().as_ref(), &part).await, "2\tx\n");
    }
    assert!(temp_names(engine.storage().as_ref()).await.is_empty());
}

#[tokio::test]
async fn runs_against_local_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("input")).unwrap();
    std::fs::write(dir.path().join("input/one.txt"), "the cat sat\n").unwrap();
    std::fs::write(dir.path().join("input/two.txt"), "the dog ran\r\nthe end\n").unwrap();

    let storage = Arc::new(LocalStorage::new(dir.path()));
    let config = EngineConfig {
        split_size: 8,
        ..EngineConfig::default()
    };
    let engine = Engine::new(storage, config);
    grep::chain("the", 0, 2)
        .unwrap()
        .run(&engine, &["input/*.txt".to_string()], "result")
        .await
        .unwrap();

    let text = std::fs::read_to_string(dir.path().join("result/mr-out-00000")).unwrap();
    assert_eq!(text, "3\tthe\n");
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("grep-temp-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn matches_that_are_not_utf8_stay_distinct() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .put("in/raw.bin", Bytes::from_static(b"\xff\xfe x\n\xfe\xff x\n\xff\xfe\n"))
        .await
        .unwrap();
    let engine = Engine::new(storage, EngineConfig::default());
    grep::chain(r"(?-u)[\xfe\xff]{2}", 0, 1)
        .unwrap()
        .run(&engine, &["in".to_string()], "out")
        .await
        .unwrap();

    let text = engine.storage().open("out/mr-out-00000").await.unwrap();
    assert_eq!(text, Bytes::from_static(b"2\t\xff\xfe\n1\t\xfe\xff\n"));
}
