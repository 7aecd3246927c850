use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn grag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("grag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus = root.join("corpus");
    fs::create_dir_all(corpus.join("it")).unwrap();
    fs::write(
        corpus.join("it/vpn.md"),
        "# VPN\n\nReset the VPN token from the self-service portal.",
    )
    .unwrap();
    fs::write(
        corpus.join("leave policy.txt"),
        "Holiday leave is approved by your manager.",
    )
    .unwrap();
    fs::write(corpus.join("logo.png"), [0u8, 1, 2, 3]).unwrap();

    // No embedding backend: ingestion stores chunks without vectors.
    let config_content = format!(
        r#"[db]
path = "{}/data/rag.sqlite"

[chunking]
chunk_size = 16
chunk_overlap = 4

[embedding]
provider = "disabled"

[generation]
model = "local"

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("grag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_grag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = grag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run grag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_grag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_grag(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_then_reingest_skips_unchanged() {
    let (tmp, config_path) = setup_test_env();
    let corpus = tmp.path().join("corpus");
    let corpus = corpus.to_str().unwrap();

    run_grag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_grag(&config_path, &["ingest", corpus]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files found: 2"), "{}", stdout);
    assert!(stdout.contains("ingested: 2"), "{}", stdout);
    assert!(stdout.contains("embeddings written: 0"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_grag(&config_path, &["ingest", corpus]);
    assert!(success);
    assert!(stdout.contains("unchanged: 2"), "{}", stdout);
    assert!(stdout.contains("ingested: 0"), "{}", stdout);
}

#[test]
fn test_ingest_missing_dir_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_grag(&config_path, &["ingest", "/no/such/corpus"]);
    assert!(!success);
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn test_ask_without_embedding_model_fails_fast() {
    let (_tmp, config_path) = setup_test_env();

    run_grag(&config_path, &["init"]);
    let (_, stderr, success) = run_grag(&config_path, &["ask", "How do I reset my VPN token?"]);
    assert!(!success);
    assert!(stderr.contains("no embedding model available"), "{}", stderr);
}

#[test]
fn test_invalid_weights_rejected_at_startup() {
    let (tmp, config_path) = setup_test_env();
    let mut content = fs::read_to_string(&config_path).unwrap();
    content.push_str("\n[retrieval]\nweight_keyword = 0.7\nweight_vector = 0.7\n");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_grag(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("must sum to 1.0"), "{}", stderr);
    assert!(!tmp.path().join("data/rag.sqlite").exists());
}

#[test]
fn test_bench_rejects_empty_question_file() {
    let (tmp, config_path) = setup_test_env();
    let questions = tmp.path().join("questions.jsonl");
    fs::write(&questions, "\n").unwrap();

    let (_, stderr, success) = run_grag(&config_path, &["bench", questions.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("contains no questions"), "{}", stderr);
}
