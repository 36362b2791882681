//! CLI behavior that needs neither the embedding model nor the network.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("scratch")).unwrap();
    let config_path = root.join("docchat.toml");
    fs::write(
        &config_path,
        format!(
            r#"[index]
dir = "{root}/vector_index"

[ingest]
scratch_dir = "{root}/scratch"

[secrets]
env_file = "{root}/.env"
"#,
            root = root.display()
        ),
    )
    .unwrap();
    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_docchat"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("GROQ_API_KEY", "test-key")
        .env("RUST_LOG", "docchat=warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat: {}", e));
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn status_before_processing() {
    let (_tmp, config) = setup_env();
    let (stdout, stderr, ok) = run(&config, &["status"]);
    assert!(ok, "status failed: {}", stderr);
    assert_eq!(stdout.trim(), "Process documents first");
}

#[test]
fn status_with_index_directory() {
    let (tmp, config) = setup_env();
    fs::create_dir_all(tmp.path().join("vector_index")).unwrap();
    let (stdout, _, ok) = run(&config, &["status"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "Ready to chat!");
}

#[test]
fn ask_before_processing_is_not_an_error() {
    let (_tmp, config) = setup_env();
    let (stdout, stderr, ok) = run(&config, &["ask", "What color is the sky?"]);
    assert!(ok, "ask failed: {}", stderr);
    assert_eq!(stdout.trim(), "Please process documents first!");
}

#[test]
fn unsupported_files_are_reported_and_nothing_is_indexed() {
    let (tmp, config) = setup_env();
    let csv = tmp.path().join("table.csv");
    fs::write(&csv, "a,b\n1,2\n").unwrap();

    let (stdout, stderr, ok) = run(&config, &["process", csv.to_str().unwrap()]);
    assert!(ok, "process failed: {}", stderr);
    assert!(stderr.contains("Skipping unsupported file"), "stderr: {}", stderr);
    assert!(stdout.contains("No documents to process!"));
    assert!(!tmp.path().join("vector_index").exists());
}

#[test]
fn unreadable_documents_leave_state_empty() {
    let (tmp, config) = setup_env();
    let pdf = tmp.path().join("broken.pdf");
    fs::write(&pdf, b"not a valid pdf").unwrap();

    let (stdout, stderr, ok) = run(&config, &["process", pdf.to_str().unwrap()]);
    assert!(ok, "process failed: {}", stderr);
    assert!(stdout.contains("No documents to process!"));
    assert!(!tmp.path().join("vector_index").exists());

    let leftovers: Vec<_> = fs::read_dir(tmp.path().join("scratch")).unwrap().collect();
    assert!(leftovers.is_empty(), "scratch files left behind");

    let (stdout, _, _) = run(&config, &["status"]);
    assert_eq!(stdout.trim(), "Process documents first");
}

#[test]
fn invalid_config_is_rejected() {
    let (tmp, _) = setup_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 100\nchunk_overlap = 500\n").unwrap();
    let (_, stderr, ok) = run(&bad, &["status"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}
