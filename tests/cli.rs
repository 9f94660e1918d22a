use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn copilot_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("support-copilot");
    path
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let config_content = format!(
        r#"[app]
name = "CLI Copilot"
environment = "test"

[endee]
base_url = "http://127.0.0.1:9/api/v1"
timeout_secs = 1

[ingest]
data_dir = "{}/data"
{}
"#,
        root.display(),
        extra
    );

    let config_path = root.join("copilot.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_copilot(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = copilot_binary();
    let output = Command::new(&binary)
        .env_clear()
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run support-copilot at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_ingest_empty_data_dir() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, success) = run_copilot(&config, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("Ingested 0 support items"));
    assert!(stdout.contains("No data found to ingest"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, success) = run_copilot(&config, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_search_unknown_type_rejected() {
    let (_tmp, config) = setup_test_env("");
    let (_, _, success) = run_copilot(&config, &["search", "payments", "--type", "incident"]);
    assert!(!success);
}

#[test]
fn test_evaluate_missing_queries_file() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, success) = run_copilot(&config, &["evaluate"]);
    assert!(!success);
    assert!(stderr.contains("Missing evaluation queries file"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config) = setup_test_env("max_batch_size = 0");
    let (_, stderr, success) = run_copilot(&config, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("ingest.max_batch_size"));
}

#[test]
fn test_env_overrides_file() {
    let (_tmp, config) = setup_test_env("");
    let binary = copilot_binary();
    let output = Command::new(&binary)
        .env_clear()
        .env("EMBEDDING_PROVIDER", "bogus")
        .arg("--config")
        .arg(config.to_str().unwrap())
        .arg("ingest")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown embedding provider"));
}
