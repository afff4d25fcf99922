use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn grok_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("grok");
    path
}

/// Ollama-style responder: one `[len, 1]` vector per input text.
struct LengthEmbeddings;

impl Respond for LengthEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let embeddings: Vec<Value> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| json!([t.as_str().unwrap().len() as f32, 1.0]))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn setup_test_env(embedding_url: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\n\
         This is the alpha document about Rust programming.\n\n\
         It contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.",
    )
    .unwrap();
    fs::write(
        files_dir.join("nested/gamma.txt"),
        "Gamma plain text file.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    fs::write(files_dir.join("skip.log"), "noise").unwrap();

    let embedding = match embedding_url {
        Some(url) => format!(
            "provider = \"ollama\"\nmodel = \"nomic-embed-text\"\n\
             base_url = \"{}\"\nmax_retries = 0",
            url
        ),
        None => "provider = \"disabled\"".to_string(),
    };
    let config_content = format!(
        r#"[store]
path = "{}/.grok"

[chunking]
max_chunk_size = 2048

[embedding]
{}

[ingest]
exclude_globs = ["**/*.log"]
"#,
        root.display(),
        embedding
    );

    let config_path = root.join("grok.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_grok(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = grok_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run grok binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

async fn run_grok_async(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let config_path = config_path.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_grok(&config_path, &args)
    })
    .await
    .unwrap()
}

#[test]
fn test_init_creates_store() {
    let (tmp, config) = setup_test_env(None);
    let (stdout, stderr, success) = run_grok(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Initialized empty index"));

    let store = tmp.path().join(".grok");
    let state: Value = serde_json::from_str(&fs::read_to_string(&store).unwrap()).unwrap();
    assert_eq!(state["version"], 1);
    assert_eq!(state["max_chunk_size"], 2048);
    assert_eq!(state["documents"], json!([]));
    assert!(!tmp.path().join(".grok.lock").exists());
}

#[test]
fn test_init_refuses_to_overwrite() {
    let (_tmp, config) = setup_test_env(None);
    assert!(run_grok(&config, &["init"]).2);

    let (_, stderr, success) = run_grok(&config, &["init"]);
    assert!(!success);
    assert!(stderr.contains("already exists"));

    assert!(run_grok(&config, &["init", "--force"]).2);
}

#[test]
fn test_commands_require_init() {
    let (_tmp, config) = setup_test_env(None);
    let (_, stderr, success) = run_grok(&config, &["ls"]);
    assert!(!success);
    assert!(stderr.contains("grok init"));
}

#[test]
fn test_ls_empty() {
    let (_tmp, config) = setup_test_env(None);
    run_grok(&config, &["init"]);
    let (stdout, _, success) = run_grok(&config, &["ls"]);
    assert!(success);
    assert!(stdout.contains("No documents indexed."));
}

#[test]
fn test_tokens() {
    let (_tmp, config) = setup_test_env(None);
    run_grok(&config, &["init"]);
    let (stdout, _, success) = run_grok(&config, &["tokens", "abcdefg"]);
    assert!(success);
    assert_eq!(stdout.trim(), "2");
}

#[test]
fn test_model_selection() {
    let (_tmp, config) = setup_test_env(None);
    run_grok(&config, &["init"]);

    let (stdout, _, success) = run_grok(&config, &["models"]);
    assert!(success);
    assert!(stdout.lines().any(|l| l.starts_with('*') && l.contains("gpt-4o-mini")));

    let (_, _, success) = run_grok(&config, &["model", "gpt-4"]);
    assert!(success);
    let (stdout, _, _) = run_grok(&config, &["models"]);
    let current: Vec<&str> = stdout.lines().filter(|l| l.starts_with('*')).collect();
    assert_eq!(current.len(), 1);
    assert!(current[0].contains("gpt-4 "));

    let (_, stderr, success) = run_grok(&config, &["model", "gpt-99"]);
    assert!(!success);
    assert!(stderr.contains("Unknown model"));
}

#[test]
fn test_add_with_disabled_embeddings_fails_cleanly() {
    let (tmp, config) = setup_test_env(None);
    run_grok(&config, &["init"]);
    let alpha = tmp.path().join("files/alpha.md");
    let (_, stderr, success) = run_grok(&config, &["add", alpha.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("disabled"));

    let (stdout, _, _) = run_grok(&config, &["ls"]);
    assert!(stdout.contains("No documents indexed."));
}

#[test]
fn test_lock_blocks_mutation() {
    let (tmp, config) = setup_test_env(None);
    run_grok(&config, &["init"]);
    fs::write(tmp.path().join(".grok.lock"), "12345").unwrap();
    let (_, stderr, success) = run_grok(&config, &["model", "gpt-4"]);
    assert!(!success);
    assert!(stderr.contains("locked"));
}

#[tokio::test]
async fn test_add_ls_forget_pipeline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(LengthEmbeddings)
        .mount(&server)
        .await;

    let (tmp, config) = setup_test_env(Some(&server.uri()));
    assert!(run_grok_async(&config, &["init"]).await.2);

    let files = tmp.path().join("files");
    let (stdout, stderr, success) =
        run_grok_async(&config, &["add", files.to_str().unwrap()]).await;
    assert!(success, "add failed: {}", stderr);
    assert!(stdout.contains("documents: 3"));

    let (stdout, _, success) = run_grok_async(&config, &["ls"]).await;
    assert!(success);
    assert!(stdout.contains("files/alpha.md"));
    assert!(stdout.contains("files/beta.md"));
    assert!(stdout.contains("files/nested/gamma.txt"));
    assert!(!stdout.contains("skip.log"));

    let state: Value =
        serde_json::from_str(&fs::read_to_string(tmp.path().join(".grok")).unwrap()).unwrap();
    assert_eq!(state["embedding_model"], "nomic-embed-text");
    assert_eq!(state["chunks"].as_array().unwrap().len(), 7);

    // Nothing changed on disk, so nothing is re-embedded.
    let before = server.received_requests().await.unwrap().len();
    let (stdout, _, success) = run_grok_async(&config, &["refresh"]).await;
    assert!(success);
    assert!(stdout.contains("up to date"));
    assert_eq!(server.received_requests().await.unwrap().len(), before);

    let nested = files.join("nested");
    let (stdout, _, success) =
        run_grok_async(&config, &["forget", nested.to_str().unwrap()]).await;
    assert!(success);
    assert!(stdout.contains("documents removed: 1"));
    assert!(stdout.contains("chunks collected:  2"));

    let (stdout, _, _) = run_grok_async(&config, &["ls"]).await;
    assert!(!stdout.contains("gamma.txt"));
    assert!(!tmp.path().join(".grok.lock").exists());
}
