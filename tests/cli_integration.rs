//! End-to-end tests for the `parley` binary
//!
//! Each test writes its own config file pointing at a temporary database, so
//! nothing touches the real data directory.
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use parley::storage::{Role, SqliteBackend};

fn config_yaml(db_path: &Path, extra: &str) -> String {
    format!(
        "storage:\n  db_path: {}\nauth:\n  local_user: tester\n{}",
        db_path.display(),
        extra
    )
}

fn parley(config_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("parley").unwrap();
    cmd.env_remove("PARLEY_DB_PATH")
        .env_remove("PARLEY_LOCAL_USER")
        .env_remove("PARLEY_PROVIDER")
        .arg("--config")
        .arg(config_path);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("parley").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("history"));
}

#[test]
fn test_history_list_empty() {
    let db_dir = tempfile::tempdir().unwrap();
    let (_tmp, config_path) =
        common::temp_config_file(&config_yaml(&db_dir.path().join("parley.db"), ""));

    parley(&config_path)
        .arg("history")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No conversation history found."));
}

#[tokio::test]
async fn test_history_list_and_show_existing_conversation() {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("parley.db");
    let backend = Arc::new(SqliteBackend::new_with_path(&db_path).unwrap());
    let store = common::store_for(&backend, "tester");
    let id = store.create_conversation(Some("Garden planning")).await.unwrap();
    store
        .append_message(&id, Role::User, "When do I plant tomatoes?", None)
        .await
        .unwrap();
    store
        .append_message(&id, Role::Assistant, "After the last frost.", Some(6))
        .await
        .unwrap();

    let (_tmp, config_path) = common::temp_config_file(&config_yaml(&db_path, ""));

    parley(&config_path)
        .args(["history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Garden planning"))
        .stdout(predicate::str::contains(&id[..8]));

    parley(&config_path)
        .args(["history", "show", &id[..8]])
        .assert()
        .success()
        .stdout(predicate::str::contains("When do I plant tomatoes?"))
        .stdout(predicate::str::contains("After the last frost."));
}

#[tokio::test]
async fn test_history_is_scoped_to_local_user() {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("parley.db");
    let backend = Arc::new(SqliteBackend::new_with_path(&db_path).unwrap());
    common::store_for(&backend, "someone-else")
        .create_conversation(Some("Not yours"))
        .await
        .unwrap();

    let (_tmp, config_path) = common::temp_config_file(&config_yaml(&db_path, ""));

    parley(&config_path)
        .args(["history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not yours").not());
}

#[test]
fn test_history_delete_unknown_fails() {
    let db_dir = tempfile::tempdir().unwrap();
    let (_tmp, config_path) =
        common::temp_config_file(&config_yaml(&db_dir.path().join("parley.db"), ""));

    parley(&config_path)
        .args(["history", "delete", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_invalid_provider_is_rejected() {
    let db_dir = tempfile::tempdir().unwrap();
    let (_tmp, config_path) = common::temp_config_file(&config_yaml(
        &db_dir.path().join("parley.db"),
        "provider:\n  type: nonexistent\n",
    ));

    parley(&config_path)
        .args(["history", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid provider type"));
}

async fn ollama_server() -> MockServer {
    let server = MockServer::start().await;
    let body = [
        serde_json::json!({"message": {"role": "assistant", "content": "Hi"}, "done": false}),
        serde_json::json!({"message": {"role": "assistant", "content": " there"}, "done": false}),
        serde_json::json!({"done": true}),
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect::<String>();
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;
    server
}

fn ollama_config(server: &MockServer) -> String {
    format!(
        "provider:\n  type: ollama\n  ollama:\n    host: {}\n    model: test-model\n",
        server.uri()
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_streams_reply_and_records_history() {
    let server = ollama_server().await;
    let db_dir = tempfile::tempdir().unwrap();
    let (_tmp, config_path) = common::temp_config_file(&config_yaml(
        &db_dir.path().join("parley.db"),
        &ollama_config(&server),
    ));

    parley(&config_path)
        .args(["chat", "--new"])
        .write_stdin("Hello parley\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hi there"));

    parley(&config_path)
        .args(["history", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello parley"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_keeps_surrounding_whitespace_of_prompt() {
    let server = ollama_server().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("parley.db");
    let (_tmp, config_path) =
        common::temp_config_file(&config_yaml(&db_path, &ollama_config(&server)));

    parley(&config_path)
        .args(["chat", "--new"])
        .write_stdin("    fn main() {}  \n")
        .assert()
        .success();

    let backend = Arc::new(SqliteBackend::new_with_path(&db_path).unwrap());
    let store = common::store_for(&backend, "tester");
    let id = store.list_conversations().await.remove(0).id;
    let messages = store.load_messages(&id).await;
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "    fn main() {}  ");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_continues_conversation_by_id_prefix() {
    let server = ollama_server().await;
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("parley.db");
    let backend = Arc::new(SqliteBackend::new_with_path(&db_path).unwrap());
    let store = common::store_for(&backend, "tester");
    let id = store.create_conversation(Some("Earlier chat")).await.unwrap();
    store
        .append_message(&id, Role::User, "Remember the milk", None)
        .await
        .unwrap();

    let (_tmp, config_path) =
        common::temp_config_file(&config_yaml(&db_path, &ollama_config(&server)));

    parley(&config_path)
        .args(["chat", "--conversation", &id[..8]])
        .write_stdin("And the eggs\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("Remember the milk"));

    assert_eq!(store.load_messages(&id).await.len(), 3);
}

#[test]
fn test_chat_unknown_conversation_fails() {
    let db_dir = tempfile::tempdir().unwrap();
    let (_tmp, config_path) = common::temp_config_file(&config_yaml(
        &db_dir.path().join("parley.db"),
        "provider:\n  type: ollama\n",
    ));

    parley(&config_path)
        .args(["chat", "--conversation", "does-not-exist"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_missing_config_file_warning_is_logged() {
    let db_dir = tempfile::tempdir().unwrap();
    let missing = db_dir.path().join("absent.yaml");

    Command::cargo_bin("parley")
        .unwrap()
        .env_remove("RUST_LOG")
        .env_remove("PARLEY_PROVIDER")
        .env("PARLEY_DB_PATH", db_dir.path().join("parley.db"))
        .env("PARLEY_LOCAL_USER", "tester")
        .arg("--config")
        .arg(&missing)
        .args(["history", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Config file not found"));
}
