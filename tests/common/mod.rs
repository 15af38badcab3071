use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use parley::identity::StaticIdentity;
use parley::storage::SqliteBackend;
use parley::store::ConversationStore;

#[allow(dead_code)]
pub fn create_temp_backend() -> (SqliteBackend, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("parley.db");
    let backend =
        SqliteBackend::new_with_path(db_path).expect("failed to create sqlite backend with path");
    (backend, tmp)
}

#[allow(dead_code)]
pub fn store_for(backend: &Arc<SqliteBackend>, user_id: &str) -> ConversationStore {
    ConversationStore::new(backend.clone(), Arc::new(StaticIdentity::user(user_id)))
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
