use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use leafscan::config::{AuthConfig, InferenceConfig};
use leafscan::error::Result;
use leafscan::pipeline::{MediaFile, PreviewMinter};
use leafscan::session::token_store::{MemoryTokenStore, StoredToken};
use leafscan::session::{HttpAuthClient, SessionManager};

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Auth settings pointing at a mock server.
#[allow(dead_code)]
pub fn auth_config(base_url: &str) -> AuthConfig {
    AuthConfig {
        base_url: base_url.to_string(),
        timeout_seconds: 5,
    }
}

/// Inference settings pointing at `<base_url>/predict`.
#[allow(dead_code)]
pub fn inference_config(base_url: &str) -> InferenceConfig {
    InferenceConfig {
        predict_url: format!("{}/predict", base_url),
        timeout_seconds: 5,
    }
}

/// Session manager against `base_url`, optionally seeded with a stored token.
#[allow(dead_code)]
pub fn sessions_for(
    base_url: &str,
    token: Option<&str>,
) -> (SessionManager, Arc<MemoryTokenStore>) {
    let store = Arc::new(match token {
        Some(t) => MemoryTokenStore::with_token(StoredToken::bearer(t)),
        None => MemoryTokenStore::default(),
    });
    let client = HttpAuthClient::new(&auth_config(base_url)).expect("auth client");
    let manager = SessionManager::new(Arc::new(client), store.clone()).expect("session manager");
    (manager, store)
}

/// A small in-memory upload. The bytes are never decoded.
#[allow(dead_code)]
pub fn upload(name: &str) -> MediaFile {
    MediaFile::new(name, "image/jpeg", format!("fake-jpeg-{}", name).into_bytes())
}

/// Preview minter that only counts mints and releases.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct CountingMinter {
    minted: AtomicUsize,
    released: AtomicUsize,
}

#[allow(dead_code)]
impl CountingMinter {
    pub fn minted(&self) -> usize {
        self.minted.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl PreviewMinter for CountingMinter {
    fn mint(&self, file: &MediaFile) -> Result<String> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        Ok(format!("preview://{}/{}", n, file.name()))
    }

    fn release(&self, _uri: &str) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
