// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Image Cache (C6): serializes concurrent pulls of the same ref and
//! verifies digest identity, backed by a local OCI-layout mirror (§4.6,
//! §4.6.1). `get` never blocks on I/O; it enqueues work on a single-consumer
//! loop and returns immediately.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

const MAX_PULL_ATTEMPTS: u32 = 5;
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub kernel: Option<String>,
    #[serde(default)]
    pub initrd: Option<String>,
    #[serde(default)]
    pub cmdline: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub config: ImageConfig,
    pub rootfs_layer: PathBuf,
    pub kernel_layer: Option<PathBuf>,
    pub initramfs_layer: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    Pulling,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct IndexEntry {
    digest: String,
    config: ImageConfig,
    rootfs_layer: PathBuf,
    kernel_layer: Option<PathBuf>,
    initramfs_layer: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Index {
    #[serde(default)]
    entries: HashMap<String, IndexEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageCacheError {
    #[error("digest mismatch for {image_ref}: source {source} local {local}")]
    DigestMismatch { image_ref: String, source: String, local: String },
    #[error("source image not found: {0}")]
    SourceNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

enum Command {
    Get { image_ref: String, reply: oneshot::Sender<Result<Image, GetOutcome>> },
}

/// Handle to the running single-consumer loop; cheap to clone, shares the
/// loop's channel and pull-completion broadcast.
#[derive(Clone)]
pub struct ImageCache {
    commands: mpsc::Sender<Command>,
    pull_done: broadcast::Sender<String>,
}

impl ImageCache {
    pub fn spawn(root: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (pull_done_tx, _) = broadcast::channel(256);
        let loop_state = LoopState {
            root,
            active_pulls: HashMap::new(),
            pull_done: pull_done_tx.clone(),
        };
        tokio::spawn(run_loop(loop_state, rx));
        Self { commands: tx, pull_done: pull_done_tx }
    }

    /// Non-blocking except for the bounded channel send; never touches disk
    /// or network on the caller's task.
    pub async fn get(&self, image_ref: &str) -> Result<Image, GetOutcome> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Get { image_ref: image_ref.to_string(), reply })
            .await
            .is_err()
        {
            return Err(GetOutcome::Pulling);
        }
        rx.await.unwrap_or(Err(GetOutcome::Pulling))
    }

    pub fn subscribe_pull_done(&self) -> broadcast::Receiver<String> {
        self.pull_done.subscribe()
    }
}

struct LoopState {
    root: PathBuf,
    active_pulls: HashMap<String, ()>,
    pull_done: broadcast::Sender<String>,
}

async fn run_loop(mut state: LoopState, mut commands: mpsc::Receiver<Command>) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Get { image_ref, reply } => {
                let outcome = handle_get(&mut state, &image_ref);
                let _ = reply.send(outcome);
            }
        }
    }
}

fn handle_get(state: &mut LoopState, image_ref: &str) -> Result<Image, GetOutcome> {
    if state.active_pulls.contains_key(image_ref) {
        return Err(GetOutcome::Pulling);
    }

    if let Some(image) = resolve_local(&state.root, image_ref) {
        return Ok(image);
    }

    state.active_pulls.insert(image_ref.to_string(), ());
    let root = state.root.clone();
    let image_ref_owned = image_ref.to_string();
    let pull_done = state.pull_done.clone();
    tokio::spawn(async move {
        if let Err(e) = pull_with_retry(&root, &image_ref_owned).await {
            warn!(image_ref = %image_ref_owned, error = %e, "image pull failed after retries");
        }
        let _ = pull_done.send(image_ref_owned);
    });
    Err(GetOutcome::Pulling)
}

fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE)
}

fn load_index(root: &Path) -> Index {
    let path = index_path(root);
    std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn resolve_local(root: &Path, image_ref: &str) -> Option<Image> {
    let index = load_index(root);
    let entry = index.entries.get(image_ref)?;
    Some(Image {
        config: entry.config.clone(),
        rootfs_layer: entry.rootfs_layer.clone(),
        kernel_layer: entry.kernel_layer.clone(),
        initramfs_layer: entry.initramfs_layer.clone(),
    })
}

fn ref_dir(root: &Path, image_ref: &str) -> PathBuf {
    use base64::Engine;
    let hash = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(image_ref);
    root.join("images").join(hash)
}

fn source_dir(root: &Path, image_ref: &str) -> PathBuf {
    root.join("images").join("_source").join(image_ref)
}

/// One local copy-and-verify attempt, retried with exponential backoff
/// (1s, 4s, 16s, ...) up to [`MAX_PULL_ATTEMPTS`] times.
async fn pull_with_retry(root: &Path, image_ref: &str) -> Result<(), ImageCacheError> {
    let mut delay = Duration::from_secs(1);
    let mut last_err = None;
    for attempt in 1..=MAX_PULL_ATTEMPTS {
        match pull_once(root, image_ref).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(image_ref, attempt, error = %e, "image pull attempt failed");
                last_err = Some(e);
                tokio::time::sleep(delay).await;
                delay *= 4;
            }
        }
    }
    Err(last_err.unwrap_or(ImageCacheError::SourceNotFound(image_ref.to_string())))
}

async fn pull_once(root: &Path, image_ref: &str) -> Result<(), ImageCacheError> {
    let root = root.to_path_buf();
    let image_ref = image_ref.to_string();
    tokio::task::spawn_blocking(move || pull_once_blocking(&root, &image_ref))
        .await
        .unwrap_or_else(|e| Err(ImageCacheError::Io(std::io::Error::other(e.to_string()))))
}

fn pull_once_blocking(root: &Path, image_ref: &str) -> Result<(), ImageCacheError> {
    let source = source_dir(root, image_ref);
    if !source.exists() {
        return Err(ImageCacheError::SourceNotFound(image_ref.to_string()));
    }

    let source_digest_path = source.join("digest");
    let source_digest = std::fs::read_to_string(&source_digest_path)?;
    let source_digest = source_digest.trim().to_string();

    let dest = ref_dir(root, image_ref);
    std::fs::create_dir_all(&dest)?;

    let source_config: ImageConfig = {
        let path = source.join("config.json");
        serde_json::from_slice(&std::fs::read(&path)?)?
    };

    let rootfs_src = source.join("rootfs");
    let rootfs_dst = dest.join("rootfs");
    std::fs::copy(&rootfs_src, &rootfs_dst)?;

    let local_digest = crate::digest::sha256_file(&rootfs_dst)?;
    if local_digest != source_digest {
        let _ = std::fs::remove_dir_all(&dest);
        return Err(ImageCacheError::DigestMismatch {
            image_ref: image_ref.to_string(),
            source: source_digest,
            local: local_digest,
        });
    }

    let kernel_layer = copy_optional_layer(&source, &dest, "kernel")?;
    let initramfs_layer = copy_optional_layer(&source, &dest, "initrd")?;

    let mut index = load_index(root);
    index.entries.insert(
        image_ref.to_string(),
        IndexEntry {
            digest: local_digest,
            config: source_config,
            rootfs_layer: rootfs_dst,
            kernel_layer,
            initramfs_layer,
        },
    );
    lvp_storage::persist::write_atomic(root, &index_path(root), &index)
        .map_err(|e| ImageCacheError::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

fn copy_optional_layer(source: &Path, dest: &Path, name: &str) -> Result<Option<PathBuf>, ImageCacheError> {
    let src = source.join(name);
    if !src.exists() {
        return Ok(None);
    }
    let dst = dest.join(name);
    std::fs::copy(&src, &dst)?;
    Ok(Some(dst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seed_source(root: &Path, image_ref: &str, contents: &[u8]) -> String {
        let dir = source_dir(root, image_ref);
        std::fs::create_dir_all(&dir).unwrap();
        let mut rootfs = std::fs::File::create(dir.join("rootfs")).unwrap();
        rootfs.write_all(contents).unwrap();
        let digest = crate::digest::sha256_bytes(contents);
        std::fs::write(dir.join("digest"), &digest).unwrap();
        std::fs::write(dir.join("config.json"), br#"{"kernel":null,"initrd":null,"cmdline":null}"#).unwrap();
        digest
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_returns_pulling_then_resolves_once_local_copy_completes() {
        let tmp = tempfile::tempdir().unwrap();
        seed_source(tmp.path(), "demo:latest", b"hello world");

        let cache = ImageCache::spawn(tmp.path().to_path_buf());
        let mut pull_done = cache.subscribe_pull_done();

        assert_eq!(cache.get("demo:latest").await, Err(GetOutcome::Pulling));
        let completed = pull_done.recv().await.unwrap();
        assert_eq!(completed, "demo:latest");

        let image = cache.get("demo:latest").await.expect("resolved after pull");
        assert!(image.rootfs_layer.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_gets_for_the_same_ref_both_see_pulling_once() {
        let tmp = tempfile::tempdir().unwrap();
        seed_source(tmp.path(), "demo:latest", b"hello world");
        let cache = ImageCache::spawn(tmp.path().to_path_buf());

        let first = cache.get("demo:latest").await;
        let second = cache.get("demo:latest").await;
        assert_eq!(first, Err(GetOutcome::Pulling));
        assert_eq!(second, Err(GetOutcome::Pulling));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_source_never_resolves_and_is_not_fatal_to_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ImageCache::spawn(tmp.path().to_path_buf());
        let mut pull_done = cache.subscribe_pull_done();

        assert_eq!(cache.get("missing:latest").await, Err(GetOutcome::Pulling));
        pull_done.recv().await.unwrap();
        assert_eq!(cache.get("missing:latest").await, Err(GetOutcome::Pulling));
    }
}
