//! Model state snapshots: the active weights written out and read back as an opaque blob.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::generation::{read_weights, LanguageModel, LoadedModel};
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub bytes: usize,
    /// Hex SHA-256 of the blob.
    pub sha256: String,
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Writes the model's state bytes to `path`, replacing any existing file.
pub fn save(path: &Path, model: &dyn LanguageModel) -> CoreResult<SnapshotInfo> {
    let bytes = model.state_bytes().ok_or_else(|| {
        CoreError::InvalidArgument("the active model has no state to save".to_string())
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;

    let snapshot = SnapshotInfo {
        path: path.to_path_buf(),
        bytes: bytes.len(),
        sha256: digest(bytes),
    };
    info!(path = %path.display(), bytes = snapshot.bytes, sha256 = %snapshot.sha256, "Saved model state");
    Ok(snapshot)
}

/// Reads a blob back as model weights, under the same memory budget as a regular model load.
pub fn load(
    path: &Path,
    memory_limit_bytes: u64,
    tokenizer: &Tokenizer,
) -> CoreResult<(LoadedModel, SnapshotInfo)> {
    let weights = read_weights(path, memory_limit_bytes)?;
    let snapshot = SnapshotInfo {
        path: path.to_path_buf(),
        bytes: weights.len(),
        sha256: digest(&weights),
    };
    let model = LoadedModel::from_bytes(weights, memory_limit_bytes, tokenizer)?;
    info!(path = %path.display(), bytes = snapshot.bytes, sha256 = %snapshot.sha256, "Loaded model state");
    Ok((model, snapshot))
}
