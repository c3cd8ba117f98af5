//! On-disk cache of the last-known MiniServer music configuration.
//! Single file, replaced atomically (temp-file-then-rename) to avoid torn
//! reads by a concurrently starting process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicCache {
    pub crc32: String,
    #[serde(rename = "musicCFG")]
    pub music_cfg: Value,
    pub timestamp: Option<u64>,
}

pub fn cache_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("music_cache.json")
}

pub async fn load(admin_dir: &Path) -> Option<MusicCache> {
    let path = cache_path(admin_dir);
    let bytes = tokio::fs::read(&path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn save(admin_dir: &Path, cache: &MusicCache) -> std::io::Result<()> {
    tokio::fs::create_dir_all(admin_dir).await?;
    let path = cache_path(admin_dir);
    let tmp_path = admin_dir.join("music_cache.json.tmp");
    let bytes = serde_json::to_vec_pretty(cache)?;
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, &path).await
}
