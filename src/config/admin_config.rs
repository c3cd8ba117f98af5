//! Admin-editable configuration: MiniServer credentials, the audio-server
//! record, the resolved zone list, media-provider options, and logging
//! levels. Round-tripped to disk as JSON, written atomically.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendKind;
use crate::zone::{PlayerId, VolumePresets};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiniserverInfo {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub credentials: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioServerRecord {
    #[serde(default)]
    pub mac: String,
    #[serde(rename = "macId", default)]
    pub mac_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub paired: bool,
    #[serde(rename = "musicCFG", default)]
    pub music_cfg: Value,
    #[serde(rename = "musicCRC", default)]
    pub music_crc: String,
    #[serde(rename = "musicTimestamp", default)]
    pub music_timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfigRecord {
    pub id: PlayerId,
    #[serde(default)]
    pub uuid: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub ip: String,
    pub name: Option<String>,
    #[serde(rename = "maPlayerId", default)]
    pub ma_player_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub volumes: Option<VolumePresets>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaProviderConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub options: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(rename = "consoleLevel", default)]
    pub console_level: Option<String>,
    #[serde(rename = "fileLevel", default)]
    pub file_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub miniserver: MiniserverInfo,
    #[serde(default)]
    pub audioserver: AudioServerRecord,
    #[serde(default)]
    pub zones: Vec<ZoneConfigRecord>,
    #[serde(rename = "mediaProvider", default)]
    pub media_provider: MediaProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

pub fn admin_config_path(admin_dir: &Path) -> PathBuf {
    admin_dir.join("admin_config.json")
}

pub async fn load(admin_dir: &Path) -> Option<AdminConfig> {
    let bytes = tokio::fs::read(admin_config_path(admin_dir)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn save(admin_dir: &Path, config: &AdminConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(admin_dir).await?;
    let path = admin_config_path(admin_dir);
    let tmp_path = admin_dir.join("admin_config.json.tmp");
    let bytes = serde_json::to_vec_pretty(config)?;
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, &path).await
}
