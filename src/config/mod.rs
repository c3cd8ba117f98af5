//! Configuration orchestrator: the process-wide settings layer (env/file
//! defaults) plus the admin config / music cache round-trip and the
//! `setconfig` ingestion pipeline that reseeds the zone registry.

pub mod admin_config;
pub mod music_cache;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use admin_config::{AdminConfig, AudioServerRecord, ZoneConfigRecord};
use music_cache::MusicCache;

use crate::error::{BridgeError, Result};
use crate::zone::{PlayerId, VolumePresets, ZoneConfigEntry, ZoneRegistry};

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

/// Process-wide settings, layered defaults -> file -> environment.
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub media_provider: MediaProviderSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaProviderSettings {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSettings {
    pub console_level: Option<String>,
    pub file_level: Option<String>,
}

pub fn admin_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONFIG_ADMIN_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from(".")
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let dir = admin_dir();

    let built = ::config::Config::builder()
        .set_default("bind_addr", "0.0.0.0")?
        .add_source(::config::File::with_name(&dir.join("config").to_string_lossy()).required(false))
        .add_source(
            ::config::Environment::with_prefix("AUDIOSERVER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(built.try_deserialize()?)
}

/// Canonicalises a JSON value (object keys sorted recursively) and
/// serialises it compactly, so CRC32 is independent of incoming key order.
pub fn canonicalize(value: &Value) -> String {
    fn canon(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for k in keys {
                    out.insert(k.clone(), canon(map.get(k).expect("key came from map")));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canon).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&canon(value)).unwrap_or_default()
}

pub fn crc32_hex(data: &str) -> String {
    format!("{:x}", crc32fast::hash(data.as_bytes()))
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default, Deserialize)]
struct RawOutput {
    #[serde(default)]
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlayer {
    playerid: u32,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "maPlayerId", default)]
    ma_player_id: Option<String>,
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawExtension {
    serial: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAudioServerEntry {
    #[serde(rename = "macID")]
    mac_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    players: Vec<RawPlayer>,
    #[serde(default)]
    extensions: Vec<RawExtension>,
}

#[derive(Debug, Deserialize)]
struct RawAudioServerConfig {
    #[serde(rename = "macID", default)]
    mac_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    players: Option<Vec<RawPlayer>>,
    #[serde(default)]
    extensions: Vec<RawExtension>,
    #[serde(default)]
    audioservers: Option<Vec<RawAudioServerEntry>>,
}

fn parse_backend_kind(tag: Option<&str>) -> crate::backend::BackendKind {
    use crate::backend::BackendKind;
    match tag.unwrap_or("").to_ascii_lowercase().as_str() {
        "musicassistant" => BackendKind::MusicAssistant,
        "sonos" => BackendKind::Sonos,
        "beolink" => BackendKind::Beolink,
        // "dummybackend" and any unrecognised tag fall through to the
        // harmless Null default, never marked connected.
        _ => BackendKind::Null,
    }
}

/// Upper-cases and strips separators from a serial so `50:4F:94:AA:BB:CC`
/// and `504f94aabbcc` compare equal.
fn normalize_serial(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase()).collect()
}

/// Builds the {AudioServer core + declared extensions} lookup table that
/// channel serials are resolved against, keyed by normalised serial.
fn build_extensions_table(core_mac_id: &str, core_name: &str, extensions: &[RawExtension]) -> std::collections::HashMap<String, String> {
    let mut table = std::collections::HashMap::new();
    table.insert(normalize_serial(core_mac_id), core_name.to_string());
    for ext in extensions {
        table.insert(normalize_serial(&ext.serial), ext.name.clone().unwrap_or_default());
    }
    table
}

/// Derives a zone's `source` from the serial of its first non-empty output
/// channel (`<serial>#<channelIndex>`), looked up against the extensions
/// table; falls back to the normalised serial itself when unmatched.
fn derive_zone_source(outputs: &[RawOutput], extensions: &std::collections::HashMap<String, String>) -> Option<String> {
    for output in outputs {
        for channel in &output.channels {
            if channel.is_empty() {
                continue;
            }
            let serial_raw = channel.split('#').next().unwrap_or("");
            if serial_raw.is_empty() {
                continue;
            }
            let serial = normalize_serial(serial_raw);
            return Some(extensions.get(&serial).cloned().unwrap_or(serial));
        }
    }
    None
}

/// Merges freshly-derived zone entries against previously-stored admin
/// overrides: an existing record's backend/ip/name/maPlayerId/volumes
/// survive a resync unless the incoming entry explicitly carries its own,
/// while the freshly-derived `source` always wins. Returns the merged list
/// (exactly one record per entry, so the result has no orphans) plus the
/// subset of `entries` that had no matching prior record. Idempotent:
/// merging the same `entries` against its own output a second time leaves
/// the list unchanged and reports no newly-added entries.
pub fn merge_zone_config_entries(
    existing: &[ZoneConfigRecord],
    entries: &[ZoneConfigRecord],
) -> (Vec<ZoneConfigRecord>, Vec<ZoneConfigRecord>) {
    let by_id: std::collections::HashMap<PlayerId, &ZoneConfigRecord> = existing.iter().map(|r| (r.id, r)).collect();
    let mut merged = Vec::with_capacity(entries.len());
    let mut added = Vec::new();

    for entry in entries {
        match by_id.get(&entry.id) {
            Some(prior) => merged.push(ZoneConfigRecord {
                id: entry.id,
                uuid: entry.uuid.clone(),
                backend: if entry.backend == crate::backend::BackendKind::Null { prior.backend } else { entry.backend },
                ip: if entry.ip.is_empty() || entry.ip == "127.0.0.1" { prior.ip.clone() } else { entry.ip.clone() },
                name: entry.name.clone().or_else(|| prior.name.clone()),
                ma_player_id: entry.ma_player_id.clone().or_else(|| prior.ma_player_id.clone()),
                source: entry.source.clone().or_else(|| prior.source.clone()),
                volumes: prior.volumes.clone(),
            }),
            None => {
                merged.push(entry.clone());
                added.push(entry.clone());
            }
        }
    }

    (merged, added)
}

/// `"Basic " + base64(username.trim() + ":" + password.trim())`, the header
/// MiniServer-credentialed calls authenticate with.
pub fn compute_authorization_header(username: &str, password: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    let credentials = format!("{}:{}", username.trim(), password.trim());
    format!("Basic {}", STANDARD.encode(credentials))
}

/// One `{id, name}` rename request from the `playername` admin route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerNameUpdate {
    pub id: PlayerId,
    pub name: String,
}

pub fn serialise_player_name_updates(updates: &[PlayerNameUpdate]) -> Value {
    serde_json::to_value(updates).unwrap_or(Value::Null)
}

pub fn parse_player_name_updates(raw: &Value) -> Option<Vec<PlayerNameUpdate>> {
    serde_json::from_value(raw.clone()).ok()
}

/// One zone's entry in the `audio/cfg/volumes` preset-table payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneVolumePresetUpdate {
    pub id: PlayerId,
    #[serde(flatten)]
    pub presets: VolumePresets,
}

pub fn parse_volume_preset_updates(raw: &Value) -> Option<Vec<ZoneVolumePresetUpdate>> {
    serde_json::from_value(raw.clone()).ok()
}

pub struct ProcessOutcome {
    pub crc32: String,
    pub extensions: Vec<String>,
    pub unchanged: bool,
}

/// Exclusively owns the configuration snapshot; the zone registry reads it
/// only through `apply_config_snapshot` calls this orchestrator triggers.
pub struct ConfigOrchestrator {
    admin_dir: PathBuf,
    zones: Arc<ZoneRegistry>,
    admin: RwLock<AdminConfig>,
    /// Mirrors `admin.audioserver.mac_id` behind a sync lock so background
    /// tasks (the heartbeat emitter) can read it without an async hop.
    mac_id_cache: std::sync::RwLock<String>,
}

impl ConfigOrchestrator {
    pub fn new(zones: Arc<ZoneRegistry>) -> Self {
        Self {
            admin_dir: admin_dir(),
            zones,
            admin: RwLock::new(AdminConfig::default()),
            mac_id_cache: std::sync::RwLock::new(String::new()),
        }
    }

    /// Synchronous mac-id read for callers that cannot await, e.g. the
    /// heartbeat emitter's per-tick closure.
    pub fn cached_mac_id(&self) -> String {
        self.mac_id_cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn load_admin_config(&self) -> Option<AdminConfig> {
        admin_config::load(&self.admin_dir).await
    }

    pub async fn save_admin_config(&self) -> std::io::Result<()> {
        let snapshot = self.admin.read().await.clone();
        admin_config::save(&self.admin_dir, &snapshot).await
    }

    /// Applies admin overrides on top of in-memory runtime state: MiniServer
    /// credentials, media-provider options, and logging levels.
    pub async fn apply_admin_config(&self, incoming: AdminConfig) {
        let mut guard = self.admin.write().await;
        *guard = incoming;
    }

    /// Seeds runtime from the on-disk music cache, never contacting the
    /// MiniServer directly. Called once at startup.
    pub async fn initialize_config(&self) {
        if let Some(loaded) = self.load_admin_config().await {
            *self.admin.write().await = loaded;
        }
        self.refresh_mac_id_cache().await;
        if let Some(cache) = music_cache::load(&self.admin_dir).await {
            self.seed_audio_server_from_cache(cache).await;
        }
    }

    pub async fn seed_audio_server_from_cache(&self, cache: MusicCache) {
        let mut guard = self.admin.write().await;
        guard.audioserver.music_cfg = cache.music_cfg;
        guard.audioserver.music_crc = cache.crc32;
        guard.audioserver.music_timestamp = cache.timestamp;
        guard.audioserver.paired = true;
        drop(guard);
        self.refresh_mac_id_cache().await;
    }

    async fn refresh_mac_id_cache(&self) {
        let mac_id = self.admin.read().await.audioserver.mac_id.clone();
        *self.mac_id_cache.write().unwrap_or_else(|e| e.into_inner()) = mac_id;
    }

    /// Computes CRC32 over the canonical serialisation of `raw`; a no-op if
    /// unchanged. Otherwise rebuilds the audio-server record, persists the
    /// music cache, and reseeds the zone registry.
    pub async fn process_audio_server_config(&self, raw: Value) -> Result<ProcessOutcome> {
        let canonical = canonicalize(&raw);
        let crc = crc32_hex(&canonical);

        {
            let guard = self.admin.read().await;
            if guard.audioserver.music_crc == crc {
                return Ok(ProcessOutcome {
                    crc32: crc,
                    extensions: Vec::new(),
                    unchanged: true,
                });
            }
        }

        let parsed: RawAudioServerConfig = serde_json::from_value(raw.clone())
            .map_err(|e| BridgeError::ConfigInvalid(format!("malformed setconfig payload: {e}")))?;

        let configured_mac_id = self.admin.read().await.audioserver.mac_id.clone();

        let (mac_id, name, players, raw_extensions) = if let Some(entries) = parsed.audioservers {
            let matched = entries
                .into_iter()
                .find(|e| configured_mac_id.is_empty() || e.mac_id == configured_mac_id)
                .ok_or_else(|| BridgeError::ConfigInvalid("no entry matches macID".into()))?;
            (matched.mac_id, matched.name, matched.players, matched.extensions)
        } else {
            let mac_id = parsed
                .mac_id
                .ok_or_else(|| BridgeError::ConfigInvalid("payload missing macID".into()))?;
            (mac_id, parsed.name, parsed.players.unwrap_or_default(), parsed.extensions)
        };

        let extensions: Vec<String> = vec![mac_id.clone()];
        let extensions_table = build_extensions_table(&mac_id, name.as_deref().unwrap_or(""), &raw_extensions);

        let derived_records: Vec<ZoneConfigRecord> = players
            .iter()
            .map(|p| ZoneConfigRecord {
                id: PlayerId(p.playerid),
                uuid: p.uuid.clone().unwrap_or_default(),
                backend: parse_backend_kind(p.backend.as_deref()),
                ip: p.ip.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
                name: p.name.clone(),
                ma_player_id: p.ma_player_id.clone(),
                source: derive_zone_source(&p.outputs, &extensions_table),
                volumes: None,
            })
            .collect();

        let timestamp = now_unix();
        let zone_records = {
            let mut guard = self.admin.write().await;
            let (merged, _added) = merge_zone_config_entries(&guard.zones, &derived_records);
            guard.audioserver = AudioServerRecord {
                mac: mac_id.clone(),
                mac_id: mac_id.clone(),
                name: name.unwrap_or_default(),
                paired: true,
                music_cfg: raw.clone(),
                music_crc: crc.clone(),
                music_timestamp: Some(timestamp),
            };
            guard.zones = merged.clone();
            merged
        };

        let zone_entries: Vec<ZoneConfigEntry> = zone_records
            .iter()
            .map(|r| ZoneConfigEntry {
                id: r.id,
                uuid: r.uuid.clone(),
                backend: r.backend,
                ip: r.ip.clone(),
                name: r.name.clone(),
                ma_player_id: r.ma_player_id.clone(),
                source: r.source.clone(),
                volumes: r.volumes.clone(),
            })
            .collect();

        if let Err(e) = music_cache::save(
            &self.admin_dir,
            &MusicCache {
                crc32: crc.clone(),
                music_cfg: raw,
                timestamp: Some(timestamp),
            },
        )
        .await
        {
            warn!(error = %e, "failed to persist music cache");
        }

        self.zones.apply_config_snapshot(zone_entries).await;
        self.refresh_mac_id_cache().await;
        info!(mac_id = %mac_id, zones = extensions.len(), "applied audio server config");

        Ok(ProcessOutcome {
            crc32: crc,
            extensions,
            unchanged: false,
        })
    }

    pub async fn set_config_timestamp(&self, timestamp: u64) {
        self.admin.write().await.audioserver.music_timestamp = Some(timestamp);
    }

    pub async fn current_crc32(&self) -> String {
        self.admin.read().await.audioserver.music_crc.clone()
    }

    pub async fn mac_id(&self) -> String {
        self.admin.read().await.audioserver.mac_id.clone()
    }

    /// Overlays `incoming`'s set fields onto a zone's stored preset table,
    /// persists the result into `admin.zones`, and pushes it live into the
    /// zone registry. Returns the merged table.
    pub async fn apply_volume_presets(&self, id: PlayerId, incoming: VolumePresets) -> Result<VolumePresets> {
        let merged = {
            let mut guard = self.admin.write().await;
            let record = guard
                .zones
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(BridgeError::ZoneNotFound(id))?;
            let merged = merge_volume_presets(record.volumes.clone(), &incoming);
            record.volumes = Some(merged.clone());
            merged
        };
        self.zones.set_zone_volumes(id, merged.clone()).await?;
        Ok(merged)
    }

    /// Sets a zone's `max` preset, leaving its other presets untouched.
    pub async fn set_zone_max_volume(&self, id: PlayerId, max: u8) -> Result<VolumePresets> {
        self.apply_volume_presets(
            id,
            VolumePresets {
                max: Some(max),
                ..Default::default()
            },
        )
        .await
    }

    /// Renames a zone in both the admin override table and the live registry.
    pub async fn rename_zone(&self, id: PlayerId, name: String) -> Result<()> {
        {
            let mut guard = self.admin.write().await;
            let record = guard
                .zones
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(BridgeError::ZoneNotFound(id))?;
            record.name = Some(name.clone());
        }
        self.zones.update_zone_player_name(id, name).await
    }
}

/// Overlays the `Some` fields of `incoming` onto `existing`, leaving fields
/// `incoming` leaves unset untouched.
fn merge_volume_presets(existing: Option<VolumePresets>, incoming: &VolumePresets) -> VolumePresets {
    let base = existing.unwrap_or_default();
    VolumePresets {
        default: incoming.default.or(base.default),
        max: incoming.max.or(base.max),
        alarm: incoming.alarm.or(base.alarm),
        fire: incoming.fire.or(base.fire),
        bell: incoming.bell.or(base.bell),
        buzzer: incoming.buzzer.or(base.buzzer),
        tts: incoming.tts.or(base.tts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalisation_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn crc32_matches_reference_implementation() {
        // CRC-32/ISO-HDLC of the ASCII bytes "123456789" is the well known
        // check value 0xCBF43926.
        assert_eq!(crc32_hex("123456789"), "cbf43926");
    }

    #[tokio::test]
    async fn process_audio_server_config_is_idempotent_on_unchanged_crc() {
        let zones = Arc::new(ZoneRegistry::new(crate::bus::create_bus()));
        let orchestrator = ConfigOrchestrator::new(zones);
        let raw = serde_json::json!({
            "macID": "504F94FF1BB3",
            "players": [{"playerid": 1, "ip": "10.0.0.1"}],
        });
        let first = orchestrator.process_audio_server_config(raw.clone()).await.unwrap();
        assert!(!first.unchanged);
        let second = orchestrator.process_audio_server_config(raw).await.unwrap();
        assert!(second.unchanged);
    }

    #[test]
    fn dummybackend_resolves_to_null() {
        use crate::backend::BackendKind;
        assert_eq!(parse_backend_kind(Some("dummybackend")), BackendKind::Null);
        assert_eq!(parse_backend_kind(Some("musicassistant")), BackendKind::MusicAssistant);
        assert_eq!(parse_backend_kind(None), BackendKind::Null);
    }

    #[test]
    fn source_derivation_matches_extension_by_normalised_serial() {
        let table = build_extensions_table("50:4F:94:FF:1B:B3", "Core", &[RawExtension {
            serial: "50-4F-94-AA-BB-CC".to_string(),
            name: Some("Extension 1".to_string()),
        }]);

        let matched = derive_zone_source(
            &[RawOutput { channels: vec!["504F94AABBCC#0".to_string()] }],
            &table,
        );
        assert_eq!(matched, Some("Extension 1".to_string()));

        let core = derive_zone_source(
            &[RawOutput { channels: vec!["504F94FF1BB3#1".to_string()] }],
            &table,
        );
        assert_eq!(core, Some("Core".to_string()));

        let unknown = derive_zone_source(
            &[RawOutput { channels: vec!["AABBCCDDEEFF#0".to_string()] }],
            &table,
        );
        assert_eq!(unknown, Some("AABBCCDDEEFF".to_string()));

        let empty = derive_zone_source(&[RawOutput { channels: vec![] }], &table);
        assert_eq!(empty, None);
    }

    fn record(id: u32, source: Option<&str>) -> ZoneConfigRecord {
        ZoneConfigRecord {
            id: PlayerId(id),
            uuid: format!("uuid-{id}"),
            backend: crate::backend::BackendKind::Null,
            ip: "127.0.0.1".to_string(),
            name: None,
            ma_player_id: None,
            source: source.map(str::to_string),
            volumes: None,
        }
    }

    #[test]
    fn merge_preserves_overrides_and_adopts_fresh_source() {
        let mut existing = record(1, Some("old-source"));
        existing.name = Some("Kitchen".to_string());
        existing.volumes = Some(VolumePresets {
            max: Some(80),
            ..Default::default()
        });

        let incoming = record(1, Some("Extension 1"));
        let (merged, added) = merge_zone_config_entries(&[existing], &[incoming]);

        assert!(added.is_empty());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source.as_deref(), Some("Extension 1"));
        assert_eq!(merged[0].name.as_deref(), Some("Kitchen"));
        assert_eq!(merged[0].volumes.as_ref().unwrap().max, Some(80));
    }

    #[test]
    fn merge_is_idempotent_and_has_no_orphans() {
        let entries = vec![record(1, Some("a")), record(2, Some("b"))];
        let (first_merge, first_added) = merge_zone_config_entries(&[], &entries);
        assert_eq!(first_added.len(), 2);
        assert_eq!(first_merge.len(), 2);

        let (second_merge, second_added) = merge_zone_config_entries(&first_merge, &entries);
        assert!(second_added.is_empty());
        assert_eq!(second_merge.len(), entries.len());
        let ids: std::collections::HashSet<PlayerId> = second_merge.iter().map(|r| r.id).collect();
        assert_eq!(ids, entries.iter().map(|r| r.id).collect());
    }

    #[test]
    fn authorization_header_matches_formula() {
        use base64::Engine;
        let header = compute_authorization_header(" admin ", " secret ");
        assert_eq!(
            header,
            format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("admin:secret"))
        );
    }

    #[test]
    fn player_name_updates_round_trip() {
        let updates = vec![
            PlayerNameUpdate { id: PlayerId(1), name: "Kitchen".to_string() },
            PlayerNameUpdate { id: PlayerId(2), name: "Office".to_string() },
        ];
        let serialised = serialise_player_name_updates(&updates);
        let parsed = parse_player_name_updates(&serialised).unwrap();
        assert_eq!(parsed, updates);
    }
}
