//! Zone registry: maps player id to static config, mutable playback state,
//! queue, and backend handle. Exclusively owns the zone table and is the
//! only component that emits `audio_event`/`audio_queue_event`/
//! `audio_sync_event` broadcasts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::backend::{self, Backend, BackendKind, CommandParam};
use crate::bus::SharedBus;
use crate::error::{BridgeError, Result};

/// Positive integer assigned by the MiniServer config; stable across
/// restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Play,
    Pause,
    Stop,
    Off,
}

impl Default for PlaybackMode {
    fn default() -> Self {
        PlaybackMode::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    Off,
    Track,
    Queue,
}

impl Default for RepeatMode {
    fn default() -> Self {
        RepeatMode::Off
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumePresets {
    #[serde(default)]
    pub default: Option<u8>,
    #[serde(default)]
    pub max: Option<u8>,
    #[serde(default)]
    pub alarm: Option<u8>,
    #[serde(default)]
    pub fire: Option<u8>,
    #[serde(default)]
    pub bell: Option<u8>,
    #[serde(default)]
    pub buzzer: Option<u8>,
    #[serde(default)]
    pub tts: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ZoneState {
    pub mode: PlaybackMode,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub cover_url: String,
    pub audiopath: String,
    pub volume: u8,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub duration_ms: u64,
    pub position_ms: u64,
    pub qindex: u32,
}

#[derive(Debug, Clone, Default)]
pub struct QueueItem {
    pub audiopath: String,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueueState {
    pub items: Vec<QueueItem>,
    pub shuffle: bool,
    pub total: u32,
}

/// Partial update applied to a zone's state; `None` fields are left
/// unchanged. Mirrors what a backend reports after a transport change.
#[derive(Debug, Clone, Default)]
pub struct ZoneStatusPartial {
    pub mode: Option<PlaybackMode>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover_url: Option<String>,
    pub audiopath: Option<String>,
    pub volume: Option<u8>,
    pub repeat: Option<RepeatMode>,
    pub shuffle: Option<bool>,
    pub duration_ms: Option<u64>,
    pub position_ms: Option<u64>,
    pub qindex: Option<u32>,
}

impl ZoneState {
    fn merge(&mut self, partial: ZoneStatusPartial) {
        if let Some(v) = partial.mode {
            self.mode = v;
        }
        if let Some(v) = partial.title {
            self.title = v;
        }
        if let Some(v) = partial.artist {
            self.artist = v;
        }
        if let Some(v) = partial.album {
            self.album = v;
        }
        if let Some(v) = partial.cover_url {
            self.cover_url = v;
        }
        if let Some(v) = partial.audiopath {
            self.audiopath = v;
        }
        if let Some(v) = partial.volume {
            self.volume = v;
        }
        if let Some(v) = partial.repeat {
            self.repeat = v;
        }
        if let Some(v) = partial.shuffle {
            self.shuffle = v;
        }
        if let Some(v) = partial.duration_ms {
            self.duration_ms = v;
        }
        if let Some(v) = partial.position_ms {
            self.position_ms = v;
        }
        if let Some(v) = partial.qindex {
            self.qindex = v;
        }
    }
}

/// One player entry from a MiniServer config snapshot, after admin-config
/// overrides have been resolved.
#[derive(Debug, Clone)]
pub struct ZoneConfigEntry {
    pub id: PlayerId,
    pub uuid: String,
    pub backend: BackendKind,
    pub ip: String,
    pub name: Option<String>,
    pub ma_player_id: Option<String>,
    pub source: Option<String>,
    pub volumes: Option<VolumePresets>,
}

pub struct Zone {
    pub id: PlayerId,
    pub uuid: String,
    pub backend_kind: BackendKind,
    pub backend_endpoint: String,
    pub ma_player_id: Option<String>,
    pub name: String,
    pub source: String,
    pub volumes: VolumePresets,
    pub state: ZoneState,
    pub queue: QueueState,
    pub connected: bool,
    pub connect_error: Option<String>,
    backend: Option<Arc<dyn Backend>>,
}

impl Zone {
    fn clamp_volume(&self, requested: i32) -> u8 {
        let mut v = requested.clamp(0, 100);
        if let Some(max) = self.volumes.max {
            v = v.min(max as i32);
        }
        v as u8
    }
}

pub struct ZoneRegistry {
    zones: tokio::sync::RwLock<HashMap<PlayerId, Zone>>,
    bus: SharedBus,
}

impl ZoneRegistry {
    pub fn new(bus: SharedBus) -> Self {
        Self {
            zones: tokio::sync::RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Replaces the registry atomically. Creates default (Null,
    /// 127.0.0.1) entries for any declared player without an admin
    /// override; the resulting zone set equals `{entries[i].id}` exactly.
    pub async fn apply_config_snapshot(&self, entries: Vec<ZoneConfigEntry>) {
        let mut built = HashMap::with_capacity(entries.len());
        for entry in entries {
            let zone = self.build_zone(entry).await;
            built.insert(zone.id, zone);
        }

        let mut guard = self.zones.write().await;
        let previous = std::mem::replace(&mut *guard, built);
        drop(guard);

        for (_, zone) in previous {
            if let Some(backend) = zone.backend {
                backend.cleanup().await;
            }
        }
    }

    async fn build_zone(&self, entry: ZoneConfigEntry) -> Zone {
        let backend_endpoint = entry.ip.clone();
        let backend_impl: Arc<dyn Backend> =
            Arc::from(backend::construct(entry.backend, backend_endpoint.clone(), entry.ma_player_id.clone()));

        let (connected, connect_error) = match backend_impl.initialize().await {
            Ok(()) => (entry.backend != BackendKind::Null, None),
            Err(e) => {
                warn!(zone = entry.id.0, error = %e, "zone backend failed to initialize");
                (false, Some(e.to_string()))
            }
        };

        Zone {
            id: entry.id,
            uuid: entry.uuid,
            backend_kind: entry.backend,
            backend_endpoint,
            ma_player_id: entry.ma_player_id,
            name: entry.name.unwrap_or_else(|| format!("Zone {}", entry.id.0)),
            source: entry.source.unwrap_or_default(),
            volumes: entry.volumes.unwrap_or_default(),
            state: ZoneState::default(),
            queue: QueueState::default(),
            connected,
            connect_error,
            backend: if connected { Some(backend_impl) } else { None },
        }
    }

    /// Re-resolves a single zone's backend, used after an admin-driven edit.
    pub async fn setup_zone_by_id(&self, entry: ZoneConfigEntry) -> Result<()> {
        let id = entry.id;
        let zone = self.build_zone(entry).await;
        let mut guard = self.zones.write().await;
        let previous = guard.insert(id, zone);
        drop(guard);
        if let Some(prev) = previous {
            if let Some(backend) = prev.backend {
                backend.cleanup().await;
            }
        }
        Ok(())
    }

    /// Releases every zone's backend handle, called once during graceful
    /// shutdown. `cleanup` errors are not surfaced here either, per the
    /// same policy as a single zone's replacement.
    pub async fn cleanup_all(&self) {
        let mut guard = self.zones.write().await;
        for zone in guard.values_mut() {
            if let Some(backend) = zone.backend.take() {
                backend.cleanup().await;
            }
        }
    }

    async fn backend_handle(&self, id: PlayerId) -> Result<Arc<dyn Backend>> {
        let guard = self.zones.read().await;
        let zone = guard.get(&id).ok_or(BridgeError::ZoneNotFound(id))?;
        if zone.backend_kind == BackendKind::MusicAssistant && zone.ma_player_id.is_none() {
            return Err(BridgeError::ZoneNotConfigured(id, "maPlayerId missing".into()));
        }
        zone.backend
            .clone()
            .ok_or_else(|| BridgeError::BackendUnreachable(id, "not connected".into()))
    }

    pub async fn send_command_to_zone(
        &self,
        id: PlayerId,
        command: &str,
        param: CommandParam,
    ) -> Result<()> {
        let backend = self.backend_handle(id).await?;
        backend
            .send_command(command, param)
            .await
            .map_err(|e| BridgeError::DispatchFailed(id, e.to_string()))
    }

    pub async fn send_group_command_to_zone(
        &self,
        leader: PlayerId,
        command: &str,
        group_type: &str,
        others: &[String],
    ) -> Result<()> {
        let backend = self.backend_handle(leader).await?;
        backend
            .send_group_command(command, group_type, &leader.to_string(), others)
            .await
            .map_err(|e| BridgeError::DispatchFailed(leader, e.to_string()))
    }

    /// Merges a partial into the zone's state and broadcasts exactly one
    /// `audio_event` with the full projected state.
    pub async fn update_zone_player_status(&self, id: PlayerId, partial: ZoneStatusPartial) -> Result<()> {
        let event = {
            let mut guard = self.zones.write().await;
            let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
            zone.state.merge(partial);
            project_audio_event(zone)
        };
        self.emit("audio_event", vec![event]).await;
        Ok(())
    }

    pub async fn update_zone_queue(&self, id: PlayerId, queuesize: u32, restrictions: u32) -> Result<()> {
        {
            let mut guard = self.zones.write().await;
            let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
            zone.queue.total = queuesize;
        }
        let payload = json!({ "playerid": id.0, "queuesize": queuesize, "restrictions": restrictions });
        self.emit("audio_queue_event", vec![payload]).await;
        Ok(())
    }

    /// Broadcasts one `audio_sync_event` for a group/master-volume change.
    /// Group membership is computed by the group tracker; this method only
    /// projects and emits it.
    pub async fn broadcast_sync_event(&self, group_external_id: &str, master_volume: u8, members: &[PlayerId]) {
        let players: Vec<Value> = members
            .iter()
            .map(|p| json!({ "id": p.0, "playerid": p.0 }))
            .collect();
        let payload = json!({
            "group": group_external_id,
            "mastervolume": master_volume,
            "players": players,
            "type": "audio",
        });
        self.emit("audio_sync_event", vec![payload]).await;
    }

    pub async fn apply_stored_volume_preset(&self, id: PlayerId, emit_event: bool) -> Result<()> {
        let event = {
            let mut guard = self.zones.write().await;
            let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
            if let Some(default) = zone.volumes.default {
                zone.state.volume = zone.clamp_volume(default as i32);
            }
            emit_event.then(|| project_audio_event(zone))
        };
        if let Some(event) = event {
            self.emit("audio_event", vec![event]).await;
        }
        Ok(())
    }

    /// Dispatches `volume <delta>` to every member (including the leader),
    /// sequentially, preserving "last write wins" within the group. The
    /// member set (including the leader) is resolved by the group tracker
    /// and passed in; this keeps group membership out of the zone table.
    pub async fn apply_master_volume_to_members(
        &self,
        members: &[PlayerId],
        target: i32,
    ) -> (Vec<(PlayerId, u8)>, Vec<(PlayerId, String)>) {
        let target = target.clamp(0, 100);
        let mut updates = Vec::new();
        let mut skipped = Vec::new();

        for &id in members {
            let (current, clamped_target, has_backend) = {
                let guard = self.zones.read().await;
                match guard.get(&id) {
                    Some(zone) => (zone.state.volume, zone.clamp_volume(target), zone.backend.is_some()),
                    None => {
                        skipped.push((id, "unknown-zone".to_string()));
                        continue;
                    }
                }
            };
            if !has_backend {
                skipped.push((id, "dispatch-failed".to_string()));
                continue;
            }
            let delta = clamped_target as i32 - current as i32;
            match self
                .send_command_to_zone(id, "volume", CommandParam::one(delta.to_string()))
                .await
            {
                Ok(()) => {
                    let mut guard = self.zones.write().await;
                    if let Some(zone) = guard.get_mut(&id) {
                        zone.state.volume = clamped_target;
                    }
                    updates.push((id, clamped_target));
                }
                Err(e) => skipped.push((id, e.to_string())),
            }
        }
        (updates, skipped)
    }

    /// Converts an absolute volume target into a delta against the zone's
    /// last-known volume, dispatches it, and updates the cache on success.
    pub async fn dispatch_absolute_volume(&self, id: PlayerId, target: i32) -> Result<u8> {
        let (current, clamped_target) = {
            let guard = self.zones.read().await;
            let zone = guard.get(&id).ok_or(BridgeError::ZoneNotFound(id))?;
            (zone.state.volume, zone.clamp_volume(target))
        };
        let delta = clamped_target as i32 - current as i32;
        self.send_command_to_zone(id, "volume", CommandParam::one(delta.to_string()))
            .await?;
        let mut guard = self.zones.write().await;
        if let Some(zone) = guard.get_mut(&id) {
            zone.state.volume = clamped_target;
        }
        Ok(clamped_target)
    }

    pub async fn get_zone_statuses(&self) -> Vec<ZoneStatus> {
        let guard = self.zones.read().await;
        guard.values().map(ZoneStatus::from).collect()
    }

    pub async fn zone_exists(&self, id: PlayerId) -> bool {
        self.zones.read().await.contains_key(&id)
    }

    pub async fn backend_supports_announce(&self, id: PlayerId) -> bool {
        let guard = self.zones.read().await;
        match guard.get(&id).and_then(|z| z.backend.as_ref()) {
            Some(backend) => backend.supports_announce(),
            None => false,
        }
    }

    pub async fn announce_to_zone(&self, id: PlayerId, url: &str) -> Result<()> {
        let backend = self.backend_handle(id).await?;
        backend
            .announce(url)
            .await
            .map_err(|e| BridgeError::DispatchFailed(id, e.to_string()))
    }

    pub async fn zone_volume(&self, id: PlayerId) -> Option<u8> {
        self.zones.read().await.get(&id).map(|z| z.state.volume)
    }

    pub async fn zone_repeat(&self, id: PlayerId) -> Option<RepeatMode> {
        self.zones.read().await.get(&id).map(|z| z.state.repeat)
    }

    pub async fn queue_index_of(&self, id: PlayerId, audiopath: &str) -> Option<u32> {
        let guard = self.zones.read().await;
        let zone = guard.get(&id)?;
        zone.queue
            .items
            .iter()
            .position(|item| item.audiopath == audiopath)
            .map(|i| i as u32)
    }

    /// Replaces a zone's known queue contents, reported by the backend
    /// whenever it pushes a new playlist/queue to the player.
    pub async fn set_queue_items(&self, id: PlayerId, items: Vec<QueueItem>) -> Result<()> {
        let mut guard = self.zones.write().await;
        let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
        zone.queue.items = items;
        Ok(())
    }

    pub async fn queue_items(&self, id: PlayerId) -> Option<Vec<QueueItem>> {
        let guard = self.zones.read().await;
        guard.get(&id).map(|zone| zone.queue.items.clone())
    }

    pub async fn zone_volumes(&self, id: PlayerId) -> Option<VolumePresets> {
        let guard = self.zones.read().await;
        guard.get(&id).map(|zone| zone.volumes.clone())
    }

    /// Overwrites a zone's volume preset table, e.g. after an admin `H`
    /// route (`volumes`, `maxvolume`, `eventvolumes`) persists new values.
    pub async fn set_zone_volumes(&self, id: PlayerId, volumes: VolumePresets) -> Result<()> {
        let mut guard = self.zones.write().await;
        let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
        zone.volumes = volumes;
        zone.state.volume = zone.clamp_volume(zone.state.volume as i32);
        Ok(())
    }

    /// Renames a zone in place, used by the `playername` admin route.
    pub async fn update_zone_player_name(&self, id: PlayerId, name: String) -> Result<()> {
        let mut guard = self.zones.write().await;
        let zone = guard.get_mut(&id).ok_or(BridgeError::ZoneNotFound(id))?;
        zone.name = name;
        Ok(())
    }

    async fn emit(&self, key: &str, items: Vec<Value>) {
        let payload = json!({ key: items });
        match serde_json::to_string(&payload) {
            Ok(line) => self.bus.broadcast(line).await,
            Err(e) => warn!(error = %e, "failed to serialise bus event"),
        }
    }
}

fn project_audio_event(zone: &Zone) -> Value {
    json!({
        "playerid": zone.id.0,
        "mode": zone.state.mode,
        "name": zone.name,
        "title": zone.state.title,
        "artist": zone.state.artist,
        "album": zone.state.album,
        "audiopath": zone.state.audiopath,
        "coverurl": zone.state.cover_url,
        "audiotype": 2,
        "duration": zone.state.duration_ms / 1000,
        "duration_ms": zone.state.duration_ms,
        "time": zone.state.position_ms / 1000,
        "position_ms": zone.state.position_ms,
        "volume": zone.state.volume,
        "plrepeat": match zone.state.repeat {
            RepeatMode::Off => 0,
            RepeatMode::Track => 1,
            RepeatMode::Queue => 2,
        },
        "plshuffle": zone.state.shuffle,
        "qindex": zone.state.qindex,
        "power": matches!(zone.state.mode, PlaybackMode::Off) as u8 ^ 1,
        "type": 2,
        "station": "",
        "parent": "",
        "sourceName": zone.source,
        "icontype": "",
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub id: PlayerId,
    pub name: String,
    pub connected: bool,
    pub connect_error: Option<String>,
    pub volume: u8,
    pub mode: PlaybackMode,
}

impl From<&Zone> for ZoneStatus {
    fn from(z: &Zone) -> Self {
        Self {
            id: z.id,
            name: z.name.clone(),
            connected: z.connected,
            connect_error: z.connect_error.clone(),
            volume: z.state.volume,
            mode: z.state.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    fn entry(id: u32) -> ZoneConfigEntry {
        ZoneConfigEntry {
            id: PlayerId(id),
            uuid: format!("uuid-{id}"),
            backend: BackendKind::Null,
            ip: String::new(),
            name: None,
            ma_player_id: None,
            source: None,
            volumes: None,
        }
    }

    #[tokio::test]
    async fn apply_config_snapshot_produces_exact_zone_set() {
        let registry = ZoneRegistry::new(create_bus());
        registry
            .apply_config_snapshot(vec![entry(1), entry(2), entry(3)])
            .await;
        assert!(registry.zone_exists(PlayerId(1)).await);
        assert!(registry.zone_exists(PlayerId(2)).await);
        assert!(registry.zone_exists(PlayerId(3)).await);
        assert!(!registry.zone_exists(PlayerId(4)).await);
    }

    #[tokio::test]
    async fn volume_is_clamped_to_max_preset() {
        let registry = ZoneRegistry::new(create_bus());
        let mut e = entry(1);
        e.volumes = Some(VolumePresets {
            max: Some(50),
            ..Default::default()
        });
        registry.apply_config_snapshot(vec![e]).await;
        let (updates, _) = registry
            .apply_master_volume_to_members(&[PlayerId(1)], 90)
            .await;
        assert_eq!(updates, vec![(PlayerId(1), 50)]);
    }

    #[tokio::test]
    async fn unknown_zone_status_update_fails() {
        let registry = ZoneRegistry::new(create_bus());
        let result = registry
            .update_zone_player_status(PlayerId(99), ZoneStatusPartial::default())
            .await;
        assert!(matches!(result, Err(BridgeError::ZoneNotFound(_))));
    }
}
