//! Command dispatcher: URL parser, routing table, response serialiser.
//! Every handler resolves to a `CommandResult`; no error is ever allowed
//! to escape across this boundary (see `crate::error`).

pub mod sanitize;
pub mod secure;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::alert::{self, AlertController, AlertOptions};
use crate::backend::CommandParam;
use crate::config::ConfigOrchestrator;
use crate::fade::FadeController;
use crate::group::{GroupSource, GroupTracker};
use crate::provider::favorites::{FavoritesStore, RoomFavorite};
use crate::provider::MediaProvider;
use crate::zone::{PlayerId, ZoneRegistry, ZoneStatusPartial};

const PREGENERATED_PUBLIC_KEY: &str = "LS0tLS1CRUdJTiBQVUJMSUMgS0VZLS0tLS0K";
const ROOMFAV_FADE_DURATION_MS: u64 = 3000;

/// Either a payload wrapped in the legacy `{<name>_result, command}`
/// envelope, or a raw response emitted verbatim.
pub enum CommandResult {
    Wrapped(Value),
    Raw(Value),
}

impl CommandResult {
    pub fn empty() -> Self {
        CommandResult::Wrapped(json!([]))
    }
}

fn decode_b64_urlsafe(input: &str) -> Option<Vec<u8>> {
    let mut s = input.replace('-', "+").replace('_', "/");
    let padding = (4 - s.len() % 4) % 4;
    s.push_str(&"=".repeat(padding));
    BASE64_STANDARD.decode(s).ok()
}

fn last_alphabetic_segment<'a>(segments: &[&'a str]) -> &'a str {
    segments
        .iter()
        .rev()
        .find(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic()))
        .copied()
        .unwrap_or("command")
}

fn parse_zone(segment: &str) -> Option<PlayerId> {
    segment.parse::<u32>().ok().map(PlayerId)
}

fn parse_csv_players(csv: &str) -> Vec<PlayerId> {
    csv.split(',').filter_map(|s| s.trim().parse::<u32>().ok()).map(PlayerId).collect()
}

fn pagination(offset: Option<&str>, limit: Option<&str>, default_limit: u32) -> (u32, u32) {
    let offset = offset.and_then(|s| s.parse().ok()).unwrap_or(0);
    let limit = limit.and_then(|s| s.parse().ok()).unwrap_or(default_limit);
    (offset, limit)
}

pub struct Dispatcher {
    pub zones: Arc<ZoneRegistry>,
    pub groups: Arc<RwLock<GroupTracker>>,
    pub alerts: Arc<AlertController>,
    pub fade: Arc<FadeController>,
    pub config: Arc<ConfigOrchestrator>,
    pub provider: Arc<dyn MediaProvider>,
    pub favorites: Arc<FavoritesStore>,
}

impl Dispatcher {
    /// Dispatches one command URL (leading slash already stripped) and
    /// returns the serialised response line, exactly as it would be
    /// written back over HTTP or WebSocket.
    pub async fn dispatch(&self, url: &str) -> String {
        let (name, result) = self.route(url).await;
        match result {
            CommandResult::Raw(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
            CommandResult::Wrapped(payload) => {
                let mut map = serde_json::Map::new();
                map.insert(format!("{name}_result"), payload);
                map.insert("command".to_string(), Value::String(url.trim_start_matches('/').to_string()));
                serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
            }
        }
    }

    async fn route(&self, url: &str) -> (String, CommandResult) {
        let trimmed = url.trim_start_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let sanitised = sanitize::sanitise(trimmed);
        info!(command = %sanitised, "dispatching command");

        match segments.as_slice() {
            ["secure", "info", "pairing"] => {
                let mac = self.config.mac_id().await;
                ("pairing".to_string(), CommandResult::Raw(secure::info_pairing(&mac)))
            }
            ["secure", "hello", public_key] => {
                ("hello".to_string(), CommandResult::Raw(secure::hello(public_key)))
            }
            ["secure", "authenticate", ..] => {
                ("authenticate".to_string(), CommandResult::Raw(secure::authenticate()))
            }
            ["secure", "init", ..] => ("init".to_string(), CommandResult::Raw(secure::init())),

            ["audio", "cfg", "miniservertime"] => {
                ("miniservertime".to_string(), CommandResult::Wrapped(Value::Bool(true)))
            }
            ["audio", "cfg", "ready"] => (
                "ready".to_string(),
                CommandResult::Wrapped(json!({ "session": 547541322864_i64 })),
            ),
            ["audio", "cfg", "getconfig"] => {
                let crc = self.config.current_crc32().await;
                (
                    "getconfig".to_string(),
                    CommandResult::Wrapped(json!({ "crc32": crc, "extensions": [] })),
                )
            }
            ["audio", "cfg", "getkey"] | ["audio", "cfg", "getkey", "full"] => (
                "getkey".to_string(),
                CommandResult::Wrapped(Value::String(PREGENERATED_PUBLIC_KEY.to_string())),
            ),
            ["audio", "cfg", "setconfig", payload] => self.handle_setconfig(payload).await,
            ["audio", "cfg", "setconfigtimestamp", n] => {
                if let Ok(ts) = n.parse::<u64>() {
                    self.config.set_config_timestamp(ts).await;
                }
                ("setconfigtimestamp".to_string(), CommandResult::Wrapped(Value::Bool(true)))
            }
            ["audio", "cfg", "volumes", payload] => self.handle_cfg_volumes(payload).await,
            ["audio", "cfg", "defaultvolume", zone, v] => {
                let name = "defaultvolume".to_string();
                match (parse_zone(zone), v.parse::<i32>()) {
                    (Some(id), Ok(_)) => {
                        let _ = self.zones.apply_stored_volume_preset(id, true).await;
                        (name, CommandResult::Wrapped(Value::Bool(true)))
                    }
                    _ => (name, CommandResult::empty()),
                }
            }
            ["audio", "cfg", "maxvolume", zone, v] => self.handle_cfg_maxvolume(zone, v).await,
            ["audio", "cfg", "eventvolumes", zone, payload] => {
                self.handle_cfg_eventvolumes(zone, payload).await
            }
            ["audio", "cfg", "playername", payload] => self.handle_cfg_playername(payload).await,
            ["audio", "cfg", "playeropts", ..] => {
                ("playeropts".to_string(), CommandResult::Wrapped(Value::Bool(true)))
            }
            ["audio", "cfg", "getmediafolder", id, offset, limit] => {
                let (off, lim) = pagination(Some(offset), Some(limit), 50);
                let page = self.provider.get_media_folder(id, off, lim);
                ("getmediafolder".to_string(), CommandResult::Wrapped(json!(page)))
            }
            ["audio", "cfg", "getradios", rest @ ..] => {
                let (off, lim) = pagination(rest.first().copied(), rest.get(1).copied(), 50);
                let page = self.provider.get_radios(off, lim);
                ("getradios".to_string(), CommandResult::Wrapped(json!(page)))
            }
            ["audio", "cfg", "getplaylists2", rest @ ..] => {
                let (off, lim) = pagination(rest.first().copied(), rest.get(1).copied(), 50);
                let page = self.provider.get_playlists(off, lim);
                ("getplaylists2".to_string(), CommandResult::Wrapped(json!(page)))
            }
            ["audio", "cfg", "getservicefolder", service, rest @ ..] => {
                let id = rest.first().copied().unwrap_or("");
                let (off, lim) = pagination(rest.get(1).copied(), rest.get(2).copied(), 50);
                let page = self.provider.get_service_folder(service, id, off, lim);
                ("getservicefolder".to_string(), CommandResult::Wrapped(json!(page)))
            }
            ["audio", "cfg", "globalsearch", query, rest @ ..] => {
                let (off, lim) = pagination(rest.first().copied(), rest.get(1).copied(), 10);
                let page = self.provider.global_search(query, off, lim);
                ("globalsearch".to_string(), CommandResult::Wrapped(json!(page)))
            }
            ["audio", "cfg", "getavailableservices"] => (
                "getavailableservices".to_string(),
                CommandResult::Wrapped(json!(self.provider.available_services())),
            ),
            ["audio", "cfg", "scanstatus"] => (
                "scanstatus".to_string(),
                CommandResult::Wrapped(json!(self.provider.scan_status())),
            ),
            ["audio", "cfg", "getroomfavs", zone, offset, limit] => {
                let name = "getroomfavs".to_string();
                match parse_zone(zone) {
                    Some(id) => {
                        let (off, lim) = pagination(Some(offset), Some(limit), 50);
                        let (items, total) = self.favorites.list(id, off, lim).await;
                        (name, CommandResult::Wrapped(json!({ "items": favorites_json(&items), "total": total })))
                    }
                    None => (name, CommandResult::empty()),
                }
            }
            ["audio", "cfg", "roomfavs", zone, action, rest @ ..] => {
                self.handle_roomfavs(zone, action, rest).await
            }
            ["audio", "cfg", "dgroup", "update", group_id, rest @ ..] => {
                self.handle_dgroup_update(group_id, rest.first().copied()).await
            }

            ["audio", "grouped", "volume", token, csv] => self.handle_grouped_volume(token, csv).await,
            ["audio", "grouped", verb @ ("pause" | "play" | "resume" | "stop"), csv] => {
                self.handle_grouped_transport(verb, csv).await
            }
            ["audio", "grouped", alert_type, rest @ ..] => {
                self.handle_alert(alert_type, rest).await
            }

            ["audio", zone, "status"] => self.handle_status(zone).await,
            ["audio", zone, "getqueue"] => self.handle_getqueue(zone).await,
            ["audio", zone, "recent", rest @ ..] => self.handle_recent(zone, rest).await,
            ["audio", zone, "serviceplay", service, user, id] => {
                self.handle_serviceplay(zone, service, user, id).await
            }
            ["audio", zone, "playlist", "play", path] => self.handle_playlist_play(zone, path, None).await,
            ["audio", zone, "library", "play", id, rest @ ..] => {
                self.handle_library_play(zone, id, rest).await
            }
            ["audio", zone, "playurl", uri] => self.handle_playurl(zone, uri).await,
            ["audio", zone, "roomfav", "play", fid, provider_name, rest @ ..] => {
                self.handle_roomfav_play(zone, fid, provider_name, rest).await
            }
            ["audio", zone, "mastervolume", v] => self.handle_mastervolume(zone, v).await,
            [
                "audio",
                zone,
                verb @ ("on" | "off" | "play" | "resume" | "pause" | "queueminus" | "queue" | "queueplus" | "volume"
                | "repeat" | "shuffle" | "position" | "test"),
                rest @ ..,
            ] => self.handle_zone_verb(zone, verb, rest).await,
            ["audio", zone, alias @ ("albums" | "artists" | "tracks"), rest @ ..] => {
                let id = rest.join(":");
                self.handle_library_play(zone, &format!("{alias}:{id}"), &[]).await
            }

            _ => {
                let name = last_alphabetic_segment(&segments);
                (name.to_string(), CommandResult::Wrapped(json!([])))
            }
        }
    }

    async fn handle_setconfig(&self, payload: &str) -> (String, CommandResult) {
        let name = "setconfig".to_string();
        let Some(bytes) = decode_b64_urlsafe(payload) else {
            return (name, CommandResult::Wrapped(json!({ "success": false, "error": "invalid base64" })));
        };
        let raw: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return (
                    name,
                    CommandResult::Wrapped(json!({ "success": false, "error": format!("invalid json: {e}") })),
                )
            }
        };
        match self.config.process_audio_server_config(raw).await {
            Ok(outcome) => (
                name,
                CommandResult::Wrapped(json!({ "crc32": outcome.crc32, "extensions": outcome.extensions })),
            ),
            Err(e) => {
                warn!(error = %e, "setconfig rejected");
                (name, CommandResult::Wrapped(json!({ "success": false, "error": e.to_string() })))
            }
        }
    }

    async fn handle_cfg_volumes(&self, payload: &str) -> (String, CommandResult) {
        let name = "volumes".to_string();
        let Some(bytes) = decode_b64_urlsafe(payload) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        let Ok(raw) = serde_json::from_slice::<Value>(&bytes) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        let Some(updates) = crate::config::parse_volume_preset_updates(&raw) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        for update in updates {
            if let Err(e) = self.config.apply_volume_presets(update.id, update.presets).await {
                warn!(zone = update.id.0, error = %e, "failed to store volume presets");
            }
        }
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_cfg_maxvolume(&self, zone: &str, v: &str) -> (String, CommandResult) {
        let name = "maxvolume".to_string();
        match (parse_zone(zone), v.parse::<u8>()) {
            (Some(id), Ok(max)) => {
                if let Err(e) = self.config.set_zone_max_volume(id, max).await {
                    warn!(zone = id.0, error = %e, "failed to store max volume");
                    return (name, CommandResult::Wrapped(Value::Bool(false)));
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            _ => (name, CommandResult::empty()),
        }
    }

    async fn handle_cfg_eventvolumes(&self, zone: &str, payload: &str) -> (String, CommandResult) {
        let name = "eventvolumes".to_string();
        let Some(id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        let Some(bytes) = decode_b64_urlsafe(payload) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        let Ok(presets) = serde_json::from_slice::<crate::zone::VolumePresets>(&bytes) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        if let Err(e) = self.config.apply_volume_presets(id, presets).await {
            warn!(zone = id.0, error = %e, "failed to store event volumes");
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        }
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_cfg_playername(&self, payload: &str) -> (String, CommandResult) {
        let name = "playername".to_string();
        let Some(bytes) = decode_b64_urlsafe(payload) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        let Ok(raw) = serde_json::from_slice::<Value>(&bytes) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        let Some(updates) = crate::config::parse_player_name_updates(&raw) else {
            return (name, CommandResult::Wrapped(Value::Bool(false)));
        };
        for update in updates {
            if let Err(e) = self.config.rename_zone(update.id, update.name).await {
                warn!(zone = update.id.0, error = %e, "failed to rename zone");
            }
        }
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_roomfavs(&self, zone: &str, action: &str, rest: &[&str]) -> (String, CommandResult) {
        let name = "roomfavs".to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        match action {
            "add" => {
                let id = rest.first().copied().unwrap_or_default().to_string();
                self.favorites
                    .add(RoomFavorite {
                        id: id.clone(),
                        zone: zone_id,
                        provider: rest.get(1).copied().unwrap_or_default().to_string(),
                        title: rest.get(2).copied().unwrap_or_default().to_string(),
                        audiopath: rest.get(3).copied().unwrap_or_default().to_string(),
                        coverurl: None,
                        position: 0,
                    })
                    .await;
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            "delete" => {
                if let Some(id) = rest.first() {
                    self.favorites.delete(id).await;
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            "reorder" => {
                let ids: Vec<String> = rest.iter().map(|s| s.to_string()).collect();
                self.favorites.reorder(zone_id, &ids).await;
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            "copy" => {
                if let Some(to) = rest.first().and_then(|s| parse_zone(s)) {
                    self.favorites.copy(zone_id, to).await;
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            "setid" => {
                if let [old, new] = rest {
                    self.favorites.set_id(old, new).await;
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            _ => (name, CommandResult::empty()),
        }
    }

    async fn handle_dgroup_update(&self, group_id: &str, csv: Option<&str>) -> (String, CommandResult) {
        let name = "dgroup".to_string();
        match csv {
            None => {
                if let Some(id) = group_id.parse::<u32>().ok().map(PlayerId) {
                    self.groups.write().await.remove_group_by_leader(id);
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            Some(members_csv) => {
                let members = parse_csv_players(members_csv);
                let Some(leader) = members.first().copied() else {
                    return (name, CommandResult::empty());
                };
                let external_id = if group_id == "new" { None } else { Some(group_id.to_string()) };
                let result = self.groups.write().await.upsert_group(
                    leader,
                    members.clone(),
                    "null".to_string(),
                    external_id.clone(),
                    GroupSource::Manual,
                );
                let external_id = self
                    .groups
                    .read()
                    .await
                    .get_group_by_leader(leader)
                    .map(|g| g.external_id.clone())
                    .unwrap_or_default();
                self.zones.broadcast_sync_event(&external_id, 0, &members).await;
                (
                    name,
                    CommandResult::Wrapped(json!({ "group": external_id, "changed": result.changed })),
                )
            }
        }
    }

    async fn handle_grouped_volume(&self, token: &str, csv: &str) -> (String, CommandResult) {
        let name = "volume".to_string();
        let members = parse_csv_players(csv);
        if members.is_empty() {
            return (name, CommandResult::empty());
        }
        let deltas: Vec<Value> = futures::future::join_all(members.iter().map(|&id| {
            let zones = self.zones.clone();
            let token = token.to_string();
            async move {
                let current = zones.zone_volume(id).await.unwrap_or(0) as i32;
                let target = match token.as_str() {
                    "plus" => current + 5,
                    "minus" => current - 5,
                    _ => token.parse().unwrap_or(current),
                };
                let applied = zones.dispatch_absolute_volume(id, target).await.ok();
                json!({ "id": id.0, "volume": applied })
            }
        }))
        .await;
        (name, CommandResult::Wrapped(json!(deltas)))
    }

    async fn handle_grouped_transport(&self, verb: &str, csv: &str) -> (String, CommandResult) {
        let members = parse_csv_players(csv);
        for &id in &members {
            let _ = self.zones.send_command_to_zone(id, verb, CommandParam::None).await;
        }
        (verb.to_string(), CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_alert(&self, alert_type: &str, rest: &[&str]) -> (String, CommandResult) {
        let name = alert_type.to_string();
        let Some(kind) = alert::AlertType::parse(alert_type) else {
            return (name, CommandResult::empty());
        };

        if rest.first() == Some(&"off") {
            let csv = rest.get(1).copied().unwrap_or("");
            let members = parse_csv_players(csv);
            let response = self.alerts.stop(kind, &members).await;
            return (name, CommandResult::Wrapped(alert_response_json(&response)));
        }

        let Some(first) = rest.first() else {
            return (name, CommandResult::Wrapped(json!({ "skipped": [["*", "no-targets"]] })));
        };
        // The MiniServer attaches alert options to the target list with a
        // literal `?`, e.g. `1,2?q&<base64>`, rather than as a separate
        // path segment; fall back to a slash-separated segment for callers
        // that split it out ahead of time.
        let (csv, inline_opts) = match first.split_once('?') {
            Some((csv, opts)) => (csv, Some(opts)),
            None => (*first, None),
        };
        let members = parse_csv_players(csv);
        let opts_raw = inline_opts.unwrap_or_else(|| rest.get(1).copied().unwrap_or(""));
        let opts = alert::parse_opts(opts_raw, |encoded| {
            decode_b64_urlsafe(encoded).and_then(|b| String::from_utf8(b).ok())
        });

        let media_url = if kind == alert::AlertType::Tts {
            let (lang, text) = alert::parse_tts_payload(opts_raw);
            format!("tts://{lang}/{text}")
        } else {
            format!("media://alert/{alert_type}")
        };

        let response = self.alerts.start(kind, &members, opts, &media_url).await;
        (name, CommandResult::Wrapped(alert_response_json(&response)))
    }

    async fn handle_status(&self, zone: &str) -> (String, CommandResult) {
        let name = "status".to_string();
        let Some(id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        let statuses = self.zones.get_zone_statuses().await;
        match statuses.into_iter().find(|z| z.id == id) {
            Some(status) => (name, CommandResult::Wrapped(json!(status))),
            None => (name, CommandResult::empty()),
        }
    }

    async fn handle_getqueue(&self, zone: &str) -> (String, CommandResult) {
        let name = "getqueue".to_string();
        match parse_zone(zone) {
            Some(id) => {
                let items = self.zones.queue_items(id).await.unwrap_or_default();
                let items: Vec<Value> = items
                    .iter()
                    .map(|i| json!({ "audiopath": i.audiopath, "title": i.title }))
                    .collect();
                (name, CommandResult::Wrapped(json!({ "items": items })))
            }
            None => (name, CommandResult::empty()),
        }
    }

    async fn handle_recent(&self, zone: &str, rest: &[&str]) -> (String, CommandResult) {
        let name = "recent".to_string();
        let Some(_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        if rest.first() == Some(&"clear") {
            self.provider.clear_recent();
            return (name, CommandResult::Wrapped(Value::Bool(true)));
        }
        let (off, lim) = pagination(rest.first().copied(), rest.get(1).copied(), 10);
        (name, CommandResult::Wrapped(json!(self.provider.recent(off, lim))))
    }

    async fn handle_serviceplay(&self, zone: &str, service: &str, user: &str, id: &str) -> (String, CommandResult) {
        let name = "serviceplay".to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        let resolved = self.provider.resolve_station(service, user, id);
        let payload = json!({ "url": resolved.audiopath }).to_string();
        let _ = self
            .zones
            .send_command_to_zone(zone_id, "serviceplay", CommandParam::one(payload))
            .await;
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_playlist_play(&self, zone: &str, path: &str, item: Option<&str>) -> (String, CommandResult) {
        let name = "play".to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        let resolved = self.provider.resolve_playlist(path, item);
        let payload = json!({ "url": resolved.audiopath }).to_string();
        let _ = self
            .zones
            .send_command_to_zone(zone_id, "playlistplay", CommandParam::one(payload))
            .await;
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    /// Redirects to an existing queue position when the requested track is
    /// already queued, instead of starting a new playlist from scratch.
    async fn handle_library_play(&self, zone: &str, id: &str, rest: &[&str]) -> (String, CommandResult) {
        let name = "play".to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };

        if let Some(qindex) = self.zones.queue_index_of(zone_id, id).await {
            let _ = self
                .zones
                .send_command_to_zone(
                    zone_id,
                    "queue",
                    CommandParam::Many(vec!["play".to_string(), qindex.to_string()]),
                )
                .await;
            return (name, CommandResult::Wrapped(Value::Bool(true)));
        }

        let shuffle = rest.iter().position(|s| *s == "shuffle").map(|_| true);
        let parent = rest
            .iter()
            .position(|s| *s == "parentid")
            .and_then(|i| rest.get(i + 1))
            .map(|s| s.to_string());
        let resolved = self.provider.resolve_media_item(id, parent.as_deref(), shuffle);
        let payload = json!({ "url": resolved.audiopath }).to_string();
        let _ = self
            .zones
            .send_command_to_zone(zone_id, "playlistplay", CommandParam::one(payload))
            .await;
        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_playurl(&self, zone: &str, uri: &str) -> (String, CommandResult) {
        self.handle_library_play(zone, uri, &[]).await
    }

    async fn handle_roomfav_play(
        &self,
        zone: &str,
        fid: &str,
        _provider_name: &str,
        rest: &[&str],
    ) -> (String, CommandResult) {
        let name = "play".to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };
        let Some(fav) = self.favorites.get(fid).await else {
            return (name, CommandResult::empty());
        };
        let shuffle = rest.contains(&"shuffle");
        let fade = rest.contains(&"fade");
        let payload = json!({ "url": fav.audiopath, "shuffle": shuffle }).to_string();

        if fade {
            let target = self.zones.zone_volume(zone_id).await.unwrap_or(0) as i32;
            let _ = self.zones.dispatch_absolute_volume(zone_id, 0).await;
            let _ = self
                .zones
                .send_command_to_zone(zone_id, "playlistplay", CommandParam::one(payload))
                .await;
            let zones = self.zones.clone();
            self.fade
                .schedule_fade(
                    format!("roomfav:{zone_id}"),
                    0,
                    target,
                    ROOMFAV_FADE_DURATION_MS,
                    move |v| {
                        let zones = zones.clone();
                        async move {
                            if let Err(e) = zones.dispatch_absolute_volume(zone_id, v as i32).await {
                                warn!(zone = zone_id.0, error = %e, "roomfav fade-in step failed");
                            }
                        }
                    },
                    None::<fn() -> std::future::Ready<()>>,
                )
                .await;
        } else {
            let _ = self
                .zones
                .send_command_to_zone(zone_id, "playlistplay", CommandParam::one(payload))
                .await;
        }

        (name, CommandResult::Wrapped(Value::Bool(true)))
    }

    async fn handle_mastervolume(&self, zone: &str, v: &str) -> (String, CommandResult) {
        let name = "mastervolume".to_string();
        let (Some(leader), Ok(target)) = (parse_zone(zone), v.parse::<i32>()) else {
            return (name, CommandResult::empty());
        };
        let members = {
            let guard = self.groups.read().await;
            guard.get_group_by_leader(leader).map(|g| g.members.clone())
        };
        let Some(members) = members else {
            return (name, CommandResult::empty());
        };
        let (updates, skipped) = self.zones.apply_master_volume_to_members(&members, target).await;
        let external_id = self
            .groups
            .read()
            .await
            .get_group_by_leader(leader)
            .map(|g| g.external_id.clone())
            .unwrap_or_default();
        (
            name,
            CommandResult::Wrapped(json!({
                "group": external_id,
                "target": target.clamp(0, 100),
                "updated": updates.iter().map(|(id, v)| json!({ "id": id.0, "volume": v })).collect::<Vec<_>>(),
                "skipped": skipped.iter().map(|(id, r)| json!([id.0, r])).collect::<Vec<_>>(),
            })),
        )
    }

    async fn handle_zone_verb(&self, zone: &str, verb: &str, rest: &[&str]) -> (String, CommandResult) {
        let name = verb.to_string();
        let Some(zone_id) = parse_zone(zone) else {
            return (name, CommandResult::empty());
        };

        let param = match rest.len() {
            0 => CommandParam::None,
            1 => CommandParam::one(rest[0].to_string()),
            _ => CommandParam::Many(rest.iter().map(|s| s.to_string()).collect()),
        };

        match self.zones.send_command_to_zone(zone_id, verb, param).await {
            Ok(()) => {
                if verb == "volume" {
                    if let Ok(delta) = rest.first().map(|s| s.parse::<i32>()).transpose() {
                        if let Some(delta) = delta {
                            let current = self.zones.zone_volume(zone_id).await.unwrap_or(0) as i32;
                            let _ = self
                                .zones
                                .update_zone_player_status(
                                    zone_id,
                                    ZoneStatusPartial {
                                        volume: Some((current + delta).clamp(0, 100) as u8),
                                        ..Default::default()
                                    },
                                )
                                .await;
                        }
                    }
                }
                (name, CommandResult::Wrapped(Value::Bool(true)))
            }
            Err(e) => {
                warn!(zone = zone_id.0, error = %e, "command dispatch failed");
                (name, CommandResult::empty())
            }
        }
    }
}

fn favorites_json(items: &[RoomFavorite]) -> Vec<Value> {
    items
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "provider": f.provider,
                "title": f.title,
                "audiopath": f.audiopath,
                "coverurl": f.coverurl,
            })
        })
        .collect()
}

fn alert_response_json(response: &alert::AlertResponse) -> Value {
    json!({
        "succeeded": response.succeeded.iter().map(|id| id.0).collect::<Vec<_>>(),
        "skipped": response
            .skipped
            .iter()
            .map(|(id, reason)| json!([id.0, reason.as_str()]))
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    fn build_dispatcher() -> Dispatcher {
        let bus = create_bus();
        let zones = Arc::new(ZoneRegistry::new(bus));
        Dispatcher {
            zones: zones.clone(),
            groups: Arc::new(RwLock::new(GroupTracker::new())),
            alerts: Arc::new(AlertController::new(zones.clone(), Arc::new(FadeController::new()))),
            fade: Arc::new(FadeController::new()),
            config: Arc::new(ConfigOrchestrator::new(zones)),
            provider: Arc::new(crate::provider::NullProvider::new()),
            favorites: Arc::new(FavoritesStore::new()),
        }
    }

    #[tokio::test]
    async fn unknown_command_echoes_last_alphabetic_segment() {
        let dispatcher = build_dispatcher();
        let line = dispatcher.dispatch("foo/bar/baz").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["baz_result"], json!([]));
        assert_eq!(value["command"], "foo/bar/baz");
    }

    #[tokio::test]
    async fn secure_info_pairing_is_raw_not_wrapped() {
        let dispatcher = build_dispatcher();
        let line = dispatcher.dispatch("secure/info/pairing").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["error"], -84);
        assert!(value.get("command").is_none());
    }

    #[tokio::test]
    async fn response_contains_result_and_command_keys() {
        let dispatcher = build_dispatcher();
        let line = dispatcher.dispatch("audio/cfg/miniservertime").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["miniservertime_result"], true);
        assert_eq!(value["command"], "audio/cfg/miniservertime");
    }

    fn encode_payload(value: &Value) -> String {
        BASE64_STANDARD.encode(value.to_string())
    }

    async fn seed_zone(dispatcher: &Dispatcher, id: u32) {
        let raw = json!({
            "macID": "504F94FF1BB3",
            "players": [{"playerid": id, "ip": "10.0.0.1"}],
        });
        dispatcher.dispatch(&format!("audio/cfg/setconfig/{}", encode_payload(&raw))).await;
    }

    #[tokio::test]
    async fn cfg_volumes_persists_presets_onto_the_zone() {
        let dispatcher = build_dispatcher();
        seed_zone(&dispatcher, 1).await;
        let payload = json!([{ "id": 1, "max": 70, "alarm": 60 }]);
        let line = dispatcher
            .dispatch(&format!("audio/cfg/volumes/{}", encode_payload(&payload)))
            .await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["volumes_result"], true);
        let presets = dispatcher.zones.zone_volumes(PlayerId(1)).await.unwrap();
        assert_eq!(presets.max, Some(70));
        assert_eq!(presets.alarm, Some(60));
    }

    #[tokio::test]
    async fn cfg_maxvolume_sets_only_the_max_field() {
        let dispatcher = build_dispatcher();
        seed_zone(&dispatcher, 1).await;
        let line = dispatcher.dispatch("audio/cfg/maxvolume/1/55").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["maxvolume_result"], true);
        let presets = dispatcher.zones.zone_volumes(PlayerId(1)).await.unwrap();
        assert_eq!(presets.max, Some(55));
        assert_eq!(presets.alarm, None);
    }

    #[tokio::test]
    async fn cfg_eventvolumes_sets_alert_presets() {
        let dispatcher = build_dispatcher();
        seed_zone(&dispatcher, 1).await;
        let payload = json!({ "fire": 90, "bell": 40 });
        let line = dispatcher
            .dispatch(&format!("audio/cfg/eventvolumes/1/{}", encode_payload(&payload)))
            .await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["eventvolumes_result"], true);
        let presets = dispatcher.zones.zone_volumes(PlayerId(1)).await.unwrap();
        assert_eq!(presets.fire, Some(90));
        assert_eq!(presets.bell, Some(40));
    }

    #[tokio::test]
    async fn cfg_playername_renames_the_zone() {
        let dispatcher = build_dispatcher();
        seed_zone(&dispatcher, 1).await;
        let payload = json!([{ "id": 1, "name": "Kitchen" }]);
        let line = dispatcher
            .dispatch(&format!("audio/cfg/playername/{}", encode_payload(&payload)))
            .await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["playername_result"], true);
        let statuses = dispatcher.zones.get_zone_statuses().await;
        let zone = statuses.iter().find(|z| z.id == PlayerId(1)).unwrap();
        assert_eq!(zone.name, "Kitchen");
    }

    #[tokio::test]
    async fn roomfav_play_with_fade_schedules_a_fade_in() {
        let dispatcher = build_dispatcher();
        seed_zone(&dispatcher, 1).await;
        dispatcher
            .favorites
            .add(RoomFavorite {
                id: "1".to_string(),
                zone: PlayerId(1),
                provider: "local".to_string(),
                title: "Stream".to_string(),
                audiopath: "http://example.test/stream".to_string(),
                coverurl: None,
                position: 0,
            })
            .await;
        let line = dispatcher.dispatch("audio/1/roomfav/play/1/local/fade").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["play_result"], true);
    }

    #[tokio::test]
    async fn grouped_alert_with_unknown_zones_reports_skips_not_a_parse_failure() {
        // Targets attach inline options with a literal `?`, not a slash
        // segment; regression test for swallowing every member after the
        // first once a `?q&...` suffix lands in the same segment as the csv.
        let dispatcher = build_dispatcher();
        let line = dispatcher.dispatch("audio/grouped/alarm/1,2?q&ZmFkaW5nPTE").await;
        let value: Value = serde_json::from_str(&line).unwrap();
        let skipped = value["alarm_result"]["skipped"].as_array().unwrap();
        let skipped_ids: Vec<u64> = skipped.iter().map(|s| s[0].as_u64().unwrap()).collect();
        assert_eq!(skipped_ids, vec![1, 2]);
    }
}
