//! Alert pipeline: alarms, TTS, bell, buzzer, fire. Owns the per-zone
//! looping-vs-announce decision, the fade priming/restoration around an
//! alert, and the repeat-mode save/restore state machine. Owns no zones.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::backend::CommandParam;
use crate::fade::FadeController;
use crate::zone::{PlayerId, RepeatMode, ZoneRegistry};

#[cfg(test)]
use crate::backend::BackendKind;
#[cfg(test)]
use crate::zone::{VolumePresets, ZoneConfigEntry};

const DEFAULT_FADE_DURATION_MS: u64 = 3000;
const TTS_TEXT_MAX_LEN: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Alarm,
    FireAlarm,
    Buzzer,
    Bell,
    Tts,
}

impl AlertType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "alarm" => Some(AlertType::Alarm),
            "firealarm" => Some(AlertType::FireAlarm),
            "buzzer" => Some(AlertType::Buzzer),
            "bell" => Some(AlertType::Bell),
            "tts" => Some(AlertType::Tts),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Alarm => "alarm",
            AlertType::FireAlarm => "firealarm",
            AlertType::Buzzer => "buzzer",
            AlertType::Bell => "bell",
            AlertType::Tts => "tts",
        }
    }

    /// Looping alerts repeat until explicitly stopped; non-looping alerts
    /// (tts, bell) play once via `announce`/`serviceplay` and are expected
    /// to end on their own.
    pub fn is_looping(self) -> bool {
        matches!(self, AlertType::Alarm | AlertType::FireAlarm | AlertType::Buzzer)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertOptions {
    pub fading: bool,
    pub fade_duration_ms: Option<u64>,
}

/// Parses the `opts` payload carried after an alert command, which may be
/// a bare query string or wrapped as `q&<base64>`.
pub fn parse_opts(raw: &str, decode_b64: impl Fn(&str) -> Option<String>) -> AlertOptions {
    let query = if let Some(encoded) = raw.strip_prefix("q&") {
        decode_b64(encoded).unwrap_or_default()
    } else {
        raw.to_string()
    };

    let mut opts = AlertOptions::default();
    for pair in query.trim_start_matches('?').split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        match key {
            "fading" | "fade" => opts.fading = value.is_empty() || value == "1" || value == "true",
            "fadingTime" | "fadeTime" | "fadeDuration" => {
                if let Ok(seconds) = value.parse::<f64>() {
                    opts.fade_duration_ms = Some((seconds * 1000.0) as u64);
                }
            }
            _ => {}
        }
    }
    opts
}

fn normalise_lang(tag: &str) -> String {
    match tag.to_ascii_lowercase().as_str() {
        "nld" | "dut" => "nl".to_string(),
        "eng" => "en".to_string(),
        "deu" | "ger" => "de".to_string(),
        "ita" => "it".to_string(),
        "spa" => "es".to_string(),
        "por" => "pt".to_string(),
        "fra" | "fre" => "fr".to_string(),
        other => other.chars().take(2).collect(),
    }
}

/// Parses a TTS payload of the form `[LANG|]text`, applying language
/// aliasing and the 800-char cap with an ellipsis suffix when truncated.
pub fn parse_tts_payload(raw: &str) -> (String, String) {
    let (lang, text) = match raw.split_once('|') {
        Some((lang, text)) => (normalise_lang(lang), text),
        None => ("en".to_string(), raw),
    };

    let truncated = if text.chars().count() > TTS_TEXT_MAX_LEN {
        let mut s: String = text.chars().take(TTS_TEXT_MAX_LEN).collect();
        s.push('\u{2026}');
        s
    } else {
        text.to_string()
    };

    (lang, truncated)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    InvalidZone,
    UnknownZone,
    DispatchFailed,
    RepeatFailed,
    RepeatRestoreFailed,
    PauseFailed,
    NoTargets,
    MediaUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidZone => "invalid-zone",
            SkipReason::UnknownZone => "unknown-zone",
            SkipReason::DispatchFailed => "dispatch-failed",
            SkipReason::RepeatFailed => "repeat-failed",
            SkipReason::RepeatRestoreFailed => "repeat-restore-failed",
            SkipReason::PauseFailed => "pause-failed",
            SkipReason::NoTargets => "no-targets",
            SkipReason::MediaUnavailable => "media-unavailable",
        }
    }
}

#[derive(Debug, Default)]
pub struct AlertResponse {
    pub succeeded: Vec<PlayerId>,
    pub skipped: Vec<(PlayerId, SkipReason)>,
}

struct FadeSnapshot {
    original_volume: u8,
    fade_duration_ms: u64,
}

pub struct AlertController {
    zones: Arc<ZoneRegistry>,
    fade: Arc<FadeController>,
    loop_snapshots: Mutex<HashMap<String, RepeatMode>>,
    fade_snapshots: Mutex<HashMap<String, FadeSnapshot>>,
}

fn snapshot_key(zone: PlayerId, alert_type: AlertType) -> String {
    format!("{}:{}", zone, alert_type.as_str())
}

impl AlertController {
    pub fn new(zones: Arc<ZoneRegistry>, fade: Arc<FadeController>) -> Self {
        Self {
            zones,
            fade,
            loop_snapshots: Mutex::new(HashMap::new()),
            fade_snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(
        &self,
        alert_type: AlertType,
        targets: &[PlayerId],
        opts: AlertOptions,
        media_url: &str,
    ) -> AlertResponse {
        if targets.is_empty() {
            return AlertResponse {
                succeeded: Vec::new(),
                skipped: vec![(PlayerId(0), SkipReason::NoTargets)],
            };
        }

        let mut response = AlertResponse::default();
        for &zone_id in targets {
            match self.start_one(zone_id, alert_type, &opts, media_url).await {
                Ok(()) => response.succeeded.push(zone_id),
                Err(reason) => response.skipped.push((zone_id, reason)),
            }
        }
        response
    }

    async fn start_one(
        &self,
        zone_id: PlayerId,
        alert_type: AlertType,
        opts: &AlertOptions,
        media_url: &str,
    ) -> Result<(), SkipReason> {
        if !self.zones.zone_exists(zone_id).await {
            return Err(SkipReason::UnknownZone);
        }

        let key = snapshot_key(zone_id, alert_type);
        let current_volume = self.zones.zone_volume(zone_id).await.unwrap_or(0);

        if opts.fading {
            // Prime to 0 before playback starts so the fade-in is audible
            // from silence; backends may themselves reset volume on play.
            let _ = self.zones.dispatch_absolute_volume(zone_id, 0).await;
            self.fade_snapshots.lock().await.insert(
                key.clone(),
                FadeSnapshot {
                    original_volume: current_volume,
                    fade_duration_ms: opts.fade_duration_ms.unwrap_or(DEFAULT_FADE_DURATION_MS),
                },
            );
        }

        let use_announce = !alert_type.is_looping() && self.zones.backend_supports_announce(zone_id).await;
        let dispatch_result = if use_announce {
            self.zones.announce_to_zone(zone_id, media_url).await
        } else {
            let payload = serde_json::json!({ "url": media_url }).to_string();
            self.zones
                .send_command_to_zone(zone_id, "serviceplay", CommandParam::one(payload))
                .await
        };
        if dispatch_result.is_err() {
            self.fade_snapshots.lock().await.remove(&key);
            return Err(SkipReason::DispatchFailed);
        }

        // Re-enforce silence once playback has actually started.
        let _ = self.zones.dispatch_absolute_volume(zone_id, 0).await;

        if alert_type.is_looping() {
            let previous = self.zones.zone_repeat(zone_id).await.unwrap_or(RepeatMode::Off);
            self.loop_snapshots.lock().await.insert(key.clone(), previous);
            if self
                .zones
                .send_command_to_zone(zone_id, "repeat", CommandParam::one("track"))
                .await
                .is_err()
            {
                return Err(SkipReason::RepeatFailed);
            }
        }

        if opts.fading {
            let preset_target = self.zones.zone_volumes(zone_id).await.and_then(|presets| match alert_type {
                AlertType::Alarm => presets.alarm,
                AlertType::FireAlarm => presets.fire,
                AlertType::Buzzer => presets.buzzer,
                AlertType::Bell => presets.bell,
                AlertType::Tts => presets.tts,
            });
            let snapshot_original = self.fade_snapshots.lock().await.get(&key).map(|s| s.original_volume);
            let target = preset_target
                .or(snapshot_original)
                .unwrap_or(current_volume);
            let duration = opts.fade_duration_ms.unwrap_or(DEFAULT_FADE_DURATION_MS);
            let zones = self.zones.clone();
            self.fade
                .schedule_fade(
                    key,
                    0,
                    target as i32,
                    duration,
                    move |v| {
                        let zones = zones.clone();
                        async move {
                            if let Err(e) = zones.dispatch_absolute_volume(zone_id, v as i32).await {
                                warn!(zone = zone_id.0, error = %e, "fade-in step failed");
                            }
                        }
                    },
                    None::<fn() -> std::future::Ready<()>>,
                )
                .await;
        }

        Ok(())
    }

    pub async fn stop(&self, alert_type: AlertType, targets: &[PlayerId]) -> AlertResponse {
        let mut response = AlertResponse::default();
        for &zone_id in targets {
            match self.stop_one(zone_id, alert_type).await {
                Ok(()) => response.succeeded.push(zone_id),
                Err(reason) => response.skipped.push((zone_id, reason)),
            }
        }
        response
    }

    async fn stop_one(&self, zone_id: PlayerId, alert_type: AlertType) -> Result<(), SkipReason> {
        if !self.zones.zone_exists(zone_id).await {
            return Err(SkipReason::UnknownZone);
        }

        let key = snapshot_key(zone_id, alert_type);
        self.fade.cancel(&key).await;

        if alert_type.is_looping() {
            if let Some(previous) = self.loop_snapshots.lock().await.remove(&key) {
                let repeat_str = match previous {
                    RepeatMode::Off => "off",
                    RepeatMode::Track => "track",
                    RepeatMode::Queue => "queue",
                };
                if self
                    .zones
                    .send_command_to_zone(zone_id, "repeat", CommandParam::one(repeat_str))
                    .await
                    .is_err()
                {
                    return Err(SkipReason::RepeatRestoreFailed);
                }
            }
        }

        let fade_snapshot = self.fade_snapshots.lock().await.remove(&key);
        if let Some(snapshot) = fade_snapshot {
            let current = self.zones.zone_volume(zone_id).await.unwrap_or(0);
            let zones = self.zones.clone();
            self.fade
                .schedule_fade(
                    key,
                    current as i32,
                    0,
                    snapshot.fade_duration_ms,
                    move |v| {
                        let zones = zones.clone();
                        async move {
                            if let Err(e) = zones.dispatch_absolute_volume(zone_id, v as i32).await {
                                warn!(zone = zone_id.0, error = %e, "fade-out step failed");
                            }
                        }
                    },
                    None::<fn() -> std::future::Ready<()>>,
                )
                .await;

            if self
                .zones
                .send_command_to_zone(zone_id, "pause", CommandParam::None)
                .await
                .is_err()
            {
                return Err(SkipReason::PauseFailed);
            }

            if self
                .zones
                .dispatch_absolute_volume(zone_id, snapshot.original_volume as i32)
                .await
                .is_err()
            {
                return Err(SkipReason::DispatchFailed);
            }
        } else if self
            .zones
            .send_command_to_zone(zone_id, "pause", CommandParam::None)
            .await
            .is_err()
        {
            return Err(SkipReason::PauseFailed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tts_payload_parses_language_and_text() {
        let (lang, text) = parse_tts_payload("nld|Hallo wereld");
        assert_eq!(lang, "nl");
        assert_eq!(text, "Hallo wereld");
    }

    #[test]
    fn tts_payload_without_language_defaults_to_en() {
        let (lang, text) = parse_tts_payload("Hello there");
        assert_eq!(lang, "en");
        assert_eq!(text, "Hello there");
    }

    #[test]
    fn tts_text_is_capped_at_800_chars() {
        let long = "a".repeat(900);
        let (_, text) = parse_tts_payload(&format!("eng|{long}"));
        assert_eq!(text.chars().count(), 801);
        assert!(text.ends_with('\u{2026}'));
    }

    #[test]
    fn opts_parses_fading_flags() {
        let opts = parse_opts("?fading=1&fadingTime=2", |_| None);
        assert!(opts.fading);
        assert_eq!(opts.fade_duration_ms, Some(2000));
    }

    #[test]
    fn opts_parses_wrapped_base64_payload() {
        let opts = parse_opts("q&ZmFkaW5nPTEmZmFkZVRpbWU9NQ", |encoded| {
            assert_eq!(encoded, "ZmFkaW5nPTEmZmFkZVRpbWU9NQ");
            Some("fading=1&fadeTime=5".to_string())
        });
        assert!(opts.fading);
        assert_eq!(opts.fade_duration_ms, Some(5000));
    }

    #[test]
    fn looping_alert_types_are_classified_correctly() {
        assert!(AlertType::Alarm.is_looping());
        assert!(AlertType::FireAlarm.is_looping());
        assert!(AlertType::Buzzer.is_looping());
        assert!(!AlertType::Bell.is_looping());
        assert!(!AlertType::Tts.is_looping());
    }

    #[tokio::test]
    async fn start_with_no_targets_reports_no_targets_skip() {
        let zones = Arc::new(ZoneRegistry::new(crate::bus::create_bus()));
        let fade = Arc::new(FadeController::new());
        let controller = AlertController::new(zones, fade);

        let response = controller
            .start(AlertType::Bell, &[], AlertOptions::default(), "http://media/bell.mp3")
            .await;

        assert!(response.succeeded.is_empty());
        assert_eq!(response.skipped.len(), 1);
        assert_eq!(response.skipped[0].1.as_str(), "no-targets");
    }

    #[tokio::test]
    async fn fade_in_targets_the_alert_type_preset_not_current_volume() {
        let zones = Arc::new(ZoneRegistry::new(crate::bus::create_bus()));
        zones
            .apply_config_snapshot(vec![ZoneConfigEntry {
                id: PlayerId(1),
                uuid: "uuid-1".to_string(),
                backend: BackendKind::Null,
                ip: String::new(),
                name: None,
                ma_player_id: None,
                source: None,
                volumes: Some(VolumePresets {
                    alarm: Some(42),
                    ..Default::default()
                }),
            }])
            .await;
        let fade = Arc::new(FadeController::new());
        let controller = AlertController::new(zones.clone(), fade);

        let response = controller
            .start(
                AlertType::Alarm,
                &[PlayerId(1)],
                AlertOptions { fading: true, fade_duration_ms: Some(200) },
                "http://media/alarm.mp3",
            )
            .await;
        assert_eq!(response.succeeded, vec![PlayerId(1)]);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(zones.zone_volume(PlayerId(1)).await, Some(42));
    }
}
