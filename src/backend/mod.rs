//! Backend capability port.
//!
//! A backend is whatever third-party media system actually plays audio for a
//! zone. The zone registry never speaks a backend's wire protocol directly;
//! it only ever calls through this trait, so adding a new backend kind never
//! touches dispatcher or zone code.

pub mod beolink;
pub mod music_assistant;
pub mod null;
pub mod sonos;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Null,
    MusicAssistant,
    Sonos,
    Beolink,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Null => "null",
            BackendKind::MusicAssistant => "musicassistant",
            BackendKind::Sonos => "sonos",
            BackendKind::Beolink => "beolink",
        }
    }
}

/// A single transport/queue/volume command as emitted by the zone layer.
/// `param` is either a lone value or an ordered list (e.g. `queue play 6`).
#[derive(Debug, Clone)]
pub enum CommandParam {
    None,
    One(String),
    Many(Vec<String>),
}

impl CommandParam {
    pub fn one(s: impl Into<String>) -> Self {
        CommandParam::One(s.into())
    }
}

/// Enumerates a discoverable player on a backend host, used by admin
/// discovery flows; not consulted by the dispatcher at command time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPlayer {
    pub id: String,
    pub name: String,
}

/// Backend instance bound to one zone. `initialize` establishes whatever
/// session the backend needs; failure there does not panic the zone, it
/// downgrades the zone to configured-but-disconnected (see `zone` module).
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn initialize(&self) -> Result<()>;

    async fn send_command(&self, command: &str, param: CommandParam) -> Result<()>;

    async fn send_group_command(
        &self,
        command: &str,
        group_type: &str,
        leader: &str,
        others: &[String],
    ) -> Result<()>;

    /// MA-only capability for non-looping alerts; backends that don't
    /// support it return `ZoneNotConfigured` so callers can fall back.
    async fn announce(&self, _url: &str) -> Result<()> {
        Err(BridgeError::ZoneNotConfigured(
            crate::zone::PlayerId(0),
            "backend does not support announce".into(),
        ))
    }

    fn supports_announce(&self) -> bool {
        false
    }

    /// Must not fail on repeated calls.
    async fn cleanup(&self);
}

pub async fn get_players(kind: BackendKind, host: &str) -> Result<Vec<DiscoveredPlayer>> {
    match kind {
        BackendKind::Null => Ok(Vec::new()),
        BackendKind::MusicAssistant => music_assistant::discover(host).await,
        BackendKind::Sonos => sonos::discover(host).await,
        BackendKind::Beolink => beolink::discover(host).await,
    }
}

pub fn construct(kind: BackendKind, endpoint: String, ma_player_id: Option<String>) -> Box<dyn Backend> {
    match kind {
        BackendKind::Null => Box::new(null::NullBackend::new()),
        BackendKind::MusicAssistant => {
            Box::new(music_assistant::MusicAssistantBackend::new(endpoint, ma_player_id))
        }
        BackendKind::Sonos => Box::new(sonos::SonosBackend::new(endpoint)),
        BackendKind::Beolink => Box::new(beolink::BeolinkBackend::new(endpoint)),
    }
}
