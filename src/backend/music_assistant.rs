//! Music Assistant backend. Talks to the MA HTTP API; the exact wire shape
//! is not load-bearing for the bridge, only the capability contract is.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use super::{Backend, BackendKind, CommandParam, DiscoveredPlayer};
use crate::error::{BridgeError, Result};
use crate::zone::PlayerId;

pub struct MusicAssistantBackend {
    endpoint: String,
    player_id: Option<String>,
    client: Client,
}

impl MusicAssistantBackend {
    pub fn new(endpoint: String, player_id: Option<String>) -> Self {
        Self {
            endpoint,
            player_id,
            client: Client::new(),
        }
    }

    fn require_player_id(&self) -> Result<&str> {
        self.player_id.as_deref().ok_or_else(|| {
            BridgeError::ZoneNotConfigured(PlayerId(0), "maPlayerId missing".into())
        })
    }

    fn rpc_url(&self, path: &str) -> String {
        format!("http://{}/{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Backend for MusicAssistantBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MusicAssistant
    }

    async fn initialize(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(BridgeError::BackendUnreachable(
                PlayerId(0),
                "no endpoint configured".into(),
            ));
        }
        self.client
            .get(self.rpc_url("api/info"))
            .send()
            .await
            .map_err(|e| BridgeError::BackendUnreachable(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    async fn send_command(&self, command: &str, param: CommandParam) -> Result<()> {
        let player_id = self.require_player_id()?;
        let payload = match param {
            CommandParam::None => json!({ "player_id": player_id, "command": command }),
            CommandParam::One(v) => {
                json!({ "player_id": player_id, "command": command, "param": v })
            }
            CommandParam::Many(v) => {
                json!({ "player_id": player_id, "command": command, "params": v })
            }
        };
        self.client
            .post(self.rpc_url("api/command"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::DispatchFailed(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    async fn send_group_command(
        &self,
        command: &str,
        group_type: &str,
        leader: &str,
        others: &[String],
    ) -> Result<()> {
        let payload = json!({
            "command": command,
            "type": group_type,
            "leader": leader,
            "members": others,
        });
        self.client
            .post(self.rpc_url("api/group_command"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::DispatchFailed(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    async fn announce(&self, url: &str) -> Result<()> {
        let player_id = self.require_player_id()?;
        // MA's announce API only ever takes a bare url, nothing richer.
        let payload = json!({ "player_id": player_id, "url": url });
        self.client
            .post(self.rpc_url("api/announce"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::DispatchFailed(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    fn supports_announce(&self) -> bool {
        true
    }

    async fn cleanup(&self) {}
}

pub async fn discover(host: &str) -> Result<Vec<DiscoveredPlayer>> {
    let client = Client::new();
    let url = format!("http://{}/api/players", host.trim_end_matches('/'));
    let resp = client.get(&url).send().await;
    match resp {
        Ok(r) => r.json::<Vec<DiscoveredPlayer>>().await.or_else(|e| {
            warn!(error = %e, "music assistant discovery returned unexpected shape");
            Ok(Vec::new())
        }),
        Err(e) => {
            warn!(error = %e, "music assistant discovery failed");
            Ok(Vec::new())
        }
    }
}
