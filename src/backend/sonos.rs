//! Sonos backend, reached over its local HTTP control surface.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use super::{Backend, BackendKind, CommandParam, DiscoveredPlayer};
use crate::error::{BridgeError, Result};
use crate::zone::PlayerId;

pub struct SonosBackend {
    endpoint: String,
    client: Client,
}

impl SonosBackend {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: Client::new(),
        }
    }

    fn rpc_url(&self, path: &str) -> String {
        format!("http://{}/{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl Backend for SonosBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sonos
    }

    async fn initialize(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(BridgeError::BackendUnreachable(
                PlayerId(0),
                "no endpoint configured".into(),
            ));
        }
        self.client
            .get(self.rpc_url("status"))
            .send()
            .await
            .map_err(|e| BridgeError::BackendUnreachable(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    async fn send_command(&self, command: &str, param: CommandParam) -> Result<()> {
        let payload = match param {
            CommandParam::None => json!({ "command": command }),
            CommandParam::One(v) => json!({ "command": command, "param": v }),
            CommandParam::Many(v) => json!({ "command": command, "params": v }),
        };
        self.client
            .post(self.rpc_url("command"))
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
            .post(self.rpc_url("group"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::DispatchFailed(PlayerId(0), e.to_string()))?;
        Ok(())
    }

    async fn cleanup(&self) {}
}

pub async fn discover(host: &str) -> Result<Vec<DiscoveredPlayer>> {
    let client = Client::new();
    let url = format!("http://{}/players", host.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(r) => r.json::<Vec<DiscoveredPlayer>>().await.or_else(|e| {
            warn!(error = %e, "sonos discovery returned unexpected shape");
            Ok(Vec::new())
        }),
        Err(e) => {
            warn!(error = %e, "sonos discovery failed");
            Ok(Vec::new())
        }
    }
}
