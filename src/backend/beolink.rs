//! Bang & Olufsen Beolink backend, reached over its device HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use super::{Backend, BackendKind, CommandParam, DiscoveredPlayer};
use crate::error::{BridgeError, Result};
use crate::zone::PlayerId;

pub struct BeolinkBackend {
    endpoint: String,
    client: Client,
}

impl BeolinkBackend {
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
impl Backend for BeolinkBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Beolink
    }

    async fn initialize(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(BridgeError::BackendUnreachable(
                PlayerId(0),
                "no endpoint configured".into(),
            ));
        }
        self.client
            .get(self.rpc_url("BeoDevice"))
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
            .post(self.rpc_url("BeoZone/Zone/Stream/Player"))
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
            .post(self.rpc_url("BeoZone/Zone/Beolink/Group"))
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
    let url = format!("http://{}/BeoZone/Zone", host.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(r) => r.json::<Vec<DiscoveredPlayer>>().await.or_else(|e| {
            warn!(error = %e, "beolink discovery returned unexpected shape");
            Ok(Vec::new())
        }),
        Err(e) => {
            warn!(error = %e, "beolink discovery failed");
            Ok(Vec::new())
        }
    }
}
