//! Periodic `hw_event` emitter for the AudioServer core and every
//! extension, with a 24 h uptime reset. Runs as a background task,
//! cancelled on shutdown.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::SharedBus;

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const UPTIME_RESET: Duration = Duration::from_secs(24 * 60 * 60);

const CORE_EVENT_IDS: [(u32, i64); 7] = [
    (2005, 1),
    (2100, 1),
    (2101, 1),
    (2102, 1),
    (2103, 1),
    (2105, -1), // sentinel: replaced with uptime seconds
    (2106, 1),
];

fn core_entries(mac_id: &str, uptime_secs: u64) -> Vec<Value> {
    CORE_EVENT_IDS
        .iter()
        .map(|(event_id, fixed)| {
            let value = if *event_id == 2105 { uptime_secs as i64 } else { *fixed };
            json!({ "client_id": format!("{mac_id}#1"), "event_id": event_id, "value": value })
        })
        .collect()
}

fn extension_entries(extension_mac_id: &str, uptime_secs: u64) -> Vec<Value> {
    let mut entries = Vec::with_capacity(12);
    for channel in 1..=2 {
        for event_id in 2100..=2105 {
            let value = match event_id {
                2104 => 1,
                2105 => uptime_secs as i64,
                _ => 1,
            };
            entries.push(json!({
                "client_id": format!("{extension_mac_id}#{channel}"),
                "event_id": event_id,
                "value": value,
            }));
        }
    }
    entries
}

pub struct HeartbeatEmitter {
    bus: SharedBus,
}

impl HeartbeatEmitter {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }

    /// Runs until `shutdown` is cancelled. Emits immediately on start, then
    /// every `TICK_INTERVAL`. `extension_mac_ids` is read fresh each tick so
    /// newly-paired extensions are picked up without a restart.
    pub async fn run(
        &self,
        mac_id: impl Fn() -> String + Send + Sync,
        extension_mac_ids: impl Fn() -> Vec<String> + Send + Sync,
        shutdown: CancellationToken,
    ) {
        let started = Instant::now();
        loop {
            let uptime = started.elapsed();
            let uptime_secs = uptime.as_secs() % UPTIME_RESET.as_secs();

            let core_mac = mac_id();
            let mut entries = core_entries(&core_mac, uptime_secs);
            for ext in extension_mac_ids() {
                entries.extend(extension_entries(&ext, uptime_secs));
            }

            let payload = json!({ "hw_event": entries });
            match serde_json::to_string(&payload) {
                Ok(line) => self.bus.broadcast(line).await,
                Err(e) => info!(error = %e, "failed to serialise heartbeat"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
            }
        }
    }
}
