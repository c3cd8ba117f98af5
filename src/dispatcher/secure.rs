//! Secure handshake stub. No cryptographic verification occurs; every
//! response here is a fixed constant, matching a cosmetic echo of the real
//! AudioServer's pairing handshake.

use serde_json::{json, Value};

const SESSION_TOKEN: &str = "8WahwAfULwEQce9Yu0qIE9L7QMkXFHbi0M9ch9vKcgYArPPojXHpSiNcq0fT3lqL";

pub fn info_pairing(mac: &str) -> Value {
    json!({ "error": -84, "master": mac, "peers": [] })
}

pub fn hello(public_key: &str) -> Value {
    json!({ "error": 0, "public_key": public_key })
}

pub fn authenticate() -> Value {
    Value::String("authentication successful".to_string())
}

pub fn init() -> Value {
    json!({
        "error": 0,
        "session_token": SESSION_TOKEN,
        "token_type": "Bearer",
        "validUntil": 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_pairing_echoes_master_mac() {
        let v = info_pairing("504F94FF1BB3");
        assert_eq!(v["master"], "504F94FF1BB3");
        assert_eq!(v["error"], -84);
    }

    #[test]
    fn hello_echoes_public_key() {
        let v = hello("pub-key-xyz");
        assert_eq!(v["public_key"], "pub-key-xyz");
    }
}
