//! HMAC-SHA256 signing of outbound webhook payloads.
//!
//! The signed bytes are a canonical serialization: compact JSON with object
//! keys sorted at every depth. Receivers re-serialize the body they got the
//! same way (or verify the raw body directly, since that is what we send).

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use stagehand_types::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature on each delivery.
pub const SIGNATURE_HEADER: &str = "X-Stagehand-Signature";

/// Scheme prefix of the header value (`sha256=<hex>`).
pub const SIGNATURE_PREFIX: &str = "sha256=";

// ---------------------------------------------------------------------------
// Canonical serialization
// ---------------------------------------------------------------------------

/// Serialize `payload` as compact JSON with recursively sorted object keys.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = sort_keys(serde_json::to_value(payload)?);
    serde_json::to_vec(&value)
}

fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Sign / verify
// ---------------------------------------------------------------------------

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn sign_bytes(key: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Hex-encoded HMAC-SHA256 of the canonical form of `payload`.
pub fn sign<T: Serialize>(key: &[u8], payload: &T) -> Result<String, WebhookError> {
    let body = canonical_json(payload).map_err(|e| WebhookError::Payload(e.to_string()))?;
    sign_bytes(key, &body)
}

/// Check a signature over raw body bytes in constant time.
///
/// Accepts plain hex or the `sha256=` header form. Malformed hex is a mismatch.
pub fn verify_bytes(key: &[u8], body: &[u8], signature: &str) -> bool {
    let hex_sig = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(expected) = hex_decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Check a signature over the canonical form of `payload`.
pub fn verify<T: Serialize>(payload: &T, signature: &str, key: &[u8]) -> bool {
    match canonical_json(payload) {
        Ok(body) => verify_bytes(key, &body, signature),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &[u8] = b"stagehand-test-key";

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let payload = json!({"b": 1, "a": {"z": true, "m": [ {"y": 1, "x": 2} ]}});
        let body = canonical_json(&payload).unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"a":{"m":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_sign_is_deterministic_and_key_dependent() {
        let payload = json!({"task_id": "t-1", "kind": "agent_started"});
        let sig1 = sign(KEY, &payload).unwrap();
        let sig2 = sign(KEY, &payload).unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert_ne!(sig1, sign(b"other-key", &payload).unwrap());
    }

    #[test]
    fn test_sign_ignores_key_order() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(sign(KEY, &a).unwrap(), sign(KEY, &b).unwrap());
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let payload = json!({"task_id": "t-1"});
        let sig = sign(KEY, &payload).unwrap();
        assert!(verify(&payload, &sig, KEY));
        assert!(verify(&payload, &format!("{SIGNATURE_PREFIX}{sig}"), KEY));
    }

    #[test]
    fn test_verify_rejects_single_byte_mutation() {
        let payload = json!({"task_id": "t-1", "event": {"kind": "agent_started"}});
        let body = canonical_json(&payload).unwrap();
        let sig = sign_bytes(KEY, &body).unwrap();
        assert!(verify_bytes(KEY, &body, &sig));

        for i in 0..body.len() {
            let mut mutated = body.clone();
            mutated[i] ^= 0x01;
            assert!(!verify_bytes(KEY, &mutated, &sig), "mutation at byte {i} accepted");
        }
    }

    #[test]
    fn test_verify_rejects_wrong_key_and_garbage() {
        let payload = json!({"task_id": "t-1"});
        let sig = sign(KEY, &payload).unwrap();
        assert!(!verify(&payload, &sig, b"wrong"));
        assert!(!verify(&payload, "not-hex", KEY));
        assert!(!verify(&payload, "abc", KEY));
        assert!(!verify(&payload, "", KEY));
    }

    #[test]
    fn test_hex_roundtrip() {
        let bytes = vec![0x00, 0x0f, 0xab, 0xff];
        assert_eq!(hex_encode(&bytes), "000fabff");
        assert_eq!(hex_decode("000fabff").unwrap(), bytes);
        assert!(hex_decode("zz").is_err());
    }
}
