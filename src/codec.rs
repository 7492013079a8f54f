//! Encoding of session payloads stored in the remote key-value server.
//!
//! Payloads are wrapped in a versioned JSON envelope. The on-wire format is considered an
//! implementation detail and may evolve.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Default maximum encoded payload size in bytes.
pub const DEFAULT_MAX_LENGTH: usize = 4096;

const VERSION: u8 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u8,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    v: u8,
    payload: T,
}

/// Serializes payloads to bytes and back, enforcing a size limit on the encoded form.
///
/// A `max_length` of zero disables the limit.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_length: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl Codec {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(&EnvelopeRef {
            v: VERSION,
            payload,
        })
        .map_err(|err| Error::CorruptPayload(err.to_string()))?;

        if self.max_length != 0 && bytes.len() > self.max_length {
            return Err(Error::PayloadTooLarge {
                len: bytes.len(),
                max: self.max_length,
            });
        }

        Ok(bytes)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let envelope: Envelope<T> =
            serde_json::from_slice(bytes).map_err(|err| Error::CorruptPayload(err.to_string()))?;

        if envelope.v != VERSION {
            return Err(Error::CorruptPayload(format!(
                "Unsupported session payload version: {}",
                envelope.v
            )));
        }

        Ok(envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{Value, json};

    use super::*;

    fn payload() -> HashMap<String, Value> {
        HashMap::from([
            ("user".to_string(), json!("alice")),
            ("visits".to_string(), json!(3)),
            ("roles".to_string(), json!(["admin", "staff"])),
        ])
    }

    #[test]
    fn decode_inverts_encode() {
        let codec = Codec::default();
        let bytes = codec.encode(&payload()).expect("payload encodes");
        let decoded: HashMap<String, Value> = codec.decode(&bytes).expect("payload decodes");
        assert_eq!(decoded, payload());
    }

    #[test]
    fn rejects_oversized_payload() {
        let codec = Codec::new(16);
        let err = codec.encode(&payload()).expect_err("payload is too large");
        assert!(matches!(err, Error::PayloadTooLarge { max: 16, .. }));
    }

    #[test]
    fn zero_max_length_disables_limit() {
        let codec = Codec::new(0);
        let big = HashMap::from([("blob".to_string(), json!("x".repeat(64 * 1024)))]);
        assert!(codec.encode(&big).is_ok());
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = Codec::default()
            .decode::<HashMap<String, Value>>(b"not json")
            .expect_err("garbage does not decode");
        assert!(matches!(err, Error::CorruptPayload(_)));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let err = Codec::default()
            .decode::<HashMap<String, Value>>(br#"{"v":9,"payload":{}}"#)
            .expect_err("unknown version is rejected");
        assert!(matches!(err, Error::CorruptPayload(msg) if msg.contains("version")));
    }
}
