//! # codec
//!
//! why: segments hold opaque bytes, the engine works with typed payloads
//! relations: used by accessor.rs to encode appends and decode replayed entries
//! what: PayloadCodec trait and a serde_json implementation

use bytes::Bytes;
use ledger_core::LedgerError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts payloads to and from segment entry bytes
pub trait PayloadCodec<T>: Send + Sync {
    fn encode(&self, payload: &T) -> Result<Bytes, LedgerError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, LedgerError>;
}

/// JSON encoding for any serde payload
pub struct JsonCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, payload: &T) -> Result<Bytes, LedgerError> {
        serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(|e| LedgerError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_rejects_garbage() {
        let codec = JsonCodec::<Vec<u32>>::new();
        let encoded = codec.encode(&vec![1, 2, 3]).unwrap();

        assert_eq!(codec.decode(&encoded).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            codec.decode(b"{not json"),
            Err(LedgerError::Codec(_))
        ));
    }
}
