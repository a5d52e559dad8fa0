//! Codec trait and the JSON implementation used on the wire.
//!
//! The session engine speaks JSON text frames, but nothing above the
//! transport needs to know that: everything encodes and decodes through
//! the [`Codec`] trait, so a binary codec can be swapped in without
//! touching the engine or the connection handler.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Converts protocol messages to and from text frames.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the frame is malformed,
    /// incomplete, or carries an unknown `type` tag.
    fn decode<T: DeserializeOwned>(&self, frame: &str) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON via `serde_json`.
///
/// Human-readable on the wire, which both SPA clients rely on.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, frame: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientMessage, ServerMessage};

    #[test]
    fn test_round_trip_client_message() {
        let codec = JsonCodec;
        let msg = ClientMessage::Ping {
            client_msg_id: Some("p1".into()),
        };
        let frame = codec.encode(&msg).unwrap();
        let back: ClientMessage = codec.decode(&frame).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_round_trip_server_message() {
        let codec = JsonCodec;
        let msg = ServerMessage::Pong;
        let frame = codec.encode(&msg).unwrap();
        let back: ServerMessage = codec.decode(&frame).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        let codec = JsonCodec;
        let result: Result<ClientMessage, _> = codec.decode("{{nope");
        assert!(result.is_err());
    }
}
