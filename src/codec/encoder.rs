//! Client message encoder

use crate::error::CodecError;
use crate::protocol::ClientMessage;

/// Serializes client messages into JSON text frames
#[derive(Debug, Default)]
pub struct MessageEncoder {
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl MessageEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a message into one text frame
    pub fn encode(&mut self, message: &ClientMessage) -> Result<String, CodecError> {
        let frame = encode(message)?;
        self.frames_encoded += 1;
        self.bytes_produced += frame.len() as u64;
        Ok(frame)
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Stateless encode
pub fn encode(message: &ClientMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(|e| CodecError::EncodingFailed(e.to_string()))
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_seek() {
        let mut encoder = MessageEncoder::new();
        let frame = encoder
            .encode(&ClientMessage::Seek {
                position_seconds: 30.0,
            })
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "seek");
        assert_eq!(value["position_seconds"], 30.0);

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, frame.len() as u64);
    }

    #[test]
    fn test_update_setting_carries_arbitrary_value() {
        let frame = encode(&ClientMessage::UpdateSetting {
            key: "anyone_can_reorder".into(),
            value: serde_json::Value::Bool(true),
        })
        .unwrap();
        assert_eq!(
            frame,
            r#"{"type":"update_setting","key":"anyone_can_reorder","value":true}"#
        );
    }
}
