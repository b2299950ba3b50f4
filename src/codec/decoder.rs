//! Server message decoder

use crate::error::CodecError;
use crate::protocol::ServerMessage;

/// Parses inbound frames into server messages
///
/// A frame that fails to parse is counted and reported back as an error;
/// the decoder itself has no state that a bad frame could corrupt.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    frames_decoded: u64,
    malformed_frames: u64,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a text frame
    pub fn decode_text(&mut self, frame: &str) -> Result<ServerMessage, CodecError> {
        self.track(decode(frame))
    }

    /// Decode a binary frame, which must hold UTF-8 JSON
    pub fn decode_bytes(&mut self, frame: &[u8]) -> Result<ServerMessage, CodecError> {
        let result = std::str::from_utf8(frame)
            .map_err(CodecError::from)
            .and_then(decode);
        self.track(result)
    }

    fn track(
        &mut self,
        result: Result<ServerMessage, CodecError>,
    ) -> Result<ServerMessage, CodecError> {
        match &result {
            Ok(_) => self.frames_decoded += 1,
            Err(_) => self.malformed_frames += 1,
        }
        result
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            malformed_frames: self.malformed_frames,
        }
    }
}

/// Stateless decode
pub fn decode(frame: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(frame)?)
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub malformed_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_message() {
        let mut decoder = MessageDecoder::new();
        let msg = decoder
            .decode_text(r#"{"type":"error","message":"Not joined"}"#)
            .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                message: "Not joined".into()
            }
        );
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_malformed_frames_are_counted() {
        let mut decoder = MessageDecoder::new();

        assert!(matches!(
            decoder.decode_text("{not json"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decoder.decode_text(r#"{"type":"no_such_event"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decoder.decode_bytes(&[0xff, 0xfe, 0x00]),
            Err(CodecError::InvalidUtf8(_))
        ));

        // Decoder keeps working after bad input
        assert!(decoder.decode_bytes(br#"{"type":"show_qr"}"#).is_ok());

        let stats = decoder.stats();
        assert_eq!(stats.malformed_frames, 3);
        assert_eq!(stats.frames_decoded, 1);
    }
}
