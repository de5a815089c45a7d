use crate::pipeline::Record;
use crate::{Error, Result};
use bytes::Bytes;

/// Turns a record into the wire payload for one message. Injected.
///
/// `index` is a deployment-level hint (the calling pipeline's index
/// prefix); codecs are free to ignore it.
pub trait Codec: Send + Sync {
    fn encode(&self, index: &str, record: &Record) -> Result<Bytes>;
}

/// The default codec: compact JSON of the record content.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, _index: &str, record: &Record) -> Result<Bytes> {
        serde_json::to_vec(&record.content)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_is_compact() {
        let record = Record::new(json!({"message": "hello", "level": "info"}));
        let payload = JsonCodec.encode("logs", &record).unwrap();

        let text = std::str::from_utf8(&payload).unwrap();
        assert!(text.contains("\"message\":\"hello\""));
        assert!(!text.contains('\n'));
    }
}
