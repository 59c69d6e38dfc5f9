//! PayloadCodec - Task と payload bytes の相互変換 (JSON)

use super::task::Task;
use crate::domain::TaskName;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode payload for {name}: {source}")]
    Encode {
        name: TaskName,
        source: serde_json::Error,
    },

    #[error("decode payload for {name}: {source}")]
    Decode {
        name: TaskName,
        source: serde_json::Error,
    },
}

/// PayloadCodec は T を bytes に、bytes を T に変換する
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(task).map_err(|source| CodecError::Encode {
            name: T::task_name(),
            source,
        })
    }

    pub fn decode<T: Task>(payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|source| CodecError::Decode {
            name: T::task_name(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::ser::Error as _;
    use serde::{Deserialize, Serialize, Serializer};

    use super::*;
    use crate::typed::task::fixtures::DeliverEmailRequest;

    #[test]
    fn decode_reconstructs_encoded_value() {
        let req = DeliverEmailRequest::sample();
        let bytes = PayloadCodec::encode(&req).unwrap();
        let back: DeliverEmailRequest = PayloadCodec::decode(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn decode_error_names_the_task() {
        let err = PayloadCodec::decode::<DeliverEmailRequest>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
        assert!(err.to_string().contains("DeliverEmailRequest"));
    }

    #[derive(Debug, Deserialize)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    impl Task for Unserializable {
        const NAME: &'static str = "Unserializable";
    }

    #[test]
    fn encode_error_is_reported() {
        let err = PayloadCodec::encode(&Unserializable).unwrap_err();
        assert!(matches!(err, CodecError::Encode { ref name, .. } if name.as_str() == "Unserializable"));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Tagged {
        tags: BTreeMap<String, String>,
    }

    impl Task for Tagged {
        const NAME: &'static str = "Tagged";
    }

    #[test]
    fn missing_field_fails_to_decode() {
        let err = PayloadCodec::decode::<Tagged>(br#"{"labels":{}}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
