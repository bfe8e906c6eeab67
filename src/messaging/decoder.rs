use crate::db::models::PathEvent;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SERIAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("serial pattern is valid"));

/// Why a delivery could not be turned into a path event
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    #[error("routing key {0:?} is not under the path topic")]
    UnexpectedTopic(String),

    #[error("invalid device serial {0:?}")]
    InvalidSerial(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("non-finite value in field {0}")]
    NonFinite(&'static str),
}

/// Extract the device serial from a routing key such as `dataq.path.B8A44F000001`
pub fn serial_from_routing_key<'a>(routing_key: &'a str, path_topic: &str) -> Result<&'a str, DecodeError> {
    let serial = routing_key
        .strip_prefix(path_topic)
        .and_then(|rest| rest.strip_prefix('.'))
        .ok_or_else(|| DecodeError::UnexpectedTopic(routing_key.to_string()))?;

    if !SERIAL_PATTERN.is_match(serial) {
        return Err(DecodeError::InvalidSerial(serial.to_string()));
    }

    Ok(serial)
}

/// Decode a raw delivery into a path event keyed by the serial in its routing key.
///
/// A `serial` field inside the payload is ignored; the transport address is
/// authoritative.
pub fn decode(routing_key: &str, payload: &[u8], path_topic: &str) -> Result<PathEvent, DecodeError> {
    let serial = serial_from_routing_key(routing_key, path_topic)?;

    let mut event: PathEvent =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Payload(e.to_string()))?;

    for (name, value) in [
        ("birth", event.birth),
        ("timestamp", event.timestamp),
        ("dx", event.dx),
        ("dy", event.dy),
        ("age", event.age),
        ("dwell", event.dwell),
    ] {
        if !value.is_finite() {
            return Err(DecodeError::NonFinite(name));
        }
    }

    event.serial = serial.to_string();
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "dataq.path";

    fn payload() -> Vec<u8> {
        serde_json::json!({
            "class": "Human",
            "id": "7f3a",
            "birth": 1_700_000_000.5,
            "timestamp": 1_700_000_005.5,
            "dx": 300,
            "dy": -120,
            "speed": 1.4,
            "age": 5.0,
            "dwell": 0.8,
            "path": [
                {"x": 100, "y": 200, "d": 0.2},
                {"x": 400, "y": 80, "d": 0.8}
            ]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn decodes_payload_and_takes_serial_from_routing_key() {
        let event = decode("dataq.path.B8A44F3024BB", &payload(), TOPIC).unwrap();
        assert_eq!(event.serial, "B8A44F3024BB");
        assert_eq!(event.class, "Human");
        assert_eq!(event.id, "7f3a");
        assert_eq!(event.dx, 300.0);
        assert_eq!(event.dy, -120.0);
        assert_eq!(event.speed, Some(1.4));
        assert_eq!(event.path.len(), 2);
        assert_eq!(event.path[1].x, 400.0);
    }

    #[test]
    fn payload_serial_is_overridden() {
        let mut value: serde_json::Value = serde_json::from_slice(&payload()).unwrap();
        value["serial"] = serde_json::json!("SPOOFED");
        let bytes = serde_json::to_vec(&value).unwrap();

        let event = decode("dataq.path.ACCC8E000001", &bytes, TOPIC).unwrap();
        assert_eq!(event.serial, "ACCC8E000001");
    }

    #[test]
    fn rejects_foreign_topics_and_bad_serials() {
        assert_eq!(
            decode("dataq.status.ACCC8E000001", &payload(), TOPIC),
            Err(DecodeError::UnexpectedTopic("dataq.status.ACCC8E000001".to_string()))
        );
        assert_eq!(
            decode("dataq.pathology", &payload(), TOPIC),
            Err(DecodeError::UnexpectedTopic("dataq.pathology".to_string()))
        );
        assert!(matches!(
            decode("dataq.path.a.b", &payload(), TOPIC),
            Err(DecodeError::InvalidSerial(_))
        ));
        assert!(matches!(
            decode("dataq.path.", &payload(), TOPIC),
            Err(DecodeError::InvalidSerial(_))
        ));
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            decode("dataq.path.ACCC8E000001", b"{not json", TOPIC),
            Err(DecodeError::Payload(_))
        ));
        assert!(matches!(
            decode("dataq.path.ACCC8E000001", br#"{"class": "Human"}"#, TOPIC),
            Err(DecodeError::Payload(_))
        ));
    }

    #[test]
    fn optional_fields_default() {
        let bytes = br#"{"class":"Car","id":"1","birth":1.0,"timestamp":2.0,"dx":0,"dy":0,"age":1}"#;
        let event = decode("dataq.path.ACCC8E000001", bytes, TOPIC).unwrap();
        assert_eq!(event.speed, None);
        assert_eq!(event.dwell, 0.0);
        assert!(event.path.is_empty());
    }
}
