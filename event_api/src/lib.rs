pub mod event;
pub mod source;

pub use event::{Device, Event, Hostname, Interface, Pool};
pub use source::{Emitter, EventSource, SourceArg, SourceFactory, SourceInit, Teardown};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kind of envelope used in the JSON protocol.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Request,
    Response,
    Event,
}

/// Standard RPC style error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Top level envelope exchanged between the daemon and its clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub id: Option<String>,
    pub kind: Kind,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    pub topic: Option<String>,
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: Kind::Request,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
            topic: None,
            payload: None,
        }
    }

    pub fn response(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            kind: Kind::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
            topic: None,
            payload: None,
        }
    }

    pub fn error(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: Kind::Response,
            method: None,
            params: None,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            topic: None,
            payload: None,
        }
    }

    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            kind: Kind::Event,
            method: None,
            params: None,
            result: None,
            error: None,
            topic: Some(topic.into()),
            payload: Some(payload),
        }
    }

    /// Acknowledgement used for requests without a meaningful result.
    pub fn ok(id: Option<String>) -> Self {
        Self::response(id, json!({"ok": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_carries_topic_and_payload() {
        let event = Event::DeviceDetached(Device::new("ada0", "Device ada0 detached"));
        let env = Envelope::event("system.device", serde_json::to_value(&event).unwrap());
        let s = serde_json::to_string(&env).unwrap();
        let v: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["kind"], "event");
        assert_eq!(v["topic"], "system.device");
        assert_eq!(v["payload"]["event_type"], "system.device.detached");
        assert_eq!(v["payload"]["fields"]["path"], "/dev/ada0");
        let de: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(env, de);
    }

    #[test]
    fn error_envelope_has_no_result() {
        let env = Envelope::error(Some("7".into()), -32601, "unknown method x");
        assert_eq!(env.kind, Kind::Response);
        assert!(env.result.is_none());
        assert_eq!(env.error.unwrap().code, -32601);
    }
}
