//! WebSocket wire messages.
//!
//! Every frame is a JSON object tagged by `type`.

use plantbridge_core::{
    BridgeError, NodeId, SecurityPolicy, SessionId, SubscriptionId, Value, VariableSnapshot,
};
use plantbridge_security::Credentials;
use serde::{Deserialize, Serialize};

/// Client → server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        certificate: Option<String>,
        #[serde(default)]
        policy: Option<String>,
    },
    Subscribe {
        nodes: Vec<NodeId>,
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
    Unsubscribe {
        subscription: SubscriptionId,
    },
    Write {
        node: NodeId,
        value: Value,
    },
    Ping,
    Close,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::ProtocolError(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Write { .. } => "write",
            Self::Ping => "ping",
            Self::Close => "close",
        }
    }
}

/// Build credentials from the fields of an `auth` message.
///
/// Exactly one of `token` and `certificate` must be present.
pub fn auth_credentials(
    token: Option<String>,
    certificate: Option<String>,
    policy: Option<String>,
) -> Result<Credentials, BridgeError> {
    let credentials = match (token, certificate) {
        (Some(token), None) => Credentials::token(token),
        (None, Some(cert)) => Credentials::certificate(cert),
        (None, None) => {
            return Err(BridgeError::ProtocolError(
                "auth requires a token or a certificate".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(BridgeError::ProtocolError(
                "auth accepts either a token or a certificate, not both".into(),
            ))
        }
    };
    match policy {
        Some(name) => {
            let policy: SecurityPolicy = name.parse().map_err(BridgeError::ProtocolError)?;
            Ok(credentials.with_policy(policy))
        }
        None => Ok(credentials),
    }
}

/// Which request an `ack` answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckFor {
    Auth,
    Subscribe,
    Unsubscribe,
    Write,
    Ping,
}

/// Server → client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Value {
        node: NodeId,
        value: Value,
        ts: i64,
    },
    Error {
        code: &'static str,
        message: String,
    },
    Ack {
        #[serde(rename = "for")]
        ack_for: AckFor,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subscription: Option<SubscriptionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
        #[serde(rename = "intervalMs", skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
}

impl ServerMessage {
    pub fn value(snapshot: &VariableSnapshot) -> Self {
        Self::Value {
            node: snapshot.node.clone(),
            value: snapshot.value.clone(),
            ts: snapshot.ts,
        }
    }

    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn ack(ack_for: AckFor) -> Self {
        Self::Ack {
            ack_for,
            session: None,
            subscription: None,
            node: None,
            interval_ms: None,
        }
    }

    pub fn auth_ack(session: SessionId) -> Self {
        Self::Ack {
            ack_for: AckFor::Auth,
            session: Some(session),
            subscription: None,
            node: None,
            interval_ms: None,
        }
    }

    pub fn subscribe_ack(subscription: SubscriptionId, interval_ms: u64) -> Self {
        Self::Ack {
            ack_for: AckFor::Subscribe,
            session: None,
            subscription: Some(subscription),
            node: None,
            interval_ms: Some(interval_ms),
        }
    }

    pub fn unsubscribe_ack(subscription: SubscriptionId) -> Self {
        Self::Ack {
            ack_for: AckFor::Unsubscribe,
            session: None,
            subscription: Some(subscription),
            node: None,
            interval_ms: None,
        }
    }

    pub fn write_ack(node: NodeId) -> Self {
        Self::Ack {
            ack_for: AckFor::Write,
            session: None,
            subscription: None,
            node: Some(node),
            interval_ms: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","code":"Internal","message":"{e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_auth_with_token() {
        let msg = ClientMessage::parse(r#"{"type":"auth","token":"s3cret"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Auth {
                token: Some("s3cret".into()),
                certificate: None,
                policy: None
            }
        );
    }

    #[test]
    fn parses_subscribe_camel_case_interval() {
        let msg = ClientMessage::parse(
            r#"{"type":"subscribe","nodes":["heaterPower","temperature"],"intervalMs":250}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe { nodes, interval_ms } => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(interval_ms, 250);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_write_with_each_value_type() {
        for (raw, expected) in [
            ("42", Value::Float(42.0)),
            ("true", Value::Bool(true)),
            (r#""auto""#, Value::Enum("auto".into())),
        ] {
            let text = format!(r#"{{"type":"write","node":"x","value":{raw}}}"#);
            match ClientMessage::parse(&text).unwrap() {
                ClientMessage::Write { value, .. } => assert_eq!(value, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn malformed_messages_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"type":"subscribe","nodes":["a"]}"#,
            r#"{"type":"launch"}"#,
            r#"{"type":"write","node":"a"}"#,
            r#"{"node":"a"}"#,
        ] {
            let err = ClientMessage::parse(text).unwrap_err();
            assert_eq!(err.code(), "ProtocolError", "accepted: {text}");
        }
    }

    #[test]
    fn auth_credentials_requires_exactly_one_secret() {
        assert!(auth_credentials(None, None, None).is_err());
        assert!(auth_credentials(Some("a".into()), Some("b".into()), None).is_err());
        let creds = auth_credentials(Some("a".into()), None, Some("sign".into())).unwrap();
        assert_eq!(creds.kind(), "token");
        assert_eq!(creds.requested_policy(), Some(SecurityPolicy::Sign));
    }

    #[test]
    fn auth_credentials_rejects_unknown_policy() {
        let err = auth_credentials(Some("a".into()), None, Some("rot13".into())).unwrap_err();
        assert_eq!(err.code(), "ProtocolError");
    }

    #[test]
    fn value_message_shape() {
        let msg = ServerMessage::value(&VariableSnapshot {
            node: "heaterPower".into(),
            value: Value::Float(42.0),
            ts: 1_700_000_000_000,
        });
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            json,
            json!({"type": "value", "node": "heaterPower", "value": 42.0, "ts": 1_700_000_000_000i64})
        );
    }

    #[test]
    fn error_message_uses_wire_code() {
        let err = BridgeError::OutOfRange {
            node: "heaterPower".into(),
            detail: "150 not in [0, 100]".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::error(&err).to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "OutOfRange");
        assert!(json["message"].as_str().unwrap().contains("150"));
    }

    #[test]
    fn acks_omit_absent_fields() {
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::write_ack("heaterPower".into()).to_json()).unwrap();
        assert_eq!(json, json!({"type": "ack", "for": "write", "node": "heaterPower"}));

        let sub = SubscriptionId::from_raw("sub_1");
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::subscribe_ack(sub, 200).to_json()).unwrap();
        assert_eq!(
            json,
            json!({"type": "ack", "for": "subscribe", "subscription": "sub_1", "intervalMs": 200})
        );

        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::ack(AckFor::Ping).to_json()).unwrap();
        assert_eq!(json, json!({"type": "ack", "for": "ping"}));
    }

    #[test]
    fn auth_and_unsubscribe_acks_carry_their_ids() {
        let session = SessionId::from_raw("sess_1");
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::auth_ack(session).to_json()).unwrap();
        assert_eq!(json, json!({"type": "ack", "for": "auth", "session": "sess_1"}));

        let sub = SubscriptionId::from_raw("sub_9");
        let json: serde_json::Value =
            serde_json::from_str(&ServerMessage::unsubscribe_ack(sub).to_json()).unwrap();
        assert_eq!(
            json,
            json!({"type": "ack", "for": "unsubscribe", "subscription": "sub_9"})
        );
    }
}
