//! Wire types of the Foxglove WebSocket protocol v1.
//!
//! JSON text frames carry the control plane (`serverInfo`, `advertise`,
//! `subscribe`, `unsubscribe`); sensor payloads travel as binary frames
//! framed by [`encode_message_data`].

use serde::{Deserialize, Serialize};

/// WebSocket subprotocol Studio negotiates.
pub const SUBPROTOCOL: &str = "foxglove.websocket.v1";

/// Binary frame opcode for server->client message data.
pub const OP_MESSAGE_DATA: u8 = 0x01;

pub type ChannelId = u32;
pub type SubscriptionId = u32;

/// A channel as registered by the relay and advertised to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

/// Channel registration request; the id is assigned by the server.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    pub schema: String,
    pub schema_encoding: Option<String>,
}

impl ChannelSpec {
    /// JSON-encoded channel with an empty schema, the common case here.
    pub fn json(topic: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            encoding: "json".into(),
            schema_name: schema_name.into(),
            schema: String::new(),
            schema_encoding: None,
        }
    }

    /// JSON-encoded channel with an explicit jsonschema body.
    pub fn json_with_schema(
        topic: impl Into<String>,
        schema_name: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            encoding: "json".into(),
            schema_name: schema_name.into(),
            schema: schema.into(),
            schema_encoding: Some("jsonschema".into()),
        }
    }
}

/// Server->client control messages.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    ServerInfo {
        name: String,
        capabilities: Vec<String>,
        supported_encodings: Vec<String>,
    },
    Advertise { channels: Vec<Channel> },
}

/// Client->server control messages. Unknown ops deserialize to `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe { subscriptions: Vec<Subscription> },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_ids: Vec<SubscriptionId> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: SubscriptionId,
    pub channel_id: ChannelId,
}

/// Frame a message-data payload:
/// `[op=1][u32 LE subscription id][u64 LE log time ns][payload]`.
pub fn encode_message_data(
    subscription_id: SubscriptionId,
    log_time_ns: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + 4 + 8 + payload.len());
    frame.push(OP_MESSAGE_DATA);
    frame.extend_from_slice(&subscription_id.to_le_bytes());
    frame.extend_from_slice(&log_time_ns.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_data_frame_layout() {
        let frame = encode_message_data(7, 0x0102_0304_0506_0708, b"hi");
        assert_eq!(frame[0], OP_MESSAGE_DATA);
        assert_eq!(u32::from_le_bytes(frame[1..5].try_into().unwrap()), 7);
        assert_eq!(
            u64::from_le_bytes(frame[5..13].try_into().unwrap()),
            0x0102_0304_0506_0708
        );
        assert_eq!(&frame[13..], b"hi");
    }

    #[test]
    fn advertise_uses_camel_case_keys() {
        let msg = ServerMessage::Advertise {
            channels: vec![Channel {
                id: 1,
                topic: "/tf".into(),
                encoding: "json".into(),
                schema_name: "foxglove.FrameTransforms".into(),
                schema: String::new(),
                schema_encoding: None,
            }],
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""op":"advertise""#));
        assert!(text.contains(r#""schemaName":"foxglove.FrameTransforms""#));
        assert!(!text.contains("schemaEncoding"));
    }

    #[test]
    fn parses_subscribe_and_unsubscribe() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"op":"subscribe","subscriptions":[{"id":0,"channelId":3}]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe { subscriptions } => {
                assert_eq!(subscriptions.len(), 1);
                assert_eq!(subscriptions[0].id, 0);
                assert_eq!(subscriptions[0].channel_id, 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"op":"unsubscribe","subscriptionIds":[0,1]}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Unsubscribe { subscription_ids } if subscription_ids == vec![0, 1]
        ));
    }

    #[test]
    fn unknown_client_op_is_tolerated() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"op":"getParameters","parameterNames":[]}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Other));
    }
}
