//! Signaling wire messages
//!
//! The two tagged enums that cross the per-connection message channel:
//! [`ClientMessage`] inbound from a participant, [`ServerMessage`] outbound
//! from the coordinator. Serialized as `{"type": ..., "payload": ...}` so
//! an embedding WebSocket (or any reliable ordered channel) can carry them
//! as JSON text frames.

use serde::{Deserialize, Serialize};

use crate::registry::{ParticipantInfo, SourceId};
use crate::transport::{IceCandidate, SessionDescription};

/// Message from a participant to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Join the audience for a source
    #[serde(rename_all = "camelCase")]
    Subscribe {
        source_id: SourceId,
        #[serde(default)]
        info: ParticipantInfo,
    },

    /// Leave the audience for a source
    #[serde(rename_all = "camelCase")]
    Unsubscribe { source_id: SourceId },

    /// Declare self live as the source for an identifier
    #[serde(rename_all = "camelCase")]
    AnnounceStart {
        source_id: SourceId,
        #[serde(default)]
        info: ParticipantInfo,
    },

    /// Declare self stopped
    AnnounceStop,

    /// Source uplink offer
    Offer { description: SessionDescription },

    /// Listener answer to a downlink offer
    Answer { description: SessionDescription },

    /// Trickled ICE candidate for the caller's session
    IceCandidate { candidate: IceCandidate },
}

impl ClientMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Subscribe { .. } => "subscribe",
            ClientMessage::Unsubscribe { .. } => "unsubscribe",
            ClientMessage::AnnounceStart { .. } => "announceStart",
            ClientMessage::AnnounceStop => "announceStop",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "iceCandidate",
        }
    }
}

/// Message from the coordinator to a participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Subscription acknowledged, with the current audience size
    #[serde(rename_all = "camelCase")]
    SubscriptionConfirmed {
        source_id: SourceId,
        listener_count: usize,
    },

    /// Announce acknowledged
    #[serde(rename_all = "camelCase")]
    AnnounceConfirmed { source_id: SourceId },

    /// The source a listener is subscribed to went live
    #[serde(rename_all = "camelCase")]
    SourceAvailable {
        source_id: SourceId,
        #[serde(default)]
        info: ParticipantInfo,
    },

    /// The source a listener is subscribed to stopped or disconnected
    #[serde(rename_all = "camelCase")]
    SourceEnded { source_id: SourceId },

    /// Offer for a freshly created relay session
    #[serde(rename_all = "camelCase")]
    DownlinkOffer {
        source_id: SourceId,
        description: SessionDescription,
    },

    /// Answer to a source's uplink offer
    UplinkAnswer { description: SessionDescription },

    /// Trickled ICE candidate from the participant's session
    IceCandidate { candidate: IceCandidate },

    /// An operation for this participant failed
    ErrorNotice { message: String },
}

impl ServerMessage {
    /// Message name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::SubscriptionConfirmed { .. } => "subscriptionConfirmed",
            ServerMessage::AnnounceConfirmed { .. } => "announceConfirmed",
            ServerMessage::SourceAvailable { .. } => "sourceAvailable",
            ServerMessage::SourceEnded { .. } => "sourceEnded",
            ServerMessage::DownlinkOffer { .. } => "downlinkOffer",
            ServerMessage::UplinkAnswer { .. } => "uplinkAnswer",
            ServerMessage::IceCandidate { .. } => "iceCandidate",
            ServerMessage::ErrorNotice { .. } => "errorNotice",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::Subscribe {
            source_id: SourceId::new("s1"),
            info: ParticipantInfo::named("supervisor"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["payload"]["sourceId"], "s1");
        assert_eq!(json["payload"]["info"]["display_name"], "supervisor");

        let back: ClientMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), "subscribe");
    }

    #[test]
    fn test_subscribe_info_is_optional() {
        let json = serde_json::json!({
            "type": "subscribe",
            "payload": { "sourceId": "s1" }
        });
        let msg: ClientMessage = serde_json::from_value(json).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { .. }));
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::SubscriptionConfirmed {
            source_id: SourceId::new("s1"),
            listener_count: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscriptionConfirmed");
        assert_eq!(json["payload"]["listenerCount"], 3);
    }

    #[test]
    fn test_malformed_message_is_an_error_not_a_panic() {
        let json = serde_json::json!({ "type": "subscribe", "payload": {} });
        assert!(serde_json::from_value::<ClientMessage>(json).is_err());
    }
}
