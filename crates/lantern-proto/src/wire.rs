//! JSON message bodies exchanged inside routines.
//!
//! Inbound bodies are validated by strict deserialization: every type here
//! carries `deny_unknown_fields`, constant-valued fields are single-variant
//! enums, and anything that fails to parse is a schema violation for the
//! current routine state. The one deliberate exception is [`InitiateMsg`]:
//! the dispatcher only inspects the `initiate` property and leaves the rest
//! of the body to the selected routine.
//!
//! Outbound bodies are built by the routines themselves (`serde_json::json!`);
//! only the frames shared by every routine live here.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Routine catalogue: accepted values of the `initiate` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RoutineName {
    /// Identity attestation and directory registration
    #[serde(rename = "comeOnline")]
    ComeOnline,
    /// WebRTC SDP/ICE relay between two online peers
    #[serde(rename = "sendConnectionRequest")]
    SendConnectionRequest,
    /// Friend-request forwarding
    #[serde(rename = "sendFriendRequest")]
    SendFriendRequest,
    /// Friend-rejection forwarding
    #[serde(rename = "sendFriendRejection")]
    SendFriendRejection,
}

/// First message of every transaction, as seen by the master dispatcher.
///
/// Unknown properties are allowed here; the selected routine re-validates
/// the full body against its own entry schema.
#[derive(Debug, Deserialize)]
pub struct InitiateMsg {
    /// Which routine to instantiate
    pub initiate: RoutineName,
}

/// `{"initiate":"sendConnectionRequest","key":…}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectEntry {
    /// Constant tag (validated by deserialization)
    pub initiate: SendConnectionRequestTag,
    /// Target peer token
    pub key: String,
}

/// The literal string `"sendConnectionRequest"`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum SendConnectionRequestTag {
    /// Only accepted value
    #[serde(rename = "sendConnectionRequest")]
    SendConnectionRequest,
}

/// `{"initiate":"sendFriendRequest","key":…}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendRequestEntry {
    /// Constant tag (validated by deserialization)
    pub initiate: SendFriendRequestTag,
    /// Target peer token
    pub key: String,
}

/// The literal string `"sendFriendRequest"`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum SendFriendRequestTag {
    /// Only accepted value
    #[serde(rename = "sendFriendRequest")]
    SendFriendRequest,
}

/// `{"initiate":"sendFriendRejection","key":…}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendRejectionEntry {
    /// Constant tag (validated by deserialization)
    pub initiate: SendFriendRejectionTag,
    /// Target peer token
    pub key: String,
}

/// The literal string `"sendFriendRejection"`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum SendFriendRejectionTag {
    /// Only accepted value
    #[serde(rename = "sendFriendRejection")]
    SendFriendRejection,
}

/// `{"forward":{…}}` - the envelope used by every relayed message.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardEnvelope {
    /// The relayed body
    pub forward: ForwardBody,
}

/// Inner body of a [`ForwardEnvelope`].
///
/// The payload stays a raw [`Value`] so that it can be forwarded verbatim
/// after validation; which payload shape is acceptable depends on `kind`
/// and the routine state.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardBody {
    /// Message kind, e.g. `reject`, `acceptAndOffer`, `answer`,
    /// `ICECandidate`
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload, absent for bare kinds like `reject`
    #[serde(default)]
    pub payload: Option<Value>,
}

/// `{"type":"offer","sdp":…}` - SDP offer payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdpOffer {
    /// Constant tag `offer`
    #[serde(rename = "type")]
    pub kind: OfferTag,
    /// Session description
    pub sdp: String,
}

/// The literal string `"offer"`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum OfferTag {
    /// Only accepted value
    #[serde(rename = "offer")]
    Offer,
}

/// `{"type":"answer","sdp":…}` - SDP answer payload.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdpAnswer {
    /// Constant tag `answer`
    #[serde(rename = "type")]
    pub kind: AnswerTag,
    /// Session description
    pub sdp: String,
}

/// The literal string `"answer"`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum AnswerTag {
    /// Only accepted value
    #[serde(rename = "answer")]
    Answer,
}

/// ICE candidate payload (`RTCIceCandidateInit` shape).
///
/// An empty `candidate` string marks the end of the sender's candidates.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line; empty marks end-of-candidates
    pub candidate: String,
    /// Media-description index the candidate belongs to
    #[serde(default)]
    pub sdp_m_line_index: Option<u32>,
    /// Media-stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// ICE username fragment
    #[serde(default)]
    pub username_fragment: Option<String>,
}

/// Reply body of a friend request: `{"forward":{"type":…}}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendReplyEnvelope {
    /// The reply verdict
    pub forward: FriendReplyBody,
}

/// Inner body of a [`FriendReplyEnvelope`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FriendReplyBody {
    /// Reply verdict
    #[serde(rename = "type")]
    pub kind: FriendReplyKind,
}

/// Accepted friend-request verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FriendReplyKind {
    /// Request rejected
    #[serde(rename = "reject")]
    Reject,
    /// Request accepted
    #[serde(rename = "accept")]
    Accept,
    /// Decision deferred
    #[serde(rename = "pending")]
    Pending,
}

impl FriendReplyKind {
    /// Wire spelling of the verdict.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Accept => "accept",
            Self::Pending => "pending",
        }
    }
}

/// `{"publicKey":…}` - key submission during `comeOnline`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PublicKeyMsg {
    /// Base64 SPKI Ed25519 public key
    pub public_key: String,
}

/// `{"signature":…}` - challenge signature during `comeOnline`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureMsg {
    /// Base64 Ed25519 signature over the challenge text
    pub signature: String,
}

/// Parse a message body strictly, mapping any failure to
/// [`ProtocolError::BadMessage`] with the parser's description.
pub fn parse_strict<'de, T: Deserialize<'de>>(msg: &'de str) -> Result<T> {
    serde_json::from_str(msg).map_err(|e| ProtocolError::BadMessage(e.to_string()))
}

/// Build the canonical error frame: `{"terminate":"cancel"}`, with an
/// `error` property when a message is given.
#[must_use]
pub fn error_frame(msg: Option<&str>) -> String {
    match msg {
        None => r#"{"terminate":"cancel"}"#.to_string(),
        Some(msg) => serde_json::json!({ "terminate": "cancel", "error": msg }).to_string(),
    }
}

/// The bare done frame: `{"terminate":"done"}`.
#[must_use]
pub fn done_frame() -> String {
    r#"{"terminate":"done"}"#.to_string()
}

/// Reply sent when a client message arrives for a socket that has already
/// terminated.
pub const TRANSACTION_TERMINATED: &str = r#"{"error":"transaction has terminated"}"#;

/// Reply sent when the routine input queue is full and a user message is
/// dropped.
pub const BUFFER_OCCUPIED: &str = r#"{"error":"buffer occupied"}"#;

/// Reply sent by the connection router when a known socket's message queue
/// is full.
pub const ROUTER_BUFFER_OCCUPIED: &str = r#"{"error":"Buffer is occupied, message ignored"}"#;

/// Reply sent when a client tries to open more concurrent transactions than
/// allowed.
pub const MAX_TRANSACTIONS_REACHED: &str =
    r#"{"terminate":"cancel","error":"Max transactions reached"}"#;

/// Is this message a client cancel?
///
/// A cancel is a JSON object whose `terminate` property is `"cancel"` and
/// whose `error` property, if present, is a string. Other properties are
/// permitted.
#[must_use]
pub fn is_cancel(msg: &str) -> bool {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(msg) else {
        return false;
    };
    if obj.get("terminate").and_then(Value::as_str) != Some("cancel") {
        return false;
    }
    match obj.get("error") {
        None => true,
        Some(err) => err.is_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_shapes() {
        assert_eq!(error_frame(None), r#"{"terminate":"cancel"}"#);
        let with_msg: Value = serde_json::from_str(&error_frame(Some("Timeout"))).unwrap();
        assert_eq!(with_msg["terminate"], "cancel");
        assert_eq!(with_msg["error"], "Timeout");
    }

    #[test]
    fn cancel_detection() {
        assert!(is_cancel(r#"{"terminate":"cancel"}"#));
        assert!(is_cancel(r#"{"terminate":"cancel","error":"changed my mind"}"#));
        // Extra properties are tolerated, matching the original schema.
        assert!(is_cancel(r#"{"terminate":"cancel","note":1}"#));

        assert!(!is_cancel(r#"{"terminate":"done"}"#));
        assert!(!is_cancel(r#"{"terminate":"cancel","error":7}"#));
        assert!(!is_cancel("not json"));
        assert!(!is_cancel(r#""cancel""#));
    }

    #[test]
    fn initiate_allows_extra_properties() {
        let msg: InitiateMsg =
            parse_strict(r#"{"initiate":"sendConnectionRequest","key":"abc"}"#).unwrap();
        assert_eq!(msg.initiate, RoutineName::SendConnectionRequest);
    }

    #[test]
    fn initiate_rejects_unknown_routine() {
        assert!(parse_strict::<InitiateMsg>(r#"{"initiate":"selfDestruct"}"#).is_err());
        assert!(parse_strict::<InitiateMsg>(r#"{"key":"abc"}"#).is_err());
    }

    #[test]
    fn connect_entry_is_strict() {
        assert!(parse_strict::<ConnectEntry>(
            r#"{"initiate":"sendConnectionRequest","key":"abc"}"#
        )
        .is_ok());
        // Extra property
        assert!(parse_strict::<ConnectEntry>(
            r#"{"initiate":"sendConnectionRequest","key":"abc","extra":{}}"#
        )
        .is_err());
        // Missing key
        assert!(parse_strict::<ConnectEntry>(r#"{"initiate":"sendConnectionRequest"}"#).is_err());
        // Wrong tag
        assert!(
            parse_strict::<ConnectEntry>(r#"{"initiate":"comeOnline","key":"abc"}"#).is_err()
        );
    }

    #[test]
    fn ice_candidate_optional_fields() {
        let full: IceCandidate = parse_strict(
            r#"{"candidate":"c","sdpMLineIndex":0,"sdpMid":"0","usernameFragment":"u"}"#,
        )
        .unwrap();
        assert_eq!(full.candidate, "c");

        let sparse: IceCandidate = parse_strict(r#"{"candidate":"","sdpMLineIndex":0}"#).unwrap();
        assert!(sparse.candidate.is_empty());
        assert!(sparse.sdp_mid.is_none());

        assert!(parse_strict::<IceCandidate>(r#"{"candidate":"c","bogus":true}"#).is_err());
    }

    #[test]
    fn friend_reply_verdicts() {
        for (body, kind) in [
            (r#"{"forward":{"type":"reject"}}"#, FriendReplyKind::Reject),
            (r#"{"forward":{"type":"accept"}}"#, FriendReplyKind::Accept),
            (r#"{"forward":{"type":"pending"}}"#, FriendReplyKind::Pending),
        ] {
            let parsed: FriendReplyEnvelope = parse_strict(body).unwrap();
            assert_eq!(parsed.forward.kind, kind);
        }
        assert!(parse_strict::<FriendReplyEnvelope>(r#"{"forward":{"type":"maybe"}}"#).is_err());
        assert!(
            parse_strict::<FriendReplyEnvelope>(r#"{"forward":{"type":"reject","p":1}}"#).is_err()
        );
    }
}
