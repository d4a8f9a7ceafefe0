//! The UDP wire protocol. Every datagram is UTF-8 text; most frames are a
//! keyword optionally followed by colon-delimited fields. The one exception
//! is the leader announcement, which is a small JSON object so the leadership
//! flag travels as a real boolean rather than stringly-typed text.

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Globally-unique identifier minted by a client per chat message. Retries of
/// the same message reuse the id; the leader dedups on it.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct MessageId(String);

impl MessageId {
    pub(crate) fn generate() -> Self {
        MessageId(format!("{:032x}", rand::thread_rng().gen::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(raw: &str) -> Self {
        MessageId(raw.to_string())
    }
}

/// Peer-to-peer leadership notification, e.g. `{"mid":"192.168.0.7:10001","isLeader":true}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaderAnnouncement {
    #[serde(rename = "mid")]
    pub member: SocketAddr,
    #[serde(rename = "isLeader")]
    pub is_leader: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatFrame {
    pub message_id: MessageId,
    pub lamport_time: u64,
    pub sender: String,
    pub text: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// Presence marker broadcast on the discovery port.
    ServiceDiscovery,
    /// Point-to-point relay telling existing peers about a newcomer.
    NewServer(SocketAddr),
    LeaderAnnouncement(LeaderAnnouncement),
    IsLeader,
    Leader,
    NotLeader,
    Heartbeat,
    HeartbeatAck,
    Register(String),
    Accepted(String),
    Rejected(String),
    Chat(ChatFrame),
    ServerAck(MessageId),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("datagram is not UTF-8")]
    NotUtf8,
    #[error("unrecognized frame: {0:?}")]
    Unrecognized(String),
    #[error("CLIENT frame has too few fields: {0:?}")]
    MissingFields(String),
    #[error("CLIENT frame timestamp is not numeric: {0:?}")]
    BadTimestamp(String),
    #[error("NEW_SERVER address is invalid: {0:?}")]
    BadPeerAddress(String),
    #[error("leader announcement is not valid JSON: {0}")]
    BadAnnouncement(#[source] serde_json::Error),
}

impl Frame {
    pub fn parse(datagram: &[u8]) -> Result<Frame, FrameError> {
        let text = std::str::from_utf8(datagram).map_err(|_| FrameError::NotUtf8)?;

        match text {
            "SERVICE_DISCOVERY" => return Ok(Frame::ServiceDiscovery),
            "IS_LEADER" => return Ok(Frame::IsLeader),
            "LEADER" => return Ok(Frame::Leader),
            "NOT_LEADER" => return Ok(Frame::NotLeader),
            "HEARTBEAT" => return Ok(Frame::Heartbeat),
            "HEARTBEAT_ACK" => return Ok(Frame::HeartbeatAck),
            _ => { /* keyword-with-fields or JSON, below */ }
        }

        if text.starts_with('{') {
            let announcement = serde_json::from_str(text).map_err(FrameError::BadAnnouncement)?;
            return Ok(Frame::LeaderAnnouncement(announcement));
        }

        let (keyword, fields) = match split_once(text, ':') {
            Some(parts) => parts,
            None => return Err(FrameError::Unrecognized(truncate_for_log(text))),
        };

        match keyword {
            "NEW_SERVER" => {
                let addr = fields
                    .parse::<SocketAddr>()
                    .map_err(|_| FrameError::BadPeerAddress(fields.to_string()))?;
                Ok(Frame::NewServer(addr))
            }
            "REGISTER" => Ok(Frame::Register(fields.to_string())),
            "ACCEPTED" => Ok(Frame::Accepted(fields.to_string())),
            "REJECTED" => Ok(Frame::Rejected(fields.to_string())),
            "SERVER_ACK" => Ok(Frame::ServerAck(MessageId::from(fields))),
            "CLIENT" => Self::parse_chat(fields, text),
            _ => Err(FrameError::Unrecognized(truncate_for_log(text))),
        }
    }

    /// `fields` is everything after `CLIENT:`, i.e. `{id}:{time}:{name}:{text}`.
    /// Only the first three colons delimit; the text may itself contain colons.
    fn parse_chat(fields: &str, whole: &str) -> Result<Frame, FrameError> {
        let mut parts = fields.splitn(4, ':');
        let message_id = parts.next();
        let timestamp = parts.next();
        let sender = parts.next();
        let text = parts.next();

        match (message_id, timestamp, sender, text) {
            (Some(id), Some(stamp), Some(sender), Some(text)) => {
                let lamport_time = stamp
                    .parse::<u64>()
                    .map_err(|_| FrameError::BadTimestamp(stamp.to_string()))?;
                Ok(Frame::Chat(ChatFrame {
                    message_id: MessageId::from(id),
                    lamport_time,
                    sender: sender.to_string(),
                    text: text.to_string(),
                }))
            }
            _ => Err(FrameError::MissingFields(truncate_for_log(whole))),
        }
    }

    pub fn encode(&self) -> Bytes {
        let text = match self {
            Frame::ServiceDiscovery => "SERVICE_DISCOVERY".to_string(),
            Frame::NewServer(addr) => format!("NEW_SERVER:{}", addr),
            Frame::LeaderAnnouncement(announcement) => {
                serde_json::to_string(announcement).expect("LeaderAnnouncement is always serializable")
            }
            Frame::IsLeader => "IS_LEADER".to_string(),
            Frame::Leader => "LEADER".to_string(),
            Frame::NotLeader => "NOT_LEADER".to_string(),
            Frame::Heartbeat => "HEARTBEAT".to_string(),
            Frame::HeartbeatAck => "HEARTBEAT_ACK".to_string(),
            Frame::Register(name) => format!("REGISTER:{}", name),
            Frame::Accepted(name) => format!("ACCEPTED:{}", name),
            Frame::Rejected(name) => format!("REJECTED:{}", name),
            Frame::Chat(chat) => format!(
                "CLIENT:{}:{}:{}:{}",
                chat.message_id, chat.lamport_time, chat.sender, chat.text
            ),
            Frame::ServerAck(message_id) => format!("SERVER_ACK:{}", message_id),
        };

        Bytes::from(text)
    }
}

/// The human-readable line fanned out to chat clients. Deliberately not a
/// `Frame`: clients print it verbatim.
pub(crate) fn chat_display_line(sender: &str, text: &str, lamport_time: u64) -> String {
    format!("{}: {} (Lamport time: {})", sender, text, lamport_time)
}

// str::split_once is not available on our MSRV.
fn split_once(text: &str, delimiter: char) -> Option<(&str, &str)> {
    let index = text.find(delimiter)?;
    Some((&text[..index], &text[index + 1..]))
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        text.to_string()
    } else {
        let mut end = LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(Frame::parse(b"SERVICE_DISCOVERY").unwrap(), Frame::ServiceDiscovery);
        assert_eq!(Frame::parse(b"IS_LEADER").unwrap(), Frame::IsLeader);
        assert_eq!(Frame::parse(b"LEADER").unwrap(), Frame::Leader);
        assert_eq!(Frame::parse(b"NOT_LEADER").unwrap(), Frame::NotLeader);
        assert_eq!(Frame::parse(b"HEARTBEAT").unwrap(), Frame::Heartbeat);
        assert_eq!(Frame::parse(b"HEARTBEAT_ACK").unwrap(), Frame::HeartbeatAck);
    }

    #[test]
    fn parses_registration_frames() {
        assert_eq!(Frame::parse(b"REGISTER:alice").unwrap(), Frame::Register("alice".into()));
        assert_eq!(Frame::parse(b"ACCEPTED:alice").unwrap(), Frame::Accepted("alice".into()));
        assert_eq!(Frame::parse(b"REJECTED:alice").unwrap(), Frame::Rejected("alice".into()));
    }

    #[test]
    fn chat_frame_splits_on_first_three_colons_only() {
        let frame = Frame::parse(b"CLIENT:abc123:7:alice:see you at 10:30: ok?").unwrap();

        match frame {
            Frame::Chat(chat) => {
                assert_eq!(chat.message_id.as_str(), "abc123");
                assert_eq!(chat.lamport_time, 7);
                assert_eq!(chat.sender, "alice");
                assert_eq!(chat.text, "see you at 10:30: ok?");
            }
            other => panic!("expected chat frame, got {:?}", other),
        }
    }

    #[test]
    fn chat_frame_round_trips_through_encode() {
        let original = Frame::Chat(ChatFrame {
            message_id: MessageId::from("id-1"),
            lamport_time: 42,
            sender: "bob".to_string(),
            text: "hello: world".to_string(),
        });

        let reparsed = Frame::parse(&original.encode()).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn chat_frame_with_missing_fields_is_rejected() {
        assert!(matches!(
            Frame::parse(b"CLIENT:abc123:7"),
            Err(FrameError::MissingFields(_))
        ));
    }

    #[test]
    fn chat_frame_with_non_numeric_timestamp_is_rejected() {
        assert!(matches!(
            Frame::parse(b"CLIENT:abc123:soon:alice:hi"),
            Err(FrameError::BadTimestamp(_))
        ));
    }

    #[test]
    fn leader_announcement_round_trips_with_original_field_names() {
        let announcement = LeaderAnnouncement {
            member: "192.168.0.7:10001".parse().unwrap(),
            is_leader: true,
        };
        let encoded = Frame::LeaderAnnouncement(announcement.clone()).encode();

        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("\"mid\""));
        assert!(text.contains("\"isLeader\""));

        assert_eq!(Frame::parse(&encoded).unwrap(), Frame::LeaderAnnouncement(announcement));
    }

    #[test]
    fn malformed_announcement_json_is_rejected() {
        assert!(matches!(
            Frame::parse(b"{\"mid\": 12}"),
            Err(FrameError::BadAnnouncement(_))
        ));
    }

    #[test]
    fn new_server_carries_a_socket_addr() {
        let frame = Frame::parse(b"NEW_SERVER:10.0.0.3:10001").unwrap();
        assert_eq!(frame, Frame::NewServer("10.0.0.3:10001".parse().unwrap()));

        assert!(matches!(
            Frame::parse(b"NEW_SERVER:not-an-addr"),
            Err(FrameError::BadPeerAddress(_))
        ));
    }

    #[test]
    fn free_text_is_not_a_frame() {
        // This is what a fanned-out chat line looks like; clients print it raw.
        assert!(matches!(
            Frame::parse(b"alice: hello (Lamport time: 3)"),
            Err(FrameError::Unrecognized(_))
        ));
        assert!(matches!(Frame::parse(&[0xff, 0xfe]), Err(FrameError::NotUtf8)));
    }

    #[test]
    fn generated_message_ids_are_distinct() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }
}
