//! What a transport reports back to the session it feeds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One wire-side occurrence.
///
/// Events are plain data (`Send`), so socket tasks running on a
/// multi-threaded runtime can hand them over a channel to the bridge
/// thread where the session lives. Delivery order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection is established; the session may start writing.
    Connected,
    /// A frame or chunk of bytes arrived from the peer.
    Receive(Vec<u8>),
    /// The transport can accept another outbound chunk.
    Writable,
    /// The close handshake finished or the peer went away.
    Closed(CloseReason),
    /// The transport failed; no further events follow.
    Failed(String),
}

/// Why a connection ended: the wire status code plus the peer's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// Normal closure (RFC 6455 section 7.4.1).
    pub const NORMAL: u16 = 1000;
    /// Endpoint is going away: shutdown, navigation.
    pub const GOING_AWAY: u16 = 1001;
    /// Peer violated the protocol.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// The close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    pub fn going_away() -> Self {
        Self::new(Self::GOING_AWAY, "")
    }

    pub fn no_status() -> Self {
        Self::new(Self::NO_STATUS, "")
    }

    pub fn abnormal() -> Self {
        Self::new(Self::ABNORMAL, "")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_displays_code_and_text() {
        assert_eq!(CloseReason::normal().to_string(), "1000");
        assert_eq!(
            CloseReason::new(1001, "restarting").to_string(),
            "1001: restarting"
        );
    }

    #[test]
    fn close_reason_round_trips_through_serde() {
        let reason = CloseReason::new(1002, "bad frame");
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, r#"{"code":1002,"reason":"bad frame"}"#);
        let back: CloseReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
}
