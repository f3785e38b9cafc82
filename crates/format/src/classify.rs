//! Inbound message classification: wire-level type, public-message format
//! codes, and the synthetic-channel heuristics.

use {once_cell::sync::Lazy, regex::Regex};

/// Wire-level message type as reported by the polling endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Private,
    Public,
    Event,
    System,
}

impl MessageType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            "event" => Some(Self::Event),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Rendering class of a message. Public messages carry a numeric format
/// code; bot notices are synthesized internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Normal,
    Emote,
    System,
    ModWarning,
    ModAnnouncement,
    Event,
    Welcome,
    Bot,
}

impl MessageClass {
    /// Map a public message's numeric format code. Returns `None` for
    /// unknown codes and for non-public messages.
    pub fn from_format_code(code: Option<&str>) -> Option<Self> {
        match code? {
            "0" => Some(Self::Normal),
            "1" => Some(Self::Emote),
            "2" => Some(Self::System),
            "3" => Some(Self::ModWarning),
            "4" => Some(Self::ModAnnouncement),
            "98" => Some(Self::Event),
            "99" => Some(Self::Welcome),
            _ => None,
        }
    }
}

static ROLLOVER_NOTICE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)nightly maintenance|rollover").expect("rollover notice regex")
});

/// Channelless system messages are either maintenance countdowns or
/// general server notices; the two get distinct synthetic channels.
pub fn is_rollover_notice(body: &str) -> bool {
    ROLLOVER_NOTICE.is_match(body)
}

/// Emote bodies echo the sender's own name up front ("Name waves." for
/// "/me waves."). Strip the echo so renders can re-attach the sender once.
pub fn remove_emote_prefix(sender: &str, body: &str) -> String {
    if !sender.is_empty() && body.starts_with(sender) {
        body[sender.len()..].trim().to_string()
    } else {
        body.to_string()
    }
}
