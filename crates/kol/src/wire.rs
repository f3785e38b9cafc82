//! Wire types for the game's JSON chat and status endpoints.
//!
//! The protocol is loose: most fields are optional, and numeric values
//! arrive as strings or numbers depending on the endpoint. Everything is
//! normalized to `String` at the deserialization boundary.

use {
    serde::{Deserialize, Deserializer},
    serde_json::Value,
};

fn stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// One message as returned by the chat polling endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChatMessage {
    #[serde(rename = "type", default, deserialize_with = "stringish")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub mid: Option<String>,
    #[serde(default)]
    pub who: Option<ChatUser>,
    #[serde(default, deserialize_with = "stringish")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub channel: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub msg: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub time: Option<String>,
}

/// The sender block attached to chat messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUser {
    #[serde(default, deserialize_with = "stringish")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub id: Option<String>,
}

/// Response envelope of the chat polling endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPoll {
    #[serde(default)]
    pub msgs: Vec<RawChatMessage>,
    /// Cursor to feed back as `lasttime` on the next poll.
    #[serde(default, deserialize_with = "stringish")]
    pub last: Option<String>,
}

/// An active effect from the status endpoint's effects table. The table
/// maps an opaque hash to `[name, turns, img, _, effect_id]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEffect {
    pub name: String,
    pub effect_id: String,
}

/// The subset of `api.php?what=status` the bridge cares about.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    /// Unix timestamp of the next maintenance window start.
    pub rollover: Option<u64>,
    /// Per-session password hash required by mutating endpoints.
    pub pwd: Option<String>,
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    pub effects: Vec<ActiveEffect>,
}

impl StatusSnapshot {
    pub fn from_value(data: &Value) -> Self {
        let field = |key: &str| match data.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let effects = data
            .get("effects")
            .and_then(Value::as_object)
            .map(|table| {
                table
                    .values()
                    .filter_map(|entry| {
                        let fields = entry.as_array()?;
                        let text = |i: usize| -> Option<String> {
                            match fields.get(i)? {
                                Value::String(s) => Some(s.clone()),
                                Value::Number(n) => Some(n.to_string()),
                                _ => None,
                            }
                        };
                        Some(ActiveEffect {
                            name: text(0)?,
                            effect_id: text(4)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            rollover: field("rollover").and_then(|s| s.parse().ok()),
            pwd: field("pwd"),
            player_id: field("playerid"),
            player_name: field("name"),
            effects,
        }
    }
}

/// How many of `item_id` the inventory endpoint reports.
pub fn inventory_count(inventory: &Value, item_id: &str) -> u64 {
    match inventory.get(item_id) {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_poll_parses_mixed_field_types() {
        let raw = r#"{
            "msgs": [{
                "msg": "hello there",
                "type": "public",
                "mid": "1538072797",
                "who": {"name": "Irrat", "id": 3469406, "color": "black"},
                "format": 0,
                "channel": "clan",
                "time": "1594057241"
            }],
            "last": "1468893",
            "delay": 3000
        }"#;
        #[allow(clippy::unwrap_used)]
        let poll: ChatPoll = serde_json::from_str(raw).unwrap();
        assert_eq!(poll.last.as_deref(), Some("1468893"));
        let msg = &poll.msgs[0];
        assert_eq!(msg.kind.as_deref(), Some("public"));
        assert_eq!(msg.format.as_deref(), Some("0"));
        let who = msg.who.as_ref().map(|w| (w.name.clone(), w.id.clone()));
        assert_eq!(
            who,
            Some((Some("Irrat".to_string()), Some("3469406".to_string())))
        );
    }

    #[test]
    fn channelless_system_message_parses() {
        let raw = r#"{"msgs":[{"type":"system","msg":"The system will go down for nightly maintenance in 5 minutes."}],"last":9}"#;
        #[allow(clippy::unwrap_used)]
        let poll: ChatPoll = serde_json::from_str(raw).unwrap();
        assert_eq!(poll.last.as_deref(), Some("9"));
        assert!(poll.msgs[0].channel.is_none());
        assert!(poll.msgs[0].who.is_none());
    }

    #[test]
    fn status_snapshot_extracts_effects() {
        let raw: Value = serde_json::json!({
            "playerid": "12345",
            "name": "BridgeBot",
            "pwd": "abc123",
            "rollover": "1594100000",
            "effects": {
                "deadbeef": ["Wanged", "7", "wanged.gif", "", "697"],
                "cafebabe": ["Leash of Linguini", 10, "string.gif", "", "16"]
            }
        });
        let status = StatusSnapshot::from_value(&raw);
        assert_eq!(status.rollover, Some(1594100000));
        assert_eq!(status.pwd.as_deref(), Some("abc123"));
        assert_eq!(status.player_name.as_deref(), Some("BridgeBot"));
        let mut ids: Vec<&str> = status.effects.iter().map(|e| e.effect_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["16", "697"]);
    }

    #[test]
    fn inventory_counts_tolerate_both_encodings() {
        let inv = serde_json::json!({"588": "3", "641": 2});
        assert_eq!(inventory_count(&inv, "588"), 3);
        assert_eq!(inventory_count(&inv, "641"), 2);
        assert_eq!(inventory_count(&inv, "9999"), 0);
    }
}
