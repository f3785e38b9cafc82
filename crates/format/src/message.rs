//! End-to-end body formatting: cleanup, segmentation, and the per-class
//! render templates that produce a [`RenderedMessage`].

use kolbridge_common::types::{RenderedMessage, Side};

use crate::{
    classify::MessageClass,
    segment::{self, Segment},
    strip::resolve_tags,
};

/// Embed colors per formatting class.
const COLOR_SYSTEM: u32 = 0x00C000;
const COLOR_MOD_WARNING: u32 = 0xE74C3C;
const COLOR_MOD_ANNOUNCEMENT: u32 = 0xF39C12;

/// Tags the segment scanner interprets itself.
const INLINE_TAGS: [&str; 3] = ["a", "b", "i"];

/// Remove the zero-width characters some clients inject to defeat the
/// game's chat filters. Applied to every polled body before any parsing.
pub fn strip_zero_width(body: &str) -> String {
    body.replace("&#8203;", "").replace('\u{200B}', "")
}

fn normalize_line_breaks(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(at) = rest.to_ascii_lowercase().find("<br>") {
        out.push_str(&rest[..at]);
        out.push('\n');
        rest = &rest[at + 4..];
    }
    out.push_str(rest);
    out
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }
        out.push(c);
    }
    out
}

/// Wrap a sender name in brackets unless it already is.
fn bracket(sender: &str) -> String {
    if sender.starts_with('[') {
        sender.to_string()
    } else {
        format!("[{sender}]")
    }
}

/// Segment a game-side body. Resolution keeps bare inline tags for the
/// scanner and collapses the pretty-link/raw-echo redundancy.
fn segment_game_body(body: &str) -> Vec<Segment> {
    let prepared = normalize_line_breaks(&strip_zero_width(body));
    let resolved = resolve_tags(&prepared, &INLINE_TAGS);
    let mut segments = segment::scan(&resolved);
    segment::collapse_link_echoes(&mut segments);
    segments
}

/// Format one inbound body for every destination dialect.
///
/// `origin` decides how much cleanup the body needs: game-side bodies carry
/// constrained markup and entities, Discord-side bodies arrive as plain
/// text already cleaned by the adapter. `preview_links` controls whether
/// richtext output suppresses URL previews.
pub fn format_message(
    sender: &str,
    body: &str,
    class: Option<MessageClass>,
    preview_links: bool,
    origin: Side,
) -> RenderedMessage {
    let (plain, rich) = match origin {
        Side::Kol => {
            let segments = segment_game_body(body);
            let plain = collapse_spaces(&segment::render_plaintext(&segments, true));
            let rich = collapse_spaces(&segment::render_richtext(&segments, preview_links));
            if plain.trim().is_empty() && !body.trim().is_empty() {
                // Nothing survived stripping: surface the raw body rather
                // than dropping the message silently.
                let raw = format!("RAW: {body}");
                (raw.clone(), raw)
            } else {
                (plain, rich)
            }
        }
        _ => {
            let cleaned = collapse_spaces(body).trim().to_string();
            (cleaned.clone(), cleaned)
        }
    };

    let prefix = bracket(sender);

    match class {
        Some(MessageClass::Emote) => RenderedMessage {
            embed_title: None,
            embed_color: None,
            embed_description: None,
            discord_message: format!("*{prefix} {rich}*"),
            kol_prefix: format!("/me {prefix}"),
            kol_message: plain,
        },
        Some(MessageClass::System) => RenderedMessage {
            embed_title: Some("❗ System Message".to_string()),
            embed_color: Some(COLOR_SYSTEM),
            embed_description: Some(rich.clone()),
            discord_message: format!("❗ **System Message** {rich}"),
            kol_prefix: prefix,
            kol_message: plain,
        },
        Some(MessageClass::ModWarning) => RenderedMessage {
            embed_title: Some(format!("⚠️ Mod Warning {prefix}")),
            embed_color: Some(COLOR_MOD_WARNING),
            embed_description: Some(rich.clone()),
            discord_message: format!("⚠️ **Mod Warning** {prefix} {rich}"),
            kol_prefix: prefix,
            kol_message: plain,
        },
        Some(MessageClass::ModAnnouncement) => RenderedMessage {
            embed_title: Some(format!("📢 Mod Announcement {prefix}")),
            embed_color: Some(COLOR_MOD_ANNOUNCEMENT),
            embed_description: Some(rich.clone()),
            discord_message: format!("📢 **Mod Announcement** {prefix} {rich}"),
            kol_prefix: prefix,
            kol_message: plain,
        },
        Some(MessageClass::Bot) => RenderedMessage {
            embed_title: None,
            embed_color: None,
            embed_description: None,
            discord_message: rich,
            kol_prefix: String::new(),
            kol_message: plain,
        },
        // Normal, welcome, and anything unclassified render alike.
        _ => RenderedMessage {
            embed_title: None,
            embed_color: None,
            embed_description: None,
            discord_message: format!("{prefix} {rich}"),
            kol_prefix: prefix,
            kol_message: plain,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_public_message_round_trip() {
        // {"who":{"name":"Irrat","id":"3469406"},"type":"public","format":"0",
        //  "msg":"<b>Hello</b> world","channel":"clan"}
        let rendered = format_message(
            "Irrat",
            "<b>Hello</b> world",
            Some(MessageClass::Normal),
            false,
            Side::Kol,
        );
        assert_eq!(rendered.kol_prefix, "[Irrat]");
        assert_eq!(rendered.kol_message, "**Hello** world");
        assert_eq!(rendered.discord_message, "[Irrat] **Hello** world");
        assert!(rendered.embed_title.is_none());
    }

    #[test]
    fn emote_round_trip() {
        // Body arrives with the sender echo already stripped by the
        // processor ("Bob waves happily" -> "waves happily").
        let rendered = format_message(
            "Bob",
            "waves happily",
            Some(MessageClass::Emote),
            false,
            Side::Kol,
        );
        assert_eq!(rendered.discord_message, "*[Bob] waves happily*");
        assert_eq!(rendered.kol_prefix, "/me [Bob]");
        assert_eq!(rendered.kol_message, "waves happily");
        assert!(!rendered.discord_message.contains("Bob waves happily Bob"));
    }

    #[test]
    fn mod_warning_gets_embed_and_inline_fallback() {
        let rendered = format_message(
            "Mod Warning (#1469700)",
            "All violent roleplay is verboten.",
            Some(MessageClass::ModWarning),
            false,
            Side::Kol,
        );
        assert_eq!(
            rendered.embed_title.as_deref(),
            Some("⚠️ Mod Warning [Mod Warning (#1469700)]")
        );
        assert_eq!(rendered.embed_color, Some(COLOR_MOD_WARNING));
        assert_eq!(
            rendered.embed_description.as_deref(),
            Some("All violent roleplay is verboten.")
        );
        assert!(rendered.discord_message.starts_with("⚠️ **Mod Warning**"));
    }

    #[test]
    fn already_bracketed_sender_not_double_wrapped() {
        let rendered = format_message(
            "[bot]",
            "hello",
            Some(MessageClass::Normal),
            false,
            Side::Kol,
        );
        assert_eq!(rendered.kol_prefix, "[bot]");
    }

    #[test]
    fn empty_after_strip_falls_back_to_raw() {
        let body = "<font color=red></font><!--fb-->";
        let rendered = format_message("Irrat", body, Some(MessageClass::Normal), false, Side::Kol);
        assert!(rendered.kol_message.starts_with("RAW: "));
        assert!(rendered.kol_message.contains(body));
    }

    #[test]
    fn discord_origin_body_not_reescaped() {
        let rendered = format_message(
            "Sam",
            "already *formatted* text",
            Some(MessageClass::Normal),
            true,
            Side::Discord,
        );
        assert_eq!(rendered.discord_message, "[Sam] already *formatted* text");
        assert_eq!(rendered.kol_message, "already *formatted* text");
    }

    #[test]
    fn zero_width_characters_removed() {
        let rendered = format_message(
            "Irrat",
            "he&#8203;llo\u{200B} there",
            Some(MessageClass::Normal),
            false,
            Side::Kol,
        );
        assert_eq!(rendered.kol_message, "hello there");
    }

    #[test]
    fn br_tags_become_newlines() {
        let rendered = format_message(
            "Irrat",
            "line one<Br> line two",
            Some(MessageClass::Normal),
            false,
            Side::Kol,
        );
        assert_eq!(rendered.kol_message, "line one\n line two");
    }

    #[test]
    fn link_echo_removed_from_render() {
        let body = concat!(
            r#"<a target=_blank href="https://x.example/page"><font color=blue>[link]</font></a>"#,
            " https://x. example/pa ge trailing"
        );
        let rendered = format_message("Irrat", body, Some(MessageClass::Normal), false, Side::Kol);
        assert_eq!(rendered.kol_message, "https://x.example/page trailing");
        assert_eq!(
            rendered.discord_message,
            "[Irrat] <https://x.example/page> trailing"
        );
    }

    #[test]
    fn bot_class_renders_without_sender_decoration() {
        let rendered = format_message("RelayBot", "out of antidote", Some(MessageClass::Bot), false, Side::Kol);
        assert_eq!(rendered.kol_prefix, "");
        assert_eq!(rendered.discord_message, "out of antidote");
    }
}
