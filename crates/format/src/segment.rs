//! Single-pass segmentation of a chat body into typed pieces, and the two
//! renderers (game-side plaintext, Discord-side richtext) that consume it.

use {once_cell::sync::Lazy, regex::Regex};

use crate::strip::strip_html;

/// Emoji tokens produced by the image mapping in [`crate::strip`].
const EMOJI_TOKENS: [&str; 3] = [":skull:", ":heart:", ":snowman:"];

/// How many characters of a URL the protocol echoes after a pretty link
/// before truncating with an ellipsis.
const LINK_ECHO_MAX: usize = 40;

static HREF_ATTR: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"href=(?:"([^"]*)"|'([^']*)')"#).expect("href regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoration {
    Bold,
    Italic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Link { href: String },
    Decoration(Decoration),
    Emoji(String),
}

fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Flush accumulated raw text into the segment list, decoding entities and
/// splitting out emoji tokens.
fn flush_text(buffer: &mut String, segments: &mut Vec<Segment>) {
    if buffer.is_empty() {
        return;
    }
    let decoded = decode_entities(buffer);
    buffer.clear();

    let mut rest = decoded.as_str();
    while !rest.is_empty() {
        let hit = EMOJI_TOKENS
            .iter()
            .filter_map(|tok| rest.find(tok).map(|at| (at, *tok)))
            .min_by_key(|(at, _)| *at);

        match hit {
            Some((at, tok)) => {
                if at > 0 {
                    segments.push(Segment::Text(rest[..at].to_string()));
                }
                segments.push(Segment::Emoji(tok.to_string()));
                rest = &rest[at + tok.len()..];
            }
            None => {
                segments.push(Segment::Text(rest.to_string()));
                rest = "";
            }
        }
    }
}

fn parse_tag_name(tag_body: &str) -> String {
    tag_body
        .trim_start_matches('/')
        .split([' ', '\t', '\n'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Scan a body (already passed through bare-inline-preserving tag
/// resolution) left to right into segments. Malformed or unknown tags are
/// dropped rather than erroring.
pub fn scan(message: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = message;

    while let Some(at) = rest.find('<') {
        text.push_str(&rest[..at]);
        rest = &rest[at..];

        let Some(end) = rest.find('>') else {
            // No closing bracket anywhere: literal '<', not markup.
            text.push('<');
            rest = &rest[1..];
            continue;
        };

        let tag_body = &rest[1..end];
        let after_tag = &rest[end + 1..];
        let name = parse_tag_name(tag_body);
        let is_closing = tag_body.starts_with('/');

        match (name.as_str(), is_closing) {
            ("b", _) => {
                flush_text(&mut text, &mut segments);
                segments.push(Segment::Decoration(Decoration::Bold));
                rest = after_tag;
            }
            ("i", _) => {
                flush_text(&mut text, &mut segments);
                segments.push(Segment::Decoration(Decoration::Italic));
                rest = after_tag;
            }
            ("a", false) => {
                let href = HREF_ATTR.captures(tag_body).map(|caps| {
                    caps.get(1)
                        .or_else(|| caps.get(2))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                });

                let close_at = after_tag
                    .to_ascii_lowercase()
                    .find("</a>");

                let Some(close_at) = close_at else {
                    // Unterminated anchor: drop the tag, keep the content.
                    rest = after_tag;
                    continue;
                };

                let label = &after_tag[..close_at];
                match href {
                    Some(href) if href.starts_with("http://") || href.starts_with("https://") => {
                        flush_text(&mut text, &mut segments);
                        segments.push(Segment::Link {
                            href: decode_entities(&href),
                        });
                    }
                    _ => {
                        // Internal links (showplayer.php etc) keep their label.
                        text.push_str(&strip_html(label));
                    }
                }
                rest = &after_tag[close_at + "</a>".len()..];
            }
            // Stray </a> with no matching opener, or any unknown tag.
            _ => {
                rest = after_tag;
            }
        }
    }

    text.push_str(rest);
    flush_text(&mut text, &mut segments);
    segments
}

/// The echoed form of a URL: truncated to [`LINK_ECHO_MAX`] characters with
/// a trailing ellipsis when longer.
fn echo_of(href: &str) -> String {
    let count = href.chars().count();
    if count > LINK_ECHO_MAX {
        let truncated: String = href.chars().take(LINK_ECHO_MAX).collect();
        format!("{truncated}...")
    } else {
        href.to_string()
    }
}

/// Strip `echo` from the start of `text`, tolerating interleaved spaces
/// (the protocol re-wraps long URLs with injected spaces). Returns the
/// remainder on a full match.
fn strip_echo_prefix(text: &str, echo: &str) -> Option<String> {
    let mut echo_chars = echo.chars().peekable();
    let mut chars = text.char_indices();

    loop {
        let Some(&expected) = echo_chars.peek() else {
            // Echo fully consumed.
            let remainder: String = chars.map(|(_, c)| c).collect();
            return Some(remainder.trim_start().to_string());
        };

        let Some((_, c)) = chars.next() else {
            return None;
        };

        if c == ' ' {
            continue;
        }
        if c == expected {
            echo_chars.next();
        } else {
            return None;
        }
    }
}

/// Collapse the protocol's "pretty link followed by its own raw URL echo"
/// redundancy: a link segment immediately followed by a text segment that
/// re-spells the same URL loses the echoed prefix.
pub fn collapse_link_echoes(segments: &mut Vec<Segment>) {
    let mut i = 0;
    while i + 1 < segments.len() {
        let stripped = match (&segments[i], &segments[i + 1]) {
            (Segment::Link { href }, Segment::Text(text)) => {
                strip_echo_prefix(text.trim_start(), &echo_of(href))
            }
            _ => None,
        };

        if let Some(remainder) = stripped {
            if remainder.is_empty() {
                segments.remove(i + 1);
            } else {
                // Keep one space between the link and whatever followed the
                // echo.
                segments[i + 1] = Segment::Text(format!(" {remainder}"));
            }
        }
        i += 1;
    }
}

fn decoration_marker(deco: Decoration) -> &'static str {
    match deco {
        Decoration::Bold => "**",
        Decoration::Italic => "*",
    }
}

/// Render for the game side: decoration markers stay literal only when the
/// destination supports them, links render bare, text passes through.
pub fn render_plaintext(segments: &[Segment], keep_decorations: bool) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Link { href } => out.push_str(href),
            Segment::Decoration(deco) => {
                if keep_decorations {
                    out.push_str(decoration_marker(*deco));
                }
            }
            Segment::Emoji(tok) => out.push_str(tok),
        }
    }
    out.trim().to_string()
}

/// Characters Discord's own markup assigns meaning to.
fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '*' | '_' | '~' | '`' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render for Discord: control characters in text are escaped, decorations
/// become real formatting, bare URLs are wrapped in preview-suppression
/// brackets unless previews are explicitly allowed.
pub fn render_richtext(segments: &[Segment], preview_links: bool) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(&escape_markup(text)),
            Segment::Link { href } => {
                if preview_links {
                    out.push_str(href);
                } else {
                    out.push('<');
                    out.push_str(href);
                    out.push('>');
                }
            }
            Segment::Decoration(deco) => out.push_str(decoration_marker(*deco)),
            Segment::Emoji(tok) => out.push_str(tok),
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Segment {
        Segment::Text(s.to_string())
    }

    #[test]
    fn plain_body_is_one_text_segment() {
        assert_eq!(scan("hello world"), vec![text("hello world")]);
    }

    #[test]
    fn bold_markers_split_segments() {
        assert_eq!(
            scan("<b>Hello</b> world"),
            vec![
                Segment::Decoration(Decoration::Bold),
                text("Hello"),
                Segment::Decoration(Decoration::Bold),
                text(" world"),
            ]
        );
    }

    #[test]
    fn http_anchor_becomes_link() {
        let segments = scan(r#"<a target=_blank href="https://x.example/page">[link]</a> tail"#);
        assert_eq!(
            segments,
            vec![
                Segment::Link {
                    href: "https://x.example/page".into()
                },
                text(" tail"),
            ]
        );
    }

    #[test]
    fn internal_anchor_keeps_label() {
        let segments = scan(r#"<a target=mainpane href="showplayer.php?who=1">Irrat</a> waves"#);
        assert_eq!(segments, vec![text("Irrat waves")]);
    }

    #[test]
    fn entities_decoded_in_text() {
        assert_eq!(scan("fish &amp; chips"), vec![text("fish & chips")]);
    }

    #[test]
    fn emoji_tokens_split_out() {
        assert_eq!(
            scan("hi :skull: bye"),
            vec![text("hi "), Segment::Emoji(":skull:".into()), text(" bye")]
        );
    }

    #[test]
    fn unterminated_anchor_degrades() {
        assert_eq!(scan(r#"<a href="https://x.example">tail"#), vec![text("tail")]);
    }

    #[test]
    fn unknown_tags_dropped() {
        assert_eq!(scan("a <font color=red>b"), vec![text("a b")]);
    }

    #[test]
    fn short_link_echo_collapsed() {
        let mut segments = vec![
            Segment::Link {
                href: "https://x.example/p".into(),
            },
            text(" https://x.example/p and more"),
        ];
        collapse_link_echoes(&mut segments);
        assert_eq!(
            segments,
            vec![
                Segment::Link {
                    href: "https://x.example/p".into()
                },
                text(" and more"),
            ]
        );
    }

    #[test]
    fn spaced_out_echo_collapsed() {
        // The protocol injects spaces into long runs; the echo check is
        // space-insensitive.
        let mut segments = vec![
            Segment::Link {
                href: "https://averageclan.example/fake".into(),
            },
            text("https:// averageclan.example /fake trailing words"),
        ];
        collapse_link_echoes(&mut segments);
        assert_eq!(segments[1], text(" trailing words"));
    }

    #[test]
    fn truncated_echo_with_ellipsis_collapsed() {
        let href = "https://example.com/a/very/long/path/that/keeps/going";
        let echo = format!("{}...", href.chars().take(40).collect::<String>());
        let mut segments = vec![
            Segment::Link { href: href.into() },
            text(&format!("{echo} rest")),
        ];
        collapse_link_echoes(&mut segments);
        assert_eq!(segments[1], text(" rest"));
    }

    #[test]
    fn non_matching_text_untouched() {
        let mut segments = vec![
            Segment::Link {
                href: "https://x.example".into(),
            },
            text("unrelated words"),
        ];
        let before = segments.clone();
        collapse_link_echoes(&mut segments);
        assert_eq!(segments, before);
    }

    #[test]
    fn plaintext_render_keeps_or_strips_decorations() {
        let segments = scan("<b>Hello</b> world");
        assert_eq!(render_plaintext(&segments, true), "**Hello** world");
        assert_eq!(render_plaintext(&segments, false), "Hello world");
    }

    #[test]
    fn richtext_escapes_control_characters() {
        let segments = scan("under_score and *stars*");
        assert_eq!(
            render_richtext(&segments, false),
            r"under\_score and \*stars\*"
        );
    }

    #[test]
    fn richtext_suppresses_link_previews() {
        let segments = scan(r#"<a href="https://x.example">[link]</a>"#);
        assert_eq!(render_richtext(&segments, false), "<https://x.example>");
        assert_eq!(render_richtext(&segments, true), "https://x.example");
    }
}
