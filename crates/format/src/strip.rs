//! Constrained-markup tag resolution.
//!
//! Chat bodies carry a small set of nestable HTML-ish tags, frequently
//! malformed or interleaved (`<b><i>x</b></i>` is normal traffic). Tags are
//! resolved innermost-first in document order: for each opening tag, the
//! matching closing tag is the first one of the same name that is not
//! claimed by a later re-opening of that name. A general HTML parser would
//! reject exactly the inputs this has to tolerate, so resolution stays
//! regex-driven on purpose.

use {once_cell::sync::Lazy, regex::Regex};

static OPENING_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<([^/>\s]+)(?:\s+([^>]*?))?>").expect("opening tag regex")
});

static CLOSING_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"</([^>]+)>").expect("closing tag regex")
});

static TITLE_ATTR: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"title="([^"]*)""#).expect("title attr regex")
});

static EMOJI_IMG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)<img[^>]*?(12x12(?:skull\.gif|heart\.png|snowman\.gif))[^>]*>")
        .expect("emoji img regex")
});

static ANY_TAG: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<[^>]+>").expect("any tag regex")
});

fn emoji_for(filename: &str) -> &'static str {
    match filename.to_ascii_lowercase().as_str() {
        "12x12skull.gif" => ":skull:",
        "12x12heart.png" => ":heart:",
        "12x12snowman.gif" => ":snowman:",
        _ => "",
    }
}

struct OpeningTag {
    index: usize,
    len: usize,
    name: String,
    title: Option<String>,
}

struct ClosingTag {
    index: usize,
    len: usize,
    name: String,
}

/// Perform one innermost-eligible replacement, or return `None` when no
/// resolvable pair remains. Tags named in `keep` are left in place (except
/// when they carry a `title` attribute, which always resolves to the title
/// text) so a later pass can interpret them.
fn resolve_one(message: &str, keep: &[&str]) -> Option<String> {
    let openings: Vec<OpeningTag> = OPENING_TAG
        .captures_iter(message)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let title = caps
                .get(2)
                .and_then(|attrs| TITLE_ATTR.captures(attrs.as_str()))
                .and_then(|t| t.get(1))
                .map(|t| t.as_str().to_string());
            Some(OpeningTag {
                index: whole.start(),
                len: whole.len(),
                name,
                title,
            })
        })
        .collect();

    let closings: Vec<ClosingTag> = CLOSING_TAG
        .captures_iter(message)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(ClosingTag {
                index: whole.start(),
                len: whole.len(),
                name: caps.get(1)?.as_str().to_ascii_lowercase(),
            })
        })
        .collect();

    for opening in &openings {
        let kept = keep.contains(&opening.name.as_str())
            && (opening.name == "a" || opening.title.is_none());
        if kept {
            continue;
        }

        let candidates: Vec<&ClosingTag> = closings
            .iter()
            .filter(|c| c.name == opening.name && c.index > opening.index)
            .collect();
        let reopenings: Vec<&OpeningTag> = openings
            .iter()
            .filter(|o| o.name == opening.name && o.index > opening.index)
            .collect();

        for (i, closing) in candidates.iter().enumerate() {
            // A later re-opening of the same tag sitting before this closing
            // claims it; keep looking further right.
            if i < reopenings.len() && reopenings[i].index < closing.index {
                continue;
            }

            let content = match &opening.title {
                Some(title) => title.clone(),
                None => message[opening.index + opening.len..closing.index].to_string(),
            };

            let mut next = String::with_capacity(message.len());
            next.push_str(&message[..opening.index]);
            next.push_str(&content);
            next.push_str(&message[closing.index + closing.len..]);
            return Some(next);
        }
    }

    None
}

fn replace_emoji_images(message: &str) -> String {
    EMOJI_IMG
        .replace_all(message, |caps: &regex::Captures<'_>| {
            emoji_for(&caps[1]).to_string()
        })
        .into_owned()
}

/// Resolve tag pairs while keeping the tags named in `keep` for a later
/// pass. Unmatched leftovers are not swept.
pub(crate) fn resolve_tags(message: &str, keep: &[&str]) -> String {
    let mut current = message.to_string();
    while let Some(next) = resolve_one(&current, keep) {
        current = next;
    }
    replace_emoji_images(&current).trim().to_string()
}

/// Resolve every tag pair innermost-first, map known images to emoji
/// tokens, and sweep whatever malformed tags remain.
pub fn strip_html(message: &str) -> String {
    let resolved = resolve_tags(message, &[]);
    ANY_TAG.replace_all(&resolved, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_untouched() {
        assert_eq!(strip_html("hello world"), "hello world");
    }

    #[test]
    fn simple_pair_unwrapped() {
        assert_eq!(strip_html("<b>Hello</b> world"), "Hello world");
    }

    #[test]
    fn nested_pairs_resolve_innermost_first() {
        assert_eq!(strip_html("<b>a <i>b</i> c</b>"), "a b c");
    }

    #[test]
    fn title_replaces_content() {
        assert_eq!(strip_html(r#"<i title="looks">hisss</i> like"#), "looks like");
    }

    #[test]
    fn interleaved_tags_of_same_name() {
        // Document-order resolution: the first <b> takes the first closing
        // not claimed by the re-opening.
        assert_eq!(strip_html("<b>one<b>two</b>three</b>"), "onetwothree");
    }

    #[test]
    fn overlapping_cross_nesting_tolerated() {
        // The wild example: <b><i>x</b></i> style interleaving.
        assert_eq!(strip_html("<b><i>Irrat</b></i> waves"), "Irrat waves");
    }

    #[test]
    fn unmatched_openers_swept() {
        assert_eq!(strip_html("a <font color=red>b <b>c"), "a b c");
    }

    #[test]
    fn unmatched_closers_swept() {
        assert_eq!(strip_html("a</b> b</i>"), "a b");
    }

    #[test]
    fn comments_swept() {
        assert_eq!(strip_html("vampire cloak<!--fb-->"), "vampire cloak");
    }

    #[test]
    fn known_images_become_emoji() {
        assert_eq!(
            strip_html(r#"hi <img src="https://example/images/12x12skull.gif">"#),
            "hi :skull:"
        );
        assert_eq!(strip_html(r#"<img src="x/12x12heart.png">"#), ":heart:");
        assert_eq!(strip_html(r#"<img alt="" src="12x12snowman.gif">"#), ":snowman:");
    }

    #[test]
    fn unknown_images_stripped() {
        assert_eq!(strip_html(r#"a <img src="itemimages/potion1.gif"> b"#), "a  b");
    }

    #[test]
    fn font_spans_unwrapped() {
        assert_eq!(
            strip_html("S<font color=darkred>o</font>metimes I cry"),
            "Sometimes I cry"
        );
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "<b>one<b>two</b>three</b>",
            r#"<i title="looks">hisss</i> like I'm not"#,
            "a <font color=red>b <b>c",
            "plain",
        ];
        for input in inputs {
            let once = strip_html(input);
            assert_eq!(strip_html(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn keep_list_preserves_bare_inline_tags() {
        let out = resolve_tags("<b>Hello</b> <font color=red>world</font>", &["b", "i"]);
        assert_eq!(out, "<b>Hello</b> world");
    }

    #[test]
    fn keep_list_still_resolves_titled_tags() {
        let out = resolve_tags(r#"<i title="looks">hisss</i> <i>real</i>"#, &["b", "i"]);
        assert_eq!(out, "looks <i>real</i>");
    }

    #[test]
    fn keep_list_preserves_anchors() {
        let out = resolve_tags(
            r#"<a target=_blank href="https://x.example">[link]</a>"#,
            &["a", "b", "i"],
        );
        assert_eq!(out, r#"<a target=_blank href="https://x.example">[link]</a>"#);
    }
}
