//! KoL's hand-rolled chat encoding and the outbound message splitter.
//!
//! The chat submission endpoint does not take standard percent-encoding: it
//! wants spaces as `+`, a literal `+` as `%2B`, RFC 2396 mark characters
//! bare, and everything else as `%XX`. Characters above U+00FF cannot be
//! represented at all and are substituted with an encoded `?`.

const SAFE_CHARS: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_.!~*'()";
const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Longest run of non-space characters packed as one unit before the
/// splitter forces a break. The server injects spaces into longer runs.
const MAX_WORD_RUN: usize = 20;

/// Default per-message encoded-length budget, before prefix deduction.
pub const DEFAULT_MESSAGE_LIMIT: usize = 245;

/// Encode one character the way the game's chat form does.
fn encode_char(ch: char) -> String {
    if ch == '+' {
        return "%2B".to_string();
    }
    if ch == ' ' {
        return "+".to_string();
    }
    if SAFE_CHARS.contains(ch) {
        return ch.to_string();
    }

    let code = ch as u32;
    if code > 255 {
        // Not representable in the game's 8-bit encoding.
        return "%3F".to_string();
    }

    let mut out = String::with_capacity(3);
    out.push('%');
    out.push(HEX[(code as usize >> 4) & 0xf] as char);
    out.push(HEX[code as usize & 0xf] as char);
    out
}

/// Encode a full string for the `graf` parameter.
pub fn encode_to_kol(text: &str) -> String {
    text.chars().map(encode_char).collect()
}

/// Flatten a multi-line body into the single line the chat endpoint takes:
/// collapse repeated spaces, close sentences that end at a line break with
/// a period, and turn remaining newlines into spaces.
pub fn normalize_outbound(text: &str) -> String {
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

    // "Hello everyone\n" reads as a finished sentence; "Hello everyone!\n"
    // already is one.
    let mut normalized = String::with_capacity(out.len());
    let mut chars = out.chars().peekable();
    while let Some(c) = chars.next() {
        if chars.peek() == Some(&'\n') && c.is_ascii_alphanumeric() {
            normalized.push(c);
            normalized.push_str(". ");
            chars.next();
        } else {
            normalized.push(c);
        }
    }

    normalized.replace('\n', " ")
}

/// Split `message` into chunks such that the encoded length of
/// `prefix + chunk` stays within `limit`, packing whole words greedily.
///
/// Words longer than [`MAX_WORD_RUN`] raw characters are broken mid-run;
/// breaks otherwise land on space boundaries. The prefix is re-applied to
/// every chunk. Encoded units are never split.
pub fn split_message(prefix: &str, message: &str, limit: usize) -> Vec<String> {
    let budget = limit.saturating_sub(encode_to_kol(prefix).len());

    let mut remaining: Vec<(char, usize)> = message
        .chars()
        .map(|c| {
            let encoded_len = encode_char(c).len();
            (c, encoded_len)
        })
        .collect();

    // Next packable unit: characters up to the following space, capped at
    // MAX_WORD_RUN raw characters. Returns (raw char count, encoded length).
    let next_word = |remaining: &[(char, usize)]| -> (usize, usize) {
        let mut index = 0;
        let mut encoded = 0;

        while index < remaining.len() {
            if remaining[index].0 == ' ' || index >= MAX_WORD_RUN {
                break;
            }
            encoded += remaining[index].1;
            index += 1;
        }

        (index, encoded)
    };

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let mut flush = |current: &mut String, current_len: &mut usize| {
        if current.is_empty() {
            return;
        }
        chunks.push(format!("{prefix}{}", current.trim()));
        current.clear();
        *current_len = 0;
    };

    while !remaining.is_empty() {
        let (word_chars, word_len) = next_word(&remaining);

        if word_len + current_len > budget {
            flush(&mut current, &mut current_len);
        }

        // +1 accounts for the space (encoded as one byte) trailing the word.
        current_len += word_len + 1;
        let take = (word_chars + 1).min(remaining.len());
        current.extend(remaining.drain(..take).map(|(c, _)| c));
    }

    flush(&mut current, &mut current_len);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_chars_pass_through() {
        assert_eq!(encode_to_kol("Hello-World_1.2!"), "Hello-World_1.2!");
    }

    #[test]
    fn spaces_and_plus() {
        assert_eq!(encode_to_kol("a b"), "a+b");
        assert_eq!(encode_to_kol("1+1"), "1%2B1");
    }

    #[test]
    fn non_alphanumeric_bytes_hex_encoded() {
        assert_eq!(encode_to_kol("a,b"), "a%2Cb");
        assert_eq!(encode_to_kol("[hi]"), "%5Bhi%5D");
        assert_eq!(encode_to_kol("é"), "%E9");
    }

    #[test]
    fn characters_above_latin1_become_question_marks() {
        assert_eq!(encode_to_kol("日本"), "%3F%3F");
    }

    #[test]
    fn short_message_is_one_chunk() {
        let chunks = split_message("[Bob] ", "hello world", DEFAULT_MESSAGE_LIMIT);
        assert_eq!(chunks, vec!["[Bob] hello world"]);
    }

    #[test]
    fn every_chunk_respects_encoded_limit() {
        let body = "word ".repeat(200);
        let prefix = "[SomeSender] ";
        let limit = DEFAULT_MESSAGE_LIMIT;
        let chunks = split_message(prefix, &body, limit);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                encode_to_kol(chunk).len() <= limit,
                "chunk over limit: {chunk}"
            );
            assert!(chunk.starts_with(prefix));
        }
    }

    #[test]
    fn chunks_reconstruct_the_original_words() {
        let body = "the quick brown fox jumps over the lazy dog ".repeat(20);
        let prefix = "/w 12345 ";
        let rejoined = split_message(prefix, &body, 100)
            .iter()
            .map(|c| c.trim_start_matches(prefix).trim().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let expected = body.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(rejoined, expected);
    }

    #[test]
    fn long_runs_break_mid_word() {
        let body = "a".repeat(100);
        let chunks = split_message("", &body, 50);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(encode_to_kol(chunk).len() <= 50);
        }
        let rejoined: String = chunks.concat();
        assert_eq!(rejoined, body);
    }

    #[test]
    fn outbound_normalization() {
        assert_eq!(normalize_outbound("Hello  everyone"), "Hello everyone");
        assert_eq!(normalize_outbound("Hello everyone\nbye"), "Hello everyone. bye");
        assert_eq!(normalize_outbound("Hello everyone!\nbye"), "Hello everyone! bye");
    }

    #[test]
    fn expensive_characters_count_encoded_not_raw() {
        // Each "é" encodes to three bytes, so far fewer than limit/1 fit.
        let body = "ééé ééé ééé ééé";
        let chunks = split_message("", body, 12);
        for chunk in &chunks {
            assert!(encode_to_kol(chunk).len() <= 12, "chunk: {chunk}");
        }
    }
}
