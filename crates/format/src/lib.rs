//! Message normalization pipeline.
//!
//! Pure transformations, no I/O: constrained-markup resolution, body
//! segmentation and per-dialect rendering, the game protocol's hand-rolled
//! chat encoding, and the outbound splitter that keeps encoded chunks
//! within the per-message byte limit.

pub mod classify;
pub mod encode;
pub mod message;
pub mod segment;
pub mod strip;

pub use {
    classify::{MessageClass, MessageType, is_rollover_notice, remove_emote_prefix},
    encode::{DEFAULT_MESSAGE_LIMIT, encode_to_kol, normalize_outbound, split_message},
    message::{format_message, strip_zero_width},
    strip::strip_html,
};
