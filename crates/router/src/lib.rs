//! Channel router: owns the channel identity set and the listens-to graph,
//! fans inbound messages out to every subscribed adapter, and applies
//! canned auto-responses.

pub mod adapter;
pub mod router;

pub use {
    adapter::ChannelAdapter,
    router::{ResponseTrigger, Router},
};
