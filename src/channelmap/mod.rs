//! Subscription index: channels, ranges, and the subscribers behind them

mod map;
mod subscriber;

pub use map::ChannelMap;
pub use subscriber::{ChannelRange, Subscriber};
