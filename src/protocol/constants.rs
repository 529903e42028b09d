//! Protocol constants
//!
//! Channel addressing and the control message codes the message director
//! interprets. The numeric values match the wider OTP ecosystem and must not
//! be changed independently of it.

/// 64-bit routing address, the unit of publish/subscribe
pub type Channel = u64;

/// Reserved channel identifying director-control traffic
pub const CONTROL_MESSAGE: Channel = 1;

/// Subscribe the sending participant to a channel
pub const CONTROL_SET_CHANNEL: u16 = 2001;
/// Unsubscribe the sending participant from a channel
pub const CONTROL_REMOVE_CHANNEL: u16 = 2002;
/// Set the participant's diagnostic name
pub const CONTROL_SET_CON_NAME: u16 = 2004;
/// Set the participant's diagnostic url
pub const CONTROL_SET_CON_URL: u16 = 2005;
/// Subscribe the sending participant to an inclusive channel range
pub const CONTROL_ADD_RANGE: u16 = 2008;
/// Unsubscribe the sending participant from a channel range
pub const CONTROL_REMOVE_RANGE: u16 = 2009;
/// Store a datagram to route if the participant disconnects abruptly
pub const CONTROL_ADD_POST_REMOVE: u16 = 2010;
/// Discard the participant's stored post-remove datagrams
pub const CONTROL_CLEAR_POST_REMOVES: u16 = 2011;
/// Legacy event-log message; accepted and ignored
pub const CONTROL_LOG_MESSAGE: u16 = 2030;

/// Largest datagram the u16 frame length prefix can carry
pub const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// Default listen port for a message director
pub const DEFAULT_MD_PORT: u16 = 7199;
