//! Wire protocol: datagram assembly, reading, and stream framing

pub mod constants;
pub mod datagram;
pub mod framing;
pub mod iterator;

pub use constants::Channel;
pub use datagram::Datagram;
pub use iterator::DatagramIterator;
