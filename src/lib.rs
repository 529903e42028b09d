//! # otpmd
//!
//! Message director core for OTP-style distributed object clusters: a
//! channel-addressed datagram bus. Every cluster process attaches as a
//! *participant*, subscribes to 64-bit channels or inclusive channel
//! ranges, and publishes datagrams whose header lists one or more
//! destination channels. The director multicasts each datagram to every
//! participant whose subscriptions intersect a destination channel.
//!
//! Directors federate: one director can attach to a peer as a client,
//! replaying the net effect of its local subscriptions and mirroring
//! locally-originated traffic, which builds a hierarchical bus.
//!
//! # Example
//!
//! ```no_run
//! use otpmd::{MdConfig, MdServer};
//!
//! # async fn example() -> otpmd::Result<()> {
//! let config = MdConfig::with_addr("127.0.0.1:7199".parse().unwrap())
//!     .con_name("district md");
//! let server = MdServer::bind(config).await?;
//! server.run().await
//! # }
//! ```
//!
//! In-process components attach with [`LocalParticipant`]:
//!
//! ```
//! use otpmd::{Datagram, LocalParticipant, MessageDirector};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let md = MessageDirector::new();
//! md.spawn_dispatch();
//!
//! let (agent, mut inbox) = LocalParticipant::create(md.clone(), "client agent");
//! agent.subscribe_channel(1000);
//!
//! let mut dg = Datagram::new();
//! dg.add_server_header(&[1000], 42, 7);
//! agent.route_datagram(dg);
//!
//! let delivered = inbox.recv().await.unwrap();
//! # }
//! ```

pub mod channelmap;
pub mod director;
pub mod error;
pub mod participant;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod upstream;

pub use channelmap::{ChannelMap, ChannelRange, Subscriber};
pub use director::MessageDirector;
pub use error::{DatagramError, Error, Result};
pub use participant::{LocalParticipant, NetworkParticipant, Participant, ParticipantCore};
pub use protocol::constants::Channel;
pub use protocol::datagram::Datagram;
pub use protocol::iterator::DatagramIterator;
pub use server::{MdConfig, MdServer};
pub use stats::StatsSnapshot;
pub use upstream::UpstreamLink;
