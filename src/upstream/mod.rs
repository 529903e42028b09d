//! Upstream federation
//!
//! A director may attach to a peer director and act as one of its
//! participants: it replays the net effect of local subscription changes
//! and mirrors every locally-originated datagram. `UpstreamHandle` is the
//! always-present control point; it silently drops traffic until an
//! `UpstreamLink` connects, mirroring a director that simply has no
//! upstream configured.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::channelmap::ChannelRange;
use crate::director::MessageDirector;
use crate::error::Result;
use crate::protocol::constants::{
    Channel, CONTROL_ADD_POST_REMOVE, CONTROL_ADD_RANGE, CONTROL_CLEAR_POST_REMOVES,
    CONTROL_REMOVE_CHANNEL, CONTROL_REMOVE_RANGE, CONTROL_SET_CHANNEL, CONTROL_SET_CON_NAME,
    CONTROL_SET_CON_URL,
};
use crate::protocol::datagram::Datagram;
use crate::protocol::framing;

/// Outbound path to the upstream director, when one is connected
pub struct UpstreamHandle {
    outbound: Mutex<Option<mpsc::UnboundedSender<Datagram>>>,
}

impl UpstreamHandle {
    pub(crate) fn new() -> Self {
        Self {
            outbound: Mutex::new(None),
        }
    }

    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<Datagram>) {
        *self.outbound.lock() = Some(tx);
    }

    pub(crate) fn clear(&self) {
        *self.outbound.lock() = None;
    }

    /// Whether an upstream director is currently connected
    pub fn is_connected(&self) -> bool {
        self.outbound.lock().is_some()
    }

    fn send(&self, dg: Datagram) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(dg).is_ok(),
            None => false,
        }
    }

    /// Mirror a locally-originated datagram upstream
    pub(crate) fn forward(&self, dg: Datagram) -> bool {
        self.send(dg)
    }

    pub(crate) fn add_channel(&self, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_SET_CHANNEL);
        dg.add_channel(channel);
        self.send(dg);
    }

    pub(crate) fn remove_channel(&self, channel: Channel) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_REMOVE_CHANNEL);
        dg.add_channel(channel);
        self.send(dg);
    }

    pub(crate) fn add_range(&self, range: ChannelRange) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_ADD_RANGE);
        dg.add_channel(range.lo);
        dg.add_channel(range.hi);
        self.send(dg);
    }

    pub(crate) fn remove_range(&self, range: ChannelRange) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_REMOVE_RANGE);
        dg.add_channel(range.lo);
        dg.add_channel(range.hi);
        self.send(dg);
    }

    /// Hand a post-remove datagram upstream for safekeeping
    pub(crate) fn preroute_post_remove(&self, post_remove: &Datagram) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_ADD_POST_REMOVE);
        dg.add_blob(post_remove);
        self.send(dg);
    }

    /// Retract this director's stored post-removes upstream
    pub(crate) fn recall_post_removes(&self) {
        if !self.is_connected() {
            return;
        }
        let mut dg = Datagram::new();
        dg.add_control_header(CONTROL_CLEAR_POST_REMOVES);
        self.send(dg);
    }
}

/// Outbound connection to a peer director
pub struct UpstreamLink;

impl UpstreamLink {
    /// Connect to the upstream director and wire it into the local one
    ///
    /// Sends the connection name and url, then spawns the writer and reader
    /// tasks. Datagrams arriving from upstream are injected into the local
    /// queue with no sender, so they are dispatched locally but never echoed
    /// back.
    pub async fn connect(
        md: Arc<MessageDirector>,
        addr: SocketAddr,
        con_name: &str,
        con_url: &str,
    ) -> Result<()> {
        let socket = TcpStream::connect(addr).await?;
        let _ = socket.set_nodelay(true);
        tracing::info!(addr = %addr, "connected to upstream message director");

        let (reader, writer) = socket.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut name_dg = Datagram::new();
        name_dg.add_control_header(CONTROL_SET_CON_NAME);
        name_dg.add_string(con_name);
        let _ = tx.send(name_dg);

        let mut url_dg = Datagram::new();
        url_dg.add_control_header(CONTROL_SET_CON_URL);
        url_dg.add_string(con_url);
        let _ = tx.send(url_dg);

        md.upstream_handle().install(tx);

        tokio::spawn(Self::write_loop(Arc::clone(&md), writer, rx));
        tokio::spawn(Self::read_loop(md, reader, addr));
        Ok(())
    }

    async fn write_loop(
        md: Arc<MessageDirector>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Datagram>,
    ) {
        while let Some(dg) = outbound.recv().await {
            if let Err(err) = framing::write_frame(&mut writer, &dg).await {
                tracing::warn!(error = %err, "failed to write to upstream");
                break;
            }
        }

        md.upstream_handle().clear();
        use tokio::io::AsyncWriteExt;
        let _ = writer.shutdown().await;
    }

    async fn read_loop(md: Arc<MessageDirector>, mut reader: OwnedReadHalf, addr: SocketAddr) {
        loop {
            match framing::read_frame(&mut reader).await {
                Ok(Some(dg)) => md.route_datagram_early(dg, None),
                Ok(None) => {
                    tracing::warn!(addr = %addr, "upstream connection closed; local routing continues");
                    break;
                }
                Err(err) => {
                    tracing::warn!(addr = %addr, error = %err, "upstream read failed; local routing continues");
                    break;
                }
            }
        }
        md.upstream_handle().clear();
    }
}
