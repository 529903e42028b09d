//! Network participants
//!
//! A `NetworkParticipant` wraps one framed TCP connection from a downstream
//! peer (client agent, state server, database server, or another director).
//! A dedicated writer task drains an outbound queue per peer, so one slow
//! socket never head-of-line blocks dispatch for everyone else.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};

use crate::channelmap::ChannelRange;
use crate::director::MessageDirector;
use crate::error::{DatagramError, Error};
use crate::protocol::constants::{
    CONTROL_ADD_POST_REMOVE, CONTROL_ADD_RANGE, CONTROL_CLEAR_POST_REMOVES, CONTROL_LOG_MESSAGE,
    CONTROL_MESSAGE, CONTROL_REMOVE_CHANNEL, CONTROL_REMOVE_RANGE, CONTROL_SET_CHANNEL,
    CONTROL_SET_CON_NAME, CONTROL_SET_CON_URL,
};
use crate::protocol::datagram::Datagram;
use crate::protocol::framing;
use crate::protocol::iterator::DatagramIterator;

use super::{Participant, ParticipantCore};

/// A routing endpoint reached over a framed stream transport
pub struct NetworkParticipant {
    core: ParticipantCore,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Datagram>,
    closed: watch::Sender<bool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl NetworkParticipant {
    /// Attach an accepted connection and spawn its reader and writer tasks
    pub(crate) fn spawn(
        md: Arc<MessageDirector>,
        socket: TcpStream,
        peer_addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let participant = Arc::new(Self {
            core: ParticipantCore::new(md),
            peer_addr,
            outbound: outbound_tx,
            closed: closed_tx,
            _permit: permit,
        });
        participant.core.set_name(peer_addr.to_string());

        let handle: Arc<dyn Participant> = Arc::clone(&participant) as Arc<dyn Participant>;
        participant.core.register(&handle);

        let (reader, writer) = socket.into_split();
        tokio::spawn(Arc::clone(&participant).read_loop(reader, closed_rx.clone()));
        tokio::spawn(Arc::clone(&participant).write_loop(writer, outbound_rx, closed_rx));
        participant
    }

    /// Shared participant state
    pub fn core(&self) -> &ParticipantCore {
        &self.core
    }

    /// Remote peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf, mut closed: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = closed.changed() => break,
                frame = framing::read_frame(&mut reader) => match frame {
                    Ok(Some(dg)) => {
                        if let Err(err) = self.receive_datagram(dg) {
                            self.terminate(err.into());
                            break;
                        }
                    }
                    Ok(None) => {
                        self.terminate(Error::ConnectionClosed);
                        break;
                    }
                    Err(err) => {
                        self.terminate(err);
                        break;
                    }
                },
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Datagram>,
        mut closed: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = closed.changed() => break,
                dg = outbound.recv() => match dg {
                    Some(dg) => {
                        if let Err(err) = framing::write_frame(&mut writer, &dg).await {
                            self.terminate(err);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        use tokio::io::AsyncWriteExt;
        let _ = writer.shutdown().await;
    }

    /// Handle one inbound datagram
    ///
    /// Control messages mutate subscription and participant state directly
    /// and never enter the routing queue; everything else is routed through
    /// the early path so a burst from this peer keeps its order.
    fn receive_datagram(&self, dg: Datagram) -> Result<(), DatagramError> {
        if self.core.is_terminated() {
            return Ok(());
        }

        let mut dgi = DatagramIterator::new(&dg);
        let recipient_count = dgi.read_u8()?;
        if recipient_count == 1 && dgi.read_channel()? == CONTROL_MESSAGE {
            let msg = dgi.read_u16()?;
            self.handle_control(msg, &mut dgi)?;
            self.core.director().stats_handle().record_control();
            return Ok(());
        }

        self.core.route_datagram_early(dg);
        Ok(())
    }

    fn handle_control(
        &self,
        msg: u16,
        dgi: &mut DatagramIterator<'_>,
    ) -> Result<(), DatagramError> {
        match msg {
            CONTROL_SET_CHANNEL => self.core.subscribe_channel(dgi.read_channel()?),
            CONTROL_REMOVE_CHANNEL => self.core.unsubscribe_channel(dgi.read_channel()?),
            CONTROL_ADD_RANGE => {
                let lo = dgi.read_channel()?;
                let hi = dgi.read_channel()?;
                self.core.subscribe_range(ChannelRange::new(lo, hi));
            }
            CONTROL_REMOVE_RANGE => {
                let lo = dgi.read_channel()?;
                let hi = dgi.read_channel()?;
                self.core.unsubscribe_range(ChannelRange::new(lo, hi));
            }
            CONTROL_ADD_POST_REMOVE => self.core.add_post_remove(dgi.read_blob()?),
            CONTROL_CLEAR_POST_REMOVES => self.core.clear_post_removes(),
            CONTROL_SET_CON_NAME => self.core.set_name(dgi.read_string()?),
            CONTROL_SET_CON_URL => self.core.set_url(dgi.read_string()?),
            CONTROL_LOG_MESSAGE => {
                // legacy event-log traffic; accepted and ignored
            }
            other => {
                tracing::error!(peer = %self.peer_addr, code = other, "unknown control message");
            }
        }
        Ok(())
    }
}

impl Participant for NetworkParticipant {
    fn core(&self) -> &ParticipantCore {
        &self.core
    }

    fn handle_datagram(&self, dg: &Datagram) {
        // writer task is gone once the participant terminated
        let _ = self.outbound.send(dg.clone());
    }

    fn terminate(&self, err: Error) {
        if self.core.is_terminated() {
            return;
        }
        tracing::info!(peer = %self.peer_addr, error = %err, "lost connection");
        self.core.cleanup();
        let _ = self.closed.send(true);
    }
}
