//! Message director server
//!
//! Handles the TCP accept loop and attaches each incoming connection to the
//! director as a network participant.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::director::MessageDirector;
use crate::error::Result;
use crate::participant::NetworkParticipant;
use crate::server::config::MdConfig;
use crate::upstream::UpstreamLink;

/// Message director server
pub struct MdServer {
    config: MdConfig,
    md: Arc<MessageDirector>,
    listener: TcpListener,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl MdServer {
    /// Bind the listening socket and construct the director
    pub async fn bind(config: MdConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "message director listening");

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            config,
            md: MessageDirector::new(),
            listener,
            connection_semaphore,
        })
    }

    /// The director behind this server
    pub fn director(&self) -> &Arc<MessageDirector> {
        &self.md
    }

    /// The bound listen address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server
    ///
    /// Starts the dispatch loop, attaches to the configured upstream, and
    /// accepts participants until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let dispatch = self.md.spawn_dispatch();
        self.connect_upstream().await?;

        let result = self.accept_loop().await;
        self.md.shutdown();
        dispatch.abort();
        result
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let dispatch = self.md.spawn_dispatch();
        self.connect_upstream().await?;

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
            result = self.accept_loop() => result,
        };

        self.md.shutdown();
        dispatch.abort();
        result
    }

    async fn connect_upstream(&self) -> Result<()> {
        if let Some(addr) = self.config.upstream_addr {
            UpstreamLink::connect(
                Arc::clone(&self.md),
                addr,
                &self.config.con_name,
                &self.config.con_url,
            )
            .await?;
        }
        Ok(())
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            let _ = socket.set_nodelay(true);
        }

        tracing::info!(peer = %peer_addr, "incoming connection");
        NetworkParticipant::spawn(Arc::clone(&self.md), socket, peer_addr, permit);
    }
}
