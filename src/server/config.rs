//! Server configuration

use std::net::SocketAddr;

use crate::protocol::constants::DEFAULT_MD_PORT;

/// Message director configuration options
#[derive(Debug, Clone)]
pub struct MdConfig {
    /// Address to accept downstream participants on
    pub bind_addr: SocketAddr,

    /// Upstream director to attach to, if any
    pub upstream_addr: Option<SocketAddr>,

    /// Maximum concurrent participant connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY on participant sockets
    pub tcp_nodelay: bool,

    /// Connection name reported to the upstream director
    pub con_name: String,

    /// Connection url reported to the upstream director
    pub con_url: String,
}

impl Default for MdConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_MD_PORT)),
            upstream_addr: None,
            max_connections: 0, // Unlimited
            tcp_nodelay: true,  // Routing traffic is latency sensitive
            con_name: "message director".to_string(),
            con_url: String::new(),
        }
    }
}

impl MdConfig {
    /// Create a config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Attach to an upstream director
    pub fn connect(mut self, addr: SocketAddr) -> Self {
        self.upstream_addr = Some(addr);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Toggle TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set the connection name reported upstream
    pub fn con_name(mut self, name: impl Into<String>) -> Self {
        self.con_name = name.into();
        self
    }

    /// Set the connection url reported upstream
    pub fn con_url(mut self, url: impl Into<String>) -> Self {
        self.con_url = url.into();
        self
    }
}
