//! UDP socket ownership and sender filtering.

use crate::error::{GreeError, Result};
use crate::protocol::Datagram;
use log::{debug, error, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram the unit sends; status replies for the full table stay
/// well under this.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Decides which senders may reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderFilter {
    /// Only the configured unicast host
    Host(IpAddr),
    /// Configured host is the broadcast address: accept anyone until a unit
    /// identifies itself, then only that unit
    Broadcast { pinned: Option<IpAddr> },
}

impl SenderFilter {
    pub fn for_host(host: IpAddr) -> Self {
        if is_broadcast(host) {
            SenderFilter::Broadcast { pinned: None }
        } else {
            SenderFilter::Host(host)
        }
    }

    pub fn accepts(&self, from: &SocketAddr) -> bool {
        match self {
            SenderFilter::Host(host) => from.ip() == *host,
            SenderFilter::Broadcast { pinned: None } => true,
            SenderFilter::Broadcast { pinned: Some(ip) } => from.ip() == *ip,
        }
    }

    /// Lock a broadcast filter onto the unit that answered. No-op for unicast.
    pub fn pin(&mut self, ip: IpAddr) {
        if let SenderFilter::Broadcast { pinned } = self {
            *pinned = Some(ip);
        }
    }

    /// Accept any sender again until the next unit identifies itself.
    pub fn unpin(&mut self) {
        if let SenderFilter::Broadcast { pinned } = self {
            *pinned = None;
        }
    }
}

fn is_broadcast(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4 == Ipv4Addr::BROADCAST)
}

/// One UDP socket, exclusively owned by one device task.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    filter: SenderFilter,
}

impl UdpTransport {
    /// Bind `0.0.0.0:local_port` for talking to `host`.
    ///
    /// Port 0 picks an ephemeral port. Address reuse is enabled so several
    /// processes can share the legacy fixed port.
    pub fn bind(local_port: u16, host: IpAddr) -> Result<Self> {
        let bind_ip: IpAddr = match host {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => std::net::Ipv6Addr::UNSPECIFIED.into(),
        };
        let addr = SocketAddr::new(bind_ip, local_port);
        let filter = SenderFilter::for_host(host);

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| GreeError::Transport(format!("socket: {}", e)))?;

        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set reuse_address on port {}: {}", local_port, e);
        }
        if matches!(filter, SenderFilter::Broadcast { .. })
            && let Err(e) = socket.set_broadcast(true)
        {
            warn!("Failed to set broadcast on port {}: {}", local_port, e);
        }

        if let Err(e) = socket.bind(&SockAddr::from(addr)) {
            error!("Failed to bind to {}: {}", addr, e);
            return Err(GreeError::Transport(format!("bind {}: {}", addr, e)));
        }
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        debug!("Bound UDP socket {} for host {}", socket.local_addr()?, host);
        Ok(Self { socket, filter })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn pin_sender(&mut self, ip: IpAddr) {
        self.filter.pin(ip);
    }

    pub fn unpin_sender(&mut self) {
        self.filter.unpin();
    }

    /// Fire-and-forget send.
    pub async fn send(&self, datagram: &Datagram) -> Result<()> {
        let sent = self
            .socket
            .send_to(&datagram.payload, datagram.target)
            .await
            .map_err(|e| GreeError::Transport(format!("send to {}: {}", datagram.target, e)))?;
        debug!("Sent {} bytes to {}", sent, datagram.target);
        Ok(())
    }

    /// Wait for the next datagram from an accepted sender; others are dropped here.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            if self.filter.accepts(&from) {
                return Ok((len, from));
            }
            debug!("Received response from unexpected address {}, dropped", from);
        }
    }
}
