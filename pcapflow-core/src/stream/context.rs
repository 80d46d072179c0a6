use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

/// Direction of a half-duplex stream within its logical connection.
///
/// Assigned in arrival order: the first half-duplex flow observed for a
/// connection is `Up`, the reverse flow is `Down`. This does not imply which
/// endpoint opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Return a string representation of the direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-layer endpoints of a half-duplex flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl NetFlow {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }

    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Transport-layer endpoints (ports) of a half-duplex flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportFlow {
    pub src: u16,
    pub dst: u16,
}

impl TransportFlow {
    pub fn new(src: u16, dst: u16) -> Self {
        Self { src, dst }
    }

    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Source endpoint of a flow as `ip:port` (IPv6 bracketed).
pub fn source_endpoint(net: &NetFlow, transport: &TransportFlow) -> String {
    SocketAddr::new(net.src, transport.src).to_string()
}

/// Destination endpoint of a flow as `ip:port` (IPv6 bracketed).
pub fn destination_endpoint(net: &NetFlow, transport: &TransportFlow) -> String {
    SocketAddr::new(net.dst, transport.dst).to_string()
}

/// Identity string of one half-duplex flow, e.g. `10.0.0.1:5000->10.0.0.2:80`.
pub fn flow_key(net: &NetFlow, transport: &TransportFlow) -> String {
    format!(
        "{}->{}",
        source_endpoint(net, transport),
        destination_endpoint(net, transport)
    )
}

/// Metadata attached to every stream handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamMeta {
    pub connection_id: u64,
    pub direction: Direction,
    pub src: String,
    pub dst: String,
}

impl StreamMeta {
    pub fn new(
        connection_id: u64,
        direction: Direction,
        src: impl Into<String>,
        dst: impl Into<String>,
    ) -> Self {
        Self {
            connection_id,
            direction,
            src: src.into(),
            dst: dst.into(),
        }
    }
}

impl fmt::Display for StreamMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}->{}",
            self.connection_id, self.direction, self.src, self.dst
        )
    }
}
