//! Synthetic captures shared by the integration tests.

#![allow(dead_code)]

pub const SYN: u8 = 0x02;
pub const ACK: u8 = 0x10;
pub const PSH_ACK: u8 = 0x18;
pub const FIN_ACK: u8 = 0x11;

/// One side of a TCP conversation that tracks its own sequence number.
pub struct Peer {
    pub ip: [u8; 4],
    pub port: u16,
    pub seq: u32,
}

impl Peer {
    pub fn new(ip: [u8; 4], port: u16, isn: u32) -> Self {
        Self { ip, port, seq: isn }
    }

    /// Ethernet frame from `self` to `to`; advances the sequence number.
    pub fn send(&mut self, to: &Peer, flags: u8, payload: &[u8]) -> Vec<u8> {
        let frame = ethernet_ipv4_tcp(self, to, flags, payload);
        self.seq = self.seq.wrapping_add(payload.len() as u32);
        if flags & (SYN | 0x01) != 0 {
            self.seq = self.seq.wrapping_add(1);
        }
        frame
    }
}

fn ethernet_ipv4_tcp(from: &Peer, to: &Peer, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut f = vec![
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // Dst MAC
        0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // Src MAC
        0x08, 0x00, // IPv4
    ];

    let total_len = (20 + 20 + payload.len()) as u16;
    f.extend_from_slice(&[0x45, 0x00]);
    f.extend_from_slice(&total_len.to_be_bytes());
    f.extend_from_slice(&[0x00, 0x01, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00]);
    f.extend_from_slice(&from.ip);
    f.extend_from_slice(&to.ip);

    f.extend_from_slice(&from.port.to_be_bytes());
    f.extend_from_slice(&to.port.to_be_bytes());
    f.extend_from_slice(&from.seq.to_be_bytes());
    f.extend_from_slice(&to.seq.to_be_bytes()); // ack
    f.push(0x50);
    f.push(flags);
    f.extend_from_slice(&[0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);
    f.extend_from_slice(payload);
    f
}

/// Legacy little-endian Ethernet pcap, frames 1ms apart.
pub fn pcap(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut data = vec![
        0xd4, 0xc3, 0xb2, 0xa1, // Magic
        0x02, 0x00, 0x04, 0x00, // Version 2.4
        0x00, 0x00, 0x00, 0x00, // Thiszone
        0x00, 0x00, 0x00, 0x00, // Sigfigs
        0xff, 0xff, 0x00, 0x00, // Snaplen
        0x01, 0x00, 0x00, 0x00, // Ethernet
    ];
    for (i, frame) in frames.iter().enumerate() {
        let ts_sec: u32 = 1_700_000_000;
        let ts_usec = (i as u32) * 1000;
        data.extend_from_slice(&ts_sec.to_le_bytes());
        data.extend_from_slice(&ts_usec.to_le_bytes());
        data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        data.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        data.extend_from_slice(frame);
    }
    data
}

/// A client making `requests` to a server that answers every one, with the
/// handshake and teardown around them.
pub fn http_conversation(client_port: u16, requests: &[(&[u8], &[u8])]) -> Vec<Vec<u8>> {
    let mut client = Peer::new([10, 1, 0, 1], client_port, 1000);
    let mut server = Peer::new([10, 1, 0, 2], 80, 9000);

    let mut frames = vec![
        client.send(&server, SYN, b""),
        server.send(&client, SYN | ACK, b""),
        client.send(&server, ACK, b""),
    ];
    for (request, response) in requests {
        frames.push(client.send(&server, PSH_ACK, request));
        frames.push(server.send(&client, PSH_ACK, response));
    }
    frames.push(client.send(&server, FIN_ACK, b""));
    frames.push(server.send(&client, FIN_ACK, b""));
    frames
}
