//! LAN discovery over UDP multicast. Senders announce themselves on a
//! fixed group; receivers listen and report every sighting upstream.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bump_core::wire::{decode_frame, encode_frame};
use bump_core::{Keypair, Message, PROTOCOL_VERSION, SERVICE_NAME};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::driver::LinkEvent;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 77, 77);
pub const BEACON_INTERVAL: Duration = Duration::from_secs(4);

fn announce_socket() -> std::io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    // TTL 1 keeps beacons on the local segment.
    socket.set_multicast_ttl_v4(1)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

fn browse_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    socket.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// Announce this device every beacon interval until the task is cancelled.
/// The announce carries the port the session listener is bound to.
pub async fn advertise_loop(
    keypair: Arc<Keypair>,
    discovery_port: u16,
    listen_port: u16,
) -> std::io::Result<()> {
    let socket = announce_socket()?;
    let announce = Message::announce(keypair.peer_id(), keypair.public_key().clone(), listen_port);
    let frame = encode_frame(&announce)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    debug!("announcing {} on {}", keypair.peer_id(), dest);
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            warn!("announce send failed: {}", e);
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

/// Listen for announces and report each valid sighting. Repeats are fine;
/// the listener upstream already ignores peers it knows about.
pub async fn browse_loop(
    keypair: Arc<Keypair>,
    discovery_port: u16,
    events: UnboundedSender<LinkEvent>,
) -> std::io::Result<()> {
    let socket = browse_socket(discovery_port)?;
    let own_id = keypair.peer_id();
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            continue;
        };
        let Message::Announce {
            protocol_version,
            service,
            peer_id,
            listen_port,
            ..
        } = msg
        else {
            continue;
        };
        if protocol_version != PROTOCOL_VERSION || service != SERVICE_NAME || peer_id == own_id {
            continue;
        }
        let addr = SocketAddr::new(from.ip(), listen_port);
        debug!("sighted {} at {}", peer_id, addr);
        if events.send(LinkEvent::Found { peer: peer_id, addr }).is_err() {
            return Ok(());
        }
    }
}
