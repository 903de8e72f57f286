//! Session transport between two devices. One TCP connection per pair:
//! a fixed-size handshake exchanging identity and key material, then
//! sealed frames in both directions until either side hangs up.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bump_core::identity::{derive_session_key, open_frame, seal_frame, PublicKey};
use bump_core::wire::decode_frame;
use bump_core::{Keypair, Message, PeerId, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::driver::LinkEvent;

// version byte + peer id + public key
const HANDSHAKE_SIZE: usize = 1 + 16 + 32;
const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Writer handles for live sessions, keyed by peer. Payloads queued here are
/// plaintext frames; the session writer seals them before they hit the wire.
pub type PeerSenders = Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>;

fn handshake_bytes(keypair: &Keypair) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[0] = PROTOCOL_VERSION;
    out[1..17].copy_from_slice(keypair.peer_id().as_bytes());
    out[17..49].copy_from_slice(keypair.public_key().as_bytes());
    out
}

async fn read_handshake(
    stream: &mut TcpStream,
    keypair: &Keypair,
) -> std::io::Result<(PeerId, [u8; 32])> {
    let mut buf = [0u8; HANDSHAKE_SIZE];
    stream.read_exact(&mut buf).await?;
    if buf[0] != PROTOCOL_VERSION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    let mut peer_id = [0u8; 16];
    peer_id.copy_from_slice(&buf[1..17]);
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[17..49]);
    let secret = keypair.shared_secret(&PublicKey::from_bytes(public_key));
    Ok((PeerId::from_bytes(peer_id), derive_session_key(&secret)))
}

/// Accept inbound sessions. Each valid handshake surfaces as an invitation;
/// the session only proceeds once the reply channel answers true.
pub async fn run_listener(
    listener: TcpListener,
    keypair: Arc<Keypair>,
    senders: PeerSenders,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let keypair = keypair.clone();
        let senders = senders.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_inbound(stream, keypair, senders, events).await {
                debug!("inbound session from {} ended: {}", addr, e);
            }
        });
    }
}

async fn handle_inbound(
    mut stream: TcpStream,
    keypair: Arc<Keypair>,
    senders: PeerSenders,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> std::io::Result<()> {
    let (peer_id, session_key) = read_handshake(&mut stream, keypair.as_ref()).await?;

    let (reply_tx, reply_rx) = oneshot::channel();
    if events
        .send(LinkEvent::Inbound {
            peer: peer_id,
            reply: reply_tx,
        })
        .is_err()
    {
        return Ok(());
    }
    if !reply_rx.await.unwrap_or(false) {
        // Closing without answering the handshake is the decline.
        return Ok(());
    }

    stream.write_all(&handshake_bytes(keypair.as_ref())).await?;
    stream.flush().await?;
    run_session(stream, peer_id, session_key, senders, events).await;
    Ok(())
}

/// Dial a discovered peer. Sending our handshake is the invitation; the
/// remote answering with its own is the acceptance. Any failure before the
/// session is up surfaces as `InviteFailed`.
pub async fn connect_to_peer(
    peer: PeerId,
    addr: SocketAddr,
    keypair: Arc<Keypair>,
    senders: PeerSenders,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    if let Err(e) = try_connect(peer, addr, keypair, senders, events.clone()).await {
        debug!("invite to {} at {} failed: {}", peer, addr, e);
        let _ = events.send(LinkEvent::InviteFailed { peer });
    }
}

async fn try_connect(
    expected: PeerId,
    addr: SocketAddr,
    keypair: Arc<Keypair>,
    senders: PeerSenders,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&handshake_bytes(keypair.as_ref())).await?;
    stream.flush().await?;
    let (peer_id, session_key) = read_handshake(&mut stream, keypair.as_ref()).await?;
    if peer_id != expected {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "peer answered with a different identity",
        ));
    }
    run_session(stream, peer_id, session_key, senders, events).await;
    Ok(())
}

/// Pump one established session: register the writer handle, emit `Up`,
/// relay inbound claim frames, and emit `Down` once the link is gone.
async fn run_session(
    stream: TcpStream,
    peer_id: PeerId,
    session_key: [u8; 32],
    senders: PeerSenders,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    senders.lock().await.insert(peer_id, tx);
    let _ = events.send(LinkEvent::Up { peer: peer_id });

    let (mut reader, mut writer) = stream.into_split();

    let write_key = session_key;
    tokio::spawn(async move {
        // Nonces count sealed frames per direction, starting at zero.
        let mut nonce: u64 = 0;
        while let Some(plain) = rx.recv().await {
            let cipher = match seal_frame(&write_key, nonce, &plain) {
                Ok(cipher) => cipher,
                Err(e) => {
                    warn!("frame seal failed: {}", e);
                    break;
                }
            };
            nonce += 1;
            let len = (cipher.len() as u32).to_le_bytes();
            if writer.write_all(&len).await.is_err() || writer.write_all(&cipher).await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });

    let mut nonce: u64 = 0;
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            debug!("oversized frame from {}, closing", peer_id);
            break;
        }
        let mut cipher = vec![0u8; len as usize];
        if reader.read_exact(&mut cipher).await.is_err() {
            break;
        }
        let plain = match open_frame(&session_key, nonce, &cipher) {
            Ok(plain) => plain,
            Err(_) => {
                // Tampered or out-of-sync link; the session key is burned.
                warn!("could not open frame from {}, closing", peer_id);
                break;
            }
        };
        nonce += 1;
        let msg = match decode_frame(&plain) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!("skipping unreadable frame from {}: {}", peer_id, e);
                continue;
            }
        };
        match msg {
            Message::Claim { payload } => {
                let _ = events.send(LinkEvent::Data {
                    peer: peer_id,
                    bytes: payload,
                });
            }
            Message::Bye { .. } => break,
            Message::Announce { .. } => {}
        }
    }

    // Dropping the map entry drops the writer's queue, which ends its task.
    senders.lock().await.remove(&peer_id);
    let _ = events.send(LinkEvent::Down { peer: peer_id });
}
