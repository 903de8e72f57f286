//! LAN control protocol: message types, service identifier, version.

use serde::{Deserialize, Serialize};

use crate::identity::{PeerId, PublicKey};

/// Current protocol version. Carried in every announce and checked during
/// the session handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Service identifier announced during discovery. Devices ignore announces
/// for any other service.
pub const SERVICE_NAME: &str = "bump-pay-v1";

/// All control message types. Encoding is bincode; framing is length-prefix
/// (see wire module). Session frames are sealed after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Discovery: advertise presence plus how to connect back.
    Announce {
        protocol_version: u8,
        service: String,
        peer_id: PeerId,
        public_key: PublicKey,
        listen_port: u16,
    },
    /// The claim payload, carried opaquely inside an established session.
    Claim { payload: Vec<u8> },
    /// Graceful session close.
    Bye { peer_id: PeerId },
}

impl Message {
    /// Build an announce for this device.
    pub fn announce(peer_id: PeerId, public_key: PublicKey, listen_port: u16) -> Self {
        Message::Announce {
            protocol_version: PROTOCOL_VERSION,
            service: SERVICE_NAME.to_string(),
            peer_id,
            public_key,
            listen_port,
        }
    }
}
