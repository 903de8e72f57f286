//! Bump claim handoff protocol reference implementation.
//! Host-driven: no I/O; the host passes events and receives actions.

pub mod api;
pub mod claim;
pub mod handoff;
pub mod identity;
pub mod link;
pub mod payload;
pub mod protocol;
pub mod wire;

pub use claim::{ClaimId, ClaimRecord, ClaimStatus};
pub use handoff::{HandoffAction, HandoffCoordinator, PeerEvent, PeerState, Phase, Role};
pub use identity::{Keypair, PeerId, PublicKey};
pub use link::{claim_link, parse_claim_link, DEFAULT_LINK_BASE};
pub use payload::ClaimPayload;
pub use protocol::{Message, PROTOCOL_VERSION, SERVICE_NAME};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
