//! Host-driven handoff coordinator: the host feeds peer events and clock
//! ticks; the coordinator returns transport commands and notifications.
//! No I/O here. One coordinator drives exactly one handoff attempt.

use crate::identity::PeerId;
use crate::payload::{ClaimPayload, PayloadError};

/// Ticks a session spends looking for a peer before the host is told to
/// surface the fallback link.
pub const DISCOVERY_TIMEOUT_TICKS: u64 = 10;

/// Ticks after dispatch before delivery is reported as unconfirmed.
pub const SEND_TIMEOUT_TICKS: u64 = 5;

/// Ticks between a good payload receipt and automatic teardown.
pub const TEARDOWN_DELAY_TICKS: u64 = 1;

/// Which side of the handoff this coordinator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Where the session currently stands. `Discovering` is advertising for a
/// sender and browsing for a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Discovering,
    Connected,
    Sent,
    Received,
    TornDown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Discovering => "discovering",
            Phase::Connected => "connected",
            Phase::Sent => "sent",
            Phase::Received => "received",
            Phase::TornDown => "torn_down",
        }
    }
}

/// Transport-reported connection state for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
}

/// Decides which nearby peer gets a session. The state machine stays fixed;
/// only this policy varies. Implementations may keep history, so methods
/// take `&mut self`.
pub trait PeerSelectionStrategy: Send {
    /// Whether to accept an inbound session request from `peer`.
    fn accept_invitation(&mut self, peer: PeerId, connected: &[PeerId]) -> bool;
    /// Whether to invite a discovered `peer`.
    fn invite_peer(&mut self, peer: PeerId, connected: &[PeerId]) -> bool;
}

/// Default policy: take the first candidate, ignore everyone after a
/// session exists. No identity verification of the peer.
pub struct AcceptFirst;

impl PeerSelectionStrategy for AcceptFirst {
    fn accept_invitation(&mut self, _peer: PeerId, connected: &[PeerId]) -> bool {
        connected.is_empty()
    }

    fn invite_peer(&mut self, _peer: PeerId, connected: &[PeerId]) -> bool {
        connected.is_empty()
    }
}

/// The single timer a session may hold. Owned by the session value and
/// dropped with it, so a timer can never fire for a dead session.
#[derive(Debug, Clone, Copy)]
enum SessionTimer {
    Discovery { deadline: u64 },
    Send { deadline: u64 },
    Teardown { deadline: u64 },
}

impl SessionTimer {
    fn deadline(&self) -> u64 {
        match *self {
            SessionTimer::Discovery { deadline }
            | SessionTimer::Send { deadline }
            | SessionTimer::Teardown { deadline } => deadline,
        }
    }
}

/// One handoff attempt: who is connected and which timer is armed.
/// Exists from discovery start until teardown.
struct PeerSession {
    connected: Vec<PeerId>,
    timer: Option<SessionTimer>,
}

/// Per-role session state machine. The host owns the transport and the
/// clock; this type owns the rules.
pub struct HandoffCoordinator {
    role: Role,
    phase: Phase,
    session: Option<PeerSession>,
    tick_count: u64,
    strategy: Box<dyn PeerSelectionStrategy>,
    /// Serialized claim payload, present on the sender side only.
    payload_bytes: Option<Vec<u8>>,
}

impl HandoffCoordinator {
    /// Sender side: serializes the payload up front so dispatch on connect
    /// cannot fail.
    pub fn sender(payload: &ClaimPayload) -> Result<Self, HandoffError> {
        let bytes = payload.encode()?;
        Ok(Self {
            role: Role::Sender,
            phase: Phase::Idle,
            session: None,
            tick_count: 0,
            strategy: Box::new(AcceptFirst),
            payload_bytes: Some(bytes),
        })
    }

    /// Receiver side.
    pub fn receiver() -> Self {
        Self {
            role: Role::Receiver,
            phase: Phase::Idle,
            session: None,
            tick_count: 0,
            strategy: Box::new(AcceptFirst),
            payload_bytes: None,
        }
    }

    /// Swap in a different peer-selection policy.
    pub fn with_strategy(mut self, strategy: Box<dyn PeerSelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connected_peers(&self) -> &[PeerId] {
        match &self.session {
            Some(s) => &s.connected,
            None => &[],
        }
    }

    /// Sender entry point: open the session and start announcing.
    pub fn start_advertising(&mut self) -> Vec<HandoffAction> {
        if self.role != Role::Sender || self.phase != Phase::Idle {
            return Vec::new();
        }
        self.begin_discovery();
        vec![HandoffAction::StartAdvertising]
    }

    /// Receiver entry point: open the session and start scanning.
    pub fn start_browsing(&mut self) -> Vec<HandoffAction> {
        if self.role != Role::Receiver || self.phase != Phase::Idle {
            return Vec::new();
        }
        self.begin_discovery();
        vec![HandoffAction::StartBrowsing]
    }

    fn begin_discovery(&mut self) {
        self.session = Some(PeerSession {
            connected: Vec::new(),
            timer: Some(SessionTimer::Discovery {
                deadline: self.tick_count.saturating_add(DISCOVERY_TIMEOUT_TICKS),
            }),
        });
        self.phase = Phase::Discovering;
    }

    /// Feed one transport event. Events for a session are serialized by the
    /// host, so arrival order here is processing order.
    pub fn on_event(&mut self, event: PeerEvent) -> Result<Vec<HandoffAction>, HandoffError> {
        if self.phase == Phase::Idle || self.phase == Phase::TornDown {
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        match event {
            PeerEvent::PeerFound(peer) => {
                if self.phase == Phase::Discovering {
                    let connected: &[PeerId] = match &self.session {
                        Some(s) => &s.connected,
                        None => &[],
                    };
                    if self.strategy.invite_peer(peer, connected) {
                        actions.push(HandoffAction::Invite(peer));
                    }
                }
            }
            PeerEvent::InvitationReceived(peer) => {
                if self.phase == Phase::Discovering {
                    let connected: &[PeerId] = match &self.session {
                        Some(s) => &s.connected,
                        None => &[],
                    };
                    if self.strategy.accept_invitation(peer, connected) {
                        actions.push(HandoffAction::AcceptInvitation(peer));
                    } else {
                        actions.push(HandoffAction::DeclineInvitation(peer));
                    }
                } else {
                    // One active peer per session; later knocks are refused.
                    actions.push(HandoffAction::DeclineInvitation(peer));
                }
            }
            PeerEvent::PeerStateChanged(_, PeerState::Connecting) => {}
            PeerEvent::PeerStateChanged(peer, PeerState::Connected) => {
                let Some(session) = &mut self.session else {
                    return Ok(actions);
                };
                if !session.connected.contains(&peer) {
                    session.connected.push(peer);
                }
                if self.phase == Phase::Discovering {
                    session.timer = None;
                    actions.push(match self.role {
                        Role::Sender => HandoffAction::StopAdvertising,
                        Role::Receiver => HandoffAction::StopBrowsing,
                    });
                    self.phase = Phase::Connected;
                    if self.role == Role::Sender {
                        if let Some(bytes) = &self.payload_bytes {
                            actions.push(HandoffAction::SendPayload {
                                to: vec![peer],
                                bytes: bytes.clone(),
                            });
                            self.phase = Phase::Sent;
                            session.timer = Some(SessionTimer::Send {
                                deadline: self.tick_count.saturating_add(SEND_TIMEOUT_TICKS),
                            });
                        }
                    }
                }
            }
            PeerEvent::PeerStateChanged(peer, PeerState::Disconnected) => {
                let Some(session) = &mut self.session else {
                    return Ok(actions);
                };
                session.connected.retain(|p| *p != peer);
                if session.connected.is_empty() && self.phase == Phase::Connected {
                    // Lost the peer before the payload moved; resume looking.
                    session.timer = Some(SessionTimer::Discovery {
                        deadline: self.tick_count.saturating_add(DISCOVERY_TIMEOUT_TICKS),
                    });
                    self.phase = Phase::Discovering;
                    actions.push(match self.role {
                        Role::Sender => HandoffAction::StartAdvertising,
                        Role::Receiver => HandoffAction::StartBrowsing,
                    });
                }
            }
            PeerEvent::DataReceived { from, bytes } => {
                if self.role == Role::Receiver && self.phase == Phase::Connected {
                    let known = self
                        .session
                        .as_ref()
                        .map(|s| s.connected.contains(&from))
                        .unwrap_or(false);
                    if known {
                        // A bad frame is dropped here and the session stays
                        // up, so the sender can try again.
                        let payload = ClaimPayload::decode(&bytes)?;
                        self.phase = Phase::Received;
                        if let Some(session) = &mut self.session {
                            session.timer = Some(SessionTimer::Teardown {
                                deadline: self.tick_count.saturating_add(TEARDOWN_DELAY_TICKS),
                            });
                        }
                        actions.push(HandoffAction::PayloadReceived(payload));
                    }
                }
            }
        }
        Ok(actions)
    }

    /// Clock tick from the host. Fires at most one timer.
    pub fn tick(&mut self) -> Vec<HandoffAction> {
        self.tick_count = self.tick_count.saturating_add(1);
        let mut actions = Vec::new();
        let fired = self
            .session
            .as_ref()
            .and_then(|s| s.timer)
            .filter(|t| self.tick_count >= t.deadline());
        match fired {
            Some(SessionTimer::Discovery { .. }) => {
                if let Some(session) = &mut self.session {
                    session.timer = None;
                }
                // Still discovering: keep listening, let the host show the
                // fallback link.
                actions.push(HandoffAction::DiscoveryTimedOut);
            }
            Some(SessionTimer::Send { .. }) => {
                if let Some(session) = &mut self.session {
                    session.timer = None;
                }
                actions.push(HandoffAction::DeliveryUnconfirmed);
            }
            Some(SessionTimer::Teardown { .. }) => {
                self.session = None;
                self.phase = Phase::TornDown;
                actions.push(HandoffAction::Disconnect);
            }
            None => {}
        }
        actions
    }

    /// Tear the session down. Idempotent; cancels any armed timer and tells
    /// the transport to release everything.
    pub fn stop(&mut self) -> Vec<HandoffAction> {
        if self.phase == Phase::TornDown {
            return Vec::new();
        }
        let was_idle = self.phase == Phase::Idle;
        self.session = None;
        self.phase = Phase::TornDown;
        if was_idle {
            return Vec::new();
        }
        vec![
            match self.role {
                Role::Sender => HandoffAction::StopAdvertising,
                Role::Receiver => HandoffAction::StopBrowsing,
            },
            HandoffAction::Disconnect,
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),
}

/// What the transport reports into the coordinator.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A browser saw an advertised peer.
    PeerFound(PeerId),
    /// An advertiser got an inbound session request.
    InvitationReceived(PeerId),
    /// Connection state moved for one peer.
    PeerStateChanged(PeerId, PeerState),
    /// Bytes arrived from a connected peer.
    DataReceived { from: PeerId, bytes: Vec<u8> },
}

/// What the coordinator asks the host to do, plus notifications the host
/// surfaces to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum HandoffAction {
    StartAdvertising,
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    Invite(PeerId),
    AcceptInvitation(PeerId),
    DeclineInvitation(PeerId),
    SendPayload { to: Vec<PeerId>, bytes: Vec<u8> },
    Disconnect,
    /// A claim payload arrived and decoded cleanly.
    PayloadReceived(ClaimPayload),
    /// No peer connected inside the discovery window.
    DiscoveryTimedOut,
    /// Dispatched but never confirmed; the server record stays authoritative.
    DeliveryUnconfirmed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::ClaimId;

    fn sample_payload() -> ClaimPayload {
        ClaimPayload::new(
            ClaimId::generate(),
            "2f7d1a9c0b8e5d4a3c2b1a0f9e8d7c6b".into(),
            "USDC".into(),
            10.0,
        )
    }

    fn peer(n: u8) -> PeerId {
        PeerId::from_bytes([n; 16])
    }

    fn connected(c: &mut HandoffCoordinator, p: PeerId) -> Vec<HandoffAction> {
        c.on_event(PeerEvent::PeerStateChanged(p, PeerState::Connected))
            .unwrap()
    }

    #[test]
    fn sender_start_advertises() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        assert_eq!(c.phase(), Phase::Idle);
        let actions = c.start_advertising();
        assert_eq!(actions, vec![HandoffAction::StartAdvertising]);
        assert_eq!(c.phase(), Phase::Discovering);
    }

    #[test]
    fn start_twice_is_inert() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        assert!(c.start_advertising().is_empty());
    }

    #[test]
    fn start_with_wrong_role_is_inert() {
        let mut c = HandoffCoordinator::receiver();
        assert!(c.start_advertising().is_empty());
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[test]
    fn sender_connect_stops_advertising_and_sends() {
        let payload = sample_payload();
        let mut c = HandoffCoordinator::sender(&payload).unwrap();
        c.start_advertising();
        let actions = connected(&mut c, peer(1));
        assert_eq!(actions[0], HandoffAction::StopAdvertising);
        match &actions[1] {
            HandoffAction::SendPayload { to, bytes } => {
                assert_eq!(to, &vec![peer(1)]);
                assert_eq!(ClaimPayload::decode(bytes).unwrap(), payload);
            }
            other => panic!("expected SendPayload, got {other:?}"),
        }
        assert_eq!(c.phase(), Phase::Sent);
        assert_eq!(c.connected_peers(), &[peer(1)]);
    }

    #[test]
    fn sender_discovery_timeout_fires_once_and_keeps_listening() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        for _ in 0..DISCOVERY_TIMEOUT_TICKS - 1 {
            assert!(c.tick().is_empty());
        }
        assert_eq!(c.tick(), vec![HandoffAction::DiscoveryTimedOut]);
        assert_eq!(c.phase(), Phase::Discovering);
        assert!(c.tick().is_empty());

        // A late peer still gets the payload.
        let actions = connected(&mut c, peer(7));
        assert!(actions
            .iter()
            .any(|a| matches!(a, HandoffAction::SendPayload { .. })));
    }

    #[test]
    fn sender_send_timeout_reports_unconfirmed_once() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        connected(&mut c, peer(1));
        for _ in 0..SEND_TIMEOUT_TICKS - 1 {
            assert!(c.tick().is_empty());
        }
        assert_eq!(c.tick(), vec![HandoffAction::DeliveryUnconfirmed]);
        assert_eq!(c.phase(), Phase::Sent);
        assert!(c.tick().is_empty());
    }

    #[test]
    fn receiver_flow_receives_payload() {
        let payload = sample_payload();
        let mut c = HandoffCoordinator::receiver();
        assert_eq!(c.start_browsing(), vec![HandoffAction::StartBrowsing]);
        let actions = c.on_event(PeerEvent::PeerFound(peer(1))).unwrap();
        assert_eq!(actions, vec![HandoffAction::Invite(peer(1))]);
        let actions = connected(&mut c, peer(1));
        assert_eq!(actions, vec![HandoffAction::StopBrowsing]);
        assert_eq!(c.phase(), Phase::Connected);

        let actions = c
            .on_event(PeerEvent::DataReceived {
                from: peer(1),
                bytes: payload.encode().unwrap(),
            })
            .unwrap();
        assert_eq!(actions, vec![HandoffAction::PayloadReceived(payload)]);
        assert_eq!(c.phase(), Phase::Received);
    }

    #[test]
    fn receiver_tears_down_after_receipt() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        connected(&mut c, peer(1));
        c.on_event(PeerEvent::DataReceived {
            from: peer(1),
            bytes: sample_payload().encode().unwrap(),
        })
        .unwrap();

        assert_eq!(c.tick(), vec![HandoffAction::Disconnect]);
        assert_eq!(c.phase(), Phase::TornDown);
        assert!(c.tick().is_empty());
        assert!(c
            .on_event(PeerEvent::PeerFound(peer(2)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_payload_keeps_session_alive() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        connected(&mut c, peer(1));

        let err = c
            .on_event(PeerEvent::DataReceived {
                from: peer(1),
                bytes: b"{not a payload".to_vec(),
            })
            .unwrap_err();
        assert!(matches!(err, HandoffError::MalformedPayload(_)));
        assert_eq!(c.phase(), Phase::Connected);

        // A clean resend still lands.
        let actions = c
            .on_event(PeerEvent::DataReceived {
                from: peer(1),
                bytes: sample_payload().encode().unwrap(),
            })
            .unwrap();
        assert!(matches!(actions[0], HandoffAction::PayloadReceived(_)));
    }

    #[test]
    fn data_from_unknown_peer_is_ignored() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        connected(&mut c, peer(1));
        let actions = c
            .on_event(PeerEvent::DataReceived {
                from: peer(9),
                bytes: sample_payload().encode().unwrap(),
            })
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(c.phase(), Phase::Connected);
    }

    #[test]
    fn first_invitation_accepted_second_declined() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        let actions = c.on_event(PeerEvent::InvitationReceived(peer(1))).unwrap();
        assert_eq!(actions, vec![HandoffAction::AcceptInvitation(peer(1))]);
        connected(&mut c, peer(1));
        let actions = c.on_event(PeerEvent::InvitationReceived(peer(2))).unwrap();
        assert_eq!(actions, vec![HandoffAction::DeclineInvitation(peer(2))]);
    }

    #[test]
    fn later_peers_not_invited_while_connected() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        let actions = c.on_event(PeerEvent::PeerFound(peer(1))).unwrap();
        assert_eq!(actions, vec![HandoffAction::Invite(peer(1))]);
        connected(&mut c, peer(1));
        assert!(c
            .on_event(PeerEvent::PeerFound(peer(2)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn stop_releases_and_is_idempotent() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        let actions = c.stop();
        assert_eq!(
            actions,
            vec![HandoffAction::StopAdvertising, HandoffAction::Disconnect]
        );
        assert_eq!(c.phase(), Phase::TornDown);
        assert!(c.stop().is_empty());
    }

    #[test]
    fn stop_before_start_holds_nothing() {
        let mut c = HandoffCoordinator::receiver();
        assert!(c.stop().is_empty());
        assert_eq!(c.phase(), Phase::TornDown);
        assert!(c.start_browsing().is_empty());
    }

    #[test]
    fn disconnect_before_transfer_resumes_discovery() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        connected(&mut c, peer(1));
        let actions = c
            .on_event(PeerEvent::PeerStateChanged(peer(1), PeerState::Disconnected))
            .unwrap();
        assert_eq!(actions, vec![HandoffAction::StartBrowsing]);
        assert_eq!(c.phase(), Phase::Discovering);
        assert!(c.connected_peers().is_empty());

        // The discovery window restarts from the disconnect.
        for _ in 0..DISCOVERY_TIMEOUT_TICKS - 1 {
            assert!(c.tick().is_empty());
        }
        assert_eq!(c.tick(), vec![HandoffAction::DiscoveryTimedOut]);
    }

    #[test]
    fn sender_disconnect_after_dispatch_stays_sent() {
        let mut c = HandoffCoordinator::sender(&sample_payload()).unwrap();
        c.start_advertising();
        connected(&mut c, peer(1));
        let actions = c
            .on_event(PeerEvent::PeerStateChanged(peer(1), PeerState::Disconnected))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(c.phase(), Phase::Sent);
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut c = HandoffCoordinator::receiver();
        assert!(c
            .on_event(PeerEvent::PeerFound(peer(1)))
            .unwrap()
            .is_empty());
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[test]
    fn strategy_gates_invitations() {
        struct DeclineAll;
        impl PeerSelectionStrategy for DeclineAll {
            fn accept_invitation(&mut self, _peer: PeerId, _connected: &[PeerId]) -> bool {
                false
            }
            fn invite_peer(&mut self, _peer: PeerId, _connected: &[PeerId]) -> bool {
                false
            }
        }

        let mut c = HandoffCoordinator::sender(&sample_payload())
            .unwrap()
            .with_strategy(Box::new(DeclineAll));
        c.start_advertising();
        let actions = c.on_event(PeerEvent::InvitationReceived(peer(1))).unwrap();
        assert_eq!(actions, vec![HandoffAction::DeclineInvitation(peer(1))]);

        let mut c = HandoffCoordinator::receiver().with_strategy(Box::new(DeclineAll));
        c.start_browsing();
        assert!(c
            .on_event(PeerEvent::PeerFound(peer(1)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn connecting_state_is_a_no_op() {
        let mut c = HandoffCoordinator::receiver();
        c.start_browsing();
        let actions = c
            .on_event(PeerEvent::PeerStateChanged(peer(1), PeerState::Connecting))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(c.phase(), Phase::Discovering);
    }
}
