//! Drives one handoff attempt end to end: owns the coordinator, translates
//! link events into protocol events, and executes the actions that come back.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bump_core::wire::encode_frame;
use bump_core::{
    claim_link, ClaimPayload, ClaimStatus, HandoffAction, HandoffCoordinator, Keypair, Message,
    PeerEvent, PeerId, PeerState, Phase, Role,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::Config;
use crate::discovery;
use crate::transport::{self, PeerSenders};

/// Protocol ticks advance once a second.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What the live transports report back to the driver.
#[derive(Debug)]
pub enum LinkEvent {
    /// Discovery sighted an announce from another device.
    Found { peer: PeerId, addr: SocketAddr },
    /// An inbound handshake is waiting on an accept-or-decline answer.
    Inbound {
        peer: PeerId,
        reply: oneshot::Sender<bool>,
    },
    /// An outbound dial failed before the session came up.
    InviteFailed { peer: PeerId },
    /// A session is up; its writer handle is registered.
    Up { peer: PeerId },
    /// A session closed.
    Down { peer: PeerId },
    /// Claim bytes arrived over a session.
    Data { peer: PeerId, bytes: Vec<u8> },
}

pub struct Driver {
    coordinator: HandoffCoordinator,
    keypair: Arc<Keypair>,
    config: Config,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    senders: PeerSenders,
    peer_addrs: HashMap<PeerId, SocketAddr>,
    inviting: HashSet<PeerId>,
    advertiser: Option<JoinHandle<()>>,
    browser: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    received: Option<ClaimPayload>,
    discovery_timed_out: bool,
    delivery_unconfirmed: bool,
}

impl Driver {
    pub fn new(
        coordinator: HandoffCoordinator,
        config: Config,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let driver = Self {
            coordinator,
            keypair: Arc::new(Keypair::generate()),
            config,
            events_tx,
            senders: Arc::new(Mutex::new(HashMap::new())),
            peer_addrs: HashMap::new(),
            inviting: HashSet::new(),
            advertiser: None,
            browser: None,
            listener: None,
            received: None,
            discovery_timed_out: false,
            delivery_unconfirmed: false,
        };
        (driver, events_rx)
    }

    /// Kick off the role's discovery side.
    pub async fn start(&mut self) {
        let actions = match self.coordinator.role() {
            Role::Sender => self.coordinator.start_advertising(),
            Role::Receiver => self.coordinator.start_browsing(),
        };
        self.run_actions(actions).await;
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    pub fn connected_peers(&self) -> &[PeerId] {
        self.coordinator.connected_peers()
    }

    /// A claim payload decoded off the link, if one arrived since last asked.
    pub fn take_received(&mut self) -> Option<ClaimPayload> {
        self.received.take()
    }

    pub fn take_discovery_timeout(&mut self) -> bool {
        std::mem::take(&mut self.discovery_timed_out)
    }

    pub fn take_delivery_unconfirmed(&mut self) -> bool {
        std::mem::take(&mut self.delivery_unconfirmed)
    }

    /// Advance the protocol clock by one tick.
    pub async fn tick(&mut self) {
        let actions = self.coordinator.tick();
        self.run_actions(actions).await;
    }

    /// Wind the attempt down and release every transport.
    pub async fn shutdown(&mut self) {
        let actions = self.coordinator.stop();
        self.run_actions(actions).await;
        self.release_transports().await;
    }

    pub async fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Found { peer, addr } => {
                self.peer_addrs.insert(peer, addr);
                self.dispatch(PeerEvent::PeerFound(peer)).await;
            }
            LinkEvent::Inbound { peer, reply } => {
                let actions = match self.coordinator.on_event(PeerEvent::InvitationReceived(peer)) {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!("invitation from {} refused: {}", peer, e);
                        let _ = reply.send(false);
                        return;
                    }
                };
                let accepted = actions
                    .iter()
                    .any(|a| matches!(a, HandoffAction::AcceptInvitation(p) if *p == peer));
                let _ = reply.send(accepted);
                self.run_actions(actions).await;
            }
            LinkEvent::InviteFailed { peer } => {
                self.inviting.remove(&peer);
            }
            LinkEvent::Up { peer } => {
                self.inviting.remove(&peer);
                self.dispatch(PeerEvent::PeerStateChanged(peer, PeerState::Connected))
                    .await;
            }
            LinkEvent::Down { peer } => {
                self.dispatch(PeerEvent::PeerStateChanged(peer, PeerState::Disconnected))
                    .await;
            }
            LinkEvent::Data { peer, bytes } => {
                self.dispatch(PeerEvent::DataReceived { from: peer, bytes })
                    .await;
            }
        }
    }

    async fn dispatch(&mut self, event: PeerEvent) {
        match self.coordinator.on_event(event) {
            Ok(actions) => self.run_actions(actions).await,
            Err(e) => warn!("ignoring peer input: {}", e),
        }
    }

    async fn run_actions(&mut self, actions: Vec<HandoffAction>) {
        for action in actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: HandoffAction) {
        match action {
            HandoffAction::StartAdvertising => {
                self.ensure_listener();
                if let Some(task) = self.advertiser.take() {
                    task.abort();
                }
                let keypair = self.keypair.clone();
                let discovery_port = self.config.discovery_port;
                let listen_port = self.config.transport_port;
                self.advertiser = Some(tokio::spawn(async move {
                    if let Err(e) =
                        discovery::advertise_loop(keypair, discovery_port, listen_port).await
                    {
                        warn!("advertising stopped: {}", e);
                    }
                }));
            }
            HandoffAction::StopAdvertising => {
                if let Some(task) = self.advertiser.take() {
                    task.abort();
                }
            }
            HandoffAction::StartBrowsing => {
                if let Some(task) = self.browser.take() {
                    task.abort();
                }
                let keypair = self.keypair.clone();
                let discovery_port = self.config.discovery_port;
                let events = self.events_tx.clone();
                self.browser = Some(tokio::spawn(async move {
                    if let Err(e) = discovery::browse_loop(keypair, discovery_port, events).await {
                        warn!("browsing stopped: {}", e);
                    }
                }));
            }
            HandoffAction::StopBrowsing => {
                if let Some(task) = self.browser.take() {
                    task.abort();
                }
            }
            HandoffAction::Invite(peer) => {
                let Some(addr) = self.peer_addrs.get(&peer).copied() else {
                    warn!("no address on file for {}", peer);
                    return;
                };
                if !self.inviting.insert(peer) {
                    // A dial to this peer is already in flight.
                    return;
                }
                let keypair = self.keypair.clone();
                let senders = self.senders.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    transport::connect_to_peer(peer, addr, keypair, senders, events).await;
                });
            }
            HandoffAction::AcceptInvitation(_) | HandoffAction::DeclineInvitation(_) => {
                // Already answered where the inbound handshake waits.
            }
            HandoffAction::SendPayload { to, bytes } => {
                let frame = match encode_frame(&Message::Claim { payload: bytes }) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("could not frame the claim payload: {}", e);
                        return;
                    }
                };
                let senders = self.senders.lock().await;
                for peer in to {
                    match senders.get(&peer) {
                        Some(tx) => {
                            let _ = tx.send(frame.clone());
                            info!("claim payload dispatched to {}", peer);
                        }
                        None => warn!("no live session for {}", peer),
                    }
                }
            }
            HandoffAction::Disconnect => {
                self.release_transports().await;
            }
            HandoffAction::PayloadReceived(payload) => {
                self.received = Some(payload);
            }
            HandoffAction::DiscoveryTimedOut => {
                self.discovery_timed_out = true;
            }
            HandoffAction::DeliveryUnconfirmed => {
                info!("send window lapsed without a teardown from the peer");
                self.delivery_unconfirmed = true;
            }
        }
    }

    fn ensure_listener(&mut self) {
        if self.listener.is_some() {
            return;
        }
        let port = self.config.transport_port;
        let keypair = self.keypair.clone();
        let senders = self.senders.clone();
        let events = self.events_tx.clone();
        self.listener = Some(tokio::spawn(async move {
            let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!("could not bind the session listener on {}: {}", port, e);
                    return;
                }
            };
            if let Err(e) = transport::run_listener(listener, keypair, senders, events).await {
                warn!("session listener stopped: {}", e);
            }
        }));
    }

    async fn release_transports(&mut self) {
        for task in [
            self.advertiser.take(),
            self.browser.take(),
            self.listener.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        let mut senders = self.senders.lock().await;
        if !senders.is_empty() {
            if let Ok(frame) = encode_frame(&Message::Bye {
                peer_id: self.keypair.peer_id(),
            }) {
                for tx in senders.values() {
                    let _ = tx.send(frame.clone());
                }
            }
            // Dropping the handles ends each session writer after the bye.
            senders.clear();
        }
        self.inviting.clear();
        self.peer_addrs.clear();
    }
}

/// Issue a claim, push it to the first nearby receiver, and report where the
/// claim ended up. The deep link printed at issuance stays valid either way.
pub async fn run_sender(config: Config, amount: f64, token: Option<String>) -> anyhow::Result<()> {
    let api = ApiClient::new(&config.api_base);
    let issued = api.create_claim(amount, token).await?;
    let link = claim_link(&config.link_base, issued.claim_id);
    println!(
        "claim {} issued: {} {}",
        issued.claim_id, issued.amount, issued.token
    );
    println!("fallback link: {}", link);

    let payload = ClaimPayload::new(
        issued.claim_id,
        issued.secret.clone(),
        issued.token.clone(),
        issued.amount,
    );
    let coordinator = HandoffCoordinator::sender(&payload)?;
    let (mut driver, mut events) = Driver::new(coordinator, config);
    driver.start().await;
    println!("advertising to nearby devices...");

    let mut ticker = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.recv() => driver.handle_event(event).await,
            _ = ticker.tick() => driver.tick().await,
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
        if driver.take_discovery_timeout() {
            println!("nobody nearby yet; the link above works in the meantime");
        }
        if driver.take_delivery_unconfirmed() {
            println!("no confirmation from the receiver; the claim record decides who got it");
            break;
        }
        if driver.phase() == Phase::Sent && driver.connected_peers().is_empty() {
            println!("receiver took the claim and closed the session");
            break;
        }
    }
    driver.shutdown().await;

    match api.get_claim(issued.claim_id).await {
        Ok(summary) => {
            println!("claim {} is {}", summary.claim_id, summary.status);
            if summary.status == ClaimStatus::Pending {
                println!("anyone with the link can still redeem it: {}", link);
            }
        }
        Err(e) => warn!("could not fetch the final claim status: {}", e),
    }
    Ok(())
}

/// Wait for a nearby sender, take the claim it pushes, and redeem it.
pub async fn run_receiver(config: Config) -> anyhow::Result<()> {
    let api = ApiClient::new(&config.api_base);
    let coordinator = HandoffCoordinator::receiver();
    let (mut driver, mut events) = Driver::new(coordinator, config);
    driver.start().await;
    println!("listening for a nearby sender...");

    let mut ticker = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut outcome: Option<anyhow::Result<()>> = None;
    loop {
        tokio::select! {
            Some(event) = events.recv() => driver.handle_event(event).await,
            _ = ticker.tick() => driver.tick().await,
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
        if let Some(payload) = driver.take_received() {
            println!(
                "claim {} received: {} {}",
                payload.claim_id, payload.amount, payload.token
            );
            outcome = Some(redeem_now(&api, &payload).await);
        }
        if driver.take_discovery_timeout() {
            println!("no nearby sender yet; still listening");
        }
        if driver.phase() == Phase::TornDown {
            break;
        }
    }
    driver.shutdown().await;

    outcome.unwrap_or(Ok(()))
}

async fn redeem_now(api: &ApiClient, payload: &ClaimPayload) -> anyhow::Result<()> {
    match api
        .redeem_claim(&payload.claim_id.to_string(), &payload.secret)
        .await
    {
        Ok(done) => {
            info!("claim {} redeemed", payload.claim_id);
            println!("redeemed {} {}", done.amount, done.token);
            Ok(())
        }
        Err(e) => {
            // The secret is the only way back to the funds; keep it visible.
            println!("redemption failed: {}", e);
            println!(
                "retry with claim {} and secret {}",
                payload.claim_id, payload.secret
            );
            Err(e.into())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
