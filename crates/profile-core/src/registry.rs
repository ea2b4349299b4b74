//! Peer registry
//!
//! Routes local operations and transport events to the actor of each peer,
//! spawning actors on first contact and reaping them once their machine is
//! back to Disconnected with nothing pending. Peers never share state, so one
//! registry serves any number of them concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::a2dp::A2dpSession;
use crate::actor::{PeerActor, PeerHandle};
use crate::config::ProfileConfig;
use crate::errors::{ProfileError, ProfileResult};
use crate::events::StackEvent;
use crate::hfp::HfpClientSession;
use crate::preferences::PreferenceStore;
use crate::sink::EventSink;
use crate::state_machine::{ConnectionStateMachine, Message, ProfileSession};
use crate::transport::ProfileTransport;
use crate::types::{ConnectionState, PeerId, PeerSnapshot};

type SessionFactory<S> = Arc<dyn Fn(PeerId) -> S + Send + Sync>;

/// One actor per peer for a single profile
pub struct PeerRegistry<S: ProfileSession> {
    peers: DashMap<PeerId, PeerHandle<S>>,
    factory: SessionFactory<S>,
    transport: Arc<dyn ProfileTransport>,
    preferences: Arc<dyn PreferenceStore>,
    sink: Arc<dyn EventSink>,
    inbox_capacity: usize,
}

impl PeerRegistry<A2dpSession> {
    /// Registry of A2DP source machines
    pub fn a2dp(
        config: &ProfileConfig,
        transport: Arc<dyn ProfileTransport>,
        preferences: Arc<dyn PreferenceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let a2dp = config.a2dp.clone();
        Self::new(
            move |_| A2dpSession::new(a2dp.clone()),
            transport,
            preferences,
            sink,
            config.inbox_capacity,
        )
    }
}

impl PeerRegistry<HfpClientSession> {
    /// Registry of handsfree client machines
    pub fn hfp_client(
        config: &ProfileConfig,
        transport: Arc<dyn ProfileTransport>,
        preferences: Arc<dyn PreferenceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let hfp = config.hfp_client.clone();
        Self::new(
            move |_| HfpClientSession::new(hfp.clone()),
            transport,
            preferences,
            sink,
            config.inbox_capacity,
        )
    }
}

impl<S: ProfileSession> PeerRegistry<S> {
    pub fn new<F>(
        factory: F,
        transport: Arc<dyn ProfileTransport>,
        preferences: Arc<dyn PreferenceStore>,
        sink: Arc<dyn EventSink>,
        inbox_capacity: usize,
    ) -> Self
    where
        F: Fn(PeerId) -> S + Send + Sync + 'static,
    {
        Self {
            peers: DashMap::new(),
            factory: Arc::new(factory),
            transport,
            preferences,
            sink,
            inbox_capacity,
        }
    }

    /// Connect to `peer`, creating its machine if needed
    pub async fn connect(&self, peer: PeerId) -> ProfileResult<()> {
        self.route(peer, Message::Connect).await
    }

    /// Disconnect `peer`; a peer without a machine is already disconnected
    pub async fn disconnect(&self, peer: PeerId) -> ProfileResult<()> {
        if !self.peers.contains_key(&peer) {
            debug!("Disconnect for unknown peer {}, nothing to do", peer);
            return Ok(());
        }
        self.route(peer, Message::Disconnect).await
    }

    pub async fn connect_audio(&self, peer: PeerId) -> ProfileResult<()> {
        self.existing(peer)?;
        self.route(peer, Message::ConnectAudio).await
    }

    pub async fn disconnect_audio(&self, peer: PeerId) -> ProfileResult<()> {
        self.existing(peer)?;
        self.route(peer, Message::DisconnectAudio).await
    }

    /// Route a transport event; only a link change creates a machine
    pub async fn deliver(&self, peer: PeerId, event: StackEvent) -> ProfileResult<()> {
        if !self.peers.contains_key(&peer) && !matches!(event, StackEvent::ConnectionChanged { .. }) {
            debug!("Dropping {} for unknown peer {}", event.name(), peer);
            return Ok(());
        }
        self.route(peer, Message::Stack(event)).await
    }

    pub async fn request(&self, peer: PeerId, request: S::Request) -> ProfileResult<()> {
        self.existing(peer)?;
        self.route(peer, Message::Request(request)).await
    }

    /// Handle of a live peer
    pub fn handle(&self, peer: PeerId) -> Option<PeerHandle<S>> {
        self.peers.get(&peer).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self, peer: PeerId) -> Option<PeerSnapshot> {
        self.peers.get(&peer).map(|entry| entry.value().snapshot())
    }

    /// Peers currently holding a machine
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Peers in `state`
    pub fn peers_in(&self, state: ConnectionState) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|entry| entry.value().snapshot().connection == state)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Stop the actors of idle peers, returning how many were stopped
    ///
    /// Messages that reached an actor after it agreed to stop are routed to a
    /// fresh one.
    pub async fn reap_idle(&self) -> usize {
        let candidates: Vec<(PeerId, PeerHandle<S>)> = self
            .peers
            .iter()
            .filter(|entry| entry.value().snapshot().connection == ConnectionState::Disconnected)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut reaped = 0;
        for (peer, handle) in candidates {
            let leftovers = match handle.retire().await {
                Ok(Some(leftovers)) => leftovers,
                Ok(None) => {
                    debug!("Peer {} busy, not reaped", peer);
                    continue;
                }
                Err(_) => Vec::new(),
            };
            self.peers.remove_if(&peer, |_, current| current.same_actor(&handle));
            reaped += 1;
            debug!("Reaped actor for {}", peer);

            for message in leftovers {
                if let Err(error) = self.route(peer, message).await {
                    warn!("Lost message for {} after reaping: {}", peer, error);
                }
            }
        }
        if reaped > 0 {
            info!("Reaped {} idle peers, {} remaining", reaped, self.peers.len());
        }
        reaped
    }

    /// Stop every actor
    pub async fn shutdown(&self) {
        let handles: Vec<PeerHandle<S>> = self.peers.iter().map(|entry| entry.value().clone()).collect();
        self.peers.clear();
        for handle in handles {
            if handle.shutdown().await.is_err() {
                debug!("Actor for {} already stopped", handle.peer());
            }
        }
    }

    fn existing(&self, peer: PeerId) -> ProfileResult<()> {
        if self.peers.contains_key(&peer) {
            Ok(())
        } else {
            Err(ProfileError::invalid_state(format!("no machine for {}", peer)))
        }
    }

    fn handle_for(&self, peer: PeerId) -> PeerHandle<S> {
        self.peers
            .entry(peer)
            .or_insert_with(|| self.spawn(peer))
            .value()
            .clone()
    }

    fn spawn(&self, peer: PeerId) -> PeerHandle<S> {
        let machine = ConnectionStateMachine::new(
            peer,
            (self.factory)(peer),
            self.transport.clone(),
            self.preferences.clone(),
            self.sink.clone(),
        );
        debug!("Spawning {} actor for {}", machine.profile(), peer);
        PeerActor::spawn(machine, self.inbox_capacity)
    }

    /// Send to the peer's actor, replacing an actor that stopped meanwhile
    async fn route(&self, peer: PeerId, message: Message<S::Request>) -> ProfileResult<()> {
        let handle = self.handle_for(peer);
        match handle.send(message.clone()).await {
            Err(ProfileError::ActorClosed { .. }) => {
                debug!("Actor for {} stopped, respawning", peer);
                self.peers.remove_if(&peer, |_, current| current.same_actor(&handle));
                self.handle_for(peer).send(message).await
            }
            result => result,
        }
    }
}
