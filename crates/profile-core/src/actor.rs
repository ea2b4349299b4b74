//! Peer actor
//!
//! Each peer machine runs in its own tokio task. The task owns the machine,
//! reads one item at a time from a bounded inbox, and sleeps until the
//! machine's next timer deadline when there is nothing to read. Callers talk
//! to it through a cloneable [`PeerHandle`]. Everything the task logs sits
//! inside the [`peer_span`](crate::logging::peer_span) of its peer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use btaudio_profile_core::prelude::*;
//!
//! # async fn run(transport: Arc<dyn ProfileTransport>) -> ProfileResult<()> {
//! let peer: PeerId = "00:1A:7D:DA:71:13".parse()?;
//! let machine = ConnectionStateMachine::new(
//!     peer,
//!     A2dpSession::new(A2dpConfig::default()),
//!     transport,
//!     Arc::new(InMemoryPreferences::new()),
//!     Arc::new(BroadcastSink::default()),
//! );
//!
//! let handle = PeerActor::spawn(machine, 64);
//! handle.connect().await?;
//! handle.wait_for_state(ConnectionState::Connected).await?;
//! # Ok(())
//! # }
//! ```

use std::future;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::errors::{ProfileError, ProfileResult};
use crate::events::StackEvent;
use crate::logging::peer_span;
use crate::state_machine::{ConnectionStateMachine, Message, ProfileSession};
use crate::types::{ConnectionState, PeerId, PeerSnapshot, ProfileKind};

type Inspect<S> = Box<dyn FnOnce(&ConnectionStateMachine<S>) + Send>;

type Leftovers<S> = Vec<Message<<S as ProfileSession>::Request>>;

enum Inbox<S: ProfileSession> {
    Message(Message<S::Request>),
    /// Run a read-only closure against the machine
    Inspect(Inspect<S>),
    /// Stop if idle, handing back anything queued behind the request
    Retire(oneshot::Sender<Option<Leftovers<S>>>),
    Shutdown,
}

/// Task owning one peer machine
pub struct PeerActor<S: ProfileSession> {
    machine: ConnectionStateMachine<S>,
    inbox: mpsc::Receiver<Inbox<S>>,
    snapshot: watch::Sender<PeerSnapshot>,
}

impl<S: ProfileSession> PeerActor<S> {
    /// Start the actor on the current runtime
    pub fn spawn(machine: ConnectionStateMachine<S>, capacity: usize) -> PeerHandle<S> {
        let (sender, inbox) = mpsc::channel(capacity.max(1));
        let (snapshot, snapshot_rx) = watch::channel(machine.snapshot());
        let peer = machine.peer();
        let profile = machine.profile();

        let actor = PeerActor {
            machine,
            inbox,
            snapshot,
        };
        tokio::spawn(actor.run().instrument(peer_span(peer, profile)));

        PeerHandle {
            peer,
            profile,
            sender,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        debug!("Actor started");

        loop {
            let deadline = self.machine.next_deadline();
            tokio::select! {
                received = self.inbox.recv() => match received {
                    Some(Inbox::Message(message)) => self.machine.process(message, Instant::now()),
                    Some(Inbox::Inspect(inspect)) => inspect(&self.machine),
                    Some(Inbox::Retire(reply)) => {
                        if self.is_idle() {
                            let leftovers = self.close_inbox();
                            if reply.send(Some(leftovers)).is_err() {
                                debug!("Retire requester went away");
                            }
                            break;
                        }
                        let _ = reply.send(None);
                    }
                    Some(Inbox::Shutdown) | None => break,
                },
                _ = wait_until(deadline) => self.machine.fire_due_timers(Instant::now()),
            }
            self.publish();
        }

        if self.machine.state() != ConnectionState::Disconnected {
            warn!("Actor stopped while {}", self.machine.state());
        }
        info!("Actor stopped");
    }

    fn is_idle(&self) -> bool {
        self.machine.state() == ConnectionState::Disconnected
            && self.machine.deferred_len() == 0
            && self.machine.next_deadline().is_none()
    }

    /// Refuse further sends and collect the messages already queued
    fn close_inbox(&mut self) -> Leftovers<S> {
        self.inbox.close();
        let mut leftovers = Vec::new();
        while let Ok(item) = self.inbox.try_recv() {
            match item {
                Inbox::Message(message) => leftovers.push(message),
                Inbox::Inspect(inspect) => inspect(&self.machine),
                Inbox::Retire(reply) => {
                    let _ = reply.send(None);
                }
                Inbox::Shutdown => {}
            }
        }
        leftovers
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Cloneable sender side of a peer actor
pub struct PeerHandle<S: ProfileSession> {
    peer: PeerId,
    profile: ProfileKind,
    sender: mpsc::Sender<Inbox<S>>,
    snapshot: watch::Receiver<PeerSnapshot>,
}

impl<S: ProfileSession> Clone for PeerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer,
            profile: self.profile,
            sender: self.sender.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<S: ProfileSession> std::fmt::Debug for PeerHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("peer", &self.peer)
            .field("profile", &self.profile)
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

impl<S: ProfileSession> PeerHandle<S> {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn profile(&self) -> ProfileKind {
        self.profile
    }

    pub async fn connect(&self) -> ProfileResult<()> {
        self.send(Message::Connect).await
    }

    pub async fn disconnect(&self) -> ProfileResult<()> {
        self.send(Message::Disconnect).await
    }

    pub async fn connect_audio(&self) -> ProfileResult<()> {
        self.send(Message::ConnectAudio).await
    }

    pub async fn disconnect_audio(&self) -> ProfileResult<()> {
        self.send(Message::DisconnectAudio).await
    }

    /// Hand a transport event to the machine
    pub async fn deliver(&self, event: StackEvent) -> ProfileResult<()> {
        self.send(Message::Stack(event)).await
    }

    pub async fn request(&self, request: S::Request) -> ProfileResult<()> {
        self.send(Message::Request(request)).await
    }

    pub async fn send(&self, message: Message<S::Request>) -> ProfileResult<()> {
        self.sender
            .send(Inbox::Message(message))
            .await
            .map_err(|_| self.closed())
    }

    /// Latest published state
    pub fn snapshot(&self) -> PeerSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch every published state change
    pub fn subscribe(&self) -> watch::Receiver<PeerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the connection state equals `state`
    pub async fn wait_for_state(&self, state: ConnectionState) -> ProfileResult<PeerSnapshot> {
        let mut receiver = self.snapshot.clone();
        let snapshot = receiver
            .wait_for(|snapshot| snapshot.connection == state)
            .await
            .map_err(|_| self.closed())?;
        Ok(*snapshot)
    }

    /// Run `inspect` inside the actor, after everything queued before it
    pub async fn with_machine<R, F>(&self, inspect: F) -> ProfileResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ConnectionStateMachine<S>) -> R + Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        let job: Inspect<S> = Box::new(move |machine| {
            let _ = reply.send(inspect(machine));
        });
        self.sender
            .send(Inbox::Inspect(job))
            .await
            .map_err(|_| self.closed())?;
        answer.await.map_err(|_| self.closed())
    }

    /// Stop the actor once everything queued before is handled
    pub async fn shutdown(&self) -> ProfileResult<()> {
        self.sender.send(Inbox::Shutdown).await.map_err(|_| self.closed())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Both handles talk to the same actor
    pub fn same_actor(&self, other: &PeerHandle<S>) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Ask the actor to stop if its machine is idle
    ///
    /// `Some` carries the messages that were queued behind the request and
    /// must be routed to a fresh actor.
    pub(crate) async fn retire(&self) -> ProfileResult<Option<Leftovers<S>>> {
        let (reply, answer) = oneshot::channel();
        self.sender
            .send(Inbox::Retire(reply))
            .await
            .map_err(|_| self.closed())?;
        answer.await.map_err(|_| self.closed())
    }

    fn closed(&self) -> ProfileError {
        ProfileError::ActorClosed { peer: self.peer }
    }
}
