use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::algorithms::{PathError, ShortestPath, shortest_path};
use crate::error::{Result, RouterError};
use crate::network::{LinkStateDatabase, SweepPolicy};
use crate::protocol::{Connection, Message, MessageKind, Reservation};
use crate::types::{AdjacencyStatus, Cost, Link, LinkDescriptor, Lsa, MAX_COST, RouterIdentity, SimulatedAddr};
use crate::{RouterState, SharedRouterState};

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Bound on every connect, send and receive step of an exchange.
    pub exchange_timeout: Duration,
    /// Period of the background re-flood, if any.
    pub refresh_interval: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            exchange_timeout: Duration::from_secs(5),
            refresh_interval: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Established { slot: usize },
    /// The peer answered with `port_available = false`.
    Refused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Propagated,
    /// The link is not TWO_WAY yet, so only the slot weight changed.
    LocalOnly,
}

#[derive(Debug)]
pub enum DisconnectOutcome {
    /// The peer answered and tore down its side too.
    Confirmed,
    /// The peer answered but held no slot for us.
    PeerUnaware,
    /// The exchange failed; only our side was torn down.
    PeerFailed(RouterError),
}

/// The adjacency and flooding engine. Cloning is cheap; every clone drives
/// the same router.
///
/// Outbound operations live here; the responder half of each exchange is in
/// `protocol::message_handler`. The state lock is never held across network
/// I/O: changes are staged on a copy of the LSDB, sent, and committed once
/// the peer's reply has arrived.
#[derive(Debug, Clone)]
pub struct Router {
    pub(crate) identity: RouterIdentity,
    pub(crate) state: SharedRouterState,
    pub(crate) options: RouterOptions,
    pub(crate) shutdown: CancellationToken,
}

impl Router {
    pub fn new(identity: RouterIdentity, options: RouterOptions) -> Self {
        let state = Arc::new(Mutex::new(RouterState::new(identity.clone())));
        Self {
            identity,
            state,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    pub fn state(&self) -> &SharedRouterState {
        &self.state
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Fires when the router quits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) async fn open(&self, remote: &RouterIdentity) -> Result<Connection> {
        Connection::open(&remote.endpoint(), self.options.exchange_timeout, self.shutdown.clone()).await
    }

    pub(crate) fn accept(&self, stream: TcpStream) -> Connection {
        Connection::accept(stream, self.options.exchange_timeout, self.shutdown.clone())
    }

    /// Sends `request` and returns the reply of kind `reply`.
    async fn round_trip(&self, remote: &RouterIdentity, request: Message, reply: MessageKind) -> Result<Message> {
        let mut conn = self.open(remote).await?;
        let response = conn.request(request, reply).await?;
        conn.finish().await;
        Ok(response)
    }

    fn validate_remote(&self, remote: &RouterIdentity, weight: Cost) -> Result<()> {
        if remote.process_address.trim().is_empty() {
            return Err(RouterError::InvalidInput("missing process address".to_string()));
        }
        if remote.process_port == 0 {
            return Err(RouterError::InvalidInput("missing process port".to_string()));
        }
        if remote.process_port == self.identity.process_port {
            return Err(RouterError::InvalidInput(format!("port {} belongs to this router", remote.process_port)));
        }
        if remote.simulated_address == self.identity.simulated_address {
            return Err(RouterError::InvalidInput(format!("{} is this router's own simulated address", remote.simulated_address)));
        }
        if remote.simulated_address.is_unspecified() {
            return Err(RouterError::InvalidInput("missing simulated address".to_string()));
        }
        if weight > MAX_COST {
            return Err(RouterError::InvalidInput(format!("weight {weight} exceeds {MAX_COST}")));
        }
        Ok(())
    }

    /// Snapshot of the LSDB with `stage` applied to a copy. The live LSDB is
    /// untouched until the exchange that carries the snapshot succeeds.
    pub(crate) async fn staged_snapshot(&self, stage: impl FnOnce(&mut LinkStateDatabase)) -> Vec<Lsa> {
        let mut lsdb = self.state.lock().await.lsdb.clone();
        stage(&mut lsdb);
        lsdb.snapshot()
    }

    /// Handshake snapshot with `descriptor` staged into our LSA, plus the
    /// copy of our LSA the peer is about to receive.
    pub(crate) async fn handshake_snapshot(&self, descriptor: LinkDescriptor) -> (Vec<Lsa>, Lsa) {
        let mut lsdb = self.state.lock().await.lsdb.clone();
        lsdb.originate_link(descriptor);
        let sent = lsdb.own_lsa().clone();
        (lsdb.snapshot(), sent)
    }

    pub(crate) async fn reserve(&self, link: Link) -> Result<Reservation> {
        self.state.lock().await.neighbors.reserve(link)
    }

    pub(crate) async fn release(&self, reservation: Reservation) {
        let slot = reservation.slot;
        if self.state.lock().await.neighbors.release(reservation) {
            debug!("Rolled back neighbour slot {}", slot);
        }
    }

    /// Commits a completed handshake: the slot becomes TWO_WAY, our LSA
    /// gains the link, and the peer's snapshot is merged.
    ///
    /// Returns the neighbour to leave out of the follow-up flood. That is
    /// the handshake peer, unless our LSA moved on from the copy `sent` to
    /// it, in which case nobody is left out.
    pub(crate) async fn establish(&self, reservation: &Reservation, snapshot: Vec<Lsa>, sent: &Lsa) -> Result<Option<SimulatedAddr>> {
        let mut state = self.state.lock().await;
        let RouterState { neighbors, lsdb, .. } = &mut *state;
        let descriptor = neighbors
            .promote(reservation)
            .map(Link::descriptor)
            .ok_or_else(|| RouterError::NoSuchNeighbor(format!("slot {}", reservation.slot)))?;

        lsdb.originate_link(descriptor);
        let outcome = lsdb.reconcile(snapshot, SweepPolicy::Retain);
        info!("set {} STATE to TWO_WAY", descriptor.neighbor);
        debug!("Handshake sync with {}: {:?}", descriptor.neighbor, outcome);

        if lsdb.own_lsa() == sent {
            Ok(Some(descriptor.neighbor))
        } else {
            debug!("{} holds a stale copy of our LSA", descriptor.neighbor);
            Ok(None)
        }
    }

    /// Registers a neighbour without synchronising. The remote process must
    /// accept a connection first.
    pub async fn attach(&self, remote: RouterIdentity, weight: Cost) -> Result<usize> {
        self.validate_remote(&remote, weight)?;
        {
            let state = self.state.lock().await;
            state.neighbors.ensure_unbound(&remote)?;
            if state.neighbors.free_slot().is_none() {
                return Err(RouterError::NoFreeSlot);
            }
        }

        Connection::probe(&remote.endpoint(), self.options.exchange_timeout, self.shutdown.clone()).await?;

        let link = Link::new(self.identity.clone(), remote.clone(), weight);
        let slot = self.state.lock().await.neighbors.occupy(link)?;
        info!("Attached {} on slot {} with weight {}", remote, slot, weight);
        Ok(slot)
    }

    /// Runs the Hello handshake over every attached slot that is not
    /// established yet, one neighbour at a time.
    pub async fn start(&self) -> Vec<(RouterIdentity, Result<()>)> {
        let pending: Vec<Link> = {
            let state = self.state.lock().await;
            state
                .neighbors
                .occupied()
                .filter(|(_, link)| link.status == AdjacencyStatus::None)
                .map(|(_, link)| link.clone())
                .collect()
        };

        let mut results = Vec::with_capacity(pending.len());
        for link in pending {
            let remote = link.remote.clone();
            let result = self.hello(link).await;
            if let Err(e) = &result {
                warn!("Hello handshake with {} failed: {}", remote, e);
            }
            results.push((remote, result));
        }
        results
    }

    async fn hello(&self, link: Link) -> Result<()> {
        let remote = link.remote.clone();
        let weight = link.weight;
        let descriptor = link.descriptor();
        let reservation = self.reserve(link).await?;

        match self.hello_exchange(&remote, weight, descriptor).await {
            Ok((snapshot, sent)) => {
                let except = self.establish(&reservation, snapshot, &sent).await?;
                self.flood(except).await;
                Ok(())
            }
            Err(e) => {
                self.release(reservation).await;
                Err(e)
            }
        }
    }

    async fn hello_exchange(&self, remote: &RouterIdentity, weight: Cost, descriptor: LinkDescriptor) -> Result<(Vec<Lsa>, Lsa)> {
        let mut conn = self.open(remote).await?;
        conn.send(Message::hello(&self.identity, remote, weight)).await?;
        info!("set {} STATE to INIT", remote.simulated_address);
        conn.expect(MessageKind::Hello).await?;
        conn.send(Message::hello(&self.identity, remote, weight)).await?;

        let (staged, sent) = self.handshake_snapshot(descriptor).await;
        let reply = conn
            .request(Message::lsa_update(&self.identity, remote, staged), MessageKind::LsaUpdate)
            .await?;
        conn.finish().await;
        Ok((reply.into_snapshot(), sent))
    }

    /// Connect handshake with an unattached (or merely attached) neighbour,
    /// followed by a snapshot exchange and a flood.
    pub async fn connect(&self, remote: RouterIdentity, weight: Cost) -> Result<ConnectOutcome> {
        self.validate_remote(&remote, weight)?;
        let link = Link::new(self.identity.clone(), remote.clone(), weight);
        let descriptor = link.descriptor();
        let reservation = self.reserve(link).await?;
        let slot = reservation.slot;

        match self.connect_exchange(&remote, weight, descriptor).await {
            Ok(Some((snapshot, sent))) => {
                let except = self.establish(&reservation, snapshot, &sent).await?;
                self.flood(except).await;
                Ok(ConnectOutcome::Established { slot })
            }
            Ok(None) => {
                info!("{} has no free port", remote);
                self.release(reservation).await;
                Ok(ConnectOutcome::Refused)
            }
            Err(e) => {
                self.release(reservation).await;
                Err(e)
            }
        }
    }

    async fn connect_exchange(&self, remote: &RouterIdentity, weight: Cost, descriptor: LinkDescriptor) -> Result<Option<(Vec<Lsa>, Lsa)>> {
        let mut conn = self.open(remote).await?;
        let ack = conn
            .request(Message::connect(&self.identity, remote, weight), MessageKind::Acknowledge)
            .await?;
        if !ack.port_available {
            conn.finish().await;
            return Ok(None);
        }

        let (staged, sent) = self.handshake_snapshot(descriptor).await;
        let reply = conn
            .request(Message::lsa_update(&self.identity, remote, staged), MessageKind::LsaUpdate)
            .await?;
        conn.finish().await;
        Ok(Some((reply.into_snapshot(), sent)))
    }

    /// Tears down the neighbour bound to `port`.
    ///
    /// A slot that is not TWO_WAY is cleared locally and reported as
    /// [`RouterError::NotTwoWay`]. Otherwise our side is torn down whatever
    /// the peer does; the outcome says how far the peer got.
    pub async fn disconnect(&self, port: u16) -> Result<(RouterIdentity, DisconnectOutcome)> {
        let remote = {
            let mut state = self.state.lock().await;
            let slot = state
                .neighbors
                .find_by_port(port)
                .ok_or_else(|| RouterError::NoSuchNeighbor(format!("port {port}")))?;
            let link = state
                .neighbors
                .get(slot)
                .cloned()
                .ok_or_else(|| RouterError::NoSuchNeighbor(format!("port {port}")))?;
            if !link.is_two_way() {
                state.neighbors.clear(slot);
                info!("Cleared slot {} holding {} in state {}", slot, link.remote, link.status);
                return Err(RouterError::NotTwoWay(link.remote.simulated_address));
            }
            link.remote
        };
        let neighbor = remote.simulated_address;

        let (outcome, snapshot) = match self.disconnect_exchange(&remote).await {
            Ok(Some(snapshot)) => (DisconnectOutcome::Confirmed, Some(snapshot)),
            Ok(None) => {
                warn!("{} did not hold us as a neighbour", remote);
                (DisconnectOutcome::PeerUnaware, None)
            }
            Err(e) => {
                warn!("{} did not take part in the disconnect: {}", remote, e);
                (DisconnectOutcome::PeerFailed(e), None)
            }
        };

        {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.neighbors.find_by_simulated(neighbor) {
                state.neighbors.clear(slot);
            }
            state.lsdb.withdraw_link(neighbor);
            if let Some(snapshot) = snapshot {
                state.lsdb.reconcile(snapshot, SweepPolicy::Sweep);
            }
        }
        info!("Disconnected from {}", remote);

        self.flood(Some(neighbor)).await;
        Ok((remote, outcome))
    }

    /// Sends the Disconnect and returns the peer's snapshot, or `None` if the
    /// peer answered with a negative acknowledgement.
    async fn disconnect_exchange(&self, remote: &RouterIdentity) -> Result<Option<Vec<Lsa>>> {
        let neighbor = remote.simulated_address;
        let staged = self
            .staged_snapshot(|lsdb| {
                lsdb.withdraw_link(neighbor);
            })
            .await;
        let mut conn = self.open(remote).await?;
        conn.send(Message::disconnect(&self.identity, remote, staged)).await?;
        let reply = conn.recv().await?;
        conn.finish().await;

        match reply.kind {
            MessageKind::LsaUpdate => Ok(Some(reply.into_snapshot())),
            MessageKind::Acknowledge => Ok(None),
            received => Err(RouterError::UnexpectedMessage {
                expected: MessageKind::LsaUpdate,
                received,
            }),
        }
    }

    /// Changes the cost of the link to `remote`, located by port, and
    /// propagates it when the link is established.
    pub async fn update_weight(&self, remote: RouterIdentity, weight: Cost) -> Result<UpdateOutcome> {
        self.validate_remote(&remote, weight)?;
        let neighbor = remote.simulated_address;
        {
            let mut state = self.state.lock().await;
            let link = state
                .neighbors
                .by_port_mut(remote.process_port)
                .filter(|link| link.remote.simulated_address == neighbor)
                .ok_or_else(|| RouterError::NoSuchNeighbor(format!("{} on port {}", neighbor, remote.process_port)))?;
            if !link.is_two_way() {
                link.weight = weight;
                info!("Weight to {} set to {} (not yet established)", neighbor, weight);
                return Ok(UpdateOutcome::LocalOnly);
            }
        }

        let staged = self
            .staged_snapshot(|lsdb| {
                lsdb.set_link_cost(neighbor, weight);
            })
            .await;
        let reply = self
            .round_trip(&remote, Message::update_weight(&self.identity, &remote, staged, weight), MessageKind::LsaUpdate)
            .await?;

        {
            let mut state = self.state.lock().await;
            if let Some(link) = state.neighbors.by_simulated_mut(neighbor) {
                link.weight = weight;
            }
            state.lsdb.set_link_cost(neighbor, weight);
            state.lsdb.reconcile(reply.into_snapshot(), SweepPolicy::Sweep);
        }
        info!("Weight to {} updated to {}", neighbor, weight);

        self.flood(Some(neighbor)).await;
        Ok(UpdateOutcome::Propagated)
    }

    /// Sends the full LSDB to every TWO_WAY neighbour except `except` and
    /// waits for their acknowledgements. Returns how many accepted it.
    pub async fn flood(&self, except: Option<SimulatedAddr>) -> usize {
        let (snapshot, targets) = {
            let state = self.state.lock().await;
            let targets: Vec<RouterIdentity> = state
                .neighbors
                .two_way()
                .map(|(_, link)| link.remote.clone())
                .filter(|remote| Some(remote.simulated_address) != except)
                .collect();
            (state.lsdb.snapshot(), targets)
        };
        if targets.is_empty() {
            return 0;
        }

        debug!("Flooding {} LSAs to {} neighbours", snapshot.len(), targets.len());
        let sends = targets.iter().map(|remote| {
            let update = Message::lsa_update(&self.identity, remote, snapshot.clone());
            self.round_trip(remote, update, MessageKind::Acknowledge)
        });
        let results = join_all(sends).await;

        let mut accepted = 0;
        for (remote, result) in targets.iter().zip(results) {
            match result {
                Ok(ack) if ack.port_available => {
                    accepted += 1;
                    debug!("Sent LSA snapshot to {}", remote);
                }
                Ok(_) => warn!("{} refused our LSA snapshot", remote),
                Err(e) => warn!("Failed to flood to {}: {}", remote, e),
            }
        }
        accepted
    }

    /// Established neighbours in slot order.
    pub async fn neighbors(&self) -> Vec<(usize, Link)> {
        let state = self.state.lock().await;
        state
            .neighbors
            .two_way()
            .map(|(slot, link)| (slot, link.clone()))
            .collect()
    }

    pub async fn detect(&self, destination: SimulatedAddr) -> std::result::Result<ShortestPath, PathError> {
        let state = self.state.lock().await;
        shortest_path(&state.lsdb, destination)
    }

    /// The LSDB, one line per origin.
    pub async fn lsdb_dump(&self) -> String {
        self.state.lock().await.to_string()
    }

    /// Leaves the network. In-flight exchanges are cancelled first, then
    /// every established neighbour is told, then all slots are cleared.
    pub async fn quit(&self) -> Vec<(RouterIdentity, Result<()>)> {
        self.shutdown.cancel();
        info!("Router {} shutting down", self.identity);

        let neighbors: Vec<RouterIdentity> = {
            let state = self.state.lock().await;
            state
                .neighbors
                .two_way()
                .map(|(_, link)| link.remote.clone())
                .collect()
        };

        // the shutdown token is spent; the goodbyes get their own
        let farewell = CancellationToken::new();
        let mut results = Vec::with_capacity(neighbors.len());
        for remote in neighbors {
            let result = self.say_goodbye(&remote, farewell.clone()).await;
            if let Err(e) = &result {
                warn!("Failed to notify {} of quit: {}", remote, e);
            }
            results.push((remote, result));
        }

        let mut state = self.state.lock().await;
        for link in state.neighbors.clear_all() {
            state.lsdb.withdraw_link(link.remote.simulated_address);
        }
        results
    }

    async fn say_goodbye(&self, remote: &RouterIdentity, cancel: CancellationToken) -> Result<()> {
        let mut conn = Connection::open(&remote.endpoint(), self.options.exchange_timeout, cancel).await?;
        let ack = conn
            .request(Message::quit(&self.identity, remote), MessageKind::Acknowledge)
            .await?;
        conn.finish().await;
        if !ack.port_available {
            debug!("{} no longer held us as a neighbour", remote);
        }
        Ok(())
    }
}
