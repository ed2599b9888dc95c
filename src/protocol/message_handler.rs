use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::codec::Connection;
use super::messages::{Message, MessageKind};
use super::neighbor::Reservation;
use crate::error::{Result, RouterError};
use crate::network::SweepPolicy;
use crate::router::Router;
use crate::types::{Link, Lsa, SimulatedAddr};

/// What a worker does after it has closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Followup {
    Nothing,
    FloodExcept(SimulatedAddr),
    FloodAll,
}

impl Router {
    /// Serves one inbound connection: decodes exactly one request and runs
    /// the responder half of its exchange.
    pub(crate) async fn handle_connection(&self, stream: TcpStream) {
        let mut conn = self.accept(stream);
        let request = match conn.recv().await {
            Ok(msg) => msg,
            Err(RouterError::PeerClosed) => {
                debug!("{} hung up without a request", conn.peer());
                return;
            }
            Err(e) => {
                warn!("Failed to read request from {}: {}", conn.peer(), e);
                return;
            }
        };

        let kind = request.kind;
        let sender = request.source_simulated_address;
        if request.destination_simulated_address != self.identity.simulated_address || sender == self.identity.simulated_address {
            warn!("Dropping {:?} from {} addressed to {}", kind, sender, request.destination_simulated_address);
            return;
        }
        debug!("Received {:?} from {}", kind, sender);

        let result = match kind {
            MessageKind::Hello => self.on_hello(&mut conn, request).await,
            MessageKind::LsaUpdate => self.on_lsa_update(&mut conn, request).await,
            MessageKind::Connect => self.on_connect(&mut conn, request).await,
            MessageKind::Disconnect => self.on_disconnect(&mut conn, request).await,
            MessageKind::Quit => self.on_quit(&mut conn, request).await,
            MessageKind::UpdateWeight => self.on_update_weight(&mut conn, request).await,
            MessageKind::Acknowledge => {
                warn!("Unsolicited acknowledgement from {}", sender);
                return;
            }
        };

        match result {
            Ok(followup) => {
                conn.finish().await;
                match followup {
                    Followup::Nothing => {}
                    Followup::FloodExcept(peer) => {
                        self.flood(Some(peer)).await;
                    }
                    Followup::FloodAll => {
                        self.flood(None).await;
                    }
                }
            }
            Err(e) => warn!("{:?} exchange with {} failed: {}", kind, sender, e),
        }
    }

    /// Commits a handshake whose exchange succeeded, or rolls the slot back.
    async fn settle(&self, reservation: Reservation, exchange: Result<(Vec<Lsa>, Lsa)>) -> Result<Followup> {
        match exchange {
            Ok((snapshot, sent)) => match self.establish(&reservation, snapshot, &sent).await? {
                Some(peer) => Ok(Followup::FloodExcept(peer)),
                None => Ok(Followup::FloodAll),
            },
            Err(e) => {
                self.release(reservation).await;
                Err(e)
            }
        }
    }

    async fn on_hello(&self, conn: &mut Connection, hello: Message) -> Result<Followup> {
        let peer = hello.sender();
        let weight = hello.cost()?;
        let link = Link::new(self.identity.clone(), peer.clone(), weight);
        let descriptor = link.descriptor();

        let reservation = {
            let mut state = self.state.lock().await;
            if state
                .neighbors
                .two_way()
                .any(|(_, link)| link.remote.simulated_address == peer.simulated_address)
            {
                info!("{} already established", peer.simulated_address);
                return Ok(Followup::Nothing);
            }
            state.neighbors.reserve(link)?
        };
        info!("set {} STATE to INIT", peer.simulated_address);

        let exchange = async {
            conn.send(Message::hello(&self.identity, &peer, weight)).await?;
            conn.expect(MessageKind::Hello).await?;
            let incoming = conn.expect(MessageKind::LsaUpdate).await?;
            let (staged, sent) = self.handshake_snapshot(descriptor).await;
            conn.send(Message::lsa_update(&self.identity, &peer, staged)).await?;
            Ok::<_, RouterError>((incoming.into_snapshot(), sent))
        }
        .await;

        self.settle(reservation, exchange).await
    }

    async fn on_connect(&self, conn: &mut Connection, connect: Message) -> Result<Followup> {
        let peer = connect.sender();
        let weight = connect.cost()?;
        let link = Link::new(self.identity.clone(), peer.clone(), weight);
        let descriptor = link.descriptor();

        let reserved = self.reserve(link).await;
        let reservation = match reserved {
            Ok(reservation) => reservation,
            Err(e) => {
                info!("Refusing connect from {}: {}", peer, e);
                conn.send(Message::acknowledge(&self.identity, &peer, false)).await?;
                return Ok(Followup::Nothing);
            }
        };
        info!("set {} STATE to INIT", peer.simulated_address);

        let exchange = async {
            conn.send(Message::acknowledge(&self.identity, &peer, true)).await?;
            let incoming = conn.expect(MessageKind::LsaUpdate).await?;
            let (staged, sent) = self.handshake_snapshot(descriptor).await;
            conn.send(Message::lsa_update(&self.identity, &peer, staged)).await?;
            Ok::<_, RouterError>((incoming.into_snapshot(), sent))
        }
        .await;

        self.settle(reservation, exchange).await
    }

    /// Flooded snapshot. Only established neighbours are listened to.
    async fn on_lsa_update(&self, conn: &mut Connection, update: Message) -> Result<Followup> {
        let peer = update.sender();
        let outcome = {
            let mut state = self.state.lock().await;
            let from_neighbor = state
                .neighbors
                .two_way()
                .any(|(_, link)| link.remote.simulated_address == peer.simulated_address);
            from_neighbor.then(|| state.lsdb.reconcile(update.into_snapshot(), SweepPolicy::Sweep))
        };

        let Some(outcome) = outcome else {
            debug!("Ignoring LSA snapshot from non-neighbour {}", peer);
            conn.send(Message::acknowledge(&self.identity, &peer, false)).await?;
            return Ok(Followup::Nothing);
        };
        conn.send(Message::acknowledge(&self.identity, &peer, true)).await?;

        if outcome.changed() {
            debug!("Snapshot from {} changed the LSDB: {:?}", peer.simulated_address, outcome);
            Ok(Followup::FloodExcept(peer.simulated_address))
        } else {
            Ok(Followup::Nothing)
        }
    }

    async fn on_disconnect(&self, conn: &mut Connection, request: Message) -> Result<Followup> {
        let peer = request.sender();
        let neighbor = peer.simulated_address;
        let known = self.state.lock().await.neighbors.find_by_simulated(neighbor).is_some();
        if !known {
            info!("Disconnect from {}, which holds no slot here", peer);
            conn.send(Message::acknowledge(&self.identity, &peer, false)).await?;
            return Ok(Followup::Nothing);
        }

        let incoming = request.into_snapshot();
        let staged = self
            .staged_snapshot(|lsdb| {
                lsdb.withdraw_link(neighbor);
                lsdb.reconcile(incoming.clone(), SweepPolicy::Sweep);
            })
            .await;
        conn.send(Message::lsa_update(&self.identity, &peer, staged)).await?;

        {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.neighbors.find_by_simulated(neighbor) {
                state.neighbors.clear(slot);
            }
            state.lsdb.withdraw_link(neighbor);
            state.lsdb.reconcile(incoming, SweepPolicy::Sweep);
        }
        info!("{} disconnected", peer);
        Ok(Followup::FloodExcept(neighbor))
    }

    /// The quitting peer leaves whether or not we answer, so the teardown is
    /// committed before the acknowledgement.
    async fn on_quit(&self, conn: &mut Connection, request: Message) -> Result<Followup> {
        let peer = request.sender();
        let neighbor = peer.simulated_address;
        let removed = {
            let mut state = self.state.lock().await;
            match state.neighbors.find_by_simulated(neighbor) {
                Some(slot) => {
                    state.neighbors.clear(slot);
                    state.lsdb.withdraw_link(neighbor);
                    state.lsdb.remove(neighbor);
                    true
                }
                None => false,
            }
        };
        conn.send(Message::acknowledge(&self.identity, &peer, removed)).await?;

        if removed {
            info!("{} quit", peer);
            Ok(Followup::FloodExcept(neighbor))
        } else {
            Ok(Followup::Nothing)
        }
    }

    async fn on_update_weight(&self, conn: &mut Connection, request: Message) -> Result<Followup> {
        let peer = request.sender();
        let neighbor = peer.simulated_address;
        let weight = request.cost()?;
        let established = self
            .state
            .lock()
            .await
            .neighbors
            .two_way()
            .any(|(_, link)| link.remote.simulated_address == neighbor);
        if !established {
            info!("Weight update from {}, which is not an established neighbour", peer);
            conn.send(Message::acknowledge(&self.identity, &peer, false)).await?;
            return Ok(Followup::Nothing);
        }

        let incoming = request.into_snapshot();
        let staged = self
            .staged_snapshot(|lsdb| {
                lsdb.set_link_cost(neighbor, weight);
                lsdb.reconcile(incoming.clone(), SweepPolicy::Sweep);
            })
            .await;
        conn.send(Message::lsa_update(&self.identity, &peer, staged)).await?;

        {
            let mut state = self.state.lock().await;
            if let Some(link) = state.neighbors.by_simulated_mut(neighbor) {
                link.weight = weight;
            }
            state.lsdb.set_link_cost(neighbor, weight);
            state.lsdb.reconcile(incoming, SweepPolicy::Sweep);
        }
        info!("Weight to {} updated to {} by peer", neighbor, weight);
        Ok(Followup::FloodExcept(neighbor))
    }
}
