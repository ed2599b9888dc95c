use crate::error::{Result, RouterError};
use crate::types::{AdjacencyStatus, Link, RouterIdentity, SimulatedAddr};

/// Number of neighbour slots a router owns.
pub const PORT_CAPACITY: usize = 4;

/// A slot claimed for an in-flight handshake.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub slot: usize,
    neighbor: SimulatedAddr,
    previous: Option<Link>,
}

/// Fixed-capacity table of neighbour slots. A simulated address or process
/// port is bound to at most one occupied slot at a time.
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    slots: [Option<Link>; PORT_CAPACITY],
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<&Link> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Link> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn find_by_simulated(&self, addr: SimulatedAddr) -> Option<usize> {
        self.occupied()
            .find(|(_, link)| link.remote.simulated_address == addr)
            .map(|(slot, _)| slot)
    }

    pub fn find_by_port(&self, port: u16) -> Option<usize> {
        self.occupied()
            .find(|(_, link)| link.remote.process_port == port)
            .map(|(slot, _)| slot)
    }

    pub fn by_port_mut(&mut self, port: u16) -> Option<&mut Link> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|link| link.remote.process_port == port)
    }

    pub fn by_simulated_mut(&mut self, addr: SimulatedAddr) -> Option<&mut Link> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|link| link.remote.simulated_address == addr)
    }

    /// Fails if `remote`'s simulated address or port is already bound.
    pub fn ensure_unbound(&self, remote: &RouterIdentity) -> Result<()> {
        if self.find_by_simulated(remote.simulated_address).is_some() {
            return Err(RouterError::DuplicateNeighbor(remote.simulated_address.to_string()));
        }
        if self.find_by_port(remote.process_port).is_some() {
            return Err(RouterError::DuplicateNeighbor(format!("port {}", remote.process_port)));
        }
        Ok(())
    }

    /// Places `link` in the first free slot and returns its index.
    pub fn occupy(&mut self, link: Link) -> Result<usize> {
        self.ensure_unbound(&link.remote)?;
        let slot = self.free_slot().ok_or(RouterError::NoFreeSlot)?;
        self.slots[slot] = Some(link);
        Ok(slot)
    }

    /// Claims a slot for a handshake with `link.remote` and marks it INIT.
    ///
    /// A slot already attached to the same neighbour (status NONE, same
    /// port) is reused and takes the new weight; anything else bound to the
    /// neighbour's address or port is a duplicate.
    pub fn reserve(&mut self, link: Link) -> Result<Reservation> {
        let neighbor = link.remote.simulated_address;
        let Some(slot) = self.find_by_simulated(neighbor) else {
            let slot = self.occupy(link.with_status(AdjacencyStatus::Init))?;
            return Ok(Reservation {
                slot,
                neighbor,
                previous: None,
            });
        };

        let existing = self
            .get_mut(slot)
            .ok_or_else(|| RouterError::NoSuchNeighbor(neighbor.to_string()))?;
        if existing.status != AdjacencyStatus::None {
            return Err(RouterError::DuplicateNeighbor(neighbor.to_string()));
        }
        if existing.remote.process_port != link.remote.process_port {
            return Err(RouterError::DuplicateNeighbor(format!("{} on port {}", neighbor, existing.remote.process_port)));
        }

        let previous = existing.clone();
        existing.weight = link.weight;
        self.set_status(slot, AdjacencyStatus::Init);
        Ok(Reservation {
            slot,
            neighbor,
            previous: Some(previous),
        })
    }

    fn holds(&self, reservation: &Reservation) -> bool {
        self.get(reservation.slot)
            .is_some_and(|link| link.remote.simulated_address == reservation.neighbor)
    }

    /// Completes a reservation: the slot becomes TWO_WAY.
    pub fn promote(&mut self, reservation: &Reservation) -> Option<&Link> {
        if !self.holds(reservation) || !self.set_status(reservation.slot, AdjacencyStatus::TwoWay) {
            return None;
        }
        self.get(reservation.slot)
    }

    /// Undoes a reservation, restoring whatever the slot held before.
    pub fn release(&mut self, reservation: Reservation) -> bool {
        if !self.holds(&reservation) {
            return false;
        }
        self.slots[reservation.slot] = reservation.previous;
        true
    }

    pub fn clear(&mut self, slot: usize) -> Option<Link> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Empties every slot, returning the links that were held.
    pub fn clear_all(&mut self) -> Vec<Link> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Moves the link in `slot` to `status`. False if the slot is empty.
    pub fn set_status(&mut self, slot: usize, status: AdjacencyStatus) -> bool {
        match self.get_mut(slot) {
            Some(link) => {
                link.set_status(status);
                true
            }
            None => false,
        }
    }

    /// Occupied slots in index order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, link)| link.as_ref().map(|link| (slot, link)))
    }

    pub fn two_way(&self) -> impl Iterator<Item = (usize, &Link)> {
        self.occupied().filter(|(_, link)| link.is_two_way())
    }

    pub fn len(&self) -> usize {
        self.occupied().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn identity(last: u8) -> RouterIdentity {
        RouterIdentity::new("127.0.0.1", 10000 + last as u16, Ipv4Addr::new(10, 0, 0, last))
    }

    fn link(last: u8) -> Link {
        Link::new(identity(1), identity(last), last as u16)
    }

    #[test]
    fn fills_slots_in_order_up_to_capacity() {
        let mut table = NeighborTable::new();
        for (expected, last) in (2..2 + PORT_CAPACITY as u8).enumerate() {
            assert_eq!(table.occupy(link(last)).unwrap(), expected);
        }
        assert_eq!(table.len(), PORT_CAPACITY);
        assert!(matches!(table.occupy(link(50)), Err(RouterError::NoFreeSlot)));
        assert_eq!(table.len(), PORT_CAPACITY);
    }

    #[test]
    fn rejects_duplicate_address_or_port() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();

        let same_addr = Link::new(identity(1), RouterIdentity::new("127.0.0.1", 20000, Ipv4Addr::new(10, 0, 0, 2)), 1);
        assert!(matches!(table.occupy(same_addr), Err(RouterError::DuplicateNeighbor(_))));

        let same_port = Link::new(identity(1), RouterIdentity::new("127.0.0.1", 10002, Ipv4Addr::new(10, 0, 0, 9)), 1);
        assert!(matches!(table.occupy(same_port), Err(RouterError::DuplicateNeighbor(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cleared_slot_is_reused() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();
        table.occupy(link(3)).unwrap();

        let removed = table.clear(0).unwrap();
        assert_eq!(removed.remote, identity(2));
        assert_eq!(table.free_slot(), Some(0));
        assert_eq!(table.occupy(link(4)).unwrap(), 0);
        assert_eq!(table.find_by_port(10004), Some(0));
        assert_eq!(table.find_by_simulated(Ipv4Addr::new(10, 0, 0, 3)), Some(1));
    }

    #[test]
    fn two_way_filters_by_status() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();
        table.occupy(link(3)).unwrap();
        assert!(table.set_status(1, AdjacencyStatus::TwoWay));
        assert!(!table.set_status(3, AdjacencyStatus::TwoWay));

        let two_way: Vec<_> = table.two_way().map(|(slot, _)| slot).collect();
        assert_eq!(two_way, vec![1]);
    }

    #[test]
    fn reserve_then_release_restores_attached_slot() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();

        let reservation = table.reserve(Link::new(identity(1), identity(2), 9)).unwrap();
        assert_eq!(reservation.slot, 0);
        assert_eq!(table.get(0).map(|l| (l.status, l.weight)), Some((AdjacencyStatus::Init, 9)));

        assert!(table.release(reservation));
        assert_eq!(table.get(0).map(|l| (l.status, l.weight)), Some((AdjacencyStatus::None, 2)));
    }

    #[test]
    fn reserve_then_release_frees_new_slot() {
        let mut table = NeighborTable::new();
        let reservation = table.reserve(link(3)).unwrap();
        assert_eq!(table.get(reservation.slot).map(|l| l.status), Some(AdjacencyStatus::Init));
        assert!(table.release(reservation));
        assert!(table.is_empty());
    }

    #[test]
    fn promote_marks_two_way() {
        let mut table = NeighborTable::new();
        let reservation = table.reserve(link(3)).unwrap();
        assert!(table.promote(&reservation).is_some_and(|l| l.is_two_way()));

        // an established neighbour cannot be reserved again
        assert!(matches!(table.reserve(link(3)), Err(RouterError::DuplicateNeighbor(_))));
    }

    #[test]
    fn stale_reservation_is_ignored() {
        let mut table = NeighborTable::new();
        let reservation = table.reserve(link(3)).unwrap();
        table.clear(reservation.slot);
        table.occupy(link(4)).unwrap();

        assert!(table.promote(&reservation).is_none());
        assert!(!table.release(reservation));
        assert_eq!(table.get(0).map(|l| l.status), Some(AdjacencyStatus::None));
    }

    #[test]
    fn reserve_rejects_port_mismatch() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();
        let moved = Link::new(identity(1), RouterIdentity::new("127.0.0.1", 20002, Ipv4Addr::new(10, 0, 0, 2)), 1);
        assert!(matches!(table.reserve(moved), Err(RouterError::DuplicateNeighbor(_))));
    }

    #[test]
    fn clear_all_empties_table() {
        let mut table = NeighborTable::new();
        table.occupy(link(2)).unwrap();
        table.occupy(link(3)).unwrap();
        assert_eq!(table.clear_all().len(), 2);
        assert!(table.is_empty());
        assert!(table.clear(0).is_none());
    }
}
