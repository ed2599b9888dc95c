use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::{Cost, LinkDescriptor, Lsa, SimulatedAddr};

/// Whether a reconciliation may delete origins missing from the incoming
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPolicy {
    /// The sender's snapshot is complete; origins it lacks are gone.
    Sweep,
    /// Merge only. Used when the sender is joining and its view is partial.
    Retain,
}

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: Vec<SimulatedAddr>,
    pub replaced: Vec<SimulatedAddr>,
    pub removed: Vec<SimulatedAddr>,
    /// Our own LSA was re-originated past a stale copy seen in the snapshot.
    pub reoriginated: bool,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.replaced.is_empty() || !self.removed.is_empty() || self.reoriginated
    }
}

/// Per-origin LSA store. Always holds an entry for the local router.
#[derive(Debug, Clone)]
pub struct LinkStateDatabase {
    local: SimulatedAddr,
    store: BTreeMap<SimulatedAddr, Lsa>,
}

impl LinkStateDatabase {
    pub fn new(local: SimulatedAddr) -> Self {
        let mut store = BTreeMap::new();
        store.insert(local, Lsa::new(local, 0));
        Self { local, store }
    }

    pub fn local(&self) -> SimulatedAddr {
        self.local
    }

    pub fn get(&self, origin: SimulatedAddr) -> Option<&Lsa> {
        self.store.get(&origin)
    }

    pub fn contains(&self, origin: SimulatedAddr) -> bool {
        self.store.contains_key(&origin)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lsa> {
        self.store.values()
    }

    pub fn own_lsa(&self) -> &Lsa {
        // seeded in `new`, and `remove` refuses the local origin
        &self.store[&self.local]
    }

    fn own_lsa_mut(&mut self) -> &mut Lsa {
        let local = self.local;
        self.store.entry(local).or_insert_with(|| Lsa::new(local, 0))
    }

    /// Stores `lsa` if its origin is unknown or its sequence number is
    /// strictly greater than the stored one. Returns whether it was stored.
    pub fn upsert_if_newer(&mut self, mut lsa: Lsa) -> bool {
        if lsa.origin == self.local {
            return false;
        }
        match self.store.get(&lsa.origin) {
            Some(stored) if lsa.sequence <= stored.sequence => false,
            _ => {
                lsa.normalize();
                self.store.insert(lsa.origin, lsa);
                true
            }
        }
    }

    /// Removes a remote origin. The local entry cannot be removed.
    pub fn remove(&mut self, origin: SimulatedAddr) -> Option<Lsa> {
        if origin == self.local {
            return None;
        }
        self.store.remove(&origin)
    }

    /// Every stored LSA, ordered by origin.
    pub fn snapshot(&self) -> Vec<Lsa> {
        self.store.values().cloned().collect()
    }

    /// Adds or replaces our descriptor for `link.neighbor` and advances our
    /// sequence number.
    pub fn originate_link(&mut self, link: LinkDescriptor) {
        let own = self.own_lsa_mut();
        own.upsert_link(link);
        own.bump_sequence();
    }

    /// Drops our descriptor for `neighbor`. The sequence number only advances
    /// when a descriptor was actually removed.
    pub fn withdraw_link(&mut self, neighbor: SimulatedAddr) -> bool {
        let own = self.own_lsa_mut();
        if own.remove_link(neighbor).is_some() {
            own.bump_sequence();
            true
        } else {
            false
        }
    }

    /// Changes the cost of our descriptor for `neighbor`.
    pub fn set_link_cost(&mut self, neighbor: SimulatedAddr, cost: Cost) -> bool {
        let own = self.own_lsa_mut();
        match own.link_to(neighbor).copied() {
            Some(mut link) => {
                link.cost = cost;
                own.upsert_link(link);
                own.bump_sequence();
                true
            }
            None => false,
        }
    }

    /// Merges a full snapshot received from a peer (mark-and-sweep).
    ///
    /// Unknown origins are inserted and strictly newer ones replace what we
    /// hold. With [`SweepPolicy::Sweep`], every non-local origin absent from
    /// the snapshot is removed. Our own LSA is never taken from a peer; a
    /// newer copy, or a different one at our sequence number, makes us
    /// re-originate above it.
    pub fn reconcile(&mut self, snapshot: impl IntoIterator<Item = Lsa>, policy: SweepPolicy) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut unseen: BTreeSet<SimulatedAddr> = self.store.keys().copied().filter(|origin| *origin != self.local).collect();

        for lsa in snapshot {
            let origin = lsa.origin;
            if origin == self.local {
                let own = self.own_lsa_mut();
                // an identical echo of our current LSA is not a conflict
                if lsa.sequence > own.sequence || (lsa.sequence == own.sequence && lsa.links() != own.links()) {
                    own.sequence = lsa.sequence.saturating_add(1);
                    outcome.reoriginated = true;
                }
                continue;
            }

            let known = self.store.contains_key(&origin);
            if self.upsert_if_newer(lsa) {
                if known {
                    outcome.replaced.push(origin);
                } else {
                    outcome.inserted.push(origin);
                }
            }
            unseen.remove(&origin);
        }

        if policy == SweepPolicy::Sweep {
            for origin in unseen {
                self.store.remove(&origin);
                outcome.removed.push(origin);
            }
        }

        outcome
    }
}

impl fmt::Display for LinkStateDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lsa in self.store.values() {
            writeln!(f, "{lsa}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> SimulatedAddr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn link(last: u8, cost: Cost) -> LinkDescriptor {
        LinkDescriptor {
            neighbor: addr(last),
            port: 10000 + last as u16,
            cost,
        }
    }

    fn lsa(origin: u8, sequence: i32, links: &[(u8, Cost)]) -> Lsa {
        Lsa::with_links(addr(origin), sequence, links.iter().map(|(n, c)| link(*n, *c)))
    }

    #[test]
    fn seeded_with_local_entry() {
        let db = LinkStateDatabase::new(addr(1));
        assert_eq!(db.len(), 1);
        assert_eq!(db.own_lsa().sequence, 0);
        assert!(db.own_lsa().links().is_empty());
    }

    #[test]
    fn upsert_only_accepts_strictly_newer() {
        let mut db = LinkStateDatabase::new(addr(1));
        assert!(db.upsert_if_newer(lsa(2, 5, &[(1, 3)])));
        assert!(!db.upsert_if_newer(lsa(2, 5, &[(3, 9)])));
        assert!(!db.upsert_if_newer(lsa(2, 4, &[(3, 9)])));
        assert_eq!(db.get(addr(2)).map(|l| l.links().len()), Some(1));

        assert!(db.upsert_if_newer(lsa(2, 6, &[(3, 9)])));
        assert_eq!(db.get(addr(2)).map(|l| l.sequence), Some(6));
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut db = LinkStateDatabase::new(addr(1));
        let update = lsa(3, 2, &[(1, 4)]);
        db.upsert_if_newer(update.clone());
        let once = db.snapshot();
        db.upsert_if_newer(update);
        assert_eq!(db.snapshot(), once);
    }

    #[test]
    fn local_origin_cannot_be_removed() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.upsert_if_newer(lsa(2, 0, &[]));
        assert!(db.remove(addr(1)).is_none());
        assert!(db.remove(addr(2)).is_some());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn originate_and_withdraw_advance_sequence() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.originate_link(link(2, 5));
        assert_eq!(db.own_lsa().sequence, 1);
        assert!(db.set_link_cost(addr(2), 8));
        assert_eq!(db.own_lsa().link_to(addr(2)).map(|l| l.cost), Some(8));
        assert_eq!(db.own_lsa().sequence, 2);

        assert!(db.withdraw_link(addr(2)));
        assert!(!db.withdraw_link(addr(2)));
        assert!(!db.set_link_cost(addr(2), 1));
        assert_eq!(db.own_lsa().sequence, 3);
    }

    #[test]
    fn reconcile_inserts_replaces_and_sweeps() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.upsert_if_newer(lsa(2, 1, &[(1, 2)]));
        db.upsert_if_newer(lsa(3, 1, &[(2, 3)]));

        let outcome = db.reconcile(vec![lsa(2, 2, &[(1, 2), (4, 1)]), lsa(4, 0, &[(2, 1)])], SweepPolicy::Sweep);

        assert_eq!(outcome.replaced, vec![addr(2)]);
        assert_eq!(outcome.inserted, vec![addr(4)]);
        assert_eq!(outcome.removed, vec![addr(3)]);
        assert!(outcome.changed());
        assert!(db.contains(addr(1)));
        assert!(!db.contains(addr(3)));
    }

    #[test]
    fn reconcile_missing_origin_always_reports_change() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.upsert_if_newer(lsa(2, 7, &[]));
        let outcome = db.reconcile(Vec::new(), SweepPolicy::Sweep);
        assert_eq!(outcome.removed, vec![addr(2)]);
        assert!(outcome.changed());
    }

    #[test]
    fn reconcile_with_retain_keeps_missing_origins() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.upsert_if_newer(lsa(2, 1, &[]));
        let outcome = db.reconcile(vec![lsa(3, 0, &[])], SweepPolicy::Retain);
        assert!(outcome.removed.is_empty());
        assert!(db.contains(addr(2)));
        assert!(db.contains(addr(3)));
    }

    #[test]
    fn reconcile_stale_origin_counts_as_seen() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.upsert_if_newer(lsa(2, 4, &[]));
        let outcome = db.reconcile(vec![lsa(2, 1, &[])], SweepPolicy::Sweep);
        assert!(!outcome.changed());
        assert_eq!(db.get(addr(2)).map(|l| l.sequence), Some(4));
    }

    #[test]
    fn reconcile_identical_snapshot_is_quiet() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.originate_link(link(2, 5));
        db.upsert_if_newer(lsa(2, 1, &[(1, 5)]));
        let snapshot = db.snapshot();
        let outcome = db.reconcile(snapshot, SweepPolicy::Sweep);
        assert!(!outcome.changed());
    }

    #[test]
    fn reconcile_reoriginates_past_stale_self_copy() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.originate_link(link(2, 5));

        let outcome = db.reconcile(vec![lsa(1, 9, &[])], SweepPolicy::Sweep);

        assert!(outcome.reoriginated);
        assert_eq!(db.own_lsa().sequence, 10);
        // content is still ours
        assert_eq!(db.own_lsa().links().len(), 1);

        let older = db.reconcile(vec![lsa(1, 3, &[])], SweepPolicy::Sweep);
        assert!(!older.reoriginated);
    }

    #[test]
    fn reconcile_reoriginates_on_conflicting_self_copy() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.originate_link(link(2, 5));

        let outcome = db.reconcile(vec![lsa(1, 1, &[(2, 9)])], SweepPolicy::Retain);
        assert!(outcome.reoriginated);
        assert_eq!(db.own_lsa().sequence, 2);
        assert_eq!(db.own_lsa().link_to(addr(2)).map(|l| l.cost), Some(5));
    }

    #[test]
    fn display_lists_every_origin() {
        let mut db = LinkStateDatabase::new(addr(1));
        db.originate_link(link(2, 5));
        db.upsert_if_newer(lsa(2, 1, &[(1, 5)]));
        let dump = db.to_string();
        assert_eq!(dump, "10.0.0.1(1):\t10.0.0.2,10002,5\n10.0.0.2(1):\t10.0.0.1,10001,5\n");
    }
}
