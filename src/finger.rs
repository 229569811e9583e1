//! Finger table routing.
//!
//! The finger table covers the whole ring, starting just past the owning
//! peer's id, in exponentially growing arcs: finger `i` is responsible for
//! keys in `[(start + 2^i) mod R, (start + 2^(i+1) - 1) mod R]` and records
//! the peer succeeding its lower bound. Scanning the fingers for the arc
//! containing a key gives a forwarding target that at least halves the
//! remaining clockwise distance, which is what bounds lookups to a
//! logarithmic number of hops.

use std::fmt;
use std::fmt::Write as _;

use num_bigint::BigUint;
use num_traits::One;

use crate::descriptor::PeerDescriptor;
use crate::key::{ring_size, Key, KEY_HEX_DIGITS};

/// Entries in a full table: one per bit of the identifier space.
pub const FINGER_COUNT: usize = 4 * KEY_HEX_DIGITS as usize;

/// One routing entry: an arc of the ring and the peer succeeding its lower
/// bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Finger {
    pub lower_bound: Key,
    pub upper_bound: Key,
    pub successor: PeerDescriptor,
}

/// The per-peer table of [`Finger`]s.
#[derive(Debug, Clone)]
pub struct FingerTable {
    starting_key: Key,
    fingers: Vec<Finger>,
}

impl FingerTable {
    /// An empty table anchored at the owning peer's id; entries are added
    /// by the cold-start population and rewritten by stabilization.
    pub fn new(starting_key: Key) -> FingerTable {
        FingerTable { starting_key, fingers: Vec::new() }
    }

    /// Total entries a populated table holds.
    pub fn entry_count(&self) -> usize {
        FINGER_COUNT
    }

    pub fn len(&self) -> usize {
        self.fingers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingers.is_empty()
    }

    /// The arc covered by finger `n`, independent of table contents.
    pub fn range(&self, n: usize) -> (Key, Key) {
        let ring = ring_size();
        let lower = self.starting_key.offset_by(&(BigUint::one() << n));
        let upper = self
            .starting_key
            .offset_by(&((BigUint::one() << (n + 1)) + &ring - BigUint::one()));
        (lower, upper)
    }

    pub fn push(&mut self, finger: Finger) {
        self.fingers.push(finger);
    }

    pub fn get(&self, n: usize) -> Option<&Finger> {
        self.fingers.get(n)
    }

    /// The successor recorded for the first finger whose arc contains the
    /// key, bounds inclusive.
    pub fn lookup(&self, key: &Key) -> Option<&PeerDescriptor> {
        self.fingers
            .iter()
            .find(|finger| key.in_between(&finger.lower_bound, &finger.upper_bound, true))
            .map(|finger| &finger.successor)
    }

    /// Overwrite the successor of finger `n`.
    pub fn edit_nth(&mut self, n: usize, successor: PeerDescriptor) {
        if let Some(finger) = self.fingers.get_mut(n) {
            finger.successor = successor;
        }
    }

    /// Point every finger whose lower bound falls in the new peer's key
    /// range at the new peer.
    pub fn adjust_fingers(&mut self, new_peer: &PeerDescriptor) {
        for finger in &mut self.fingers {
            if finger
                .lower_bound
                .in_between(&new_peer.min_key, &new_peer.max_key, true)
            {
                finger.successor = new_peer.clone();
            }
        }
    }

    /// Replace the whole table, keeping the anchor.
    pub fn replace(&mut self, fingers: Vec<Finger>) {
        self.fingers = fingers;
    }
}

impl fmt::Display for FingerTable {
    /// Log-friendly rendering with runs of same-successor fingers collapsed
    /// into a single row.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut collapsed: Vec<Finger> = Vec::new();
        for finger in &self.fingers {
            match collapsed.last_mut() {
                Some(last) if last.successor == finger.successor => {
                    last.upper_bound = finger.upper_bound.clone();
                }
                _ => collapsed.push(finger.clone()),
            }
        }

        let mut out = String::new();
        for finger in &collapsed {
            writeln!(
                out,
                "[{:>32} .. {:>32}] -> {} ({})",
                finger.lower_bound.to_hex(),
                finger.upper_bound.to_hex(),
                finger.successor.id,
                finger.successor.endpoint(),
            )?;
        }
        f.write_str(out.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_at(start: u32) -> FingerTable {
        FingerTable::new(Key::from(start))
    }

    fn peer(port: u16) -> PeerDescriptor {
        PeerDescriptor::new("127.0.0.1", port)
    }

    #[test]
    fn ranges_tile_the_ring() {
        let table = table_at(7);
        for i in 0..FINGER_COUNT - 1 {
            let (_, upper) = table.range(i);
            let (next_lower, _) = table.range(i + 1);
            assert_eq!(&upper + 1, next_lower, "gap between finger {i} and {}", i + 1);
        }

        // The union of all arcs is the ring minus the starting id itself.
        let (first_lower, _) = table.range(0);
        let (_, last_upper) = table.range(FINGER_COUNT - 1);
        assert_eq!(first_lower, Key::from(8));
        assert_eq!(&last_upper + 1, Key::from(7));
    }

    #[test]
    fn ranges_wrap_at_the_ring_end() {
        let start = &Key::zero() - 3;
        let table = FingerTable::new(start.clone());
        let (lower, upper) = table.range(0);
        assert_eq!(lower, &start + 1);
        assert_eq!(upper, &start + 1);
        let (lower, upper) = table.range(2);
        assert_eq!(lower, &start + 4);
        assert_eq!(upper, &start + 7);
    }

    #[test]
    fn lookup_scans_in_order() {
        let mut table = table_at(0);
        for i in 0..4 {
            let (lower_bound, upper_bound) = table.range(i);
            table.push(Finger {
                lower_bound,
                upper_bound,
                successor: peer(5001 + i as u16),
            });
        }

        assert_eq!(table.lookup(&Key::from(1)).unwrap().port, 5001);
        assert_eq!(table.lookup(&Key::from(2)).unwrap().port, 5002);
        assert_eq!(table.lookup(&Key::from(3)).unwrap().port, 5002);
        assert_eq!(table.lookup(&Key::from(12)).unwrap().port, 5004);
        assert!(table.lookup(&Key::from(100)).is_none());
    }

    #[test]
    fn adjust_fingers_captures_covered_bounds() {
        let mut table = table_at(0);
        for i in 0..8 {
            let (lower_bound, upper_bound) = table.range(i);
            table.push(Finger { lower_bound, upper_bound, successor: peer(5001) });
        }

        // A peer covering keys [4, 100]: every finger whose lower bound
        // falls inside moves to it.
        let mut newcomer = peer(6000);
        newcomer.min_key = Key::from(4);
        newcomer.max_key = Key::from(100);
        newcomer.id = Key::from(100);
        table.adjust_fingers(&newcomer);

        for i in 0..8 {
            let finger = table.get(i).unwrap();
            let covered =
                finger.lower_bound.in_between(&Key::from(4), &Key::from(100), true);
            assert_eq!(finger.successor.port == 6000, covered, "finger {i}");
        }
    }

    #[test]
    fn edit_nth_overwrites_a_single_entry() {
        let mut table = table_at(0);
        for i in 0..3 {
            let (lower_bound, upper_bound) = table.range(i);
            table.push(Finger { lower_bound, upper_bound, successor: peer(5001) });
        }
        table.edit_nth(1, peer(7000));
        assert_eq!(table.get(0).unwrap().successor.port, 5001);
        assert_eq!(table.get(1).unwrap().successor.port, 7000);
        assert_eq!(table.get(2).unwrap().successor.port, 5001);
    }
}
