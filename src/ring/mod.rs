//! Consistent-hash ring mapping a drain token to one of N configured
//! destinations. Built once at startup from the fixed destination set;
//! `get` is read-only and lock-free thereafter, which is the whole point —
//! the destination set never changes after boot, so there is no mutation
//! path to expose.

/// 32-bit FNV-1a. Non-cryptographic and deterministic across processes,
/// which is all routing needs; hand-rolling it is clearer than taking on
/// a dependency for four lines of arithmetic.
fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Virtual nodes per destination. ~46 smooths load distribution across a
/// small destination set without materially slowing `get`'s binary search.
const VIRTUAL_NODES: u32 = 46;

/// An immutable consistent-hash ring over a fixed destination-name set.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Parallel to `hashes`: the destination owning each virtual-node hash.
    hashes: Vec<u32>,
    owners: Vec<String>,
}

impl Ring {
    /// Build a ring from a destination-name set. Order does not affect the
    /// resulting ring — the virtual-node hash only depends on the virtual
    /// index and the destination name, and points are sorted before use —
    /// so two processes configured with the same destination set agree.
    pub fn build(destinations: &[String]) -> Self {
        let mut points: Vec<(u32, String)> = Vec::with_capacity(destinations.len() * VIRTUAL_NODES as usize);
        for name in destinations {
            for i in 0..VIRTUAL_NODES {
                let key = format!("{i}{name}");
                points.push((fnv1a32(key.as_bytes()), name.clone()));
            }
        }
        points.sort_by_key(|(h, _)| *h);

        let mut hashes = Vec::with_capacity(points.len());
        let mut owners = Vec::with_capacity(points.len());
        for (h, name) in points {
            hashes.push(h);
            owners.push(name);
        }
        Self { hashes, owners }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Resolve a key to its destination name. `None` only when the ring is
    /// empty. Uses a strictly-greater-than binary search with wrap-around,
    /// which is what makes the choice agree across processes regardless of
    /// insertion order.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.hashes.is_empty() {
            return None;
        }
        let h = fnv1a32(key.as_bytes());
        let idx = match self.hashes.binary_search(&h) {
            Ok(i) => i,
            Err(i) => i,
        };
        let idx = if idx == self.hashes.len() { 0 } else { idx };
        Some(&self.owners[idx])
    }
}
