/// Victim Tag Array — CCWS's per-warp record of recently evicted cache lines.
///
/// A VTA hit (the line a warp is re-fetching was evicted from this warp's own
/// footprint, not another warp's) is the signal CCWS's feedback loop uses to
/// shrink that warp's effective working set. Fully associative, fixed at
/// `VTA_ASSOC` entries, LRU-by-timestamp replacement.
use crate::cache::Addr;

/// Associativity of each warp's VTA, per the CCWS proposal.
pub const VTA_ASSOC: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct VtaEntry {
    valid: bool,
    tag: Addr,
    lru_timestamp: u64,
}

/// One warp's Victim Tag Array.
pub struct Vta {
    entries: Vec<VtaEntry>,
    /// Monotonic clock, advanced on every access and insert. Starts above
    /// zero so a freshly-replaced entry never ties with a never-touched one.
    clock: u64,
}

impl Vta {
    pub fn new(num_entries: usize) -> Self {
        Vta {
            entries: vec![VtaEntry::default(); num_entries],
            clock: 10,
        }
    }

    /// Look up `tag`. Always advances the clock, even on a miss, matching
    /// the ported behavior rather than only ticking on hits. `update`
    /// controls whether a hit refreshes the entry's own LRU timestamp — a
    /// plain probe that shouldn't perturb replacement order can pass `false`.
    pub fn access(&mut self, tag: Addr, update: bool) -> bool {
        self.clock += 1;
        for entry in self.entries.iter_mut() {
            if entry.valid && entry.tag == tag {
                if update {
                    entry.lru_timestamp = self.clock;
                }
                return true;
            }
        }
        false
    }

    /// Insert `tag`, evicting the minimum-timestamp entry (valid or not).
    pub fn insert(&mut self, tag: Addr) {
        self.clock += 1;
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.lru_timestamp)
            .map(|(i, _)| i)
            .expect("VTA has at least one entry");
        let entry = &mut self.entries[oldest];
        entry.valid = true;
        entry.tag = tag;
        entry.lru_timestamp = self.clock;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_vta() {
        let mut vta = Vta::new(VTA_ASSOC);
        assert!(!vta.access(0x1000, true));
    }

    #[test]
    fn hit_after_insert() {
        let mut vta = Vta::new(VTA_ASSOC);
        vta.insert(0x1000);
        assert!(vta.access(0x1000, true));
        assert!(!vta.access(0x2000, true));
    }

    #[test]
    fn replacement_evicts_least_recently_touched_entry() {
        let mut vta = Vta::new(2);
        vta.insert(0xA);
        vta.insert(0xB);
        // Touch 0xA so 0xB becomes the LRU victim.
        assert!(vta.access(0xA, true));
        vta.insert(0xC);
        assert!(vta.access(0xA, true));
        assert!(!vta.access(0xB, true));
        assert!(vta.access(0xC, true));
    }
}
