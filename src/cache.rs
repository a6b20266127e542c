/// Set-associative LRU cache, used for both L1 (per-core) and L2 (shared).
///
/// `Cache` only models tags, validity, and dirty bits — there is no backing
/// data array, since this simulator never moves real bytes (see the crate's
/// non-goals). Write-through/write-back and allocate/no-allocate policy
/// decisions live in the caller (`core`), not here: this type just answers
/// "is this line present" and "make room for this line", exactly like the
/// `access_cache`/`insert_cache`/`find_tag_and_set` trio it is ported from.
pub type Addr = u64;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheLine {
    pub valid: bool,
    pub tag: Addr,
    pub dirty: bool,
    lru_seq: u64,
}

pub struct Cache {
    name: &'static str,
    line_size: usize,
    num_sets: usize,
    assoc: usize,
    sets: Vec<Vec<CacheLine>>,
    seq: u64,
}

impl Cache {
    pub fn new(name: &'static str, size_bytes: usize, assoc: usize, line_size: usize) -> Self {
        let num_sets = (size_bytes / line_size / assoc).max(1);
        Cache {
            name,
            line_size,
            num_sets,
            assoc,
            sets: vec![vec![CacheLine::default(); assoc]; num_sets],
            seq: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decompose `addr` into its cache-line tag and set index. Pure address
    /// arithmetic; does not touch cache state.
    pub fn find_tag_and_set(&self, addr: Addr) -> (Addr, usize) {
        let block = addr / self.line_size as u64;
        let set = (block % self.num_sets as u64) as usize;
        let tag = block / self.num_sets as u64;
        (tag, set)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Look up `addr`. On hit, refreshes LRU and returns the line so the
    /// caller can inspect or flip its dirty bit. Never allocates.
    pub fn access(&mut self, addr: Addr) -> Option<&mut CacheLine> {
        let (tag, set) = self.find_tag_and_set(addr);
        let seq = self.next_seq();
        let way = self.sets[set]
            .iter()
            .position(|line| line.valid && line.tag == tag)?;
        let line = &mut self.sets[set][way];
        line.lru_seq = seq;
        Some(line)
    }

    /// Allocate a line for `addr`, evicting the LRU way in its set if full.
    /// Returns the freshly-inserted line plus the evicted block's address
    /// and dirty bit (`None` if the victim way was not valid, i.e. no real
    /// eviction happened — the dirty bit of a non-eviction is meaningless).
    pub fn insert(&mut self, addr: Addr) -> (&mut CacheLine, Option<(Addr, bool)>) {
        let (tag, set) = self.find_tag_and_set(addr);
        let seq = self.next_seq();

        let way = self.sets[set]
            .iter()
            .enumerate()
            .min_by_key(|(_, line)| if line.valid { line.lru_seq } else { 0 })
            .map(|(i, _)| i)
            .expect("cache set has at least one way");

        let victim = &self.sets[set][way];
        let victim_info = if victim.valid {
            let addr = (victim.tag * self.num_sets as u64 + set as u64) * self.line_size as u64;
            Some((addr, victim.dirty))
        } else {
            None
        };

        let line = &mut self.sets[set][way];
        line.valid = true;
        line.tag = tag;
        line.dirty = false;
        line.lru_seq = seq;
        (line, victim_info)
    }
}
