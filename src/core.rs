/// Per-core cycle state machine — the heart of the simulator.
///
/// Each call to `run_a_cycle` performs the fixed seven-step sequence a
/// faithful port cannot reorder without changing results: decay CCWS
/// scores, drain memory responses, park the running warp, refill from the
/// block dispatcher, invoke the warp scheduler, refill the trace prefetch
/// buffer, then execute (at most) one instruction.
use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};

use crate::cache::Cache;
use crate::dispatcher::BlockDispatcher;
use crate::error::SimError;
use crate::memory::{Ram, RamRequest};
use crate::scheduler::{SchedulerState, WarpScheduler};
use crate::scoreboard::Scoreboard;
use crate::stats::CacheStats;
use crate::trace::TraceRecord;
use crate::warp::{Warp, CCWS_BASE_SCORE};
use crate::{BlockId, CoreId, WarpId};

/// Maximum number of warps a core may hold resident at once (running +
/// dispatched + suspended).
pub const MAX_RUNNING_WARP_NUM: u32 = 4;

/// Cycle count past which a core is declared deadlocked and force-retired.
pub const DEADLOCK_CYCLE_LIMIT: u64 = 5_000_000_000;

/// Opens a fresh trace reader and constructs a `Warp` for a newly-dispatched
/// warp id. Implemented by the simulator, which alone knows the current
/// kernel's trace file layout.
pub trait WarpFactory {
    fn create_warp(
        &mut self,
        warp_id: WarpId,
        block_id: BlockId,
        dispatch_cycle: u64,
    ) -> Result<Warp, SimError>;
}

/// Everything a core's cycle needs that it does not own outright: the
/// shared L2, the configured scheduler, the scoreboard, memory, the block
/// dispatcher, and a way to materialize newly-dispatched warps.
pub struct CycleResources<'a> {
    pub global_cycle: u64,
    pub l2: &'a mut Cache,
    pub scheduler: &'a dyn WarpScheduler,
    pub scoreboard: &'a mut Scoreboard,
    pub ram: &'a mut Ram,
    pub dispatcher: &'a mut BlockDispatcher,
    pub warp_factory: &'a mut dyn WarpFactory,
    pub cache_stats: &'a mut CacheStats,
    pub enable_cache: bool,
    pub max_block_per_core: u32,
}

pub struct Core {
    pub id: CoreId,
    cycle: u64,
    stall_cycles: u64,
    retired_instruction_count: u64,
    ld_req_count: u64,
    st_req_count: u64,
    num_vta_hits: u64,
    running: Option<Warp>,
    dispatched: VecDeque<Warp>,
    suspended: HashMap<WarpId, Warp>,
    memory_responses: VecDeque<WarpId>,
    l1: Cache,
    running_block_count: u32,
    fetching_block_id: Option<BlockId>,
    scheduler_state: SchedulerState,
    retired: bool,
}

impl Core {
    pub fn new(id: CoreId, start_cycle: u64, l1: Cache) -> Self {
        Core {
            id,
            cycle: start_cycle,
            stall_cycles: 0,
            retired_instruction_count: 0,
            ld_req_count: 0,
            st_req_count: 0,
            num_vta_hits: 0,
            running: None,
            dispatched: VecDeque::new(),
            suspended: HashMap::new(),
            memory_responses: VecDeque::new(),
            l1,
            running_block_count: 0,
            fetching_block_id: None,
            scheduler_state: SchedulerState::default(),
            retired: false,
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn stall_cycles(&self) -> u64 {
        self.stall_cycles
    }

    pub fn instructions_retired(&self) -> u64 {
        self.retired_instruction_count
    }

    pub fn ld_req_count(&self) -> u64 {
        self.ld_req_count
    }

    pub fn st_req_count(&self) -> u64 {
        self.st_req_count
    }

    /// Push a memory response (a ready warp id) onto this core's queue.
    pub fn push_memory_response(&mut self, warp_id: WarpId) {
        self.memory_responses.push_back(warp_id);
    }

    /// Reset the per-kernel fields a new kernel launch must not inherit from
    /// the previous one: block ids are kernel-relative, so a stale
    /// `fetching_block_id` from the prior kernel would otherwise collide
    /// with the new kernel's own block numbering.
    pub fn begin_kernel(&mut self) {
        self.retired = false;
        self.fetching_block_id = None;
        self.running_block_count = 0;
        self.scheduler_state = SchedulerState::default();
    }

    /// Deferred L1 repair for the L2-miss path (§4.6): a memory response
    /// named this core, so install the line here too and, if that evicts a
    /// prior line, credit the tag to the *suspended* warp's VTA (it has not
    /// been woken yet — this runs before the core's next cycle drains it).
    pub fn repair_l1_on_response(&mut self, warp_id: WarpId, addr: crate::cache::Addr) {
        let (_, victim) = self.l1.insert(addr);
        if let Some((victim_addr, _)) = victim {
            let (tag, _) = self.l1.find_tag_and_set(victim_addr);
            if let Some(warp) = self.suspended.get_mut(&warp_id) {
                warp.vta.insert(tag);
            }
        }
    }

    fn running_warp_num(&self) -> usize {
        self.dispatched.len() + self.suspended.len() + usize::from(self.running.is_some())
    }

    pub fn run_a_cycle(&mut self, res: &mut CycleResources) -> Result<(), SimError> {
        if self.cycle > DEADLOCK_CYCLE_LIMIT {
            warn!(
                "core {} deadlock: {} warps still suspended",
                self.id,
                self.suspended.len()
            );
            self.retired = true;
            return Ok(());
        }
        self.cycle += 1;

        // 1. Decay CCWS scores for every warp this core owns.
        if let Some(w) = self.running.as_mut() {
            w.decay_ccws_score();
        }
        for w in self.suspended.values_mut() {
            w.decay_ccws_score();
        }
        for w in self.dispatched.iter_mut() {
            w.decay_ccws_score();
        }

        // 2. Drain memory responses: wake matching suspended warps, discard
        // anything that no longer belongs to a suspended warp.
        while let Some(warp_id) = self.memory_responses.pop_front() {
            if let Some(warp) = self.suspended.remove(&warp_id) {
                trace!("core {}: warp {:#x} ready", self.id, warp_id);
                self.dispatched.push_back(warp);
            }
        }

        // 3. Park the running warp at the back of the dispatch queue.
        if let Some(w) = self.running.take() {
            self.dispatched.push_back(w);
        }

        // 4. Refill from the block dispatcher if the dispatch queue ran dry.
        if self.dispatched.is_empty() {
            self.refill_from_dispatcher(res)?;
            if self.dispatched.is_empty() && self.suspended.is_empty() {
                self.retired = true;
                debug!("core {} retired", self.id);
                return Ok(());
            }
        }

        // 5. Invoke the warp scheduler.
        let running_warp_num = self.running_warp_num();
        match res
            .scheduler
            .schedule(&mut self.dispatched, &mut self.scheduler_state, running_warp_num)
        {
            Some(warp) => self.running = Some(warp),
            None => {
                self.stall_cycles += 1;
                return Ok(());
            }
        }

        // 6. Refill the running warp's trace prefetch buffer if empty.
        let warp = self.running.as_mut().expect("just scheduled a warp");
        if warp.refill_if_empty()? {
            trace!("core {}: warp {:#x} finished", self.id, warp.warp_id);
            self.running = None;
            return Ok(());
        }

        // 7. Execute one instruction.
        let inst = self
            .running
            .as_ref()
            .expect("refilled warp still running")
            .front_instruction()
            .expect("refill_if_empty guarantees a non-empty buffer here")
            .clone();

        if (inst.is_load || inst.is_store) && !inst.is_using_shared_memory() {
            let suspend = self.send_mem_req(&inst, res)?;
            if suspend {
                let warp = self.running.take().expect("running warp present");
                self.suspended.insert(warp.warp_id, warp);
                return Ok(());
            }
        }

        let warp = self.running.as_mut().expect("running warp present");
        warp.pop_instruction();
        self.retired_instruction_count += 1;
        Ok(())
    }

    fn refill_from_dispatcher(&mut self, res: &mut CycleResources) -> Result<(), SimError> {
        while self.running_warp_num() < MAX_RUNNING_WARP_NUM as usize {
            let suspended_blocks: std::collections::HashSet<BlockId> =
                self.suspended.values().map(|w| w.block_id).collect();
            let block_id = res.dispatcher.schedule_blocks_rr(
                &mut self.fetching_block_id,
                &mut self.running_block_count,
                res.max_block_per_core,
                |bid| suspended_blocks.contains(&bid),
            );
            let Some(warp_id) = res.dispatcher.fetch_warp_from_block(block_id)? else {
                break;
            };
            let block_id = block_id.expect("fetch_warp_from_block returned Some only with Some(block_id)");
            let warp = res
                .warp_factory
                .create_warp(warp_id, block_id, self.cycle)?;
            self.dispatched.push_back(warp);
        }
        Ok(())
    }

    /// Send a load/store to the cache hierarchy. Returns `true` if the
    /// warp must suspend (a memory request was sent and has not yet
    /// resolved), `false` if it can continue this same cycle.
    fn send_mem_req(&mut self, inst: &TraceRecord, res: &mut CycleResources) -> Result<bool, SimError> {
        res.cache_stats.n_cache_req += 1;

        if !res.enable_cache {
            self.issue_ram_request(inst, res, false, false);
            if inst.is_load {
                self.ld_req_count += 1;
            }
            if inst.is_store {
                self.st_req_count += 1;
            }
            return Ok(true);
        }

        let addr = inst.mem_addr;
        if inst.is_load {
            if self.l1.access(addr).is_some() {
                res.cache_stats.n_l1_hits += 1;
                return Ok(false);
            }

            let (vta_tag, _) = self.l1.find_tag_and_set(addr);
            let vta_hit = self
                .running
                .as_mut()
                .expect("running warp present")
                .vta
                .access(vta_tag, true);
            if vta_hit {
                self.record_vta_hit_and_rescale_score();
            }

            if res.l2.access(addr).is_some() {
                let (_, victim) = self.l1.insert(addr);
                if let Some((victim_addr, _)) = victim {
                    let (tag, _) = self.l1.find_tag_and_set(victim_addr);
                    self.running.as_mut().unwrap().vta.insert(tag);
                }
                return Ok(false);
            }

            self.issue_ram_request(inst, res, true, false);
            self.ld_req_count += 1;
            Ok(true)
        } else {
            if self.l1.access(addr).is_some() {
                res.cache_stats.n_l1_hits += 1;
            } else {
                let (vta_tag, _) = self.l1.find_tag_and_set(addr);
                let vta_hit = self
                    .running
                    .as_mut()
                    .expect("running warp present")
                    .vta
                    .access(vta_tag, true);
                if vta_hit {
                    self.record_vta_hit_and_rescale_score();
                }
            }

            if let Some(line) = res.l2.access(addr) {
                line.dirty = true;
                return Ok(false);
            }

            self.issue_ram_request(inst, res, false, true);
            self.st_req_count += 1;
            Ok(true)
        }
    }

    /// CCWS feedback: a VTA hit means this warp's own recently evicted data
    /// is being re-fetched, so throttle it up (raise its score, which
    /// lowers its scheduling priority next cycle under CCWS).
    fn record_vta_hit_and_rescale_score(&mut self) {
        self.num_vta_hits += 1;
        let running_warp_num = self.running_warp_num() as u64;
        let cumulative_cutoff = running_warp_num * CCWS_BASE_SCORE as u64;
        // Guard against a zero-instruction core dividing by zero.
        let denom = self.retired_instruction_count.max(1);
        let lls = (self.num_vta_hits * crate::scheduler::CCWS_K_THROTTLE as u64 * cumulative_cutoff) / denom;
        let new_score = lls.max(CCWS_BASE_SCORE as u64) as u32;
        self.running.as_mut().expect("running warp present").ccws_score = new_score;
    }

    fn issue_ram_request(&mut self, inst: &TraceRecord, res: &mut CycleResources, insert_in_l1: bool, mark_dirty: bool) {
        let warp_id = self.running.as_ref().expect("running warp present").warp_id;
        let request_id = res.scoreboard.record_request(
            inst.mem_addr,
            res.global_cycle,
            self.id,
            warp_id,
            insert_in_l1,
            mark_dirty,
        );
        res.ram.push_request(RamRequest {
            addr: inst.mem_addr,
            is_store: inst.is_store,
            access_size: inst.mem_access_size,
            req_time: res.global_cycle,
            core_id: Some(self.id),
            warp_id: Some(warp_id),
            request_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::BlockDispatcher;
    use crate::memory::Ram;
    use crate::scheduler::RoundRobinScheduler;
    use crate::scoreboard::Scoreboard;
    use crate::trace::{TraceReader, OPCODE_TABLE};
    use std::io::Write;

    /// Never actually dispatches anything in these tests: every warp is
    /// pushed directly onto `core.dispatched` before the first cycle runs.
    struct NoMoreWarps;
    impl WarpFactory for NoMoreWarps {
        fn create_warp(&mut self, _warp_id: WarpId, _block_id: BlockId, _dispatch_cycle: u64) -> Result<Warp, SimError> {
            Err(SimError::Configuration("no warps left to dispatch in this test".into()))
        }
    }

    fn ld_opcode() -> u8 {
        OPCODE_TABLE.iter().position(|&m| m == "LDG").unwrap() as u8
    }

    fn warp_with_loads(warp_id: WarpId, addrs: &[u64]) -> Warp {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("w{warp_id}.raw"));
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        for &addr in addrs {
            let rec = TraceRecord::new(ld_opcode(), addr, 4);
            encoder.write_all(&rec.encode()).unwrap();
        }
        encoder.finish().unwrap();
        let reader = TraceReader::open(&path).unwrap();
        std::mem::forget(dir);
        Warp::new(warp_id, 0, reader, 0)
    }

    /// One-way, one-set, 64-byte-line L1 so any two distinct block addresses
    /// collide into the same set and force an eviction.
    fn tiny_l1() -> Cache {
        Cache::new("l1", 64, 1, 64)
    }

    /// Large L2, pre-warmed with every address the test will touch, so every
    /// L1 miss in the test resolves as an L2 hit with no memory round trip.
    fn warm_l2(addrs: &[u64]) -> Cache {
        let mut l2 = Cache::new("l2", 4096, 8, 64);
        for &addr in addrs {
            l2.insert(addr);
        }
        l2
    }

    struct Harness {
        l2: Cache,
        scheduler: RoundRobinScheduler,
        scoreboard: Scoreboard,
        ram: Ram,
        dispatcher: BlockDispatcher,
        warp_factory: NoMoreWarps,
        cache_stats: CacheStats,
    }

    impl Harness {
        fn new(l2: Cache) -> Self {
            Harness {
                l2,
                scheduler: RoundRobinScheduler,
                scoreboard: Scoreboard::new(),
                ram: Ram::new(crate::memory::DEFAULT_LATENCY),
                dispatcher: BlockDispatcher::new(),
                warp_factory: NoMoreWarps,
                cache_stats: CacheStats::default(),
            }
        }

        fn run_cycle(&mut self, core: &mut Core) {
            let mut res = CycleResources {
                global_cycle: core.cycle() + 1,
                l2: &mut self.l2,
                scheduler: &self.scheduler,
                scoreboard: &mut self.scoreboard,
                ram: &mut self.ram,
                dispatcher: &mut self.dispatcher,
                warp_factory: &mut self.warp_factory,
                cache_stats: &mut self.cache_stats,
                enable_cache: true,
                max_block_per_core: 1,
            };
            core.run_a_cycle(&mut res).unwrap();
        }
    }

    #[test]
    fn vta_hit_after_self_eviction_boosts_ccws_score() {
        // Two addresses that collide into l1's single set but carry distinct
        // tags (0x0 -> tag 0, 0x40 -> tag 1, both set 0).
        let mut core = Core::new(0, 0, tiny_l1());
        core.dispatched.push_back(warp_with_loads(1, &[0x0, 0x40, 0x0]));
        let mut harness = Harness::new(warm_l2(&[0x0, 0x40]));

        // Cycle 1: load 0x0 -> L1 miss, VTA miss, L2 hit, installs 0x0 into
        // the empty L1 with no eviction.
        harness.run_cycle(&mut core);
        // Cycle 2: load 0x40 -> L1 miss, VTA miss, L2 hit, installs 0x40 and
        // evicts 0x0 -- the evicted tag is credited to warp 1's own VTA.
        harness.run_cycle(&mut core);
        // Cycle 3: load 0x0 again -> L1 miss (0x40 now occupies the set),
        // but this time the VTA remembers 0x0's tag: a VTA hit, which must
        // rescale the running warp's CCWS score above the base.
        harness.run_cycle(&mut core);

        let running = core.running.as_ref().expect("warp still running after an L2-hit instruction");
        assert!(running.ccws_score > CCWS_BASE_SCORE, "score was {}", running.ccws_score);
        assert_eq!(core.num_vta_hits, 1);
    }

    #[test]
    fn deferred_l1_repair_credits_the_suspended_warps_vta() {
        let mut core = Core::new(0, 0, tiny_l1());
        // Warp 7 occupies the only L1 way with 0x0 and is parked suspended,
        // mirroring the state a core is in between issuing a memory request
        // and the response draining back in.
        let warp = warp_with_loads(7, &[]);
        core.l1.insert(0x0);
        core.suspended.insert(7, warp);

        // The response names warp 7 and a fresh address that collides into
        // the same set, evicting 0x0 out from under it.
        core.repair_l1_on_response(7, 0x40);

        let (tag_of_0x0, _) = core.l1.find_tag_and_set(0x0);
        let suspended = core.suspended.get_mut(&7).unwrap();
        assert!(suspended.vta.access(tag_of_0x0, true), "evicted tag must land in the *suspended* warp's VTA, not the running warp's");
    }

    #[test]
    fn store_miss_at_both_levels_suspends_the_warp_and_issues_a_memory_request() {
        let mut core = Core::new(0, 0, tiny_l1());
        let st_opcode = OPCODE_TABLE.iter().position(|&m| m == "STG").unwrap() as u8;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w3.raw");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&TraceRecord::new(st_opcode, 0x80, 4).encode()).unwrap();
        encoder.finish().unwrap();
        let reader = TraceReader::open(&path).unwrap();
        std::mem::forget(dir);
        core.dispatched.push_back(Warp::new(3, 0, reader, 0));

        let mut harness = Harness::new(Cache::new("l2", 64, 1, 64));
        harness.run_cycle(&mut core);

        assert!(core.running.is_none(), "a genuine miss at both cache levels must suspend the warp");
        assert_eq!(core.suspended.len(), 1);
        assert_eq!(core.st_req_count, 1);
        assert_eq!(harness.scoreboard.n_requests, 1);
    }

    #[test]
    fn core_retires_once_every_dispatched_and_suspended_warp_is_gone() {
        let mut core = Core::new(0, 0, tiny_l1());
        core.dispatched.push_back(warp_with_loads(1, &[]));
        let mut harness = Harness::new(warm_l2(&[]));

        // First cycle: the scheduled warp finds its trace already exhausted
        // and is dropped. Second cycle: nothing left to dispatch or wait on.
        harness.run_cycle(&mut core);
        assert!(!core.is_retired());
        harness.run_cycle(&mut core);
        assert!(core.is_retired());
        assert_eq!(core.instructions_retired(), 0);
    }
}
