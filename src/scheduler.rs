/// Warp scheduling policies: Round Robin, Greedy-Then-Oldest, and CCWS.
///
/// Unlike the cache (a single type with externally-enforced policy), the
/// three warp schedulers genuinely differ in selection logic over a shared
/// dispatched-warp queue, so a trait is the right seam here. Each policy's
/// `schedule` call either pulls one warp out of `dispatched` to become the
/// core's running warp, or returns `None` to signal "skip this cycle" (the
/// core then counts a stall cycle).
use std::collections::{HashSet, VecDeque};

use crate::warp::Warp;
use crate::WarpId;

/// Per-core state a scheduler needs to carry between cycles. Only GTO uses
/// it today; RR and CCWS ignore it. Kept as a field on `Core` (passed in by
/// reference) rather than scheduler-internal state, since a single scheduler
/// instance is shared across all cores of a kernel.
#[derive(Debug, Default)]
pub struct SchedulerState {
    pub gto_last_warp_id: Option<WarpId>,
}

pub trait WarpScheduler {
    /// Select the next warp to run, removing it from `dispatched`.
    /// `running_warp_num` is the core's total resident warp count (dispatched
    /// + suspended + the about-to-be-replaced running slot, which is always
    /// empty at the point this is called) — CCWS needs it for its cutoff.
    fn schedule(
        &self,
        dispatched: &mut VecDeque<Warp>,
        state: &mut SchedulerState,
        running_warp_num: usize,
    ) -> Option<Warp>;

    fn name(&self) -> &'static str;
}

/// Round Robin: always take the head of the dispatched queue.
pub struct RoundRobinScheduler;

impl WarpScheduler for RoundRobinScheduler {
    fn schedule(
        &self,
        dispatched: &mut VecDeque<Warp>,
        _state: &mut SchedulerState,
        _running_warp_num: usize,
    ) -> Option<Warp> {
        dispatched.pop_front()
    }

    fn name(&self) -> &'static str {
        "ROUND_ROBIN"
    }
}

/// Greedy-Then-Oldest: keep re-issuing the same warp as long as it stays
/// dispatched (greedy), and only fall back to the oldest-by-dispatch-time
/// warp once the greedy warp has left the dispatched queue (e.g. suspended
/// on a memory request).
pub struct GtoScheduler;

impl WarpScheduler for GtoScheduler {
    fn schedule(
        &self,
        dispatched: &mut VecDeque<Warp>,
        state: &mut SchedulerState,
        _running_warp_num: usize,
    ) -> Option<Warp> {
        if dispatched.is_empty() {
            return None;
        }

        if let Some(last_id) = state.gto_last_warp_id {
            if let Some(pos) = dispatched.iter().position(|w| w.warp_id == last_id) {
                let warp = dispatched.remove(pos).unwrap();
                state.gto_last_warp_id = Some(warp.warp_id);
                return Some(warp);
            }
        }

        let oldest_pos = dispatched
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.gto_dispatch_timestamp)
            .map(|(i, _)| i)?;
        let warp = dispatched.remove(oldest_pos).unwrap();
        state.gto_last_warp_id = Some(warp.warp_id);
        Some(warp)
    }

    fn name(&self) -> &'static str {
        "GTO"
    }
}

/// Cache-Conscious Warp Scheduling: throttles the number of concurrently
/// scheduled warps by their CCWS score, admitting the highest-scoring warps
/// first until a cumulative cutoff is reached, then applies Round Robin
/// within that admitted set.
///
/// The cutoff check is against the cumulative score *before* admitting each
/// warp, so the warp that crosses the cutoff is still admitted — this
/// one-warp overshoot is intentional, not a bug to "fix".
pub struct CcwsScheduler;

/// Multiplier applied to VTA-hit-driven score boosts.
pub const CCWS_K_THROTTLE: u32 = 64;

impl WarpScheduler for CcwsScheduler {
    fn schedule(
        &self,
        dispatched: &mut VecDeque<Warp>,
        _state: &mut SchedulerState,
        running_warp_num: usize,
    ) -> Option<Warp> {
        if dispatched.is_empty() {
            return None;
        }

        let cutoff = running_warp_num as u64 * crate::warp::CCWS_BASE_SCORE as u64;

        let mut order: Vec<usize> = (0..dispatched.len()).collect();
        order.sort_by(|&a, &b| dispatched[b].ccws_score.cmp(&dispatched[a].ccws_score));

        let mut schedulable: HashSet<WarpId> = HashSet::new();
        let mut cumulative: u64 = 0;
        for &idx in &order {
            if cumulative <= cutoff {
                schedulable.insert(dispatched[idx].warp_id);
                cumulative += dispatched[idx].ccws_score as u64;
            } else {
                break;
            }
        }

        let pos = (0..dispatched.len()).find(|&i| schedulable.contains(&dispatched[i].warp_id))?;
        dispatched.remove(pos)
    }

    fn name(&self) -> &'static str {
        "CCWS"
    }
}

/// Selects and constructs the configured scheduler.
pub enum WarpSchedulingPolicy {
    RoundRobin,
    Gto,
    Ccws,
}

impl WarpSchedulingPolicy {
    pub fn build(&self) -> Box<dyn WarpScheduler> {
        match self {
            WarpSchedulingPolicy::RoundRobin => Box::new(RoundRobinScheduler),
            WarpSchedulingPolicy::Gto => Box::new(GtoScheduler),
            WarpSchedulingPolicy::Ccws => Box::new(CcwsScheduler),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROUND_ROBIN" => Some(WarpSchedulingPolicy::RoundRobin),
            "GTO" => Some(WarpSchedulingPolicy::Gto),
            "CCWS" => Some(WarpSchedulingPolicy::Ccws),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceReader;
    use std::io::Write;

    fn make_warp_with_trace(warp_id: WarpId, dispatch_cycle: u64) -> Warp {
        // An empty-but-valid gzip stream is enough: these tests never pull
        // instructions, only exercise scheduler selection.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("w{warp_id}.raw"));
        let file = std::fs::File::create(&path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.finish().unwrap();
        let reader = TraceReader::open(&path).unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the reader's lifetime in this test
        Warp::new(warp_id, 0, reader, dispatch_cycle)
    }

    #[test]
    fn round_robin_takes_the_front_of_the_queue() {
        let sched = RoundRobinScheduler;
        let mut dispatched = VecDeque::new();
        dispatched.push_back(make_warp_with_trace(1, 0));
        dispatched.push_back(make_warp_with_trace(2, 0));
        let mut state = SchedulerState::default();

        let picked = sched.schedule(&mut dispatched, &mut state, 2).unwrap();
        assert_eq!(picked.warp_id, 1);
        assert_eq!(dispatched.len(), 1);
    }

    #[test]
    fn gto_stays_greedy_while_warp_remains_dispatched() {
        let sched = GtoScheduler;
        let mut state = SchedulerState::default();
        let mut dispatched = VecDeque::new();
        dispatched.push_back(make_warp_with_trace(5, 10));
        dispatched.push_back(make_warp_with_trace(6, 0));

        // First pick: no greedy warp yet, falls back to oldest (warp 6, ts=0).
        let first = sched.schedule(&mut dispatched, &mut state, 2).unwrap();
        assert_eq!(first.warp_id, 6);

        // Put warp 6 back in the dispatch queue (as core_c::run_a_cycle does
        // at the top of each cycle) and re-dispatch: greedy should reselect it.
        dispatched.push_back(first);
        let second = sched.schedule(&mut dispatched, &mut state, 2).unwrap();
        assert_eq!(second.warp_id, 6);
    }

    #[test]
    fn ccws_admits_at_least_one_warp_even_over_cutoff() {
        let sched = CcwsScheduler;
        let mut state = SchedulerState::default();
        let mut dispatched = VecDeque::new();
        let mut high = make_warp_with_trace(1, 0);
        high.ccws_score = 10_000;
        dispatched.push_back(high);

        // running_warp_num=1 -> cutoff=100, but the single warp's own score
        // (10000) is irrelevant to whether *it* gets admitted: cumulative
        // starts at 0 <= cutoff, so it is always admitted first.
        let picked = sched.schedule(&mut dispatched, &mut state, 1).unwrap();
        assert_eq!(picked.warp_id, 1);
    }

    #[test]
    fn ccws_throttles_low_priority_warps_once_cutoff_exceeded() {
        let sched = CcwsScheduler;
        let mut state = SchedulerState::default();
        let mut dispatched = VecDeque::new();
        let mut greedy = make_warp_with_trace(1, 0);
        greedy.ccws_score = 10_000;
        let low = make_warp_with_trace(2, 0);
        dispatched.push_back(greedy);
        dispatched.push_back(low);

        // running_warp_num=2 -> cutoff=200. Warp 1 (score 10000) is admitted
        // first (cumulative 0 <= 200), pushing cumulative past the cutoff, so
        // warp 2 is excluded from the schedulable set this cycle.
        let picked = sched.schedule(&mut dispatched, &mut state, 2).unwrap();
        assert_eq!(picked.warp_id, 1);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].warp_id, 2);
    }
}
