/// Block dispatcher: Round-Robin block scheduling plus the per-block
/// FIFO of not-yet-dispatched warps.
///
/// Strict retirement ordering matters here: a block cannot be marked retired
/// until its warp FIFO is empty *and* no warp from that block remains
/// suspended on a core. Getting this wrong lets a core start fetching a new
/// block while one of the old block's warps is still waiting on a memory
/// response — `schedule_blocks_rr` below checks both conditions every call.
use std::collections::{HashMap, VecDeque};

use crate::error::SimError;
use crate::warp::BlockScheduleInfo;
use crate::{BlockId, CoreId, WarpId};

pub struct BlockDispatcher {
    /// Warps not yet dispatched, per block, in arrival order.
    block_queue: HashMap<BlockId, VecDeque<WarpId>>,
    /// Blocks in the order their first warp was seen — the order the
    /// Round-Robin block policy scans when looking for fresh work.
    block_order: Vec<BlockId>,
    block_info: HashMap<BlockId, BlockScheduleInfo>,
    waiting_dispatched_warps: usize,
}

impl BlockDispatcher {
    pub fn new() -> Self {
        BlockDispatcher {
            block_queue: HashMap::new(),
            block_order: Vec::new(),
            block_info: HashMap::new(),
            waiting_dispatched_warps: 0,
        }
    }

    /// Register a warp belonging to `block_id`, creating the block's
    /// bookkeeping on first sight.
    pub fn insert_block(&mut self, warp_id: WarpId, block_id: BlockId) {
        self.waiting_dispatched_warps += 1;
        if !self.block_info.contains_key(&block_id) {
            self.block_order.push(block_id);
            self.block_info.insert(block_id, BlockScheduleInfo::default());
        }
        let info = self.block_info.get_mut(&block_id).unwrap();
        info.total_warp_count += 1;
        info.has_traces = true;
        self.block_queue
            .entry(block_id)
            .or_default()
            .push_back(warp_id);
    }

    /// Round-Robin block scheduling for one core. `fetching_block_id` and
    /// `running_block_count` are the core's own fields, threaded through by
    /// mutable reference since the dispatcher owns the shared block state
    /// but the core owns its per-core view of it. `warp_suspended_here`
    /// reports whether any warp from a given block is still suspended on
    /// this core.
    pub fn schedule_blocks_rr(
        &mut self,
        fetching_block_id: &mut Option<BlockId>,
        running_block_count: &mut u32,
        max_block_per_core: u32,
        warp_suspended_here: impl Fn(BlockId) -> bool,
    ) -> Option<BlockId> {
        if let Some(fbid) = *fetching_block_id {
            let queue_empty = self.block_queue.get(&fbid).is_none_or(VecDeque::is_empty);
            let already_retired = self.block_info.get(&fbid).is_some_and(|i| i.retired);
            if queue_empty && !already_retired && !warp_suspended_here(fbid) {
                if let Some(info) = self.block_info.get_mut(&fbid) {
                    info.retired = true;
                }
                *running_block_count = running_block_count.saturating_sub(1);
            }
        }

        if let Some(fbid) = *fetching_block_id {
            if self.block_info.get(&fbid).is_some_and(|i| !i.retired) {
                return Some(fbid);
            }
        }

        if *running_block_count >= max_block_per_core {
            return None;
        }

        for &bid in &self.block_order {
            let info = self.block_info.get(&bid).expect("block_order entries are always registered");
            if !info.has_started && info.has_traces {
                let info = self.block_info.get_mut(&bid).unwrap();
                info.has_started = true;
                *running_block_count += 1;
                *fetching_block_id = Some(bid);
                return Some(bid);
            }
        }
        None
    }

    /// Pop the next warp waiting in `block_id`'s FIFO. The waiting-count
    /// underflow checked here is the Rust counterpart of the original's
    /// `assert(m_num_waiting_dispatched_warps > 0)` (`macsim.cpp:667`): a
    /// real internal-invariant violation, not a reachable user error, so it
    /// is reported through `SimError::Assertion` (exit code 15) rather than
    /// silently dropping the warp.
    pub fn fetch_warp_from_block(&mut self, block_id: Option<BlockId>) -> Result<Option<WarpId>, SimError> {
        let Some(bid) = block_id else { return Ok(None) };
        let Some(queue) = self.block_queue.get_mut(&bid) else { return Ok(None) };
        let Some(warp_id) = queue.pop_front() else { return Ok(None) };
        self.waiting_dispatched_warps = self.waiting_dispatched_warps.checked_sub(1).ok_or_else(|| {
            SimError::Assertion("fetched a warp without a matching waiting count".to_string())
        })?;
        Ok(Some(warp_id))
    }

    pub fn waiting_dispatched_warps(&self) -> usize {
        self.waiting_dispatched_warps
    }
}

impl Default for BlockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
