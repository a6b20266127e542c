/// Warp state and block-scheduling bookkeeping.
///
/// A `Warp` is the unit the schedulers in `scheduler` fight over each cycle:
/// its own trace stream, its CCWS feedback state (VTA + score), and the
/// timestamp GTO needs to find "the oldest warp." `BlockScheduleInfo` is the
/// shared record the dispatcher consults to decide when a block is safe to
/// retire.
use std::collections::VecDeque;

use crate::error::SimError;
use crate::trace::{TraceReader, TraceRecord};
use crate::vta::{Vta, VTA_ASSOC};
use crate::{BlockId, CoreId, WarpId};

/// Base CCWS lost-locality score every warp starts at and decays toward.
pub const CCWS_BASE_SCORE: u32 = 100;

pub struct Warp {
    pub warp_id: WarpId,
    pub block_id: BlockId,
    trace_reader: TraceReader,
    pub trace_buffer: VecDeque<TraceRecord>,
    /// Cycle at which this warp was last dispatched onto a core; GTO's
    /// tie-break for "the oldest warp".
    pub gto_dispatch_timestamp: u64,
    pub vta: Vta,
    pub ccws_score: u32,
}

impl Warp {
    pub fn new(
        warp_id: WarpId,
        block_id: BlockId,
        trace_reader: TraceReader,
        dispatch_cycle: u64,
    ) -> Self {
        Warp {
            warp_id,
            block_id,
            trace_reader,
            trace_buffer: VecDeque::new(),
            gto_dispatch_timestamp: dispatch_cycle,
            vta: Vta::new(VTA_ASSOC),
            ccws_score: CCWS_BASE_SCORE,
        }
    }

    /// Decay this warp's CCWS score by one point, floored at the base score.
    pub fn decay_ccws_score(&mut self) {
        if self.ccws_score > CCWS_BASE_SCORE {
            self.ccws_score -= 1;
        }
    }

    /// Refill the prefetch buffer if it has run dry. Returns `true` once the
    /// trace file is exhausted and the buffer could not be refilled at all —
    /// the caller should then destroy the warp.
    pub fn refill_if_empty(&mut self) -> Result<bool, SimError> {
        if !self.trace_buffer.is_empty() {
            return Ok(false);
        }
        if self.trace_reader.is_eof() {
            return Ok(true);
        }
        let records = self.trace_reader.refill()?;
        if records.is_empty() {
            return Ok(true);
        }
        self.trace_buffer.extend(records);
        Ok(false)
    }

    pub fn front_instruction(&self) -> Option<&TraceRecord> {
        self.trace_buffer.front()
    }

    pub fn pop_instruction(&mut self) {
        self.trace_buffer.pop_front();
    }
}

/// Per-block dispatch bookkeeping, shared by all warps belonging to the
/// block. Created when the block's first warp is enqueued.
#[derive(Debug, Default)]
pub struct BlockScheduleInfo {
    pub has_started: bool,
    pub dispatched_core_id: Option<CoreId>,
    pub retired: bool,
    pub dispatched_warp_count: u32,
    pub total_warp_count: u32,
    pub has_traces: bool,
}
