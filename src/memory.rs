/// Fixed-latency FIFO memory model — the simulator's only off-chip memory.
///
/// There is deliberately no interconnect, no banking, no queuing delay
/// beyond the single fixed latency: a request becomes eligible for a
/// response once `latency` cycles have elapsed, and only the front of the
/// queue is ever examined each cycle (a request behind a still-in-flight
/// one waits even if its own deadline has passed — ported as-is).
use std::collections::VecDeque;

use crate::cache::Addr;
use crate::{CoreId, WarpId};

/// Default service latency in cycles, matching the reference configuration.
pub const DEFAULT_LATENCY: u64 = 200;

#[derive(Debug, Clone)]
pub struct RamRequest {
    pub addr: Addr,
    pub is_store: bool,
    pub access_size: u8,
    pub req_time: u64,
    /// `None` for fire-and-forget writebacks with no owning core/warp.
    pub core_id: Option<CoreId>,
    pub warp_id: Option<WarpId>,
    pub request_id: u64,
}

#[derive(Debug, Clone)]
pub struct RamResponse {
    pub request_id: u64,
    pub core_id: Option<CoreId>,
    pub warp_id: Option<WarpId>,
}

pub struct Ram {
    requests: VecDeque<RamRequest>,
    responses: VecDeque<RamResponse>,
    cycles: u64,
    latency: u64,
}

impl Ram {
    pub fn new(latency: u64) -> Self {
        Ram {
            requests: VecDeque::new(),
            responses: VecDeque::new(),
            cycles: 0,
            latency,
        }
    }

    pub fn push_request(&mut self, req: RamRequest) {
        self.requests.push_back(req);
    }

    pub fn pop_response(&mut self) -> Option<RamResponse> {
        self.responses.pop_front()
    }

    /// Advance memory by one cycle: if the front request has aged past its
    /// latency, pop it and enqueue its response. Only the front of the queue
    /// is ever inspected, so a slow-to-complete head-of-line request blocks
    /// everything behind it.
    pub fn run_a_cycle(&mut self) {
        if let Some(req) = self.requests.front() {
            if self.cycles > req.req_time + self.latency {
                let req = self.requests.pop_front().unwrap();
                self.responses.push_back(RamResponse {
                    request_id: req.request_id,
                    core_id: req.core_id,
                    warp_id: req.warp_id,
                });
            }
        }
        self.cycles += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_not_ready_until_strictly_past_latency() {
        let mut ram = Ram::new(5);
        ram.push_request(RamRequest {
            addr: 0x100,
            is_store: false,
            access_size: 4,
            req_time: 0,
            core_id: Some(0),
            warp_id: Some(1),
            request_id: 42,
        });
        // cycles starts at 0 and increments after the check; request becomes
        // ready only once `cycles > req_time + latency` i.e. cycles == 6.
        for _ in 0..6 {
            ram.run_a_cycle();
            assert!(ram.pop_response().is_none());
        }
        ram.run_a_cycle();
        let resp = ram.pop_response().expect("response ready after latency elapses");
        assert_eq!(resp.request_id, 42);
    }

    #[test]
    fn head_of_line_blocking_holds_back_later_ready_requests() {
        let mut ram = Ram::new(2);
        ram.push_request(RamRequest {
            addr: 0,
            is_store: false,
            access_size: 4,
            req_time: 0,
            core_id: Some(0),
            warp_id: Some(0),
            request_id: 1,
        });
        ram.push_request(RamRequest {
            addr: 0,
            is_store: false,
            access_size: 4,
            req_time: 0,
            core_id: Some(0),
            warp_id: Some(1),
            request_id: 2,
        });
        for _ in 0..4 {
            ram.run_a_cycle();
        }
        let first = ram.pop_response().unwrap();
        assert_eq!(first.request_id, 1);
        assert!(ram.pop_response().is_none(), "second request still head-of-line blocked behind the first's removal this same cycle");
    }
}
