/// End-of-run statistics reporting.
///
/// Aggregated during the simulation (cache access counters live here since
/// both L1 and L2 accesses funnel through `core::Core::send_mem_req`) and
/// logged at `info` level once the run finishes — this is the Rust
/// counterpart of the original's `print_stats`.
use log::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub n_cache_req: u64,
    pub n_l1_hits: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        if self.n_cache_req == 0 {
            0.0
        } else {
            (self.n_l1_hits as f64 * 100.0) / self.n_cache_req as f64
        }
    }

    pub fn misses_per_1000_instrs(&self, total_instrs_retired: u64) -> f64 {
        if total_instrs_retired == 0 {
            0.0
        } else {
            (self.n_cache_req.saturating_sub(self.n_l1_hits)) as f64 * 1000.0
                / total_instrs_retired as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreSummary {
    pub core_id: usize,
    pub cycles: u64,
    pub stall_cycles: u64,
    pub ld_instrs: u64,
    pub st_instrs: u64,
    pub instrs_retired: u64,
}

#[derive(Debug, Clone)]
pub struct RunStats {
    pub total_cycles: u64,
    pub cores: Vec<CoreSummary>,
    pub cache_enabled: bool,
    pub cache: CacheStats,
    pub n_mem_requests: u64,
    pub n_mem_responses: u64,
    pub n_timed_out_requests: u64,
    pub avg_response_latency: u64,
}

impl RunStats {
    pub fn total_instrs_retired(&self) -> u64 {
        self.cores.iter().map(|c| c.instrs_retired).sum()
    }

    pub fn total_stall_cycles(&self) -> u64 {
        self.cores.iter().map(|c| c.stall_cycles).sum()
    }

    pub fn ipc(&self) -> f64 {
        if self.total_cycles == 0 {
            0.0
        } else {
            self.total_instrs_retired() as f64 / self.total_cycles as f64
        }
    }

    pub fn log_summary(&self) {
        info!("============= MacSim Stats =============");
        for core in &self.cores {
            info!(
                "core {}: cycles={} stall_cycles={} ld_instrs={} st_instrs={} instrs_retired={}",
                core.core_id, core.cycles, core.stall_cycles, core.ld_instrs, core.st_instrs, core.instrs_retired
            );
        }
        info!(
            "NUM_CYCLES={} NUM_INSTRS_RETIRED={} NUM_STALL_CYCLES={} INSTR_PER_CYCLE={:.4}",
            self.total_cycles,
            self.total_instrs_retired(),
            self.total_stall_cycles(),
            self.ipc()
        );
        info!(
            "NUM_MEM_REQUESTS={} NUM_MEM_RESPONSES={} AVG_RESPONSE_LATENCY={} NUM_TIMED_OUT_REQUESTS={}",
            self.n_mem_requests, self.n_mem_responses, self.avg_response_latency, self.n_timed_out_requests
        );
        if self.cache_enabled {
            info!(
                "CACHE_NUM_ACCESSES={} CACHE_NUM_HITS={} CACHE_HIT_RATE_PERC={:.2} MISSES_PER_1000_INSTR={:.2}",
                self.cache.n_cache_req,
                self.cache.n_l1_hits,
                self.cache.hit_rate_percent(),
                self.cache.misses_per_1000_instrs(self.total_instrs_retired())
            );
        } else {
            info!("GPU cache disabled");
        }
        info!("========================================");
    }
}
