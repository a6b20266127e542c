/// Simulator top: the global tick that coordinates every other component.
///
/// Owns the cores, the shared L2, the fixed-latency memory, and the memory
/// scoreboard. Kernels run one at a time — each gets a fresh block
/// dispatcher seeded from its own warp list, and every core's per-kernel
/// fields (`fetching_block_id`, `running_block_count`) are reset before the
/// next kernel's warps can be dispatched onto it, matching the same-core
/// warp pools but kernel-scoped block numbering the source relies on.
use log::warn;

use crate::cache::Cache;
use crate::config::{GpuParameterSet, KernelConfig, KernelInfo, BLOCK_ID_SHIFT};
use crate::core::{Core, CycleResources, WarpFactory};
use crate::dispatcher::BlockDispatcher;
use crate::error::SimError;
use crate::memory::{Ram, RamRequest};
use crate::scheduler::WarpScheduler;
use crate::scoreboard::{Scoreboard, TIMEOUT_SWEEP_PERIOD};
use crate::stats::{CacheStats, CoreSummary, RunStats};
use crate::trace::TraceReader;
use crate::warp::Warp;
use crate::{BlockId, WarpId};

/// Opens the warp's trace file under the current kernel's directory. The
/// engine treats `start_inst_count` (the kernel config's per-warp resume
/// point) as out of scope: each kernel's warp trace is its own self-
/// contained `.raw` file, read from its start, which is sufficient for the
/// fixed pre-recorded workloads this simulator measures.
struct KernelWarpFactory<'a> {
    kernel: &'a KernelInfo,
}

impl<'a> WarpFactory for KernelWarpFactory<'a> {
    fn create_warp(&mut self, warp_id: WarpId, block_id: BlockId, dispatch_cycle: u64) -> Result<Warp, SimError> {
        let path = self.kernel.warp_trace_path(warp_id);
        let reader = TraceReader::open(&path)?;
        Ok(Warp::new(warp_id, block_id, reader, dispatch_cycle))
    }
}

pub struct Simulator {
    cores: Vec<Core>,
    l2: Cache,
    l2_line_size: usize,
    ram: Ram,
    scoreboard: Scoreboard,
    scheduler: Box<dyn WarpScheduler>,
    enable_cache: bool,
    max_block_per_core: u32,
    cache_stats: CacheStats,
    global_cycle: u64,
}

impl Simulator {
    pub fn new(gpu_params: &GpuParameterSet) -> Result<Self, SimError> {
        if gpu_params.block_scheduling_policy != "ROUND_ROBIN" {
            return Err(SimError::Configuration(format!(
                "unknown block scheduling policy {:?}",
                gpu_params.block_scheduling_policy
            )));
        }
        let scheduler = gpu_params.warp_scheduling_policy()?.build();

        let l1_assoc = gpu_params.l1cache_assoc;
        let l1_line_size = gpu_params.l1cache_line_size;
        let l1_size = gpu_params.l1cache_size;
        let cores = (0..gpu_params.num_of_cores)
            .map(|id| Core::new(id, 0, Cache::new("l1", l1_size, l1_assoc, l1_line_size)))
            .collect();

        let l2 = Cache::new("l2", gpu_params.l2cache_size, gpu_params.l2cache_assoc, gpu_params.l2cache_line_size);

        Ok(Simulator {
            cores,
            l2,
            l2_line_size: gpu_params.l2cache_line_size,
            ram: Ram::new(crate::memory::DEFAULT_LATENCY),
            scoreboard: Scoreboard::new(),
            scheduler,
            enable_cache: gpu_params.enable_gpu_cache,
            max_block_per_core: gpu_params.max_block_per_core,
            cache_stats: CacheStats::default(),
            global_cycle: 0,
        })
    }

    /// Run every kernel in `kernel_config`, in order, stopping early once
    /// `max_cycles` global cycles have elapsed (if given).
    pub fn run(&mut self, kernel_config: &KernelConfig, max_cycles: Option<u64>) -> RunStats {
        for kernel in &kernel_config.kernels {
            for core in &mut self.cores {
                core.begin_kernel();
            }
            self.run_kernel(kernel, max_cycles);
            if max_cycles.is_some_and(|cap| self.global_cycle >= cap) {
                warn!("max cycles ({}) reached; remaining kernels skipped", max_cycles.unwrap());
                break;
            }
        }
        self.collect_stats()
    }

    fn run_kernel(&mut self, kernel: &KernelInfo, max_cycles: Option<u64>) {
        let mut dispatcher = BlockDispatcher::new();
        for warp in &kernel.warps {
            let block_id = warp.thread_id / BLOCK_ID_SHIFT;
            dispatcher.insert_block(warp.thread_id, block_id);
        }

        loop {
            if max_cycles.is_some_and(|cap| self.global_cycle >= cap) {
                return;
            }
            if self.cores.iter().all(Core::is_retired) {
                return;
            }
            self.run_a_cycle(kernel, &mut dispatcher);
        }
    }

    fn run_a_cycle(&mut self, kernel: &KernelInfo, dispatcher: &mut BlockDispatcher) {
        self.global_cycle += 1;
        let mut warp_factory = KernelWarpFactory { kernel };

        for core in &mut self.cores {
            if core.is_retired() {
                continue;
            }
            let mut res = CycleResources {
                global_cycle: self.global_cycle,
                l2: &mut self.l2,
                scheduler: self.scheduler.as_ref(),
                scoreboard: &mut self.scoreboard,
                ram: &mut self.ram,
                dispatcher: &mut *dispatcher,
                warp_factory: &mut warp_factory,
                cache_stats: &mut self.cache_stats,
                enable_cache: self.enable_cache,
                max_block_per_core: self.max_block_per_core,
            };
            if let Err(e) = core.run_a_cycle(&mut res) {
                warn!("core {} error: {e}", core.id);
            }
        }

        self.drain_memory_responses();

        if self.global_cycle % TIMEOUT_SWEEP_PERIOD == 0 {
            for (core_id, warp_id) in self.scoreboard.sweep_timeouts(self.global_cycle) {
                if let Some(core) = self.cores.get_mut(core_id) {
                    core.push_memory_response(warp_id);
                }
            }
        }

        self.ram.run_a_cycle();
    }

    /// Process every memory response ready this cycle: repair L2 (and, on a
    /// dirty eviction, issue a writeback), repair L1 if the original request
    /// asked for it, and hand the warp back to its core. Responses with no
    /// matching scoreboard entry are writebacks — they carry no core/warp
    /// and need no repair, only discarding.
    fn drain_memory_responses(&mut self) {
        while let Some(response) = self.ram.pop_response() {
            let Some(resolution) = self.scoreboard.resolve(response.request_id, self.global_cycle) else {
                continue;
            };
            let entry = resolution.entry;

            if !self.enable_cache {
                if let Some(core) = self.cores.get_mut(entry.core_id) {
                    core.push_memory_response(entry.warp_id);
                }
                continue;
            }

            let (line, victim) = self.l2.insert(entry.addr);
            line.dirty = entry.mark_dirty;
            if let Some((victim_addr, victim_dirty)) = victim {
                if victim_dirty {
                    let request_id = self.scoreboard.next_writeback_request_id();
                    self.ram.push_request(RamRequest {
                        addr: victim_addr,
                        is_store: true,
                        access_size: self.l2_line_size as u8,
                        req_time: self.global_cycle,
                        core_id: None,
                        warp_id: None,
                        request_id,
                    });
                }
            }

            if entry.insert_in_l1 {
                if let Some(core) = self.cores.get_mut(entry.core_id) {
                    core.repair_l1_on_response(entry.warp_id, entry.addr);
                }
            }

            if let Some(core) = self.cores.get_mut(entry.core_id) {
                core.push_memory_response(entry.warp_id);
            }
        }
    }

    fn collect_stats(&self) -> RunStats {
        let cores = self
            .cores
            .iter()
            .map(|c| CoreSummary {
                core_id: c.id,
                cycles: c.cycle(),
                stall_cycles: c.stall_cycles(),
                ld_instrs: c.ld_req_count(),
                st_instrs: c.st_req_count(),
                instrs_retired: c.instructions_retired(),
            })
            .collect();

        RunStats {
            total_cycles: self.global_cycle,
            cores,
            cache_enabled: self.enable_cache,
            cache: self.cache_stats,
            n_mem_requests: self.scoreboard.n_requests,
            n_mem_responses: self.scoreboard.n_responses,
            n_timed_out_requests: self.scoreboard.n_timeouts,
            avg_response_latency: self.scoreboard.average_latency(),
        }
    }
}
