/// Configuration: the GPU parameter XML and the kernel/trace config text
/// files it points at.
///
/// `GpuParameterSet` round-trips through `quick_xml`'s serde support the way
/// the original round-trips through its own `XmlWriter`/`rapidxml` pair —
/// same self-healing behavior too: a missing or unparsable config file gets
/// the defaults written back out rather than aborting the run.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::scheduler::WarpSchedulingPolicy;

/// Thread ids below this value belong to the kernel's first block; the
/// trace format encodes `thread_id = block_id * BLOCK_ID_SHIFT + warp_id`.
pub const BLOCK_ID_SHIFT: u32 = 1 << 16;

/// Version string the kernel/trace config files must declare.
pub const SUPPORTED_TRACE_VERSION: i64 = 14;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "GPU_Parameter_Set")]
pub struct GpuParameterSet {
    #[serde(rename = "@Cycle_Per_Period")]
    pub cycle_per_period: u64,
    #[serde(rename = "@Num_Of_Cores")]
    pub num_of_cores: usize,
    #[serde(rename = "@Max_Block_Per_Core")]
    pub max_block_per_core: u32,
    #[serde(rename = "@Block_Scheduling_Policy")]
    pub block_scheduling_policy: String,
    #[serde(rename = "@Warp_Scheduling_Policy")]
    pub warp_scheduling_policy: String,
    #[serde(rename = "@GPU_Trace_Path")]
    pub gpu_trace_path: String,
    #[serde(rename = "@N_Repeat")]
    pub n_repeat: u32,
    #[serde(rename = "@Enable_GPU_Cache")]
    pub enable_gpu_cache: bool,
    #[serde(rename = "@GPU_Cache_Log")]
    pub gpu_cache_log: bool,
    #[serde(rename = "@L1Cache_Size")]
    pub l1cache_size: usize,
    #[serde(rename = "@L1Cache_Assoc")]
    pub l1cache_assoc: usize,
    #[serde(rename = "@L1Cache_Line_Size")]
    pub l1cache_line_size: usize,
    #[serde(rename = "@L1Cache_Banks")]
    pub l1cache_banks: u32,
    #[serde(rename = "@L2Cache_Size")]
    pub l2cache_size: usize,
    #[serde(rename = "@L2Cache_Assoc")]
    pub l2cache_assoc: usize,
    #[serde(rename = "@L2Cache_Line_Size")]
    pub l2cache_line_size: usize,
    #[serde(rename = "@L2Cache_Banks")]
    pub l2cache_banks: u32,
}

impl Default for GpuParameterSet {
    fn default() -> Self {
        GpuParameterSet {
            cycle_per_period: 10_000,
            num_of_cores: 4,
            max_block_per_core: 4,
            block_scheduling_policy: "ROUND_ROBIN".to_string(),
            warp_scheduling_policy: "ROUND_ROBIN".to_string(),
            gpu_trace_path: "macsim_traces/backprop/8192/kernel_config.txt".to_string(),
            n_repeat: 1,
            enable_gpu_cache: true,
            gpu_cache_log: false,
            l1cache_size: 8,
            l1cache_assoc: 2,
            l1cache_line_size: 64,
            l1cache_banks: 1,
            l2cache_size: 128,
            l2cache_assoc: 8,
            l2cache_line_size: 64,
            l2cache_banks: 1,
        }
    }
}

impl GpuParameterSet {
    /// Load `path`, writing the defaults back out (and returning them) if
    /// the path is absent, unreadable, or fails to parse. `path = None`
    /// mirrors the original's "no `-g` flag" case: defaults are used and
    /// written to `xmls/gpuconfig_default.xml`, not to any caller path.
    pub fn load_or_write_default(path: Option<&Path>) -> Result<Self, SimError> {
        let Some(path) = path else {
            log::info!("GPU configuration file not specified. Using macsim-rs's default configuration.");
            let fallback = Path::new("xmls/gpuconfig_default.xml");
            Self::write_default(fallback)?;
            return Ok(Self::default());
        };

        match fs::read_to_string(path) {
            Ok(xml) => match quick_xml::de::from_str::<GpuParameterSet>(&xml) {
                Ok(params) => Ok(params),
                Err(e) => {
                    log::warn!("Error in the GPU configuration file {}: {e}. Writing defaults to it.", path.display());
                    Self::write_default(path)?;
                    Ok(Self::default())
                }
            },
            Err(_) => {
                log::info!(
                    "The specified GPU configuration file does not exist. Writing defaults to {}",
                    path.display()
                );
                Self::write_default(path)?;
                Ok(Self::default())
            }
        }
    }

    fn write_default(path: &Path) -> Result<(), SimError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|source| SimError::TraceIo { path: path.to_path_buf(), source })?;
            }
        }
        let xml = quick_xml::se::to_string(&Self::default()).map_err(|e| {
            SimError::Configuration(format!("failed to serialize default GPU configuration: {e}"))
        })?;
        fs::write(path, xml).map_err(|source| SimError::TraceIo { path: path.to_path_buf(), source })?;
        log::info!("Default GPU configuration file written to {}", path.display());
        Ok(())
    }

    pub fn warp_scheduling_policy(&self) -> Result<WarpSchedulingPolicy, SimError> {
        WarpSchedulingPolicy::parse(&self.warp_scheduling_policy).ok_or_else(|| {
            SimError::Configuration(format!(
                "unknown warp scheduling policy {:?}",
                self.warp_scheduling_policy
            ))
        })
    }
}

/// One warp's dispatch-time trace metadata, as read from a kernel's
/// `trace.txt` and its sibling `_info.txt`.
#[derive(Debug, Clone)]
pub struct WarpTraceSpec {
    /// Encodes `thread_id = block_id * BLOCK_ID_SHIFT + warp_id`.
    pub thread_id: u32,
    pub start_inst_count: u64,
    pub inst_count: u64,
}

#[derive(Debug, Clone)]
pub struct KernelInfo {
    /// Base path the per-warp `.raw` trace files are derived from:
    /// `<stem>_<warp_id>.raw` sits next to `trace.txt`.
    pub trace_base_path: PathBuf,
    pub warps: Vec<WarpTraceSpec>,
    pub n_warp_per_block: u32,
    pub n_of_block: u32,
    pub inst_count_total: u64,
}

impl KernelInfo {
    /// Path to warp `thread_id`'s gzip-compressed trace file.
    pub fn warp_trace_path(&self, thread_id: u32) -> PathBuf {
        let stem = self
            .trace_base_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.trace_base_path
            .with_file_name(format!("{stem}_{thread_id}.raw"))
    }
}

#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub kernels: Vec<KernelInfo>,
    /// Last value read across all kernels' `trace.txt` files, matching the
    /// original's behavior of letting each kernel overwrite a single shared
    /// field rather than tracking a per-kernel override.
    pub max_block_per_core: Option<u32>,
}

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
    path: &'a Path,
}

impl<'a> Tokens<'a> {
    fn new(contents: &'a str, path: &'a Path) -> Self {
        Tokens { iter: contents.split_whitespace(), path }
    }

    fn next_str(&mut self) -> Result<&'a str, SimError> {
        self.iter.next().ok_or_else(|| SimError::MalformedKernelConfig {
            path: self.path.to_path_buf(),
            detail: "unexpected end of file".to_string(),
        })
    }

    fn next_int(&mut self) -> Result<i64, SimError> {
        let tok = self.next_str()?;
        tok.parse().map_err(|_| SimError::MalformedKernelConfig {
            path: self.path.to_path_buf(),
            detail: format!("expected an integer, found {tok:?}"),
        })
    }
}

impl KernelConfig {
    /// Parse `kernel_config_path` and every kernel/trace-info file it
    /// references. `n_repeat` duplicates each listed kernel that many times,
    /// matching `N_Repeat` in the GPU parameter set.
    pub fn load(kernel_config_path: &Path, n_repeat: u32) -> Result<Self, SimError> {
        let contents = fs::read_to_string(kernel_config_path).map_err(|source| SimError::TraceIo {
            path: kernel_config_path.to_path_buf(),
            source,
        })?;
        let mut tokens = Tokens::new(&contents, kernel_config_path);

        let _trace_type = tokens.next_str()?;
        let trace_ver = tokens.next_int()?;
        if trace_ver != SUPPORTED_TRACE_VERSION {
            return Err(SimError::MalformedKernelConfig {
                path: kernel_config_path.to_path_buf(),
                detail: format!("unsupported trace version {trace_ver}, expected {SUPPORTED_TRACE_VERSION}"),
            });
        }
        let kernel_count = tokens.next_int()?;

        let mut kernel_paths = Vec::new();
        if kernel_count == -1 {
            let parent = kernel_config_path.parent().unwrap_or_else(|| Path::new(""));
            while let Ok(dir) = tokens.next_str() {
                let rebased = rebase_kernel_path(parent, dir);
                for _ in 0..n_repeat.max(1) {
                    kernel_paths.push(rebased.clone());
                }
            }
        } else {
            return Err(SimError::MalformedKernelConfig {
                path: kernel_config_path.to_path_buf(),
                detail: format!("only the multi-kernel (-1) format is supported, found count {kernel_count}"),
            });
        }

        let mut kernels = Vec::with_capacity(kernel_paths.len());
        let mut max_block_per_core = None;
        for kernel_path in &kernel_paths {
            let (info, kernel_max_block) = load_one_kernel(kernel_path)?;
            max_block_per_core = Some(kernel_max_block);
            kernels.push(info);
        }

        Ok(KernelConfig { kernels, max_block_per_core })
    }
}

/// Rebase a kernel-directory reference from `kernel_config.txt` onto that
/// file's own directory, keeping only the referenced path's last two
/// components (its immediate parent directory and file name) — the same
/// effect as the original's `rfind('/', ...)` splice, expressed with `Path`
/// components instead of raw substring surgery.
fn rebase_kernel_path(kernel_config_dir: &Path, kernel_directory: &str) -> PathBuf {
    let rel = Path::new(kernel_directory);
    let components: Vec<_> = rel.components().collect();
    let tail: PathBuf = if components.len() >= 2 {
        components[components.len() - 2..].iter().collect()
    } else {
        rel.to_path_buf()
    };
    kernel_config_dir.join(tail)
}

fn load_one_kernel(trace_config_path: &Path) -> Result<(KernelInfo, u32), SimError> {
    let contents = fs::read_to_string(trace_config_path).map_err(|source| SimError::TraceIo {
        path: trace_config_path.to_path_buf(),
        source,
    })?;
    let mut tokens = Tokens::new(&contents, trace_config_path);

    let _trace_type = tokens.next_str()?;
    let trace_ver = tokens.next_int()?;
    if trace_ver != SUPPORTED_TRACE_VERSION {
        return Err(SimError::MalformedKernelConfig {
            path: trace_config_path.to_path_buf(),
            detail: format!("unsupported trace version {trace_ver}, expected {SUPPORTED_TRACE_VERSION}"),
        });
    }
    let max_block_per_core = tokens.next_int()?;
    let warp_count = tokens.next_int()?;
    if warp_count <= 0 {
        return Err(SimError::MalformedKernelConfig {
            path: trace_config_path.to_path_buf(),
            detail: format!("invalid warp count {warp_count}"),
        });
    }
    let warp_count = warp_count as usize;

    let mut warps = Vec::with_capacity(warp_count);
    for _ in 0..warp_count {
        let thread_id = tokens.next_int()?;
        let start_inst_count = tokens.next_int()?;
        warps.push(WarpTraceSpec {
            thread_id: thread_id as u32,
            start_inst_count: start_inst_count as u64,
            inst_count: 0,
        });
    }

    let info_path = sibling_info_path(trace_config_path);
    let info_contents = fs::read_to_string(&info_path).map_err(|source| SimError::TraceIo {
        path: info_path.clone(),
        source,
    })?;
    let mut info_tokens = Tokens::new(&info_contents, &info_path);
    let mut inst_count_total = 0u64;
    for warp in warps.iter_mut() {
        let _warp_id = info_tokens.next_int()?;
        let inst_count = info_tokens.next_int()?;
        warp.inst_count = inst_count as u64;
        inst_count_total += inst_count as u64;
    }

    let mut n_warp_per_block = 0u32;
    for warp in &warps {
        if warp.thread_id < BLOCK_ID_SHIFT {
            n_warp_per_block += 1;
        } else {
            break;
        }
    }
    if n_warp_per_block == 0 {
        return Err(SimError::MalformedKernelConfig {
            path: trace_config_path.to_path_buf(),
            detail: "could not determine warps-per-block (no thread id below the block shift)".to_string(),
        });
    }
    let n_of_block = warp_count as u32 / n_warp_per_block;

    Ok((
        KernelInfo {
            trace_base_path: trace_config_path.to_path_buf(),
            warps,
            n_warp_per_block,
            n_of_block,
            inst_count_total,
        },
        max_block_per_core as u32,
    ))
}

/// `trace.txt` -> `trace_info.txt`, dropping the extension the way the
/// original does with `substr(0, find_last_of('.'))`.
fn sibling_info_path(trace_config_path: &Path) -> PathBuf {
    let stem = trace_config_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    trace_config_path.with_file_name(format!("{stem}_info.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_gpu_config_writes_defaults_back_to_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpuconfig.xml");
        fs::write(&path, "not valid xml at all").unwrap();

        let params = GpuParameterSet::load_or_write_default(Some(&path)).unwrap();
        assert_eq!(params.num_of_cores, GpuParameterSet::default().num_of_cores);

        let rewritten = fs::read_to_string(&path).unwrap();
        let reparsed: GpuParameterSet = quick_xml::de::from_str(&rewritten).unwrap();
        assert_eq!(reparsed.num_of_cores, GpuParameterSet::default().num_of_cores);
    }

    #[test]
    fn gpu_parameter_set_xml_round_trips() {
        let params = GpuParameterSet::default();
        let xml = quick_xml::se::to_string(&params).unwrap();
        let parsed: GpuParameterSet = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(parsed.num_of_cores, params.num_of_cores);
        assert_eq!(parsed.warp_scheduling_policy, params.warp_scheduling_policy);
        assert_eq!(parsed.l2cache_size, params.l2cache_size);
    }

    #[test]
    fn rebase_kernel_path_keeps_last_two_components() {
        let dir = Path::new("macsim_traces/backprop/8192");
        let rebased = rebase_kernel_path(dir, "/abs/unrelated/8192/trace.txt");
        assert_eq!(rebased, dir.join("8192/trace.txt"));
    }

    #[test]
    fn load_one_kernel_parses_trace_and_info_files() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.txt");
        fs::write(&trace_path, "nvbit 14 4 3\n0 0\n1 0\n65536 0\n").unwrap();
        let info_path = dir.path().join("trace_info.txt");
        fs::write(&info_path, "0 10\n1 20\n65536 5\n").unwrap();

        let (info, max_block_per_core) = load_one_kernel(&trace_path).unwrap();
        assert_eq!(max_block_per_core, 4);
        assert_eq!(info.n_warp_per_block, 2);
        assert_eq!(info.n_of_block, 1);
        assert_eq!(info.inst_count_total, 35);
        assert_eq!(info.warps[2].thread_id, 65536);
        assert_eq!(info.warp_trace_path(65536), dir.path().join("trace_65536.raw"));
    }

    #[test]
    fn kernel_config_rejects_unsupported_trace_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel_config.txt");
        fs::write(&path, "nvbit 13 -1\n").unwrap();
        let err = KernelConfig::load(&path, 1).unwrap_err();
        assert!(matches!(err, SimError::MalformedKernelConfig { .. }));
    }
}
