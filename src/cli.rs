/// Command-line interface.
///
/// Mirrors the original's `-g`/`-t`/`-c` flags; `clap`'s derive API replaces
/// the original's hand-rolled `argv` scan, matching how the rest of the
/// ambient stack favors the crate the corpus already reaches for over a
/// bespoke parser.
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "macsim-rs", about = "Cycle-driven microarchitectural GPU warp-scheduling simulator")]
pub struct Cli {
    /// GPU configuration XML file. When omitted, defaults are written to
    /// xmls/gpuconfig_default.xml and used for this run.
    #[arg(short = 'g', long = "gpu-config")]
    pub gpu_config: Option<PathBuf>,

    /// Kernel config file. Overrides the GPU configuration's GPU_Trace_Path
    /// when given.
    #[arg(short = 't', long = "kernel-config")]
    pub kernel_config: Option<PathBuf>,

    /// Stop the simulation early after this many cycles (default: run to
    /// completion).
    #[arg(short = 'c', long = "cycles")]
    pub cycles: Option<u64>,
}
