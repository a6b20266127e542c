//! `macsim-rs -g <gpu-config.xml> -t <kernel-config.txt> [-c <max-cycles>]`
use std::process::ExitCode;

use clap::Parser;

use macsim_rs::cli::Cli;
use macsim_rs::config::{GpuParameterSet, KernelConfig};
use macsim_rs::error::SimError;
use macsim_rs::simulator::Simulator;

fn main() -> ExitCode {
    env_logger::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap's own exit codes don't match the CLI contract's "1 on bad
            // arguments"; print its usage text ourselves and map to 1.
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let gpu_params = GpuParameterSet::load_or_write_default(cli.gpu_config.as_deref())?;

    let kernel_config_path = cli
        .kernel_config
        .clone()
        .unwrap_or_else(|| gpu_params.gpu_trace_path.clone().into());
    let kernel_config = KernelConfig::load(&kernel_config_path, gpu_params.n_repeat)?;

    let mut sim = Simulator::new(&gpu_params)?;
    let stats = sim.run(&kernel_config, cli.cycles);
    stats.log_summary();
    Ok(())
}
