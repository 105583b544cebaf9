//! bridge-rlds CLI: converts raw Bridge teleoperation episodes into sharded
//! RLDS-style datasets and plots label distributions.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
