//! dlcbet - Discreet Log Contract Demo CLI

use anyhow::Result;
use clap::Parser;

use dlcbet::commands::*;

#[derive(Parser, Debug)]
#[command(name="dlcbet", about="Discreet log contract demo: offer/accept/sign handshake, oracle attestation, settlement and refund on regtest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Drive one contract scenario end-to-end on regtest
    Run(RunOpts),
    /// Show both demo users' balances
    Balance(BalanceOpts),
    /// Show the fee paid by a transaction
    Fee(FeeOpts),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(o) => run_scenario(o),
        Commands::Balance(o) => run_balance(o),
        Commands::Fee(o) => run_fee(o),
    }
}
