//! Balance command: print both demo users' balances

use anyhow::*;
use bitcoin::Network;

use crate::party::Party;
use crate::rpc::BtcRpc;

#[derive(clap::Parser, Debug)]
pub struct BalanceOpts {
    #[arg(long, default_value = "http://localhost:18443")]
    pub rpc_url: String,
    #[arg(long, default_value = "user")]
    pub rpc_user: String,
    #[arg(long, default_value = "pass")]
    pub rpc_pass: String,
}

pub fn run_balance(o: BalanceOpts) -> Result<()> {
    let rpc = BtcRpc::new(&o.rpc_url, &o.rpc_user, &o.rpc_pass);
    // Wallets are deterministic per name, so a fresh process sees the same
    // coins the scenario left behind.
    for name in ["Alice", "Bob"] {
        let user = Party::new(name, Network::Regtest, rpc.clone())?;
        user.watch()?;
        println!(
            "{:<5} amount : {:.8} BTC",
            user.name(),
            bitcoin::Amount::from_sat(user.get_balance()? as u64).to_btc()
        );
    }
    Ok(())
}
