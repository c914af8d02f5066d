//! Fee command: input/output totals and effective fee rate of a transaction

use anyhow::*;
use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;

use crate::rpc::BtcRpc;

#[derive(clap::Parser, Debug)]
pub struct FeeOpts {
    /// Transaction id to inspect
    #[arg(long)]
    pub txid: String,

    #[arg(long, default_value = "http://localhost:18443")]
    pub rpc_url: String,
    #[arg(long, default_value = "user")]
    pub rpc_user: String,
    #[arg(long, default_value = "pass")]
    pub rpc_pass: String,
}

pub fn run_fee(o: FeeOpts) -> Result<()> {
    let rpc = BtcRpc::new(&o.rpc_url, &o.rpc_user, &o.rpc_pass);
    let raw = hex::decode(rpc.get_raw_transaction(&o.txid)?)?;
    let tx: Transaction = deserialize(&raw)?;

    let mut input = 0u64;
    for txin in &tx.input {
        let op = txin.previous_output;
        let prev_raw = hex::decode(rpc.get_raw_transaction(&op.txid.to_string())?)?;
        let prev: Transaction = deserialize(&prev_raw)?;
        let txout = prev
            .output
            .get(op.vout as usize)
            .with_context(|| format!("vout {} out of range for {}", op.vout, op.txid))?;
        input += txout.value.to_sat();
    }
    let output: u64 = tx.output.iter().map(|t| t.value.to_sat()).sum();
    ensure!(input >= output, "inputs below outputs; not a valid chain tx");

    println!(
        "input:{} output:{} fee:{} size:{} efee:{:.3}",
        input,
        output,
        input - output,
        raw.len(),
        (input - output) as f64 / raw.len() as f64
    );
    Ok(())
}
