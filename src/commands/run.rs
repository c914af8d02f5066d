//! Run command: drive one contract scenario end-to-end on regtest
//!
//! Session controller for the demo: one oracle (Olivia) and two users
//! (Alice offers and bets high, Bob accepts). Blobs produced by one party
//! are handed directly to the other; the node is the only shared resource.

use anyhow::*;
use bitcoin::Network;

use crate::contract::Contract;
use crate::oracle::Oracle;
use crate::party::Party;
use crate::rates::Side;
use crate::rpc::BtcRpc;
use crate::types::SETTLEMENT_TX_SIZE;

#[derive(clap::Parser, Debug)]
pub struct RunOpts {
    // Node endpoint (regtest)
    #[arg(long, default_value = "http://localhost:18443")]
    pub rpc_url: String,
    #[arg(long, default_value = "user")]
    pub rpc_user: String,
    #[arg(long, default_value = "pass")]
    pub rpc_pass: String,

    /// Scenario: settle | refund
    #[arg(long, default_value = "settle")]
    pub scenario: String,

    /// Total contract amount in satoshi
    #[arg(long, default_value_t = 100_000_000)]
    pub amount: i64,

    /// Outcome message length in bytes (1 or 2)
    #[arg(long, default_value_t = 1)]
    pub length: usize,

    /// Outcome value the oracle attests (hex, `length` bytes).
    /// Empty: take it from the block hash at the target height.
    #[arg(long, default_value = "ff")]
    pub value: String,

    /// Fund / settlement / forward fee rates (satoshi per byte)
    #[arg(long, default_value_t = 10)]
    pub fefee: i64,
    #[arg(long, default_value_t = 10)]
    pub sefee: i64,
    #[arg(long, default_value_t = 10)]
    pub efee: i64,

    /// Target height = current tip + offset
    #[arg(long, default_value_t = 10)]
    pub offset: u32,
}

fn half(value: i64) -> i64 {
    (value + 1) / 2
}

pub fn run_scenario(o: RunOpts) -> Result<()> {
    ensure!(
        o.scenario == "settle" || o.scenario == "refund",
        "--scenario must be settle|refund"
    );
    let params = Network::Regtest;
    let rpc = BtcRpc::new(&o.rpc_url, &o.rpc_user, &o.rpc_pass);

    // ── Node / actors ────────────────────────────────────────────────────────
    eprintln!("[1/6] Preparing node and actors...");
    // Regtest needs 432 blocks before CSV is active.
    let height = rpc.get_block_count()?;
    eprintln!("  block count: {height}");
    if height < 432 {
        rpc.generate(432 - height)?;
    }

    let mut olivia = Oracle::new("Olivia", params, rpc.clone())?;
    let mut alice = Party::new("Alice", params, rpc.clone())?;
    let mut bob = Party::new("Bob", params, rpc.clone())?;
    alice.watch()?;
    bob.watch()?;

    // ── Faucet ───────────────────────────────────────────────────────────────
    eprintln!("[2/6] Funding demo wallets...");
    rpc.generate(1)?;
    for user in [&alice, &bob] {
        let amt = user.get_balance()?;
        if amt < o.amount {
            let btc = bitcoin::Amount::from_sat((o.amount - amt) as u64).to_btc();
            rpc.send_to_address(&user.get_address(), btc)?;
            rpc.generate(1)?;
        }
        eprintln!(
            "  {:<5} balance: {:.8} BTC",
            user.name(),
            bitcoin::Amount::from_sat(user.get_balance()? as u64).to_btc()
        );
    }

    // ── Contract ─────────────────────────────────────────────────────────────
    let tip = rpc.get_block_count()? as u32;
    let target = tip + o.offset;
    eprintln!("[3/6] Creating contract (target height {target}, length {})...", o.length);
    let sfee = SETTLEMENT_TX_SIZE * o.sefee;
    let mut contract = Contract::new(
        half(o.amount),
        half(o.amount),
        o.fefee,
        o.sefee,
        half(sfee),
        half(sfee),
        Side::A,
    );
    contract.set_game_conditions(target, o.length);

    // ── Handshake ────────────────────────────────────────────────────────────
    eprintln!("[4/6] Handshake: offer -> accept -> sign...");
    let keys = olivia.keys(target, o.length)?;

    let odata = alice.offer_data(contract)?;
    alice.set_oracle_keys(&keys)?;
    bob.set_offer_data(&odata)?;
    bob.set_oracle_keys(&keys)?;

    let adata = bob.accept_data()?;
    alice.set_accept_data(&adata)?;

    let sdata = alice.sign_data()?;
    bob.set_sign_data(&sdata)?;

    bob.send_fund_tx()?;
    rpc.generate(1)?;

    if o.scenario == "refund" {
        // ── Refund path: the oracle never publishes ──────────────────────────
        let locktime = alice.locktime()? as i64;
        let tip = rpc.get_block_count()?;
        eprintln!("[5/6] No attestation; mining to locktime {locktime}...");
        if tip < locktime {
            rpc.generate(locktime - tip)?;
        }
        alice.send_refund_tx()?;
        rpc.generate(1)?;
    } else {
        // ── Attestation and settlement ───────────────────────────────────────
        eprintln!("[5/6] Oracle attestation and settlement...");
        if o.value.is_empty() {
            let tip = rpc.get_block_count()? as u32;
            if tip < target {
                rpc.generate((target - tip) as i64)?;
            }
            olivia.attest_from_chain(target, o.length)?;
        } else {
            let value = hex::decode(&o.value)?;
            ensure!(
                value.len() == o.length,
                "--value must be {} bytes, got {}",
                o.length,
                value.len()
            );
            olivia.set_value(target, value);
        }
        let signs = olivia.signs(target)?;
        alice.set_oracle_signs(&signs)?;
        bob.set_oracle_signs(&signs)?;

        // The majority side broadcasts; either may race, the node drops the
        // duplicate spend harmlessly.
        let users: [&mut Party; 2] = if alice.is_winner()? {
            [&mut alice, &mut bob]
        } else {
            [&mut bob, &mut alice]
        };
        for user in users {
            match user.send_settlement_tx() {
                std::result::Result::Ok(_) => {
                    user.send_forward_tx(o.efee)?;
                    break;
                }
                std::result::Result::Err(e) => {
                    eprintln!("  {} cannot settle: {e}", user.name())
                }
            }
        }
        rpc.generate(1)?;
    }

    // ── Wrap up ──────────────────────────────────────────────────────────────
    eprintln!("[6/6] Final balances:");
    for user in [&alice, &bob] {
        eprintln!(
            "  {:<5} balance: {:.8} BTC",
            user.name(),
            bitcoin::Amount::from_sat(user.get_balance()? as u64).to_btc()
        );
    }
    Ok(())
}
