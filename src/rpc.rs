//! Minimal Bitcoin Core JSON-RPC client
//!
//! Blocking HTTP, basic auth, no retries: RPC failures propagate verbatim
//! and the session driver decides what dies.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct BtcRpc {
    client: reqwest::blocking::Client,
    url: String,
    user: String,
    pass: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Value,
    error: Option<Value>,
}

/// One entry of a `listunspent` result.
#[derive(Debug, Clone, Deserialize)]
pub struct Unspent {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: String,
    /// BTC, as the node reports it.
    pub amount: f64,
    pub confirmations: i64,
}

impl BtcRpc {
    pub fn new(url: &str, user: &str, pass: &str) -> BtcRpc {
        BtcRpc {
            client: reqwest::blocking::Client::new(),
            url: url.to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
        }
    }

    pub fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "dlcbet",
            "method": method,
            "params": params,
        });
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()?
            .json()?;
        if let Some(err) = resp.error {
            if !err.is_null() {
                return Err(Error::Rpc(format!("{method}: {err}")));
            }
        }
        Ok(resp.result)
    }

    pub fn get_block_count(&self) -> Result<i64> {
        let v = self.call("getblockcount", vec![])?;
        v.as_i64()
            .ok_or_else(|| Error::Rpc(format!("getblockcount: {v}")))
    }

    pub fn get_block_hash(&self, height: i64) -> Result<String> {
        let v = self.call("getblockhash", vec![json!(height)])?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc(format!("getblockhash: {v}")))
    }

    pub fn get_raw_transaction(&self, txid: &str) -> Result<String> {
        let v = self.call("getrawtransaction", vec![json!(txid)])?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc(format!("getrawtransaction: {v}")))
    }

    pub fn send_raw_transaction(&self, tx_hex: &str) -> Result<String> {
        let v = self.call("sendrawtransaction", vec![json!(tx_hex)])?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc(format!("sendrawtransaction: {v}")))
    }

    /// Mine blocks on regtest. `generate` is gone from newer nodes, so fall
    /// back to `generatetoaddress` with a throwaway node address.
    pub fn generate(&self, nblocks: i64) -> Result<()> {
        match self.call("generate", vec![json!(nblocks)]) {
            Ok(_) => Ok(()),
            Err(_) => {
                let addr = self.call("getnewaddress", vec![])?;
                self.call("generatetoaddress", vec![json!(nblocks), addr])?;
                Ok(())
            }
        }
    }

    pub fn list_unspent(&self, minconf: i64, maxconf: i64, addrs: &[String]) -> Result<Vec<Unspent>> {
        let v = self.call(
            "listunspent",
            vec![json!(minconf), json!(maxconf), json!(addrs)],
        )?;
        Ok(serde_json::from_value(v)?)
    }

    pub fn import_address(&self, addr: &str) -> Result<()> {
        // label "", no rescan: the demo only cares about fresh coins.
        self.call("importaddress", vec![json!(addr), json!(""), json!(false)])?;
        Ok(())
    }

    pub fn send_to_address(&self, addr: &str, btc: f64) -> Result<String> {
        let v = self.call("sendtoaddress", vec![json!(addr), json!(btc)])?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Rpc(format!("sendtoaddress: {v}")))
    }

    pub fn get_balance(&self) -> Result<f64> {
        let v = self.call("getbalance", vec![])?;
        v.as_f64()
            .ok_or_else(|| Error::Rpc(format!("getbalance: {v}")))
    }
}
