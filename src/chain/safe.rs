//! Single-owner Gnosis Safe wrapper.
//!
//! The Safe holds the funds; the agent's EOA is its sole owner. Every
//! settlement call is wrapped as a Safe transaction: fetch the Safe
//! nonce, have the Safe compute the transaction hash, sign that hash
//! with the owner key, and submit `execTransaction` with the single
//! 65-byte r||s||v signature.

use std::sync::Arc;

use anyhow::Result;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::contracts::GnosisSafe;
use crate::types::TraderError;

pub type SafeClient = SignerMiddleware<Provider<Http>, LocalWallet>;

fn exec_err(e: impl std::fmt::Display) -> TraderError {
    TraderError::Execution(e.to_string())
}

pub struct SafeWallet {
    client: Arc<SafeClient>,
    safe: GnosisSafe<SafeClient>,
    address: Address,
}

impl SafeWallet {
    pub async fn connect(
        rpc_url: &str,
        safe_address: &str,
        signer_key: &SecretString,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(exec_err)?;
        let chain_id = provider.get_chainid().await.map_err(exec_err)?;

        let wallet: LocalWallet = signer_key
            .expose_secret()
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| TraderError::InsufficientSettings("signer key is not a valid private key".to_string()))?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());

        let address: Address = safe_address
            .parse()
            .map_err(|_| TraderError::InsufficientSettings(format!("bad safe address '{safe_address}'")))?;

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let safe = GnosisSafe::new(address, client.clone());

        info!(safe = %safe_address, chain_id = chain_id.as_u64(), "Safe wallet connected");
        Ok(Self {
            client,
            safe,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> Arc<SafeClient> {
        self.client.clone()
    }

    pub fn signer_address(&self) -> Address {
        self.client.signer().address()
    }

    pub async fn owners(&self) -> Result<Vec<Address>> {
        Ok(self.safe.get_owners().call().await.map_err(exec_err)?)
    }

    /// Whether a contract actually lives at the Safe address.
    pub async fn is_deployed(&self) -> Result<bool> {
        let code = self
            .client
            .get_code(self.address, None)
            .await
            .map_err(exec_err)?;
        Ok(!code.is_empty())
    }

    /// Execute `data` against `to` as a Safe transaction and wait for
    /// the receipt. Fails on revert.
    pub async fn exec(&self, to: Address, data: Bytes) -> Result<H256> {
        let nonce = self.safe.nonce().call().await.map_err(exec_err)?;

        let safe_tx_hash: [u8; 32] = self
            .safe
            .get_transaction_hash(
                to,
                U256::zero(),
                data.clone(),
                0, // CALL
                U256::zero(),
                U256::zero(),
                U256::zero(),
                Address::zero(),
                Address::zero(),
                nonce,
            )
            .call()
            .await
            .map_err(exec_err)?;

        let signature = self
            .client
            .signer()
            .sign_hash(H256::from(safe_tx_hash))
            .map_err(exec_err)?;
        let signatures = Bytes::from(signature.to_vec());

        debug!(to = %to, nonce = %nonce, "Submitting Safe transaction");

        let call = self.safe.exec_transaction(
            to,
            U256::zero(),
            data,
            0,
            U256::zero(),
            U256::zero(),
            U256::zero(),
            Address::zero(),
            Address::zero(),
            signatures,
        );

        let pending = call.send().await.map_err(exec_err)?;
        let receipt = pending
            .await
            .map_err(exec_err)?
            .ok_or_else(|| exec_err("transaction dropped from mempool"))?;

        if receipt.status != Some(1.into()) {
            return Err(exec_err(format!(
                "Safe transaction reverted: {:?}",
                receipt.transaction_hash
            ))
            .into());
        }

        Ok(receipt.transaction_hash)
    }
}
