//! SCOS vault submitter.
//!
//! Submits ledger actions as transactions to the collateral vault contract on
//! each configured network, signed with a single local key. Each network gets
//! its own HTTP provider; the submitter returns as soon as the transaction is
//! accepted by the node and reports its hash as the external transaction id.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;

use scos_common::config::{AppConfig, NetworkConfig};
use scos_engine::submission::{LedgerAction, SubmitError, SubmitFuture, Submitter};

use crate::units::{AMOUNT_DECIMALS, PRICE_DECIMALS, to_units};

sol! {
    #[sol(rpc)]
    interface IScosVault {
        /// Lock `amount` of `token` and mint `scosAmount` SCOS to the sender.
        function stakeStock(address token, uint256 amount, uint256 scosAmount) external;
        /// Burn the sender's SCOS for `token` and release the collateral.
        function unstakeStock(address token) external;
        /// Seize `user`'s `token` collateral at `currentPrice`.
        function liquidate(address user, address token, uint256 currentPrice) external;
    }
}

type Vault = IScosVault::IScosVaultInstance<DynProvider>;

/// [`Submitter`] backed by the on-chain SCOS vault.
pub struct VaultSubmitter {
    vaults: HashMap<String, Vault>,
    signer_address: Address,
}

impl VaultSubmitter {
    /// Build one signing provider per configured network. No RPC calls are made.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let signer = PrivateKeySigner::from_str(config.signer_private_key.trim())
            .map_err(|e| anyhow::anyhow!("SIGNER_PRIVATE_KEY is not a valid private key: {}", e))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let mut vaults = HashMap::new();
        for network in &config.networks {
            let vault = connect_vault(network, wallet.clone())?;
            tracing::info!(
                network = %network.name,
                rpc_url = %network.rpc_url,
                vault = %vault.address(),
                "Vault submitter configured"
            );
            vaults.insert(network.name.clone(), vault);
        }

        Ok(Self {
            vaults,
            signer_address,
        })
    }

    /// Address transactions are sent from.
    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    async fn send(&self, network: &str, action: &LedgerAction) -> Result<String, SubmitError> {
        let vault = self
            .vaults
            .get(network)
            .ok_or_else(|| SubmitError::UnsupportedNetwork(network.to_string()))?;

        let sent = match action {
            LedgerAction::Stake {
                token_address,
                collateral_amount,
                borrowed_amount,
                ..
            } => {
                let token = parse_address("token_address", token_address)?;
                let amount = to_units(*collateral_amount, AMOUNT_DECIMALS)
                    .map_err(|e| SubmitError::InvalidParams(e.to_string()))?;
                let scos_amount = to_units(*borrowed_amount, AMOUNT_DECIMALS)
                    .map_err(|e| SubmitError::InvalidParams(e.to_string()))?;
                vault.stakeStock(token, amount, scos_amount).send().await
            }
            LedgerAction::Unstake { token_address, .. } => {
                let token = parse_address("token_address", token_address)?;
                vault.unstakeStock(token).send().await
            }
            LedgerAction::Liquidate {
                user,
                token_address,
                current_price,
                ..
            } => {
                let user = parse_address("user", user)?;
                let token = parse_address("token_address", token_address)?;
                let price = to_units(*current_price, PRICE_DECIMALS)
                    .map_err(|e| SubmitError::InvalidParams(e.to_string()))?;
                vault.liquidate(user, token, price).send().await
            }
        };

        let pending = sent.map_err(classify)?;
        Ok(pending.tx_hash().to_string())
    }
}

impl Submitter for VaultSubmitter {
    fn supports(&self, network: &str) -> bool {
        self.vaults.contains_key(network)
    }

    fn submit<'a>(&'a self, network: &'a str, action: &'a LedgerAction) -> SubmitFuture<'a> {
        Box::pin(self.send(network, action))
    }
}

fn connect_vault(network: &NetworkConfig, wallet: EthereumWallet) -> anyhow::Result<Vault> {
    let vault_address = Address::from_str(&network.vault_address).map_err(|e| {
        anyhow::anyhow!(
            "{}_VAULT_ADDRESS is not a valid address: {}",
            network.name.to_uppercase(),
            e
        )
    })?;

    let provider = ProviderBuilder::new()
        .wallet(wallet)
        .connect_http(network.rpc_url.parse()?)
        .erased();

    Ok(IScosVault::new(vault_address, provider))
}

fn parse_address(field: &str, value: &str) -> Result<Address, SubmitError> {
    Address::from_str(value)
        .map_err(|e| SubmitError::InvalidParams(format!("{} '{}': {}", field, value, e)))
}

/// Node-side error responses (reverts, nonce or gas rejections) are rejections;
/// everything else is a transport failure.
fn classify(err: alloy::contract::Error) -> SubmitError {
    match err {
        alloy::contract::Error::TransportError(e) if e.is_error_resp() => {
            SubmitError::Rejected(e.to_string())
        }
        other => SubmitError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use scos_common::config::AppConfig;

    // Well-known development key (anvil account #0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn config(vault_address: &str) -> AppConfig {
        let vault_address = vault_address.to_string();
        AppConfig::from_lookup(move |key| match key {
            "SIGNER_PRIVATE_KEY" => Some(DEV_KEY.to_string()),
            "REDDIO_RPC_URL" => Some("http://127.0.0.1:8545".to_string()),
            "REDDIO_VAULT_ADDRESS" => Some(vault_address.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_config_builds_one_vault_per_network() {
        let submitter =
            VaultSubmitter::from_config(&config("0x0fE2B0c6177c79278A70E825581c691856E932D3"))
                .unwrap();

        assert!(submitter.supports("reddio"));
        assert!(!submitter.supports("scroll"));
        assert_eq!(
            submitter.signer_address(),
            Address::from_str("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_vault_address_rejected() {
        let result = VaultSubmitter::from_config(&config("not-an-address"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalid_signer_key_rejected() {
        let mut config = config("0x0fE2B0c6177c79278A70E825581c691856E932D3");
        config.signer_private_key = "0x1234".to_string();
        assert!(VaultSubmitter::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_unknown_network_is_unsupported() {
        let submitter =
            VaultSubmitter::from_config(&config("0x0fE2B0c6177c79278A70E825581c691856E932D3"))
                .unwrap();
        let action = LedgerAction::Unstake {
            asset: "APPLE".to_string(),
            token_address: "0x0000000000000000000000000000000000000001".to_string(),
        };

        let err = submitter.submit("scroll", &action).await.unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedNetwork(_)));
    }

    #[tokio::test]
    async fn test_bad_parameters_fail_before_rpc() {
        let submitter =
            VaultSubmitter::from_config(&config("0x0fE2B0c6177c79278A70E825581c691856E932D3"))
                .unwrap();

        let bad_token = LedgerAction::Stake {
            asset: "APPLE".to_string(),
            token_address: "APPLE".to_string(),
            collateral_amount: dec!(20),
            borrowed_amount: dec!(1428.571428),
        };
        let err = submitter.submit("reddio", &bad_token).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidParams(_)));

        let negative_price = LedgerAction::Liquidate {
            user: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            asset: "APPLE".to_string(),
            token_address: "0x0000000000000000000000000000000000000001".to_string(),
            current_price: dec!(-1),
        };
        let err = submitter.submit("reddio", &negative_price).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidParams(_)));
    }
}
