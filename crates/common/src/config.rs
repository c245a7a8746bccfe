use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Connection details for one settlement network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Network identifier as used in requests and positions (e.g. "reddio")
    pub name: String,
    pub rpc_url: String,
    /// Address of the collateral vault contract on this network
    pub vault_address: String,
}

/// Periodic price adjustment used to exercise liquidations in demos.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceDriftConfig {
    pub symbol: String,
    pub delta: Decimal,
    pub period_secs: u64,
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port (default: 8080)
    pub port: u16,

    /// PostgreSQL connection string for the audit log. Unset keeps audit rows in memory.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Collateral value / borrowed value, must be > 1 (default: 1.4)
    pub collateral_ratio: Decimal,

    /// Fractional price drop from entry that triggers liquidation (default: 0.25)
    pub liquidation_drop_threshold: Decimal,

    /// Liquidation sweep period in seconds (default: 30)
    pub monitor_interval_secs: u64,

    /// Upper bound on a single ledger submission in seconds (default: 15)
    pub submission_timeout_secs: u64,

    /// Prices loaded into the price table at startup
    pub seed_prices: Vec<(String, Decimal)>,

    pub price_drift: Option<PriceDriftConfig>,

    /// Hex-encoded key used to sign vault transactions
    pub signer_private_key: String,

    pub networks: Vec<NetworkConfig>,
}

const DEFAULT_SEED_PRICES: &str = "APPLE=3000,GOOGLE=3000,MICROSOFT=3000";
const DEFAULT_NETWORKS: &str = "reddio";

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let collateral_ratio: Decimal =
            parse_var(&var_or("COLLATERAL_RATIO", "1.4"), "COLLATERAL_RATIO")?;
        if collateral_ratio <= Decimal::ONE {
            anyhow::bail!("COLLATERAL_RATIO must be greater than 1, got {}", collateral_ratio);
        }

        let liquidation_drop_threshold: Decimal = parse_var(
            &var_or("LIQUIDATION_DROP_THRESHOLD", "0.25"),
            "LIQUIDATION_DROP_THRESHOLD",
        )?;
        if liquidation_drop_threshold <= Decimal::ZERO
            || liquidation_drop_threshold >= Decimal::ONE
        {
            anyhow::bail!(
                "LIQUIDATION_DROP_THRESHOLD must be between 0 and 1, got {}",
                liquidation_drop_threshold
            );
        }

        let monitor_interval_secs: u64 =
            parse_var(&var_or("MONITOR_INTERVAL_SECS", "30"), "MONITOR_INTERVAL_SECS")?;
        if monitor_interval_secs == 0 {
            anyhow::bail!("MONITOR_INTERVAL_SECS must be at least 1");
        }

        let networks = var_or("NETWORKS", DEFAULT_NETWORKS)
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| network_config(name, &lookup))
            .collect::<anyhow::Result<Vec<_>>>()?;
        if networks.is_empty() {
            anyhow::bail!("NETWORKS must name at least one network");
        }

        Ok(Self {
            port: parse_var(&var_or("PORT", "8080"), "PORT")?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            db_max_connections: parse_var(
                &var_or("DB_MAX_CONNECTIONS", "5"),
                "DB_MAX_CONNECTIONS",
            )?,
            collateral_ratio,
            liquidation_drop_threshold,
            monitor_interval_secs,
            submission_timeout_secs: parse_var(
                &var_or("SUBMISSION_TIMEOUT_SECS", "15"),
                "SUBMISSION_TIMEOUT_SECS",
            )?,
            seed_prices: parse_seed_prices(&var_or("SEED_PRICES", DEFAULT_SEED_PRICES))?,
            price_drift: lookup("PRICE_DRIFT")
                .filter(|raw| !raw.is_empty())
                .map(|raw| parse_price_drift(&raw))
                .transpose()?,
            signer_private_key: lookup("SIGNER_PRIVATE_KEY").ok_or_else(|| {
                anyhow::anyhow!("SIGNER_PRIVATE_KEY environment variable is required")
            })?,
            networks,
        })
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }
}

fn parse_var<T: FromStr>(value: &str, key: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, value))
}

fn network_config(
    name: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> anyhow::Result<NetworkConfig> {
    let prefix = name.to_uppercase();
    let rpc_key = format!("{}_RPC_URL", prefix);
    let vault_key = format!("{}_VAULT_ADDRESS", prefix);

    Ok(NetworkConfig {
        name: name.to_string(),
        rpc_url: lookup(&rpc_key)
            .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", rpc_key))?,
        vault_address: lookup(&vault_key)
            .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", vault_key))?,
    })
}

/// Parse `SYMBOL=PRICE` pairs separated by commas.
fn parse_seed_prices(raw: &str) -> anyhow::Result<Vec<(String, Decimal)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (symbol, price) = pair
                .split_once('=')
                .ok_or_else(|| {
                    anyhow::anyhow!("SEED_PRICES entry '{}' is not SYMBOL=PRICE", pair)
                })?;
            let price: Decimal = parse_var(price, "SEED_PRICES")?;
            if price.is_sign_negative() {
                anyhow::bail!("SEED_PRICES entry '{}' has a negative price", pair);
            }
            Ok((symbol.trim().to_string(), price))
        })
        .collect()
}

/// Parse `SYMBOL:DELTA:SECS`, e.g. `APPLE:-100:3`.
fn parse_price_drift(raw: &str) -> anyhow::Result<PriceDriftConfig> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [symbol, delta, period] = parts.as_slice() else {
        anyhow::bail!("PRICE_DRIFT must be SYMBOL:DELTA:SECS, got '{}'", raw);
    };

    let period_secs: u64 = parse_var(period, "PRICE_DRIFT")?;
    if period_secs == 0 {
        anyhow::bail!("PRICE_DRIFT period must be at least 1 second");
    }

    Ok(PriceDriftConfig {
        symbol: symbol.to_string(),
        delta: parse_var(delta, "PRICE_DRIFT")?,
        period_secs,
    })
}
