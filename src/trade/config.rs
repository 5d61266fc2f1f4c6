//! Trade engine configuration.
//!
//! Read from `config.toml` in the data directory. Unknown or malformed fields fall
//! back to their defaults.

use std::{
    io::{self, Write},
    path::Path,
    time::Duration,
};

use bitcoin::{Amount, Network};

use crate::utill::{get_data_dir, parse_field, parse_toml};

/// Deposit timeouts below this are rejected.
const MIN_DEPOSIT_TIMEOUT_SECS: u64 = 5;
/// The payout lock time must leave the arbitrator room to act after a dispute opens.
const MIN_LOCK_TIME_MARGIN_BLOCKS: u32 = 6;

/// Trade Configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TradeConfig {
    /// Bitcoin network the wallet runs on.
    pub network: Network,
    /// Seconds to wait for the deposit notice after a take-offer request.
    pub deposit_timeout_secs: u64,
    /// How often the timeout watcher checks the deadlines, in milliseconds.
    pub timeout_check_interval_ms: u64,
    /// Blocks after the deposit before a dispute may be opened.
    pub open_dispute_delay_blocks: u32,
    /// Blocks after the deposit before the payout transaction becomes valid.
    pub lock_time_delta_blocks: u32,
    /// Take-offer fee in satoshis, paid to the arbitrator by the taker.
    pub take_offer_fee_sat: u64,
    /// Mining fee of protocol transactions in satoshis.
    pub tx_fee_sat: u64,
    /// Security deposit each trader locks in satoshis.
    pub security_deposit_sat: u64,
    /// Delay of coalesced trade list writes, in milliseconds.
    pub storage_save_delay_ms: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            deposit_timeout_secs: 30,
            timeout_check_interval_ms: 500,
            open_dispute_delay_blocks: 144,
            lock_time_delta_blocks: 432,
            take_offer_fee_sat: 20_000,
            tx_fee_sat: 10_000,
            security_deposit_sat: 100_000,
            storage_save_delay_ms: 1_000,
        }
    }
}

impl TradeConfig {
    /// Loads the config at `config_path`, or at `~/.fiatswap/config.toml` if none is given.
    ///
    /// A default config file is written first if the file doesn't exist or is empty.
    pub fn new(config_path: Option<&Path>) -> io::Result<Self> {
        let default_config_path = get_data_dir().join("config.toml");
        let config_path = config_path.unwrap_or(&default_config_path);
        let default_config = Self::default();

        if !config_path.exists() || std::fs::metadata(config_path)?.len() == 0 {
            log::warn!(
                "Trade config file not found, creating default config file at path: {}",
                config_path.display()
            );
            default_config.write_to_file(config_path)?;
        }

        let config_map = parse_toml(config_path)?;
        log::info!(
            "Successfully loaded config file from : {}",
            config_path.display()
        );

        let config = TradeConfig {
            network: parse_field(config_map.get("network"), default_config.network),
            deposit_timeout_secs: parse_field(
                config_map.get("deposit_timeout_secs"),
                default_config.deposit_timeout_secs,
            ),
            timeout_check_interval_ms: parse_field(
                config_map.get("timeout_check_interval_ms"),
                default_config.timeout_check_interval_ms,
            ),
            open_dispute_delay_blocks: parse_field(
                config_map.get("open_dispute_delay_blocks"),
                default_config.open_dispute_delay_blocks,
            ),
            lock_time_delta_blocks: parse_field(
                config_map.get("lock_time_delta_blocks"),
                default_config.lock_time_delta_blocks,
            ),
            take_offer_fee_sat: parse_field(
                config_map.get("take_offer_fee_sat"),
                default_config.take_offer_fee_sat,
            ),
            tx_fee_sat: parse_field(config_map.get("tx_fee_sat"), default_config.tx_fee_sat),
            security_deposit_sat: parse_field(
                config_map.get("security_deposit_sat"),
                default_config.security_deposit_sat,
            ),
            storage_save_delay_ms: parse_field(
                config_map.get("storage_save_delay_ms"),
                default_config.storage_save_delay_ms,
            ),
        };
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    /// Serializes the config into TOML and writes it to `path`, creating the parent
    /// directory if needed.
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let toml_data = format!(
            "# Trade Configuration File
# Bitcoin network
network = \"{}\"
# Seconds to wait for the deposit notice before escalating to a dispute
deposit_timeout_secs = {}
# Interval of the timeout watcher in milliseconds
timeout_check_interval_ms = {}
# Blocks after the deposit before a dispute can be opened
open_dispute_delay_blocks = {}
# Blocks after the deposit before the payout becomes valid
lock_time_delta_blocks = {}
# Take-offer fee in satoshis
take_offer_fee_sat = {}
# Mining fee of trade transactions in satoshis
tx_fee_sat = {}
# Security deposit per trader in satoshis
security_deposit_sat = {}
# Delay of coalesced trade list writes in milliseconds
storage_save_delay_ms = {}
",
            self.network,
            self.deposit_timeout_secs,
            self.timeout_check_interval_ms,
            self.open_dispute_delay_blocks,
            self.lock_time_delta_blocks,
            self.take_offer_fee_sat,
            self.tx_fee_sat,
            self.security_deposit_sat,
            self.storage_save_delay_ms,
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_data.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Validates the parameters with bound checks.
    pub fn validate(&self) -> Result<(), String> {
        if self.deposit_timeout_secs < MIN_DEPOSIT_TIMEOUT_SECS {
            return Err(format!(
                "Deposit timeout too low: {}. Minimum is {} seconds.",
                self.deposit_timeout_secs, MIN_DEPOSIT_TIMEOUT_SECS
            ));
        }
        if self.timeout_check_interval_ms == 0 {
            return Err("Timeout check interval must be positive.".to_string());
        }
        if self.lock_time_delta_blocks < self.open_dispute_delay_blocks + MIN_LOCK_TIME_MARGIN_BLOCKS
        {
            return Err(format!(
                "Lock time delta {} must exceed the open dispute delay {} by at least {} blocks.",
                self.lock_time_delta_blocks,
                self.open_dispute_delay_blocks,
                MIN_LOCK_TIME_MARGIN_BLOCKS
            ));
        }
        Ok(())
    }

    /// Deposit timeout as a [Duration].
    pub fn deposit_timeout(&self) -> Duration {
        Duration::from_secs(self.deposit_timeout_secs)
    }

    /// Take-offer fee as an [Amount].
    pub fn take_offer_fee(&self) -> Amount {
        Amount::from_sat(self.take_offer_fee_sat)
    }

    /// Transaction fee as an [Amount].
    pub fn tx_fee(&self) -> Amount {
        Amount::from_sat(self.tx_fee_sat)
    }

    /// Security deposit as an [Amount].
    pub fn security_deposit(&self) -> Amount {
        Amount::from_sat(self.security_deposit_sat)
    }
}
