//! Configuration types for the provisioning engine and the sweeps
//!
//! Per-provider registry settings live in the provider row and are parsed by
//! [`crate::directory`]; everything here is process-wide.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest accepted retry window
pub const MAX_RETRY_WINDOW_DAYS: u32 = 3_650;

/// Longest accepted wait between retries (30 days)
pub const MAX_BACKOFF_SECS: u64 = 2_592_000;

/// Longest accepted claim lease (one day)
pub const MAX_CLAIM_LEASE_SECS: u64 = 86_400;

/// Provisioning orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound for a single registry command (in seconds)
    ///
    /// A mutating command that exceeds it is reported as an unknown outcome.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Upper bound for opening and logging into a registry session (in seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Term used when an order does not state one
    #[serde(default = "default_term_years")]
    pub default_term_years: u32,

    /// Prefix for registry client transaction ids
    #[serde(default = "default_client_prefix")]
    pub client_prefix: String,

    /// Move orders to `failed` after a rolled-back attempt
    ///
    /// When false the order keeps its previous status and only the attempt
    /// bookkeeping in its service data changes.
    #[serde(default)]
    pub mark_failed_orders: bool,

    /// Age after which a `provisioning` claim is taken as abandoned (in seconds)
    ///
    /// A process that dies between the claim and the final write leaves its
    /// order in `provisioning`. Once the claim is older than this, a new
    /// attempt may take the order over.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,

    /// TLS defaults applied when a provider does not override them
    #[serde(default)]
    pub session: SessionDefaults,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.command_timeout_secs == 0 {
            return Err(crate::Error::config("Command timeout must be > 0"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(crate::Error::config("Connect timeout must be > 0"));
        }
        if self.default_term_years == 0 || self.default_term_years > 10 {
            return Err(crate::Error::config(
                "Default term must be between 1 and 10 years",
            ));
        }
        if self.client_prefix.trim().is_empty() {
            return Err(crate::Error::config("Client prefix cannot be empty"));
        }
        let attempt_floor = self
            .connect_timeout_secs
            .saturating_add(self.command_timeout_secs);
        if self.claim_lease_secs <= attempt_floor {
            return Err(crate::Error::config(format!(
                "Claim lease must exceed connect plus command timeout ({}s)",
                attempt_floor
            )));
        }
        if self.claim_lease_secs > MAX_CLAIM_LEASE_SECS {
            return Err(crate::Error::config(format!(
                "Claim lease cannot exceed {}s",
                MAX_CLAIM_LEASE_SECS
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_term_years: default_term_years(),
            client_prefix: default_client_prefix(),
            mark_failed_orders: false,
            claim_lease_secs: default_claim_lease_secs(),
            session: SessionDefaults::default(),
        }
    }
}

/// TLS and transport defaults for registry sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_true")]
    pub verify_peer: bool,
    #[serde(default = "default_true")]
    pub verify_peer_name: bool,
    #[serde(default)]
    pub allow_self_signed: bool,
    /// Registry port when the endpoint omits one
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            verify_peer: true,
            verify_peer_name: true,
            allow_self_signed: false,
            port: default_port(),
        }
    }
}

/// Retry sweep policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Only orders created within this many days are re-attempted
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Attempts after which an order is left to an operator
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first failed attempt (in seconds)
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,

    /// Ceiling for the doubling wait (in seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl RetryPolicy {
    /// Validate the retry policy
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.window_days == 0 || self.window_days > MAX_RETRY_WINDOW_DAYS {
            return Err(crate::Error::config(format!(
                "Retry window must be between 1 and {} days",
                MAX_RETRY_WINDOW_DAYS
            )));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::config("Retry attempt cap must be > 0"));
        }
        if self.base_backoff_secs > self.max_backoff_secs {
            return Err(crate::Error::config(
                "Base backoff cannot exceed the maximum backoff",
            ));
        }
        if self.max_backoff_secs > MAX_BACKOFF_SECS {
            return Err(crate::Error::config(format!(
                "Maximum backoff cannot exceed {}s",
                MAX_BACKOFF_SECS
            )));
        }
        Ok(())
    }

    /// Wait required after `attempts` failed attempts
    pub fn backoff_secs(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let shift = (attempts - 1).min(32);
        self.base_backoff_secs
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

/// Renewal sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Days-to-expiry on which a reminder goes out
    #[serde(default = "default_reminder_days")]
    pub reminder_days: Vec<i64>,

    /// Days-to-expiry on which a renewal order is raised
    #[serde(default = "default_renewal_order_days")]
    pub renewal_order_days: i64,

    /// Days-to-expiry on which the expiry hook runs for domains
    #[serde(default = "default_grace_hook_days")]
    pub grace_hook_days: i64,

    /// Days past expiry after which an active service becomes `expired`
    #[serde(default = "default_expire_after_days")]
    pub expire_after_days: i64,

    /// Term of raised renewal orders
    #[serde(default = "default_renewal_term_years")]
    pub renewal_term_years: u32,

    /// Amount charged when the provider has no renewal price
    #[serde(default = "default_fallback_amount")]
    pub fallback_amount: String,

    #[serde(default = "default_fallback_currency")]
    pub fallback_currency: String,
}

impl RenewalConfig {
    /// Validate the renewal configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.renewal_term_years == 0 {
            return Err(crate::Error::config("Renewal term must be > 0 years"));
        }
        if self.expire_after_days < 0 {
            return Err(crate::Error::config("Expiry grace cannot be negative"));
        }
        self.fallback_price()?;
        if self.fallback_currency.trim().len() != 3 {
            return Err(crate::Error::config(format!(
                "Invalid fallback currency: '{}'",
                self.fallback_currency
            )));
        }
        Ok(())
    }

    /// Parsed fallback amount
    pub fn fallback_price(&self) -> Result<Decimal, crate::Error> {
        Decimal::from_str(self.fallback_amount.trim()).map_err(|e| {
            crate::Error::config(format!(
                "Invalid fallback amount '{}': {}",
                self.fallback_amount, e
            ))
        })
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            reminder_days: default_reminder_days(),
            renewal_order_days: default_renewal_order_days(),
            grace_hook_days: default_grace_hook_days(),
            expire_after_days: default_expire_after_days(),
            renewal_term_years: default_renewal_term_years(),
            fallback_amount: default_fallback_amount(),
            fallback_currency: default_fallback_currency(),
        }
    }
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_claim_lease_secs() -> u64 {
    900
}

fn default_term_years() -> u32 {
    1
}

fn default_client_prefix() -> String {
    "rsl".to_string()
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    700
}

fn default_window_days() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_backoff_secs() -> u64 {
    300
}

fn default_max_backoff_secs() -> u64 {
    86_400
}

fn default_reminder_days() -> Vec<i64> {
    vec![30, 14, 3, 1, -1]
}

fn default_renewal_order_days() -> i64 {
    14
}

fn default_grace_hook_days() -> i64 {
    -1
}

fn default_expire_after_days() -> i64 {
    1
}

fn default_renewal_term_years() -> u32 {
    1
}

fn default_fallback_amount() -> String {
    "10.00".to_string()
}

fn default_fallback_currency() -> String {
    "EUR".to_string()
}
