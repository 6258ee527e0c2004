// # resellerd - Provisioning Entry Points
//
// Thin integration layer over `reseller-core`. Every subcommand opens the
// back-office database, wires the registry connectors and runs exactly one
// engine operation, then exits. Scheduling (cron, systemd timers) and the
// payment callback that triggers `provision` live outside this binary.
//
// ## Subcommands
//
// - `provision --invoice <ID> --user <ID>`: provision the order of a paid invoice
// - `reprovision --order <ID> --user <ID>`: re-run provisioning of an order
// - `renew-sweep`: reminders, renewal orders, grace hook and expiry
// - `retry-sweep`: re-attempt recently failed orders and abandoned claims
// - `init-db`: create or migrate the database schema
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// - `RESELLER_DATABASE`: Path to the SQLite database (required)
// - `RESELLER_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `RESELLER_COMMAND_TIMEOUT_SECS`: Per-command registry timeout (default: 30)
// - `RESELLER_RETRY_WINDOW_DAYS`: Retry sweep window (default: 30)
// - `RESELLER_RETRY_MAX_ATTEMPTS`: Attempt cap per order (default: 10)
// - `RESELLER_MARK_FAILED_ORDERS`: Move orders to `failed` after an attempt (default: false).
//   The retry sweep only selects `failed` orders, so leave this off only when
//   retries are triggered some other way.
// - `RESELLER_CLAIM_LEASE_SECS`: Age after which a `provisioning` claim counts
//   as abandoned (default: 900)
// - `RESELLER_PARKING_NAMESERVERS`: Comma-separated nameservers applied on the
//   grace-period day (optional; without it the grace hook only logs)
//
// ## Example
//
// ```bash
// export RESELLER_DATABASE=/var/lib/reseller/backoffice.sqlite
// export RESELLER_MARK_FAILED_ORDERS=true
//
// resellerd provision --invoice 501 --user 17
// resellerd retry-sweep
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use reseller_core::sweeps::{LogExpiryHook, LogNotifier, ParkingNameservers};
use reseller_core::traits::ExpiryHook;
use reseller_core::{
    ConnectorRegistry, EngineConfig, ProvisioningEngine, RenewalConfig, RenewalSweep, RetryPolicy,
    RetrySweep,
};
use reseller_store_sqlite::SqliteStore;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Success
/// - 1: Configuration or startup error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResellerExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ResellerExitCode> for ExitCode {
    fn from(code: ResellerExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Parser)]
#[command(name = "resellerd", version, about = "Reseller provisioning engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision the order funded by a paid invoice
    Provision {
        #[arg(long)]
        invoice: i64,
        /// Acting user id
        #[arg(long)]
        user: i64,
    },
    /// Re-run provisioning of an order through its invoice
    Reprovision {
        #[arg(long)]
        order: i64,
        /// Acting user id
        #[arg(long)]
        user: i64,
    },
    /// Run the renewal sweep once
    RenewSweep,
    /// Run the retry sweep once
    ///
    /// Selects orders in `failed` status, which only exist when
    /// RESELLER_MARK_FAILED_ORDERS is on, plus orders abandoned in
    /// `provisioning` past the claim lease.
    RetrySweep,
    /// Create or migrate the database schema
    InitDb,
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq)]
struct Config {
    database: PathBuf,
    log_level: String,
    command_timeout_secs: u64,
    retry_window_days: u32,
    retry_max_attempts: u32,
    mark_failed_orders: bool,
    claim_lease_secs: u64,
    parking_nameservers: Vec<String>,
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: '{}'", name, value)),
    }
}

fn parse_flag(name: &str, raw: Option<String>) -> Result<bool> {
    match raw.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => anyhow::bail!("{} must be true or false. Got: '{}'", name, v),
        },
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database = var("RESELLER_DATABASE")
            .filter(|p| !p.trim().is_empty())
            .context(
                "RESELLER_DATABASE is required. \
                Set it via: export RESELLER_DATABASE=/var/lib/reseller/backoffice.sqlite",
            )?;

        Ok(Self {
            database: PathBuf::from(database),
            log_level: var("RESELLER_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            command_timeout_secs: parse_var(
                "RESELLER_COMMAND_TIMEOUT_SECS",
                var("RESELLER_COMMAND_TIMEOUT_SECS"),
                30,
            )?,
            retry_window_days: parse_var(
                "RESELLER_RETRY_WINDOW_DAYS",
                var("RESELLER_RETRY_WINDOW_DAYS"),
                30,
            )?,
            retry_max_attempts: parse_var(
                "RESELLER_RETRY_MAX_ATTEMPTS",
                var("RESELLER_RETRY_MAX_ATTEMPTS"),
                10,
            )?,
            mark_failed_orders: parse_flag(
                "RESELLER_MARK_FAILED_ORDERS",
                var("RESELLER_MARK_FAILED_ORDERS"),
            )?,
            claim_lease_secs: parse_var(
                "RESELLER_CLAIM_LEASE_SECS",
                var("RESELLER_CLAIM_LEASE_SECS"),
                900,
            )?,
            parking_nameservers: var("RESELLER_PARKING_NAMESERVERS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "RESELLER_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        if !(1..=600).contains(&self.command_timeout_secs) {
            anyhow::bail!(
                "RESELLER_COMMAND_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                self.command_timeout_secs
            );
        }

        if let Some(parent) = self.database.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "RESELLER_DATABASE parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        for ns in &self.parking_nameservers {
            if !ns.contains('.') || ns.len() > 253 {
                anyhow::bail!("RESELLER_PARKING_NAMESERVERS contains an invalid host: '{}'", ns);
            }
        }

        self.engine_config().validate()?;
        self.retry_policy().validate()?;
        Ok(())
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_timeout_secs: self.command_timeout_secs,
            mark_failed_orders: self.mark_failed_orders,
            claim_lease_secs: self.claim_lease_secs,
            ..Default::default()
        }
    }

    /// Warning for a retry sweep that cannot see failed orders
    fn retry_sweep_warning(&self) -> Option<&'static str> {
        (!self.mark_failed_orders).then_some(
            "RESELLER_MARK_FAILED_ORDERS is off: orders are never marked failed, \
             so the retry sweep only picks up abandoned claims",
        )
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            window_days: self.retry_window_days,
            max_attempts: self.retry_max_attempts,
            ..Default::default()
        }
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ResellerExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ResellerExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ResellerExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ResellerExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(cli.command, config).await {
            Ok(()) => ResellerExitCode::Success,
            Err(e) => {
                error!("{:#}", e);
                ResellerExitCode::RuntimeError
            }
        }
    })
    .into()
}

fn connectors(engine_config: &EngineConfig) -> ConnectorRegistry {
    let registry = ConnectorRegistry::new();

    #[cfg(feature = "gateway")]
    {
        let gateway = Arc::new(reseller_registry_gateway::GatewayConnector::new(
            engine_config.client_prefix.clone(),
        ));
        registry.register_connector("generic", gateway);
    }

    #[cfg(not(feature = "gateway"))]
    {
        let _ = engine_config;
        warn!("Built without the gateway connector; registry commands will fail");
    }

    registry
}

async fn run(command: Command, config: Config) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&config.database)
            .await
            .context("Failed to open back-office database")?,
    );

    if let Command::InitDb = command {
        info!("Database ready at {}", config.database.display());
        return Ok(());
    }

    let engine_config = config.engine_config();
    let engine = Arc::new(ProvisioningEngine::new(
        Arc::clone(&store),
        Arc::new(connectors(&engine_config)),
        engine_config,
    )?);

    match command {
        Command::Provision { invoice, user } => {
            let outcome = engine.provision_service(invoice, user).await?;
            info!(
                "Order {} {:?}: service {} ({}) expires {}",
                outcome.order_id,
                outcome.action,
                outcome.service_id,
                outcome.service_name,
                outcome.expires_at
            );
        }
        Command::Reprovision { order, user } => {
            let record = store
                .find_order(order)
                .await?
                .with_context(|| format!("Order {} not found", order))?;
            let invoice = record
                .invoice_id
                .with_context(|| format!("Order {} has no invoice", order))?;
            info!("Reprovisioning order {} via invoice {}", order, invoice);
            let outcome = engine.provision_service(invoice, user).await?;
            info!(
                "Order {} {:?}: service {} ({})",
                outcome.order_id, outcome.action, outcome.service_id, outcome.service_name
            );
        }
        Command::RenewSweep => {
            let hook: Arc<dyn ExpiryHook> = if config.parking_nameservers.is_empty() {
                Arc::new(LogExpiryHook)
            } else {
                Arc::new(ParkingNameservers::new(
                    Arc::clone(&engine),
                    config.parking_nameservers.clone(),
                ))
            };
            let sweep = RenewalSweep::new(
                Arc::clone(&store),
                Arc::new(LogNotifier),
                hook,
                RenewalConfig::default(),
            )?;
            let report = sweep.run().await?;
            if report.errors > 0 {
                anyhow::bail!("Renewal sweep finished with {} error(s)", report.errors);
            }
        }
        Command::RetrySweep => {
            if let Some(warning) = config.retry_sweep_warning() {
                warn!("{}", warning);
            }
            let sweep = RetrySweep::new(Arc::clone(&engine), config.retry_policy())?;
            let report = sweep.run().await?;
            info!(
                "Retry sweep skipped {} exhausted, {} non-retryable, {} in backoff",
                report.skipped_exhausted, report.skipped_non_retryable, report.skipped_backoff
            );
        }
        Command::InitDb => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("RESELLER_DATABASE", "backoffice.sqlite")]).unwrap();
        assert_eq!(config.command_timeout_secs, 30);
        assert_eq!(config.retry_window_days, 30);
        assert_eq!(config.retry_max_attempts, 10);
        assert!(!config.mark_failed_orders);
        assert!(config.parking_nameservers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_is_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("RESELLER_DATABASE", "  ")]).is_err());
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        let err = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_RETRY_MAX_ATTEMPTS", "ten"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("RESELLER_RETRY_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validation_ranges() {
        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_COMMAND_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_LOG_LEVEL", "loud"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("RESELLER_DATABASE", "/definitely/not/here/db.sqlite"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flags_and_lists() {
        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_MARK_FAILED_ORDERS", "Yes"),
            ("RESELLER_PARKING_NAMESERVERS", "NS1.Park.test, ns2.park.test,"),
        ])
        .unwrap();
        assert!(config.mark_failed_orders);
        assert_eq!(
            config.parking_nameservers,
            vec!["ns1.park.test".to_string(), "ns2.park.test".to_string()]
        );
        assert!(config.engine_config().mark_failed_orders);

        assert!(config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_MARK_FAILED_ORDERS", "maybe"),
        ])
        .is_err());
    }

    #[test]
    fn test_retry_sweep_warns_without_failed_marking() {
        let config = config_from(&[("RESELLER_DATABASE", "db.sqlite")]).unwrap();
        let warning = config.retry_sweep_warning().unwrap();
        assert!(warning.contains("RESELLER_MARK_FAILED_ORDERS"));

        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_MARK_FAILED_ORDERS", "true"),
        ])
        .unwrap();
        assert_eq!(config.retry_sweep_warning(), None);
    }

    #[test]
    fn test_claim_lease_is_validated() {
        let config = config_from(&[("RESELLER_DATABASE", "db.sqlite")]).unwrap();
        assert_eq!(config.engine_config().claim_lease_secs, 900);

        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_CLAIM_LEASE_SECS", "10"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_retry_window_is_rejected() {
        let config = config_from(&[
            ("RESELLER_DATABASE", "db.sqlite"),
            ("RESELLER_RETRY_WINDOW_DAYS", "4000000000"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["resellerd", "provision", "--invoice", "501", "--user", "7"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Provision {
                invoice: 501,
                user: 7
            }
        ));
        let cli = Cli::try_parse_from(["resellerd", "retry-sweep"]).unwrap();
        assert!(matches!(cli.command, Command::RetrySweep));
        assert!(Cli::try_parse_from(["resellerd", "provision", "--invoice", "x"]).is_err());
    }
}
