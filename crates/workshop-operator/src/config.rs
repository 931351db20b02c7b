//! Operator configuration from flags and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use workshop_common::telemetry::LogFormat;
use workshop_common::{Error, Result};
use workshop_identity::bundle::DEFAULT_STAGING_DIR;

/// Default bcrypt cost for tenant credentials
pub const DEFAULT_HASH_COST: u32 = 10;

/// Flags shared by every operator mode
#[derive(Args, Clone, Debug)]
pub struct OperatorArgs {
    /// Path to a kubeconfig; in-cluster config is inferred when unset
    #[arg(long, env = "WORKSHOP_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Directory the credential bundle is staged in
    #[arg(long, env = "WORKSHOP_STAGING_DIR", default_value = DEFAULT_STAGING_DIR)]
    pub staging_dir: PathBuf,

    /// bcrypt cost for tenant credentials (4-31)
    #[arg(long, env = "WORKSHOP_HASH_COST", default_value_t = DEFAULT_HASH_COST)]
    pub hash_cost: u32,

    /// Log output format: text or json
    #[arg(long, env = "WORKSHOP_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Requeue interval after a fully converged pass, in seconds
    #[arg(long, env = "WORKSHOP_READY_REQUEUE_SECS", default_value_t = 300)]
    pub ready_requeue_secs: u64,

    /// Requeue interval while waiting on a dependency, in seconds
    #[arg(long, env = "WORKSHOP_WAITING_REQUEUE_SECS", default_value_t = 10)]
    pub waiting_requeue_secs: u64,

    /// Requeue interval after a failed pass, in seconds
    #[arg(long, env = "WORKSHOP_ERROR_REQUEUE_SECS", default_value_t = 15)]
    pub error_requeue_secs: u64,
}

/// Runtime settings of the Workshop controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Credential bundle staging directory
    pub staging_dir: PathBuf,
    /// bcrypt cost
    pub hash_cost: u32,
    /// Requeue after a converged pass
    pub ready_requeue: Duration,
    /// Requeue while a step is waiting
    pub waiting_requeue: Duration,
    /// Requeue after a failed pass
    pub error_requeue: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            hash_cost: DEFAULT_HASH_COST,
            ready_requeue: Duration::from_secs(300),
            waiting_requeue: Duration::from_secs(10),
            error_requeue: Duration::from_secs(15),
        }
    }
}

impl OperatorConfig {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.hash_cost == 0 {
            return Err(Error::validation("hash cost must be greater than zero"));
        }
        for (flag, interval) in [
            ("ready-requeue-secs", self.ready_requeue),
            ("waiting-requeue-secs", self.waiting_requeue),
            ("error-requeue-secs", self.error_requeue),
        ] {
            if interval.is_zero() {
                return Err(Error::validation(format!("{flag} must be greater than zero")));
            }
        }
        Ok(())
    }
}

impl From<&OperatorArgs> for OperatorConfig {
    fn from(args: &OperatorArgs) -> Self {
        Self {
            staging_dir: args.staging_dir.clone(),
            hash_cost: args.hash_cost,
            ready_requeue: Duration::from_secs(args.ready_requeue_secs),
            waiting_requeue: Duration::from_secs(args.waiting_requeue_secs),
            error_requeue: Duration::from_secs(args.error_requeue_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: OperatorArgs,
    }

    fn parse(argv: &[&str]) -> OperatorArgs {
        let mut full = vec!["workshop-operator"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn defaults_match_config_default() {
        let args = parse(&[]);
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(args.kubeconfig.is_none());
        assert_eq!(OperatorConfig::from(&args), OperatorConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "--staging-dir",
            "/var/run/workshop",
            "--hash-cost",
            "12",
            "--log-format",
            "json",
            "--waiting-requeue-secs",
            "3",
        ]);
        let config = OperatorConfig::from(&args);
        assert_eq!(config.staging_dir, PathBuf::from("/var/run/workshop"));
        assert_eq!(config.hash_cost, 12);
        assert_eq!(config.waiting_requeue, Duration::from_secs(3));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let argv = ["workshop-operator", "--log-format", "xml"];
        assert!(Harness::try_parse_from(argv).is_err());
    }

    #[test]
    fn zero_values_fail_validation() {
        assert!(OperatorConfig::default().validate().is_ok());

        let config = OperatorConfig {
            hash_cost: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = OperatorConfig {
            error_requeue: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("error-requeue-secs"));
    }
}
