//! CLI and configuration definitions using clap.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use sempex_core::ObjectKey;
use sempex_reconciler::source::{DEFAULT_FETCH_TIMEOUT, DEFAULT_SOURCE_URL};
use sempex_reconciler::{
    CertificateSource, ControllerSettings, ErrorBackoff, HttpCertificateSource, ReconcilerConfig,
};
use url::Url;

/// Sempex Cluster operator
#[derive(Parser, Debug)]
#[command(name = "sempex-operator")]
#[command(version)]
#[command(about = "Keeps Cluster certificates in sync with an external source")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Watch Clusters and reconcile them continuously (default)
    Run,

    /// Reconcile one Cluster once and print the outcome as JSON
    ReconcileOnce {
        /// Cluster to reconcile, as `namespace/name`
        key: ObjectKey,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Runtime settings; every flag can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Endpoint returning a JSON array of certificate candidates
    #[arg(long, env = "SEMPEX_SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
    pub source_url: Url,

    /// Per-request timeout for the certificate source
    #[arg(long, env = "SEMPEX_FETCH_TIMEOUT_SECS", default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    pub fetch_timeout_secs: u64,

    /// Delay before a reconciled Cluster is checked again
    #[arg(long, env = "SEMPEX_RESYNC_INTERVAL_SECS", default_value_t = 60)]
    pub resync_interval_secs: u64,

    /// Upper bound on a single reconciliation pass
    #[arg(long, env = "SEMPEX_PASS_TIMEOUT_SECS", default_value_t = 30)]
    pub pass_timeout_secs: u64,

    /// First retry delay after a failed pass
    #[arg(long, env = "SEMPEX_BACKOFF_BASE_SECS", default_value_t = 1)]
    pub backoff_base_secs: u64,

    /// Longest retry delay after repeated failures
    #[arg(long, env = "SEMPEX_BACKOFF_MAX_SECS", default_value_t = 300)]
    pub backoff_max_secs: u64,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "SEMPEX_NAMESPACE")]
    pub namespace: Option<String>,

    /// Log output format
    #[arg(long, env = "SEMPEX_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Settings {
    /// Reconciler configuration, validated.
    pub fn reconciler_config(&self) -> sempex_reconciler::Result<ReconcilerConfig> {
        let config = ReconcilerConfig {
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Controller settings, validated.
    pub fn controller_settings(&self) -> sempex_reconciler::Result<ControllerSettings> {
        Ok(ControllerSettings {
            namespace: self.namespace.clone(),
            reconciler: self.reconciler_config()?,
            backoff: ErrorBackoff::new(
                Duration::from_secs(self.backoff_base_secs),
                Duration::from_secs(self.backoff_max_secs),
            )?,
        })
    }

    /// The HTTP certificate source.
    pub fn certificate_source(&self) -> sempex_reconciler::Result<Arc<dyn CertificateSource>> {
        let source = HttpCertificateSource::new(
            self.source_url.clone(),
            Duration::from_secs(self.fetch_timeout_secs),
        )?;
        Ok(Arc::new(source))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sempex-operator"]).unwrap();

        assert_eq!(cli.command, None);
        assert_eq!(cli.settings.source_url.as_str(), DEFAULT_SOURCE_URL);
        assert_eq!(cli.settings.log_format, LogFormat::Text);

        let settings = cli.settings.controller_settings().unwrap();
        assert_eq!(settings.namespace, None);
        assert_eq!(settings.reconciler, ReconcilerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "sempex-operator",
            "--resync-interval-secs",
            "5",
            "--namespace",
            "infra",
            "--log-format",
            "json",
            "--source-url",
            "http://127.0.0.1:8080/random",
        ])
        .unwrap();

        let config = cli.settings.reconciler_config().unwrap();
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert_eq!(cli.settings.namespace.as_deref(), Some("infra"));
        assert_eq!(cli.settings.log_format, LogFormat::Json);
        assert!(cli.settings.certificate_source().is_ok());
    }

    #[test]
    fn test_reconcile_once_parses_key() {
        let cli = Cli::try_parse_from(["sempex-operator", "reconcile-once", "infra/edge"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::ReconcileOnce {
                key: ObjectKey::new("infra", "edge")
            })
        );

        assert!(Cli::try_parse_from(["sempex-operator", "reconcile-once", "a/b/c"]).is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_resync =
            Cli::try_parse_from(["sempex-operator", "--resync-interval-secs", "0"]).unwrap();
        assert!(zero_resync.settings.reconciler_config().is_err());

        let inverted_backoff = Cli::try_parse_from([
            "sempex-operator",
            "--backoff-base-secs",
            "60",
            "--backoff-max-secs",
            "10",
        ])
        .unwrap();
        assert!(inverted_backoff.settings.controller_settings().is_err());

        assert!(Cli::try_parse_from(["sempex-operator", "--source-url", "not a url"]).is_err());
    }
}
