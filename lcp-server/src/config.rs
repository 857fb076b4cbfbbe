//! Server configuration.
//!
//! Every flag has an `LCPSERVER_*` environment override, so containerized
//! deployments can run with no command line at all.

use clap::Parser;
use std::path::PathBuf;

use crate::license::factory::FactoryConfig;
use crate::license::status::StatusConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "lcp-server", version, about = "Readium LCP license and status server")]
pub struct Config {
    /// Public base URL clients reach this server on (no trailing slash).
    #[arg(long, env = "LCPSERVER_PUBLIC_BASE_URL", default_value = "http://localhost:8081")]
    pub public_base_url: String,

    /// Listen port.
    #[arg(long, env = "LCPSERVER_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Database DSN, `<dialect>://<connstr>`. This build ships the sqlite3
    /// dialect.
    #[arg(long, env = "LCPSERVER_DATABASE", default_value = "sqlite3://lcpserver.sqlite")]
    pub database: String,

    /// Admin username for the authenticated surface.
    #[arg(long, env = "LCPSERVER_USERNAME")]
    pub username: String,

    /// Admin password.
    #[arg(long, env = "LCPSERVER_PASSWORD")]
    pub password: String,

    /// Path to the provider certificate (PEM, leaf first).
    #[arg(long, env = "LCPSERVER_CERTIFICATE")]
    pub certificate: PathBuf,

    /// Path to the certificate's private key (PEM).
    #[arg(long, env = "LCPSERVER_PRIVATE_KEY")]
    pub private_key: PathBuf,

    /// Provider URI stamped on issued licenses.
    #[arg(long, env = "LCPSERVER_PROVIDER", default_value = "https://lcp.example.org")]
    pub provider: String,

    /// Default encryption profile when a request names none.
    #[arg(long, env = "LCPSERVER_PROFILE")]
    pub profile: Option<String>,

    /// Passphrase-hint page, URI template with `{license_id}`.
    #[arg(
        long,
        env = "LCPSERVER_HINT_LINK",
        default_value = "http://localhost:8081/hint/{license_id}"
    )]
    pub hint_link: String,

    /// Fresh-license link for status documents, URI template with
    /// `{license_id}`. Defaults to this server's own licenses route.
    #[arg(long, env = "LCPSERVER_FRESH_LICENSE_LINK")]
    pub fresh_license_link: Option<String>,

    /// External renew endpoint, URI template with `{license_id}`. When unset
    /// the status document points at this server's own renew route.
    #[arg(long, env = "LCPSERVER_RENEW_LINK")]
    pub renew_link: Option<String>,

    /// Allow renewing a license whose end date has already passed.
    #[arg(long, env = "LCPSERVER_ALLOW_RENEW_ON_EXPIRED", default_value_t = false)]
    pub allow_renew_on_expired: bool,

    /// Extension granted by a renew without an explicit end date.
    #[arg(long, env = "LCPSERVER_RENEW_DEFAULT_DAYS", default_value_t = 7)]
    pub renew_default_days: i64,

    /// Renew ceiling applied when a license is created without `max_end`.
    #[arg(long, env = "LCPSERVER_RENEW_MAX_DAYS", default_value_t = 60)]
    pub renew_max_days: i64,

    /// Directory served under `/resources/` (encrypted publication files).
    #[arg(long, env = "LCPSERVER_RESOURCES")]
    pub resources: Option<PathBuf>,

    /// Log level for this crate (trace, debug, info, warn, error).
    #[arg(long, env = "LCPSERVER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Split the DSN into dialect and connection string, rejecting dialects
    /// not compiled into this build.
    pub fn database_path(&self) -> anyhow::Result<String> {
        let (dialect, connstr) = self
            .database
            .split_once("://")
            .ok_or_else(|| anyhow::anyhow!("database DSN must look like sqlite3://path"))?;
        match dialect {
            "sqlite3" | "sqlite" => Ok(connstr.to_string()),
            "mysql" | "postgres" | "mssql" => anyhow::bail!(
                "database dialect {dialect} is not compiled into this build (sqlite3 only)"
            ),
            other => anyhow::bail!("unknown database dialect {other}"),
        }
    }

    pub fn factory_config(&self) -> FactoryConfig {
        FactoryConfig {
            provider: self.provider.clone(),
            public_base_url: self.public_base_url.clone(),
            default_profile: self.profile.clone(),
            hint_link: self.hint_link.clone(),
        }
    }

    pub fn status_config(&self) -> StatusConfig {
        StatusConfig {
            public_base_url: self.public_base_url.clone(),
            fresh_license_link: self.fresh_license_link.clone().unwrap_or_else(|| {
                format!("{}/licenses/{{license_id}}", self.public_base_url)
            }),
            renew_link: self.renew_link.clone(),
            allow_renew_on_expired: self.allow_renew_on_expired,
            renew_default_days: self.renew_default_days,
            renew_max_days: self.renew_max_days,
        }
    }
}
