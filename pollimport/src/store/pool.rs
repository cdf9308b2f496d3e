//! Pool de connexions PostgreSQL

use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {s}. Use: disable, prefer, require")),
        }
    }
}

/// Connexion à la base des bureaux de vote
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    /// Schéma des tables d'import
    pub schema: String,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "polling_stations".into(),
            user: "postgres".into(),
            password: None,
            schema: "public".into(),
            pool_size: 8,
            ssl_mode: SslMode::Disable,
        }
    }
}

impl DatabaseConfig {
    /// Charge la configuration depuis `PGHOST`, `PGPORT`, `PGDATABASE`,
    /// `PGUSER`, `PGPASSWORD`, `PGSCHEMA`, `PGSSLMODE` et `POOL_SIZE`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PGHOST").unwrap_or(defaults.host),
            port: std::env::var("PGPORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("PGDATABASE").unwrap_or(defaults.dbname),
            user: std::env::var("PGUSER").unwrap_or(defaults.user),
            password: std::env::var("PGPASSWORD").ok(),
            schema: std::env::var("PGSCHEMA").unwrap_or(defaults.schema),
            pool_size: std::env::var("POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            ssl_mode: std::env::var("PGSSLMODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Applique les options de ligne de commande par-dessus l'environnement
    pub fn with_overrides(
        mut self,
        host: Option<String>,
        database: Option<String>,
        user: Option<String>,
        password: Option<String>,
        port: Option<u16>,
        ssl: Option<String>,
    ) -> Result<Self> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(database) = database {
            self.dbname = database;
        }
        if let Some(user) = user {
            self.user = user;
        }
        if password.is_some() {
            self.password = password;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(ssl) = ssl {
            self.ssl_mode = ssl.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(self)
    }

    /// `user@host:port/dbname` pour les logs (sans mot de passe)
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.dbname)
    }
}

fn make_tls_connector() -> MakeRustlsConnect {
    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    MakeRustlsConnect::new(config)
}

/// Délai d'attente d'une connexion libre
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
const CREATE_TIMEOUT: Duration = Duration::from_secs(10);

impl DatabaseConfig {
    /// Configuration deadpool équivalente
    fn deadpool_config(&self) -> Config {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = self.password.clone();
        cfg.application_name = Some("pollimport".into());
        cfg.pool = Some(PoolConfig {
            max_size: self.pool_size,
            timeouts: Timeouts {
                wait: Some(WAIT_TIMEOUT),
                create: Some(CREATE_TIMEOUT),
                recycle: Some(WAIT_TIMEOUT),
            },
            ..Default::default()
        });
        cfg
    }
}

/// Crée un pool de connexions et vérifie qu'une connexion aboutit
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let cfg = config.deadpool_config();
    let runtime = Some(Runtime::Tokio1);

    let pool = if config.ssl_mode == SslMode::Disable {
        cfg.create_pool(runtime, NoTls)
    } else {
        cfg.create_pool(runtime, make_tls_connector())
    }
    .context(format!("Failed to create database pool for {}", config.target()))?;

    let client = pool
        .get()
        .await
        .context(format!("Failed to connect to {}", config.target()))?;
    client
        .simple_query("SELECT 1")
        .await
        .context("Connection test failed")?;
    debug!(target_db = %config.target(), ssl = ?config.ssl_mode, "Database pool ready");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_parse() {
        assert_eq!("disable".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!("PREFER".parse::<SslMode>().unwrap(), SslMode::Prefer);
        assert_eq!("on".parse::<SslMode>().unwrap(), SslMode::Require);
        assert!("maybe".parse::<SslMode>().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = DatabaseConfig::default()
            .with_overrides(
                Some("db.internal".into()),
                None,
                Some("importer".into()),
                None,
                Some(6432),
                Some("require".into()),
            )
            .unwrap();

        assert_eq!(config.target(), "importer@db.internal:6432/polling_stations");
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert!(config.password.is_none());

        let bad = DatabaseConfig::default().with_overrides(None, None, None, None, None, Some("x".into()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_deadpool_config() {
        let config = DatabaseConfig {
            password: Some("secret".into()),
            pool_size: 3,
            ..Default::default()
        };
        let cfg = config.deadpool_config();
        assert_eq!(cfg.dbname.as_deref(), Some("polling_stations"));
        assert_eq!(cfg.password.as_deref(), Some("secret"));
        assert_eq!(cfg.pool.map(|p| p.max_size), Some(3));
    }
}
