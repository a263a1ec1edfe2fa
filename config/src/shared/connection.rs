use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

/// Session settings applied to every snapshot connection.
///
/// Fixing the date and float output formats keeps the values read from different connections
/// of the same run comparable.
pub struct DefaultPgConnectionOptions;

impl DefaultPgConnectionOptions {
    /// Returns the settings as a tokio-postgres `options` string of `-c key=value` pairs.
    pub fn to_options_string() -> String {
        Self::to_key_value_pairs()
            .iter()
            .map(|(key, value)| format!("-c {key}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Returns the settings as key-value pairs.
    pub fn to_key_value_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            ("datestyle", "ISO"),
            ("intervalstyle", "postgres"),
            ("extra_float_digits", "3"),
            ("client_encoding", "UTF8"),
        ]
    }
}

/// Connection parameters of the source Postgres database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the database to snapshot.
    pub name: String,
    /// Username used to authenticate.
    pub username: String,
    /// Password for [`PgConnectionConfig::username`], redacted in debug output.
    pub password: Option<SecretString>,
    /// TLS configuration for secure connections.
    #[serde(default)]
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// TLS settings for Postgres connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Checks that certificates are present whenever TLS is enabled.
    ///
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no
    /// certificates are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts the connection configuration into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connect options that do not select a database.
    fn without_db(&self) -> Output;

    /// Creates connect options for [`PgConnectionConfig::name`].
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .application_name("snapshotter")
            .options(DefaultPgConnectionOptions::to_options_string())
            // Certificates are verified by the rustls connector, the mode only tells the driver
            // whether to negotiate TLS at all.
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut config: TokioPgConnectOptions = self.without_db();
        config.dbname(self.name.clone());
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_config(tls: TlsConfig) -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "app".to_string(),
            username: "postgres".to_string(),
            password: Some(SecretString::new("secret".to_string())),
            tls,
        }
    }

    #[test]
    fn options_string_contains_every_setting() {
        assert_eq!(
            DefaultPgConnectionOptions::to_options_string(),
            "-c datestyle=ISO -c intervalstyle=postgres -c extra_float_digits=3 -c client_encoding=UTF8"
        );
    }

    #[test]
    fn tls_without_certificates_is_rejected() {
        let config = connection_config(TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        });

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
        assert!(connection_config(TlsConfig::default()).validate().is_ok());
    }

    #[test]
    fn with_db_sets_database_name() {
        let options: TokioPgConnectOptions = connection_config(TlsConfig::default()).with_db();

        assert_eq!(options.get_dbname(), Some("app"));
        assert_eq!(options.get_user(), Some("postgres"));
        assert_eq!(options.get_ports(), &[5432]);
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config = connection_config(TlsConfig::default());

        assert!(!format!("{config:?}").contains("secret\""));
    }
}
