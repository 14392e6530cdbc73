//! Configuration manager for the mailbox auth server.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PORT: u16 = 8888;

/// Errors that may occur while finalizing the configuration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("missing `{0}` secret, set it in `config.yaml` or environment")]
    MissingSecret(&'static str),
    #[error("access and refresh tokens must use distinct secrets")]
    SharedSecret,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance, used as token issuer.
    pub url: String,
    /// Listening port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to JsonWebToken configuration.
    #[serde(default, skip_serializing)]
    pub token: Token,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Demo user directory.
    #[serde(default, skip_serializing)]
    pub users: Vec<User>,
    /// Related to OpenTelemetry export.
    #[serde(skip_serializing)]
    pub telemetry: Option<Telemetry>,
}

/// Json Web Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    /// HMAC secret for access tokens.
    /// `ACCESS_TOKEN_SECRET` takes precedence.
    pub access_secret: Option<String>,
    /// HMAC secret for refresh tokens.
    /// `REFRESH_TOKEN_SECRET` takes precedence.
    pub refresh_secret: Option<String>,
    /// Access token lifetime in seconds.
    pub access_lifetime: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_lifetime: u64,
    /// Update token audience.
    /// Default is `mailbox.local`.
    pub audience: Option<String>,
    /// Emit a new refresh token on every refresh.
    pub rotate_refresh_tokens: bool,
    /// Seconds between two purges of expired refresh tokens.
    pub purge_interval: u64,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            access_secret: None,
            refresh_secret: None,
            access_lifetime: 60 * 15,            // 15 minutes.
            refresh_lifetime: 60 * 60 * 24 * 7, // 7 days.
            audience: None,
            rotate_refresh_tokens: false,
            purge_interval: 60 * 60,
        }
    }
}

impl Token {
    /// Resolve both signing secrets.
    pub fn secrets(&self) -> Result<(String, String), Error> {
        let access = std::env::var("ACCESS_TOKEN_SECRET")
            .ok()
            .or_else(|| self.access_secret.clone())
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingSecret("access_secret"))?;
        let refresh = std::env::var("REFRESH_TOKEN_SECRET")
            .ok()
            .or_else(|| self.refresh_secret.clone())
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingSecret("refresh_secret"))?;

        if access == refresh {
            return Err(Error::SharedSecret);
        }

        Ok((access, refresh))
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Entry of the demo user directory.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password: String,
}

/// OpenTelemetry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// gRPC endpoint of the OTLP collector.
    pub otlp_endpoint: Option<String>,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Listening port, `PORT` environment variable first.
    pub fn port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .or(self.port)
            .unwrap_or(DEFAULT_PORT)
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, Error> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                if !config.url.is_empty() {
                    config.url = self.normalize_url(&config.url)?;
                }

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_missing_file_falls_back_to_default() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.version(), VERSION);
        assert_eq!(config.token, Token::default());
        assert!(config.users.is_empty());
    }

    #[test]
    fn test_read_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
name: mailbox
url: mail.example.com
port: 9000
token:
  access_secret: one
  refresh_secret: two
  access_lifetime: 60
  rotate_refresh_tokens: true
users:
  - id: u1
    name: User One
    email: u1@example.com
    password: "$argon2id$v=19$m=16,t=2,p=1$c2FsdHNhbHQ$Zm9v"
"#
        )
        .unwrap();

        let config = Configuration::default()
            .path(file.path().to_path_buf())
            .read()
            .unwrap();

        assert_eq!(config.name, "mailbox");
        assert_eq!(config.url, "https://mail.example.com/");
        assert_eq!(config.port, Some(9000));
        assert_eq!(config.token.access_lifetime, 60);
        // untouched fields keep defaults.
        assert_eq!(config.token.refresh_lifetime, 60 * 60 * 24 * 7);
        assert!(config.token.rotate_refresh_tokens);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].id, "u1");
    }

    #[test]
    fn test_shared_secret_is_rejected() {
        // environment variables would take precedence over the file.
        if std::env::var("ACCESS_TOKEN_SECRET").is_ok()
            || std::env::var("REFRESH_TOKEN_SECRET").is_ok()
        {
            return;
        }

        let token = Token {
            access_secret: Some("same".into()),
            refresh_secret: Some("same".into()),
            ..Default::default()
        };
        assert!(matches!(token.secrets(), Err(Error::SharedSecret)));

        let token = Token {
            access_secret: Some("a".into()),
            refresh_secret: None,
            ..Default::default()
        };
        assert!(matches!(
            token.secrets(),
            Err(Error::MissingSecret("refresh_secret"))
        ));
    }
}
