//! Connection profile models.
//!
//! A profile holds the credentials for one target PostgreSQL database. It is
//! immutable once stored; the only mutation is deletion.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PG_PORT;

/// Stored credentials and metadata for one target database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionProfile {
    pub id: String,
    /// Account that registered the connection.
    pub owner_id: String,
    /// Human-readable label.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Contains sensitive data - never log or serialize
    #[serde(skip_serializing, default)]
    #[schemars(skip)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

impl ConnectionProfile {
    /// Validate a registration request and build a stored profile.
    pub fn new(id: impl Into<String>, request: NewConnection) -> Result<Self, ProfileError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProfileError::EmptyId);
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProfileError::InvalidId(id));
        }

        let required = [
            ("owner_id", &request.owner_id),
            ("name", &request.name),
            ("host", &request.host),
            ("database", &request.database),
            ("username", &request.username),
            ("password", &request.password),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ProfileError::MissingField(field));
        }

        let port = request.port.unwrap_or(DEFAULT_PG_PORT);
        if port == 0 {
            return Err(ProfileError::InvalidPort);
        }

        Ok(Self {
            id,
            owner_id: request.owner_id.trim().to_string(),
            name: request.name.trim().to_string(),
            host: request.host.trim().to_string(),
            port,
            database: request.database.trim().to_string(),
            username: request.username,
            password: request.password,
            created_at: Utc::now(),
        })
    }

    /// True for hosts where TLS is disabled automatically.
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }

    /// Display-safe DSN (password masked).
    pub fn masked_dsn(&self) -> String {
        format!(
            "postgres://{}:****@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

/// Loopback check used to pick the TLS mode.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Registration request for a new connection.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct NewConnection {
    /// Account registering the connection
    pub owner_id: String,
    /// Display name for the connection
    pub name: String,
    /// Database host name or IP
    pub host: String,
    /// Database port. Default: 5432
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name
    pub database: String,
    /// Database user
    pub username: String,
    /// Database password
    pub password: String,
}

/// Errors that can occur when validating a connection profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Connection ID cannot be empty")]
    EmptyId,

    #[error("Connection ID contains invalid characters: {0}")]
    InvalidId(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Port must be between 1 and 65535")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewConnection {
        NewConnection {
            owner_id: "user-1".to_string(),
            name: "Shop".to_string(),
            host: "db.internal".to_string(),
            port: None,
            database: "shop".to_string(),
            username: "app".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_profile_new_defaults_port() {
        let profile = ConnectionProfile::new("shop", request()).unwrap();
        assert_eq!(profile.port, 5432);
        assert_eq!(profile.owner_id, "user-1");
    }

    #[test]
    fn test_profile_requires_all_fields() {
        let mut req = request();
        req.password = String::new();
        let err = ConnectionProfile::new("shop", req).unwrap_err();
        assert!(matches!(err, ProfileError::MissingField("password")));

        let mut req = request();
        req.host = "   ".to_string();
        assert!(matches!(
            ConnectionProfile::new("shop", req),
            Err(ProfileError::MissingField("host"))
        ));
    }

    #[test]
    fn test_profile_invalid_id() {
        assert!(matches!(
            ConnectionProfile::new("bad id", request()),
            Err(ProfileError::InvalidId(_))
        ));
        assert!(matches!(
            ConnectionProfile::new("", request()),
            Err(ProfileError::EmptyId)
        ));
    }

    #[test]
    fn test_password_never_serialized() {
        let profile = ConnectionProfile::new("shop", request()).unwrap();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("secret"));
        assert!(!profile.masked_dsn().contains("secret"));
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("db.internal"));
        assert!(!is_loopback_host("10.0.0.5"));
    }
}
