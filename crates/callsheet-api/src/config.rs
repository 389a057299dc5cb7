//! Server configuration.

use std::str::FromStr;

use callsheet_core::defaults::SERVER_PORT;

/// Which document store the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store, seeded with a demo template on startup.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    /// Bearer token guarding the admin routes. `None` leaves them open.
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/callsheet".to_string(),
            host: "0.0.0.0".to_string(),
            port: SERVER_PORT,
            backend: StoreBackend::Postgres,
            admin_token: None,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | `postgres://localhost/callsheet` | PostgreSQL connection string |
    /// | `HOST` | `0.0.0.0` | Bind address |
    /// | `PORT` | `3000` | Bind port |
    /// | `STORE_BACKEND` | `postgres` | `postgres` or `memory` |
    /// | `ADMIN_TOKEN` | unset | Bearer token for `/api/v1/admin/*`; admin routes are off when unset |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "Falling back to postgres store backend");
                StoreBackend::Postgres
            }),
            Err(_) => defaults.backend,
        };

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            backend,
            admin_token: std::env::var("ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn with_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
