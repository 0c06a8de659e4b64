use std::env;
use std::net::SocketAddr;

pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Reads settings from the process environment (after `.env` has been
    /// loaded by the caller).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:live_polls.db".to_string());

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .map_err(|e| format!("Invalid DATABASE_MAX_CONNECTIONS '{}': {}", value, e))?,
            None => 5,
        };
        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be at least 1".into());
        }

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "5000".to_string());
        let bind_addr = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid HOST/PORT '{}:{}': {}", host, port, e))?;

        Ok(Self {
            database_url,
            max_connections,
            bind_addr,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE
    }
}
