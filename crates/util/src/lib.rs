pub mod config;

use std::{
    env,
    net::{AddrParseError, SocketAddr},
};

pub use config::{replay_window, AppConfig, ConfigError, Environment, TwitchCredentials};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// `APP_BIND_ADDR` wins when set. Otherwise the server listens on all
/// interfaces at `PORT`, falling back to [`DEFAULT_PORT`].
pub fn server_bind_address() -> Result<SocketAddr, BindAddressError> {
    if let Ok(value) = env::var("APP_BIND_ADDR") {
        return value.parse().map_err(BindAddressError::Addr);
    }

    let port = match env::var("PORT") {
        Ok(value) => value
            .trim()
            .parse::<u16>()
            .map_err(|_| BindAddressError::Port(value))?,
        Err(_) => DEFAULT_PORT,
    };
    format!("{DEFAULT_BIND_HOST}:{port}")
        .parse()
        .map_err(BindAddressError::Addr)
}

/// Errors produced while resolving the listen address.
#[derive(Debug)]
pub enum BindAddressError {
    Addr(AddrParseError),
    Port(String),
}

impl std::fmt::Display for BindAddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Addr(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Port(value) => write!(f, "PORT must be a number between 0 and 65535 (got {value})"),
        }
    }
}

impl std::error::Error for BindAddressError {}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
