//! Server configuration: command line flags, falling back to environment
//! variables (optionally from a `.env` file), then defaults.
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "checksheet-approval")]
#[command(version, about = "Checksheet approval workflow service", long_about = None)]
pub struct Config {
    /// Directory of the sled database
    #[arg(long, env = "CHECKSHEET_DB_PATH", default_value = "checksheets.sled")]
    pub db_path: PathBuf,

    /// Address the HTTP listener binds to
    #[arg(long, env = "CHECKSHEET_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "CHECKSHEET_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn load() -> Self {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::parse()
    }
}
