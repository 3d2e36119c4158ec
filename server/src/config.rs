//! Layered configuration: built-in defaults, then a TOML file, then
//! `GATHER_*` environment variables, then CLI flags. Later layers win.

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "gather-server", version, about = "GATHER realtime delivery server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "GATHER_PORT", default_value = "1989")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "GATHER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./gather.toml")]
    pub config: String,

    /// Structured JSON log output (for container deployments)
    #[arg(long, env = "GATHER_JSON_LOGS")]
    pub json_logs: bool,

    /// Print a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Directory for the database and session signing key
    #[arg(long, env = "GATHER_DATA_DIR", default_value = "./data")]
    pub data_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1989,
            bind_address: "0.0.0.0".to_string(),
            config: "./gather.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("GATHER_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

pub fn generate_config_template() -> String {
    r#"# GATHER realtime server configuration.
# Lives at ./gather.toml by default; point elsewhere with --config <path>.
# Every key can also be set through the environment (GATHER_PORT, ...) or
# the matching CLI flag (--port, ...).

# port = 1989
# bind_address = "0.0.0.0"

# Structured JSON log output (for container deployments)
# json_logs = false

# Directory for the SQLite database and session signing key
# data_dir = "./data"
"#
    .to_string()
}
