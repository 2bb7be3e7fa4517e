//! Process-wide configuration, loaded once at startup from `config.toml`
//! plus environment overrides via the `config` crate.

pub use config::Config;
pub use once_cell::sync::OnceCell;
use std::error::Error;

use crate::follower::FollowerConfig;

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init_global_config() -> Result<(), Box<dyn Error>> {
    let config = Config::builder()
        .add_source(config::File::with_name("config.toml"))
        .add_source(config::Environment::with_prefix("PARA_FOLLOWER").separator("__"))
        .build()?;
    GLOBAL_CONFIG
        .set(config)
        .map_err(|_| "Config already set")?;
    Ok(())
}

pub fn get_global_config() -> &'static Config {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: Config not initialized - call init_global_config() first");
        std::process::exit(1);
    })
}

/// Load config for standalone binaries/utilities.
pub fn load_config() -> Result<Config, Box<dyn Error>> {
    load_config_from("config.toml")
}

pub fn load_config_from(path: &str) -> Result<Config, Box<dyn Error>> {
    Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("PARA_FOLLOWER").separator("__"))
        .build()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

pub fn get_db_path(config: &Config) -> Result<String, Box<dyn Error>> {
    config
        .get_string("paths.db_path")
        .map_err(|e| format!("Missing paths.db_path in config: {}", e).into())
}

/// The six process-wide follower knobs, plus the `title` that namespaces
/// keys and tx filtering.
pub fn get_follower_config(config: &Config) -> Result<FollowerConfig, Box<dyn Error>> {
    Ok(FollowerConfig {
        title: config.get_string("follower.title")?,
        search_hash_match_depth: config.get_int("follower.search_hash_match_depth")? as u64,
        empty_block_interval: config.get_int("follower.empty_block_interval")?,
        batch_fetch_seq_enable: config.get_bool("follower.batch_fetch_seq_enable")?,
        batch_fetch_seq_num: config.get_int("follower.batch_fetch_seq_num")?,
        block_sec: config.get_int("follower.block_sec")? as u64,
    })
}

pub struct RpcSettings {
    pub endpoint: String,
    pub user: String,
    pub password: String,
}

pub fn get_rpc_settings(config: &Config) -> Result<RpcSettings, Box<dyn Error>> {
    Ok(RpcSettings {
        endpoint: config.get_string("mainchain.rpc_endpoint")?,
        user: config.get_string("mainchain.rpc_user")?,
        password: config.get_string("mainchain.rpc_password")?,
    })
}
