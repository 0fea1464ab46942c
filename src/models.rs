use std::env;
use std::str::FromStr;

use crate::engine::{CrashParams, EngineConfig};

/// Application configuration, assembled from the environment with
/// explicit defaults. The distribution and growth numbers live here so
/// the realized house edge is an auditable deployment decision, never a
/// source-code constant.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub wallet_db_path: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = env_or("PORT", 3000_u16);
        let wallet_db_path = env::var("WALLET_DB_PATH")
            .unwrap_or_else(|_| "./skyrush_wallet.db".to_string());

        let engine = EngineConfig {
            waiting_ms: env_or("WAITING_MS", 3_000),
            cooldown_ms: env_or("COOLDOWN_MS", 3_000),
            tick_ms: env_or("TICK_MS", 50),
            growth_rate: env_or("GROWTH_RATE", 0.006),
            growth_exponent: env_or("GROWTH_EXPONENT", 1.15),
            crash: CrashParams {
                p_low: env_or("P_LOW", 0.65),
                low_range_cap: env_or("LOW_RANGE_CAP", 0.40),
                tail_min: env_or("TAIL_MIN", 1.5),
                tail_cap: env_or("TAIL_CAP", 16.5),
            },
            max_slots_per_player: env_or("MAX_SLOTS_PER_PLAYER", 2),
            history_depth: env_or("HISTORY_DEPTH", 15),
            cashout_grace_ms: env_or("CASHOUT_GRACE_MS", 0),
        };

        Ok(Self {
            port,
            wallet_db_path,
            engine,
        })
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
