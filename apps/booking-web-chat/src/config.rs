//! Configuração do serviço lida de variáveis de ambiente

use chrono::{Duration, FixedOffset, Offset, Utc};
use common_db::DbConfig;
use std::env;
use std::net::SocketAddr;

use crate::error::AppError;

/// Fuso fixo das clínicas (UTC-3)
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

/// Parâmetros do motor de conversa
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Tempo de vida da sessão, renovado a cada mensagem
    pub session_ttl: Duration,
    /// Fuso da clínica usado para "hoje" e "agora"
    pub utc_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::minutes(30),
            utc_offset: offset_from_minutes(DEFAULT_UTC_OFFSET_MINUTES).unwrap_or(Utc.fix()),
        }
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
}

/// Configuração completa do serviço
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub db: DbConfig,
    pub engine: EngineSettings,
    pub max_concurrent_requests: usize,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let bind = env_string("BOOKING_BIND_ADDR", "0.0.0.0:8080");
        let bind_addr = bind
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BOOKING_BIND_ADDR inválido ({}): {}", bind, e)))?;

        let ttl_minutes: i64 = env_parse("BOOKING_SESSION_TTL_MINUTES", 30);
        if ttl_minutes <= 0 {
            return Err(AppError::Config(
                "BOOKING_SESSION_TTL_MINUTES deve ser positivo".to_string(),
            ));
        }

        let offset_minutes: i32 = env_parse("BOOKING_UTC_OFFSET_MINUTES", DEFAULT_UTC_OFFSET_MINUTES);
        let utc_offset = offset_from_minutes(offset_minutes).ok_or_else(|| {
            AppError::Config(format!("BOOKING_UTC_OFFSET_MINUTES fora do intervalo: {}", offset_minutes))
        })?;

        let defaults = DbConfig::default();
        Ok(Self {
            bind_addr,
            db: DbConfig {
                db_path: env_string("BOOKING_DB_PATH", &defaults.db_path),
                max_connections: env_parse("BOOKING_DB_MAX_CONNECTIONS", defaults.max_connections),
            },
            engine: EngineSettings {
                session_ttl: Duration::minutes(ttl_minutes),
                utc_offset,
            },
            max_concurrent_requests: env_parse("BOOKING_MAX_CONCURRENT_REQUESTS", 64),
            log_json: env_bool("BOOKING_LOG_JSON", false),
        })
    }
}
