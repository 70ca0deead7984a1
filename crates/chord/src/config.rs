// Archivo: config.rs
// Propósito: configuración por defecto del barrier y carga desde variables
// de entorno (con soporte de `.env` vía dotenvy).
use crate::domain::ChordOptions;
use crate::errors::{ChordError, Result};
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::time::Duration;

static DOTENV: Lazy<()> = Lazy::new(|| {
    dotenvy::dotenv().ok();
});

/// Configuración global consumida por el watcher y el orquestador.
///
/// Variables reconocidas:
/// - `CHORD_RETRY_INTERVAL`: segundos entre comprobaciones (default 1.0)
/// - `CHORD_JOIN_TIMEOUT`: segundos máximos del join (default 3.0)
/// - `CHORD_MAX_RETRIES`: presupuesto de reintentos (default sin límite)
/// - `CHORD_PROPAGATE`: propagar fallos de miembros (default true)
/// - `CHORD_ALWAYS_EAGER`: ejecutar todo en línea (default false)
#[derive(Debug, Clone, PartialEq)]
pub struct ChordConfig {
    pub retry_interval: Duration,
    pub join_timeout: Duration,
    pub max_retries: Option<u32>,
    pub propagate: bool,
    pub always_eager: bool,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self { retry_interval: Duration::from_secs(1),
               join_timeout: Duration::from_secs(3),
               max_retries: None,
               propagate: true,
               always_eager: false }
    }
}

/// Opciones del chord ya combinadas con la configuración.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub interval: Duration,
    pub max_retries: Option<u32>,
    pub join_timeout: Duration,
    pub propagate: bool,
}

impl ChordConfig {
    /// Lee la configuración del entorno. Variables ausentes toman el valor
    /// por defecto; valores mal formados devuelven `ChordError::Config`.
    pub fn from_env() -> Result<Self> {
        Lazy::force(&DOTENV);
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente arbitraria de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
        where F: Fn(&str) -> Option<String>
    {
        let mut cfg = ChordConfig::default();
        if let Some(v) = lookup("CHORD_RETRY_INTERVAL") {
            cfg.retry_interval = parse_seconds("CHORD_RETRY_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("CHORD_JOIN_TIMEOUT") {
            cfg.join_timeout = parse_seconds("CHORD_JOIN_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("CHORD_MAX_RETRIES") {
            cfg.max_retries = Some(parse_value("CHORD_MAX_RETRIES", &v)?);
        }
        if let Some(v) = lookup("CHORD_PROPAGATE") {
            cfg.propagate = parse_bool("CHORD_PROPAGATE", &v)?;
        }
        if let Some(v) = lookup("CHORD_ALWAYS_EAGER") {
            cfg.always_eager = parse_bool("CHORD_ALWAYS_EAGER", &v)?;
        }
        Ok(cfg)
    }

    /// Combina las opciones del chord con los valores por defecto.
    pub fn resolve(&self, options: &ChordOptions) -> ResolvedOptions {
        ResolvedOptions { interval: options.interval.unwrap_or(self.retry_interval),
                          max_retries: options.max_retries.or(self.max_retries),
                          join_timeout: options.join_timeout.unwrap_or(self.join_timeout),
                          propagate: options.propagate.unwrap_or(self.propagate) }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
       .parse::<T>()
       .map_err(|_| ChordError::Config(format!("{}: valor inválido '{}'", key, raw)))
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = parse_value(key, raw)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ChordError::Config(format!("{}: debe ser un número de segundos >= 0", key)));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ChordError::Config(format!("{}: booleano inválido '{}'", key, raw))),
    }
}
