use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::fmt;

pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub port: u16,
    pub redis_url: Option<String>,
    pub realtime_app_key: String,
    pub realtime_app_secret: String,
    pub jwt_public_key_pem: String,
    pub store_timeout_ms: u64,
    pub upload_max_bytes: usize,
    pub s3: S3Config,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_backend", &self.store_backend)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("port", &self.port)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("realtime_app_key", &self.realtime_app_key)
            .field("realtime_app_secret", &"[REDACTED]")
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("upload_max_bytes", &self.upload_max_bytes)
            .field("s3", &self.s3)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| AppError::Config(format!("{key} missing")));

        let store_backend = match var("STORE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => StoreBackend::Postgres,
            Some(v) if v == "postgres" => StoreBackend::Postgres,
            Some(v) if v == "memory" => StoreBackend::Memory,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"
                )))
            }
        };

        let database_url = var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let jwt_public_key_pem = required("JWT_PUBLIC_KEY_PEM")?.replace("\\n", "\n");

        Ok(Self {
            store_backend,
            database_url,
            port: var("PORT").and_then(|s| s.parse().ok()).unwrap_or(8080),
            redis_url: var("REDIS_URL"),
            realtime_app_key: required("REALTIME_APP_KEY")?,
            realtime_app_secret: required("REALTIME_APP_SECRET")?,
            jwt_public_key_pem,
            store_timeout_ms: var("STORE_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            upload_max_bytes: var("UPLOAD_MAX_BYTES")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_UPLOAD_MAX_BYTES),
            s3: S3Config {
                bucket: var("S3_BUCKET").unwrap_or_else(|| "chat-attachments".to_string()),
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: var("S3_ENDPOINT"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/nova"),
        ("REALTIME_APP_KEY", "app-key"),
        ("REALTIME_APP_SECRET", "app-secret"),
        ("JWT_PUBLIC_KEY_PEM", "-----BEGIN PUBLIC KEY-----\\nabc\\n-----END PUBLIC KEY-----"),
    ];

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Postgres);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.store_timeout_ms, DEFAULT_STORE_TIMEOUT_MS);
        assert_eq!(cfg.upload_max_bytes, 26_214_400);
        assert_eq!(cfg.s3.bucket, "chat-attachments");
        assert!(cfg.redis_url.is_none());
        assert!(cfg.jwt_public_key_pem.contains('\n'));
    }

    #[test]
    fn test_memory_backend_does_not_need_database() {
        let mut pairs: Vec<_> = BASE
            .iter()
            .copied()
            .filter(|(k, _)| *k != "DATABASE_URL")
            .collect();
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        pairs.push(("STORE_BACKEND", "Memory"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let pairs: Vec<_> = BASE
            .iter()
            .copied()
            .filter(|(k, _)| *k != "REALTIME_APP_SECRET")
            .collect();
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("REALTIME_APP_SECRET")));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let mut pairs = BASE.to_vec();
        pairs.push(("STORE_TIMEOUT_MS", "soon"));
        pairs.push(("UPLOAD_MAX_BYTES", "0"));
        pairs.push(("PORT", "99999"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.store_timeout_ms, DEFAULT_STORE_TIMEOUT_MS);
        assert_eq!(cfg.upload_max_bytes, DEFAULT_UPLOAD_MAX_BYTES);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let cfg = Config::from_lookup(lookup(BASE)).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("app-secret"));
        assert!(!rendered.contains("postgres://"));
    }
}
