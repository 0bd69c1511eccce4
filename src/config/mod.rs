use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub kv: KvConfig,
    pub tenant: TenantConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Default page size when the resource does not declare one
    pub default_limit: i64,
    /// Hard ceiling applied to client-supplied limits
    pub max_limit: Option<i64>,
    /// Default TTL for cached GET payloads, seconds
    pub cache_ttl_secs: u64,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Namespace prefix for session and cache keys
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant database names are `{prefix}_{tenant_id}`
    pub db_prefix: String,
    /// Base connection URL whose path is swapped per tenant
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::defaults().with_env_overrides()
    }

    fn defaults() -> Self {
        Self {
            api: ApiConfig {
                default_limit: 25,
                max_limit: Some(1000),
                cache_ttl_secs: 60,
                port: 3000,
            },
            kv: KvConfig {
                prefix: "restbase".to_string(),
            },
            tenant: TenantConfig {
                db_prefix: "tenant".to_string(),
                database_url: None,
            },
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("RESTBASE_DEFAULT_LIMIT") {
            self.api.default_limit = v.parse().unwrap_or(self.api.default_limit);
        }
        if let Ok(v) = env::var("RESTBASE_MAX_LIMIT") {
            self.api.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("RESTBASE_CACHE_TTL_SECS") {
            self.api.cache_ttl_secs = v.parse().unwrap_or(self.api.cache_ttl_secs);
        }
        if let Ok(v) = env::var("RESTBASE_PORT").or_else(|_| env::var("PORT")) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("RESTBASE_KV_PREFIX") {
            self.kv.prefix = v;
        }
        if let Ok(v) = env::var("RESTBASE_TENANT_DB_PREFIX") {
            self.tenant.db_prefix = v;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.tenant.database_url = Some(v);
        }
        self
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::defaults();
        assert_eq!(config.api.default_limit, 25);
        assert_eq!(config.api.cache_ttl_secs, 60);
        assert_eq!(config.kv.prefix, "restbase");
        assert_eq!(config.tenant.db_prefix, "tenant");
    }
}
