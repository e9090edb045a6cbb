use crate::payments::currency::is_supported_currency;
use crate::payments::providers::{HostedCheckoutConfig, MobileMoneyConfig, RetryPolicy};
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

pub const DEFAULT_CURRENCY: &str = "Ar";
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_GATEWAY_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub payments: PaymentsConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub currency: String,
    pub gateway_timeout_secs: u64,
    pub max_retries: u32,
    /// Return the hosted-checkout success indicator from create-intent
    pub expose_success_indicator: bool,
    pub mobile_money: Option<MobileMoneyConfig>,
    pub hosted_checkout: Option<HostedCheckoutConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Source of configuration values, so tests don't have to touch the
/// process environment.
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key).with_context(|| format!("{} not set", key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.optional(key).as_deref() {
            None => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(anyhow!("{} must be true or false, got {}", key, v)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        let server = ServerConfig {
            host: vars.or("HOST", "0.0.0.0"),
            port: vars
                .or("PORT", "8080")
                .parse()
                .context("PORT must be a valid number")?,
            environment: vars.or("ENVIRONMENT", "development"),
        };

        let database = DatabaseConfig {
            url: vars.required("DATABASE_URL")?,
            max_connections: vars
                .or("DATABASE_MAX_CONNECTIONS", "20")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            run_migrations: vars.flag("DATABASE_RUN_MIGRATIONS")?,
        };

        let redis = vars.optional("REDIS_URL").map(|url| RedisConfig { url });

        let gateway_timeout_secs = vars
            .or("GATEWAY_TIMEOUT_SECS", &DEFAULT_GATEWAY_TIMEOUT_SECS.to_string())
            .parse()
            .context("GATEWAY_TIMEOUT_SECS must be a valid number")?;
        let max_retries = vars
            .or("GATEWAY_MAX_RETRIES", &DEFAULT_GATEWAY_MAX_RETRIES.to_string())
            .parse()
            .context("GATEWAY_MAX_RETRIES must be a valid number")?;
        let retry = RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
        };

        // A gateway is enabled by its base URL; once enabled every credential is required.
        let mobile_money = match vars.optional("MOBILE_MONEY_BASE_URL") {
            Some(base_url) => Some(MobileMoneyConfig {
                base_url,
                api_key: vars.required("MOBILE_MONEY_API_KEY")?,
                signing_secret: vars.required("MOBILE_MONEY_SIGNING_SECRET")?,
                merchant_number: vars.required("MOBILE_MONEY_MERCHANT_NUMBER")?,
                partner_name: vars.required("MOBILE_MONEY_PARTNER_NAME")?,
                callback_url: vars.optional("MOBILE_MONEY_CALLBACK_URL"),
                timeout_secs: gateway_timeout_secs,
                retry,
            }),
            None => None,
        };

        let hosted_checkout = match vars.optional("HOSTED_CHECKOUT_BASE_URL") {
            Some(base_url) => Some(HostedCheckoutConfig {
                base_url,
                api_version: vars.or("HOSTED_CHECKOUT_API_VERSION", "73"),
                merchant_id: vars.required("HOSTED_CHECKOUT_MERCHANT_ID")?,
                api_password: vars.required("HOSTED_CHECKOUT_API_PASSWORD")?,
                merchant_name: vars.required("HOSTED_CHECKOUT_MERCHANT_NAME")?,
                return_url: vars.required("HOSTED_CHECKOUT_RETURN_URL")?,
                timeout_secs: gateway_timeout_secs,
                retry,
            }),
            None => None,
        };

        let payments = PaymentsConfig {
            currency: vars.or("PAYMENT_CURRENCY", DEFAULT_CURRENCY),
            gateway_timeout_secs,
            max_retries,
            expose_success_indicator: vars.flag("HOSTED_CHECKOUT_EXPOSE_SUCCESS_INDICATOR")?,
            mobile_money,
            hosted_checkout,
        };

        let log_format = match vars.or("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => return Err(anyhow!("LOG_FORMAT must be 'json' or 'pretty', got {}", other)),
        };

        let config = Config {
            server,
            database,
            redis,
            payments,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }

    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        let payments = &self.payments;
        if !is_supported_currency(&payments.currency) {
            return Err(anyhow!("PAYMENT_CURRENCY {} is not supported", payments.currency));
        }

        if !(1..=60).contains(&payments.gateway_timeout_secs) {
            return Err(anyhow!(
                "GATEWAY_TIMEOUT_SECS must be between 1 and 60, got {}",
                payments.gateway_timeout_secs
            ));
        }

        if payments.max_retries > 5 {
            return Err(anyhow!(
                "GATEWAY_MAX_RETRIES must be at most 5, got {}",
                payments.max_retries
            ));
        }

        if payments.mobile_money.is_none() && payments.hosted_checkout.is_none() {
            return Err(anyhow!(
                "At least one gateway must be configured (MOBILE_MONEY_BASE_URL or HOSTED_CHECKOUT_BASE_URL)"
            ));
        }

        if let Some(hosted) = &payments.hosted_checkout {
            if !hosted.return_url.starts_with("http://") && !hosted.return_url.starts_with("https://") {
                return Err(anyhow!("HOSTED_CHECKOUT_RETURN_URL must be an http(s) URL"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        [
            ("DATABASE_URL", "postgres://localhost/pharmapay"),
            ("MOBILE_MONEY_BASE_URL", "https://mm.example"),
            ("MOBILE_MONEY_API_KEY", "key"),
            ("MOBILE_MONEY_SIGNING_SECRET", "secret"),
            ("MOBILE_MONEY_MERCHANT_NUMBER", "0340000001"),
            ("MOBILE_MONEY_PARTNER_NAME", "Pharmacy"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_map(&base_vars()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.payments.currency, "Ar");
        assert_eq!(config.payments.gateway_timeout_secs, 20);
        assert!(!config.payments.expose_success_indicator);
        assert!(config.payments.hosted_checkout.is_none());
        assert!(config.redis.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_enabled_gateway_requires_credentials() {
        let mut vars = base_vars();
        vars.insert("MOBILE_MONEY_MERCHANT_NUMBER".to_string(), "  ".to_string());
        let err = Config::from_map(&vars).unwrap_err();
        assert!(err.to_string().contains("MOBILE_MONEY_MERCHANT_NUMBER"));

        let mut vars = base_vars();
        vars.insert("HOSTED_CHECKOUT_BASE_URL".to_string(), "https://gw.example".to_string());
        let err = Config::from_map(&vars).unwrap_err();
        assert!(err.to_string().contains("HOSTED_CHECKOUT_MERCHANT_ID"));
    }

    #[test]
    fn test_timeout_range() {
        let mut vars = base_vars();
        vars.insert("GATEWAY_TIMEOUT_SECS".to_string(), "0".to_string());
        assert!(Config::from_map(&vars).is_err());
        vars.insert("GATEWAY_TIMEOUT_SECS".to_string(), "61".to_string());
        assert!(Config::from_map(&vars).is_err());
        vars.insert("GATEWAY_TIMEOUT_SECS".to_string(), "60".to_string());
        assert!(Config::from_map(&vars).is_ok());
    }

    #[test]
    fn test_unsupported_currency_rejected() {
        let mut vars = base_vars();
        vars.insert("PAYMENT_CURRENCY".to_string(), "XYZ".to_string());
        assert!(Config::from_map(&vars).is_err());
    }

    #[test]
    fn test_requires_a_gateway() {
        let vars: HashMap<String, String> = [("DATABASE_URL", "postgres://localhost/pharmapay")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(Config::from_map(&vars).is_err());
    }
}
