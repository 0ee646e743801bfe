//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the cart backend (e.g., <https://shop.example.com/>)
//!
//! ## Optional
//! - `CART_API_TOKEN` - Bearer credential of a signed-in user (guest session otherwise)
//! - `CART_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 15)
//! - `CART_DEBOUNCE_MS` - Quantity commit debounce window (default: 300)
//! - `CART_ERROR_TTL_MS` - How long a transient error stays visible (default: 3500)
//! - `CART_ERROR_FADE_MS` - Fade-out after the TTL before removal (default: 260)
//! - `CART_STOCK_NOTICE_MS` - How long a stock notice stays visible (default: 3500)
//! - `CART_STOCK_FADE_MS` - Fade-out before the stock notice text is cleared (default: 260)
//! - `CART_FREE_SHIPPING_THRESHOLD` - Subtotal for free shipping (default: 50.00)
//! - `CART_FLAT_SHIPPING_RATE` - Shipping below the threshold (default: 4.99)
//! - `CART_STATE_DIR` - Directory for the cart mirror and guest session id
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use cart_sync_core::ShippingPolicy;
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.0;

/// Prefixes of template placeholder values (case-insensitive)
const PLACEHOLDER_PREFIXES: &[&str] = &[
    "your-",
    "your_",
    "enter-",
    "insert-",
    "replace-",
    "put-your",
    "add-your",
];

/// Whole values that are placeholders (case-insensitive)
const PLACEHOLDER_VALUES: &[&str] = &[
    "changeme",
    "change-me",
    "replaceme",
    "replace-me",
    "placeholder",
    "example",
    "todo",
    "fixme",
    "token",
    "secret",
];

const MIRROR_FILE: &str = "cart.json";
const GUEST_ID_FILE: &str = "guest_session_id";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Cart backend access
    pub api: ApiConfig,
    /// Debounce and display timings
    pub timing: TimingConfig,
    /// Shipping rule used when recomputing totals
    pub shipping: ShippingPolicy,
    /// Directory for the local cart mirror and guest session id
    pub state_dir: Option<PathBuf>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Cart backend configuration.
///
/// Implements `Debug` manually to redact the bearer token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL; API paths (`api/cart`, ...) are joined onto it
    pub base_url: Url,
    /// Bearer credential of a signed-in user
    pub token: Option<SecretString>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ApiConfig {
    /// API config with no credential and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL is not http(s).
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url("CART_API_BASE_URL", base_url)?,
            token: None,
            request_timeout: Duration::from_secs(15),
        })
    }
}

/// Debounce and display timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Quiet period before a quantity change is committed
    pub debounce: Duration,
    /// How long a transient error stays visible
    pub error_ttl: Duration,
    /// Fade-out after the TTL before the error is removed
    pub error_fade: Duration,
    /// How long a stock notice stays visible
    pub stock_notice: Duration,
    /// Fade-out before the stock notice text is cleared
    pub stock_fade: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            error_ttl: Duration::from_millis(3500),
            error_fade: Duration::from_millis(260),
            stock_notice: Duration::from_millis(3500),
            stock_fade: Duration::from_millis(260),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the bearer token looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = parse_base_url(
            "CART_API_BASE_URL",
            &get_required_env("CART_API_BASE_URL")?,
        )?;
        let token = get_optional_env("CART_API_TOKEN")
            .map(|value| {
                validate_secret_strength(&value, "CART_API_TOKEN")?;
                Ok::<_, ConfigError>(SecretString::from(value))
            })
            .transpose()?;
        let request_timeout = Duration::from_secs(get_parsed("CART_REQUEST_TIMEOUT_SECS", 15)?);

        let defaults = TimingConfig::default();
        let timing = TimingConfig {
            debounce: get_millis("CART_DEBOUNCE_MS", defaults.debounce)?,
            error_ttl: get_millis("CART_ERROR_TTL_MS", defaults.error_ttl)?,
            error_fade: get_millis("CART_ERROR_FADE_MS", defaults.error_fade)?,
            stock_notice: get_millis("CART_STOCK_NOTICE_MS", defaults.stock_notice)?,
            stock_fade: get_millis("CART_STOCK_FADE_MS", defaults.stock_fade)?,
        };

        let default_shipping = ShippingPolicy::default();
        let shipping = ShippingPolicy {
            free_shipping_threshold: get_parsed(
                "CART_FREE_SHIPPING_THRESHOLD",
                default_shipping.free_shipping_threshold,
            )?,
            flat_rate: get_parsed("CART_FLAT_SHIPPING_RATE", default_shipping.flat_rate)?,
        };
        validate_shipping(&shipping)?;

        Ok(Self {
            api: ApiConfig {
                base_url,
                token,
                request_timeout,
            },
            timing,
            shipping,
            state_dir: get_optional_env("CART_STATE_DIR").map(PathBuf::from),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Configuration for a backend URL with every other setting at its default.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL is not http(s).
    pub fn for_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiConfig::new(base_url)?,
            timing: TimingConfig::default(),
            shipping: ShippingPolicy::default(),
            state_dir: None,
            sentry_dsn: None,
            sentry_environment: None,
        })
    }

    /// Path of the local cart mirror file, if a state directory is configured.
    #[must_use]
    pub fn mirror_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(MIRROR_FILE))
    }

    /// Path of the persisted guest session id, if a state directory is configured.
    #[must_use]
    pub fn guest_id_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| dir.join(GUEST_ID_FILE))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable (empty counts as unset).
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get and parse an environment variable, falling back to a default.
fn get_parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Get a millisecond duration, falling back to a default.
fn get_millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    get_parsed(key, default_ms).map(Duration::from_millis)
}

/// Parse the backend base URL.
///
/// A trailing slash is enforced so relative API paths join beneath any
/// path prefix instead of replacing its last segment.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Shipping amounts must be non-negative.
fn validate_shipping(policy: &ShippingPolicy) -> Result<(), ConfigError> {
    if policy.free_shipping_threshold < Decimal::ZERO {
        return Err(ConfigError::InvalidEnvVar(
            "CART_FREE_SHIPPING_THRESHOLD".to_string(),
            "must not be negative".to_string(),
        ));
    }
    if policy.flat_rate < Decimal::ZERO {
        return Err(ConfigError::InvalidEnvVar(
            "CART_FLAT_SHIPPING_RATE".to_string(),
            "must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Whether the whole value looks like an unfilled template placeholder.
///
/// Bearer tokens are issued by the backend, so only the value as a whole is
/// matched; a real token may contain any substring.
fn is_placeholder(secret: &str) -> bool {
    let lower = secret.trim().to_lowercase();
    PLACEHOLDER_VALUES.contains(&lower.as_str())
        || PLACEHOLDER_PREFIXES.iter().any(|p| lower.starts_with(p))
        || (lower.starts_with('<') && lower.ends_with('>'))
        || lower.chars().all(|c| matches!(c, 'x' | '*' | '-' | '.'))
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    if is_placeholder(secret) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            "appears to be a placeholder".to_string(),
        ));
    }

    // Real tokens (JWTs, opaque session tokens) have high entropy
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}
