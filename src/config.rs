//! Process-environment configuration
//!
//! The gateway is configured entirely from environment variables so it
//! can be replicated share-nothing behind a load balancer. The proxy
//! list is the only required setting; everything else has a default.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Environment variable names.
pub const ENV_PROXY_URLS: &str = "REDDIT_PROXY_URLS";
pub const ENV_USER_AGENT: &str = "REDDIT_USER_AGENT";
pub const ENV_RANDOM_USER_AGENTS: &str = "USE_RANDOM_USER_AGENTS";
pub const ENV_MAX_RETRIES: &str = "PROXY_MAX_RETRIES";
pub const ENV_DEFAULT_POST_LIMIT: &str = "SCRAPER_DEFAULT_POST_LIMIT";
pub const ENV_DEFAULT_COMMENT_LIMIT: &str = "SCRAPER_DEFAULT_COMMENT_LIMIT";
pub const ENV_SERVER_PORT: &str = "SERVER_PORT";
pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
pub const ENV_RATE_LIMIT_DELAY: &str = "RATE_LIMIT_DELAY";
pub const ENV_BASE_URL: &str = "REDDIT_BASE_URL";

/// Default upstream host. The "old" hostname serves the JSON listings
/// without the redesign's dynamic rendering.
pub const DEFAULT_BASE_URL: &str = "https://old.reddit.com";

/// Default fixed user agent when randomization is disabled.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Errors raised while loading configuration. All of these are fatal
/// at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required and must contain at least one proxy URL")]
    MissingProxies { var: &'static str },
    #[error("invalid proxy URL format, must start with http:// or https://: {url}")]
    ProxyScheme { url: String },
    #[error("invalid proxy URL {url}: {source}")]
    ProxyParse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream proxy pool, validated but unparsed
    pub proxy_urls: Vec<String>,
    /// Fixed user agent, used when `random_user_agents` is off
    pub user_agent: String,
    /// Pick a browser-matched user agent per request
    pub random_user_agents: bool,
    /// Transport attempt cap
    pub max_retries: u32,
    /// Default listing/post limit when the caller omits one
    pub default_post_limit: i64,
    /// Default comment limit when the caller omits both limits
    pub default_comment_limit: i64,
    /// Inbound listen port
    pub server_port: u16,
    /// Outbound per-attempt HTTP timeout
    pub request_timeout: Duration,
    /// Courtesy sleep between listing pages
    pub rate_limit_delay: Duration,
    /// Upstream base URL
    pub base_url: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build configuration from an explicit variable map. Split out so
    /// tests never have to mutate the process environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let proxy_urls = parse_proxy_list(vars.get(ENV_PROXY_URLS).map(String::as_str))?;

        let user_agent = vars
            .get(ENV_USER_AGENT)
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Ok(Config {
            proxy_urls,
            user_agent,
            random_user_agents: get_bool(vars, ENV_RANDOM_USER_AGENTS, true),
            max_retries: get_parsed(vars, ENV_MAX_RETRIES, 3)?,
            default_post_limit: get_parsed(vars, ENV_DEFAULT_POST_LIMIT, 25)?,
            default_comment_limit: get_parsed(vars, ENV_DEFAULT_COMMENT_LIMIT, 50)?,
            server_port: get_parsed(vars, ENV_SERVER_PORT, 8080)?,
            request_timeout: get_duration(vars, ENV_REQUEST_TIMEOUT, Duration::from_secs(30))?,
            rate_limit_delay: get_duration(vars, ENV_RATE_LIMIT_DELAY, Duration::from_millis(200))?,
            base_url: vars
                .get(ENV_BASE_URL)
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

fn parse_proxy_list(raw: Option<&str>) -> Result<Vec<String>, ConfigError> {
    let mut proxies = Vec::new();

    if let Some(raw) = raw {
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if !entry.starts_with("http://") && !entry.starts_with("https://") {
                return Err(ConfigError::ProxyScheme {
                    url: entry.to_string(),
                });
            }
            Url::parse(entry).map_err(|source| ConfigError::ProxyParse {
                url: entry.to_string(),
                source,
            })?;
            proxies.push(entry.to_string());
        }
    }

    if proxies.is_empty() {
        return Err(ConfigError::MissingProxies {
            var: ENV_PROXY_URLS,
        });
    }

    Ok(proxies)
}

fn get_bool(vars: &HashMap<String, String>, key: &'static str, default: bool) -> bool {
    match vars.get(key).map(String::as_str) {
        Some(v) if !v.is_empty() => v.parse().unwrap_or(default),
        _ => default,
    }
}

fn get_parsed<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key).map(String::as_str) {
        Some(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::Invalid {
            var: key,
            value: v.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Durations accept bare integer seconds, or an integer with an `s` or
/// `ms` suffix (`30s`, `250ms`).
fn get_duration(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let raw = match vars.get(key).map(String::as_str) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(default),
    };

    let parsed = if let Some(ms) = raw.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = raw.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else {
        raw.trim().parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or(ConfigError::Invalid {
        var: key,
        value: raw.to_string(),
    })
}
