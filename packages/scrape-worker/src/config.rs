use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Browser-like User-Agent; several news sites refuse obvious bot agents.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    /// Number of concurrency slots (tasks in flight at once)
    pub concurrency: usize,
    pub shutdown_grace: Duration,
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
}

/// NATS / JetStream settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub subject: String,
    /// Durable consumer name shared by every worker in the group
    pub queue_group: String,
    pub stream: String,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub redelivery_delay: Duration,
    pub dead_letter_subject: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 5,
            max_bytes: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Controls the NLP-derived article fields (keywords, summary).
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub nlp_enabled: bool,
    pub keyword_count: usize,
    pub summary_sentences: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            nlp_enabled: true,
            keyword_count: 25,
            summary_sentences: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok(), running_in_docker())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// `in_container` switches the default hosts to the compose service names.
    pub fn from_lookup<F>(lookup: F, in_container: bool) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_nats_host = if in_container { "nats" } else { "localhost" };
        let default_pg_host = if in_container { "postgres" } else { "localhost" };

        let broker_url = match lookup("NATS_URL") {
            Some(url) => url,
            None => {
                let host = lookup("NATS_HOST").unwrap_or_else(|| default_nats_host.to_string());
                let port: u16 = parse_var(&lookup, "NATS_PORT", 4222)?;
                format!("nats://{}:{}", host, port)
            }
        };

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let user = lookup("POSTGRES_USER")
                    .context("POSTGRES_USER must be set when DATABASE_URL is not")?;
                let password = lookup("POSTGRES_PASSWORD")
                    .context("POSTGRES_PASSWORD must be set when DATABASE_URL is not")?;
                let database = lookup("POSTGRES_DB")
                    .context("POSTGRES_DB must be set when DATABASE_URL is not")?;
                let host = lookup("POSTGRES_HOST").unwrap_or_else(|| default_pg_host.to_string());
                postgres_url(&user, &password, &host, &database)?
            }
        };

        let concurrency: usize = parse_var(&lookup, "WORKER_CONCURRENCY", default_concurrency())?;
        if concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        let defaults = FetchConfig::default();
        let fetch = FetchConfig {
            timeout: Duration::from_secs(parse_var(&lookup, "FETCH_TIMEOUT_SECS", 30)?),
            max_redirects: parse_var(&lookup, "FETCH_MAX_REDIRECTS", defaults.max_redirects)?,
            max_bytes: parse_var(&lookup, "FETCH_MAX_BYTES", defaults.max_bytes)?,
            user_agent: lookup("FETCH_USER_AGENT").unwrap_or(defaults.user_agent),
        };

        let defaults = ExtractionConfig::default();
        let extraction = ExtractionConfig {
            nlp_enabled: parse_flag(&lookup, "NLP_ENABLED", defaults.nlp_enabled)?,
            keyword_count: parse_var(&lookup, "KEYWORD_COUNT", defaults.keyword_count)?,
            summary_sentences: parse_var(&lookup, "SUMMARY_SENTENCES", defaults.summary_sentences)?,
        };

        Ok(Self {
            broker: BrokerConfig {
                url: broker_url,
                subject: lookup("NATS_SUBJECT").unwrap_or_else(|| "urls".to_string()),
                queue_group: lookup("NATS_QUEUE_GROUP").unwrap_or_else(|| "scrapers".to_string()),
                stream: lookup("NATS_STREAM").unwrap_or_else(|| "URLS".to_string()),
                ack_wait: Duration::from_secs(parse_var(&lookup, "NATS_ACK_WAIT_SECS", 60)?),
                max_deliver: parse_var(&lookup, "NATS_MAX_DELIVER", 5)?,
                redelivery_delay: Duration::from_secs(parse_var(
                    &lookup,
                    "NATS_REDELIVERY_DELAY_SECS",
                    5,
                )?),
                dead_letter_subject: lookup("DEAD_LETTER_SUBJECT").filter(|s| !s.is_empty()),
            },
            database_url,
            db_max_connections: parse_var(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            run_migrations: parse_flag(&lookup, "RUN_MIGRATIONS", true)?,
            concurrency,
            shutdown_grace: Duration::from_secs(parse_var(&lookup, "SHUTDOWN_GRACE_SECS", 30)?),
            fetch,
            extraction,
        })
    }
}

/// True when running inside a Docker container.
pub fn running_in_docker() -> bool {
    Path::new("/.dockerenv").exists()
}

/// Fetching is I/O bound and extraction CPU bound, so two slots per core
/// keeps the blocking pool busy without letting intake outrun it.
fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

fn postgres_url(user: &str, password: &str, host: &str, database: &str) -> Result<String> {
    let mut url = url::Url::parse(&format!("postgresql://{}/{}", host, database))
        .with_context(|| format!("POSTGRES_HOST {:?} is not a valid host", host))?;
    url.set_username(user)
        .map_err(|_| anyhow!("POSTGRES_USER cannot be encoded in a connection URL"))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow!("POSTGRES_PASSWORD cannot be encoded in a connection URL"))?;
    Ok(url.to_string())
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes") => {
            Ok(true)
        }
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" || v.eq_ignore_ascii_case("no") => {
            Ok(false)
        }
        Some(v) => Err(anyhow!("{} must be true or false, got {:?}", key, v)),
    }
}
