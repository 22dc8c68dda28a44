use std::env;
use std::time::Duration;

/// Runtime configuration, loaded once at startup and passed to constructors.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener bind address
    pub host: String,
    pub port: u16,

    /// Database connection string (sqlite or postgres)
    pub database_url: String,

    /// Maximum size of a single stored artifact (default: 10 GiB)
    pub max_file_size: i64,

    /// Files larger than this must use the chunked upload path (default: 100 MiB)
    pub chunk_threshold: i64,

    /// Maximum accepted chunk size (default: 50 MiB)
    pub chunk_size: i64,

    /// Upper bound on chunks per file (default: 200)
    pub max_chunks_per_file: usize,

    /// Idle expiry for chunk-upload sessions (default: 30m)
    pub chunk_timeout: Duration,

    /// Scratch filesystem root for chunks, assembled files and external blobs
    pub temp_dir: String,

    /// Upload semaphore permits (default: 50)
    pub max_concurrent_uploads: usize,

    /// Download semaphore permits (default: 100)
    pub max_concurrent_downloads: usize,

    /// Deadline for non-streaming requests (default: 15m)
    pub request_timeout: Duration,

    /// Retention of a stored file after upload (default: 24h)
    pub file_retention: Duration,

    /// Enables the admin surface when set
    pub admin_password: Option<String>,

    /// Secret for signing admin tokens
    pub jwt_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite::memory:".to_string(),
            max_file_size: 10 * 1024 * 1024 * 1024,
            chunk_threshold: 100 * 1024 * 1024,
            chunk_size: 50 * 1024 * 1024,
            max_chunks_per_file: 200,
            chunk_timeout: Duration::from_secs(30 * 60),
            temp_dir: "./temp".to_string(),
            max_concurrent_uploads: 50,
            max_concurrent_downloads: 100,
            request_timeout: Duration::from_secs(15 * 60),
            file_retention: Duration::from_secs(24 * 3600),
            admin_password: None,
            jwt_secret: "secret".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(default.host),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            database_url: env::var("DATABASE_URL").unwrap_or(default.database_url),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            chunk_threshold: env::var("CHUNK_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_threshold),

            chunk_size: env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_size),

            max_chunks_per_file: env::var("MAX_CHUNKS_PER_FILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunks_per_file),

            chunk_timeout: env::var("CHUNK_TIMEOUT")
                .ok()
                .and_then(|v| parse_duration(&v))
                .unwrap_or(default.chunk_timeout),

            temp_dir: env::var("TEMP_DIR").unwrap_or(default.temp_dir),

            max_concurrent_uploads: env::var("MAX_CONCURRENT_UPLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_concurrent_uploads),

            max_concurrent_downloads: env::var("MAX_CONCURRENT_DOWNLOADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_concurrent_downloads),

            request_timeout: env::var("REQUEST_TIMEOUT")
                .ok()
                .and_then(|v| parse_duration(&v))
                .unwrap_or(default.request_timeout),

            file_retention: env::var("FILE_RETENTION")
                .ok()
                .and_then(|v| parse_duration(&v))
                .unwrap_or(default.file_retention),

            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),

            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),
        }
    }
}

/// Parse "30m" / "24h" / "90s" style durations; bare numbers are seconds.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (number, unit) = value.split_at(value.len().checked_sub(1)?);
    let number: u64 = number.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        "d" => Some(Duration::from_secs(number * 86400)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.chunk_threshold, 100 * 1024 * 1024);
        assert_eq!(config.chunk_size, 50 * 1024 * 1024);
        assert_eq!(config.max_chunks_per_file, 200);
        assert_eq!(config.chunk_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_concurrent_uploads, 50);
        assert_eq!(config.max_concurrent_downloads, 100);
        assert!(config.admin_password.is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604800)));
        assert_eq!(parse_duration("oops"), None);
    }
}
