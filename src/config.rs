use std::path::PathBuf;
use std::time::Duration;

/// Settings for the page request.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// `None` disables the request timeout.
    pub timeout: Option<Duration>,
    pub accept_invalid_certs: bool,
    pub max_page_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent:
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/113.0"
                    .to_string(),
            timeout: Some(Duration::from_secs(30)),
            accept_invalid_certs: false,
            max_page_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Everything a conversion run needs besides the work itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub out_dir: PathBuf,
    pub language: String,
    pub fetch: FetchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            language: "ja".to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Config {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.fetch.timeout = if seconds > 0.0 {
            Some(Duration::from_secs_f64(seconds))
        } else {
            None
        };
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.fetch.accept_invalid_certs = accept;
        self
    }
}
