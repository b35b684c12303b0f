use clap::builder::TypedValueParser as _;
use clap::Parser;
use log::LevelFilter;
use std::time::Duration;

/// Default Qonic API base URL used when `API_URL` is not set.
pub const DEFAULT_API_URL: &str = "https://api.qonic.com/v1";

/// Scopes requested at sign-in when `SCOPES` is not set.
pub const DEFAULT_SCOPES: &str = "projects:read projects:write models:read models:write issues:read libraries:read libraries:write";

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8765/callback";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The base URL of the Qonic resource API.
    #[arg(long, env, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// The base URL of the authorization server. Defaults to the API URL.
    #[arg(long, env)]
    issuer_url: Option<String>,

    /// Space separated OAuth scopes to request at sign-in.
    #[arg(long, env, default_value = DEFAULT_SCOPES)]
    pub scopes: String,

    /// The redirect URI registered for this client. Its path is where the
    /// loopback listener waits for the authorization redirect.
    #[arg(long, env, default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,

    /// The local TCP port the loopback listener binds on 127.0.0.1
    #[arg(long, env, default_value_t = 8765)]
    pub callback_port: u16,

    /// The OAuth client id issued for this application.
    #[arg(long, env)]
    client_id: Option<String>,

    /// The OAuth client secret issued for this application.
    #[arg(long, env, hide_env_values = true)]
    client_secret: Option<String>,

    /// Seconds to wait for the browser redirect before giving up. Waits forever when unset.
    #[arg(long, env)]
    pub callback_timeout_secs: Option<u64>,

    /// Seconds between operation status polls
    #[arg(long, env, default_value_t = 2)]
    pub poll_interval_secs: u64,

    /// Seconds to wait for an operation to finish. Waits forever when unset.
    #[arg(long, env)]
    pub operation_timeout_secs: Option<u64>,

    /// Timeout in seconds for a single API request
    #[arg(long, env, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,
}

impl Config {
    /// Returns the Qonic API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Returns the authorization server URL, falling back to the API URL.
    pub fn issuer_url(&self) -> &str {
        self.issuer_url.as_deref().unwrap_or(&self.api_url)
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    pub fn client_secret(&self) -> Option<String> {
        self.client_secret.clone()
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
