//! Client configuration and its environment surface.

use std::str::FromStr;
use std::time::Duration;

use rollsync_pacing::PacingConfig;
use rollsync_protocol::{AccountConfig, Commitment, Encoding};
use rollsync_reconnect::ReconnectConfig;

use crate::ClientError;

/// Everything the client needs to know up front.
///
/// Build one with `Default` and struct update syntax, with
/// [`from_env`](Self::from_env), or through
/// [`ClientBuilder`](crate::ClientBuilder).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Streaming (WebSocket) endpoint.
    pub ws_url: String,
    /// Unary (HTTP) endpoint used for polling, probes and outbound sends.
    pub http_url: String,
    /// Period of the fallback poller. Default: 100 ms.
    pub poll_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// How long an outbound pipeline stays in service. Default: 60 s.
    pub recycle_period: Duration,
    pub pacing: PacingConfig,
    /// Period of the latency probe. Default: 1 s.
    pub latency_probe_interval: Duration,
    /// Deadline for ordinary requests. Default: 30 s.
    pub request_timeout: Duration,
    /// Deadline for a streaming subscribe before the key stays on polling.
    /// Default: 5 s.
    pub subscribe_timeout: Duration,
    /// Bound on a single connect attempt. Default: 10 s.
    pub connect_timeout: Duration,
    /// Encoding and commitment for subscriptions and fetches.
    pub account: AccountConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8900".into(),
            http_url: "http://127.0.0.1:8899".into(),
            poll_interval: Duration::from_millis(100),
            reconnect: ReconnectConfig::default(),
            recycle_period: Duration::from_secs(60),
            pacing: PacingConfig::default(),
            latency_probe_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            account: AccountConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Reads `ROLLSYNC_*` environment variables over the defaults.
    ///
    /// # Errors
    /// [`ClientError::Config`] naming the first variable that does not parse.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), with the variables supplied by
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ROLLSYNC_WS_URL") {
            config.ws_url = url;
        }
        if let Some(url) = lookup("ROLLSYNC_HTTP_URL") {
            config.http_url = url;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_POLL_INTERVAL_MS")? {
            config.poll_interval = d;
        }
        if let Some(n) = parsed(&lookup, "ROLLSYNC_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = n;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_RECONNECT_BASE_MS")? {
            config.reconnect.base_delay = d;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_RECONNECT_MAX_DELAY_MS")? {
            config.reconnect.max_delay = d;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_RECYCLE_PERIOD_MS")? {
            config.recycle_period = d;
        }
        if let Some(n) = parsed(&lookup, "ROLLSYNC_LATENCY_WINDOW")? {
            config.pacing.window_size = n;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_LATENCY_PROBE_MS")? {
            config.latency_probe_interval = d;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = d;
        }
        if let Some(d) = millis(&lookup, "ROLLSYNC_SUBSCRIBE_TIMEOUT_MS")? {
            config.subscribe_timeout = d;
        }
        if let Some(c) = parsed::<Commitment, _>(&lookup, "ROLLSYNC_COMMITMENT")? {
            config.account.commitment = c;
        }
        if let Some(e) = parsed::<Encoding, _>(&lookup, "ROLLSYNC_ENCODING")? {
            config.account.encoding = e;
        }

        Ok(config.validated())
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// - zero `poll_interval`, `latency_probe_interval` and `recycle_period`
    ///   become 1 ms (a zero tokio interval panics)
    /// - `pacing.window_size` of 0 becomes 1
    /// - `reconnect.max_delay` is raised to `reconnect.base_delay`
    pub fn validated(mut self) -> Self {
        const MIN_PERIOD: Duration = Duration::from_millis(1);
        for (name, period) in [
            ("poll_interval", &mut self.poll_interval),
            ("latency_probe_interval", &mut self.latency_probe_interval),
            ("recycle_period", &mut self.recycle_period),
        ] {
            if period.is_zero() {
                tracing::warn!(field = name, "zero period, using 1 ms");
                *period = MIN_PERIOD;
            }
        }
        self.pacing = self.pacing.validated();
        self.reconnect = self.reconnect.validated();
        self
    }
}

fn parsed<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("{name}={raw:?}: {e}"))),
    }
}

fn millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>, ClientError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parsed::<u64, _>(lookup, name)?.map(Duration::from_millis))
}
