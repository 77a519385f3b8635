use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Maximum time to wait for an upstream connect.
    pub dial_timeout: Duration,
    /// How long an idle keep-alive connection survives in the pool.
    pub idle_conn_timeout: Duration,
    pub flush_interval: Duration,
}

/// The pooled HTTP client the proxy forwards through. No overall request
/// timeout: long-running streamed responses must survive.
pub struct UpstreamTransport {
    client: reqwest::Client,
}

impl UpstreamTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, reqwest::Error> {
        if !settings.flush_interval.is_zero() {
            // hyper flushes each chunk as it arrives; nothing to configure
            tracing::debug!(flush_interval = ?settings.flush_interval, "flush interval configured");
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.dial_timeout)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(settings.idle_conn_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
