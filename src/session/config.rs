use chrono::Duration;

pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = crate::token::ACCESS_TOKEN_TTL;
pub const DEFAULT_REFRESH_WINDOW_DAYS: i64 = 28;
pub const DEFAULT_TOUCH_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_TOUCH_QUEUE_SIZE: usize = 1024;
pub const DEFAULT_AUDIENCE: &str = "/v1";

/// Runtime tunables of the session lifecycle.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_ttl: Duration,
    refresh_window: Duration,
    audience: Vec<String>,
    touch_timeout: std::time::Duration,
    touch_queue_size: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECONDS),
            refresh_window: Duration::days(DEFAULT_REFRESH_WINDOW_DAYS),
            audience: vec![DEFAULT_AUDIENCE.to_string()],
            touch_timeout: std::time::Duration::from_secs(DEFAULT_TOUCH_TIMEOUT_SECONDS),
            touch_queue_size: DEFAULT_TOUCH_QUEUE_SIZE,
        }
    }

    #[must_use]
    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Empty entries are ignored; an empty set keeps the default audience.
    #[must_use]
    pub fn with_audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let audience: Vec<String> = audience
            .into_iter()
            .map(Into::into)
            .filter(|prefix| !prefix.trim().is_empty())
            .collect();
        if !audience.is_empty() {
            self.audience = audience;
        }
        self
    }

    #[must_use]
    pub fn with_touch_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.touch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_touch_queue_size(mut self, size: usize) -> Self {
        self.touch_queue_size = size.max(1);
        self
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_window(&self) -> Duration {
        self.refresh_window
    }

    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    #[must_use]
    pub fn touch_timeout(&self) -> std::time::Duration {
        self.touch_timeout
    }

    #[must_use]
    pub fn touch_queue_size(&self) -> usize {
        self.touch_queue_size
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.refresh_window(), Duration::days(28));
        assert_eq!(config.access_ttl(), Duration::hours(24));
        assert_eq!(config.audience(), ["/v1".to_string()]);
        assert_eq!(config.touch_timeout().as_secs(), 5);
        assert_eq!(config.touch_queue_size(), 1024);
    }

    #[test]
    fn builders_override() {
        let config = SessionConfig::new()
            .with_audience(["/v1", " ", "/v2"])
            .with_touch_queue_size(0)
            .with_refresh_window(Duration::days(1))
            .with_access_ttl(Duration::minutes(15));

        assert_eq!(config.audience(), ["/v1".to_string(), "/v2".to_string()]);
        assert_eq!(config.touch_queue_size(), 1);
        assert_eq!(config.refresh_window(), Duration::days(1));
        assert_eq!(config.access_ttl(), Duration::minutes(15));

        let config = SessionConfig::new().with_audience(Vec::<String>::new());
        assert_eq!(config.audience(), ["/v1".to_string()]);
    }
}
