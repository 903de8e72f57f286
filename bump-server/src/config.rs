/// How often the background sweep marks overdue claims expired.
pub const EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL baked into fallback claim links, e.g. "https://irl.app".
    pub link_base: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("BUMP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("BUMP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let link_base = std::env::var("BUMP_LINK_BASE")
            .unwrap_or_else(|_| bump_core::link::DEFAULT_LINK_BASE.to_string());

        Self {
            host,
            port,
            link_base,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
