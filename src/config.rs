use std::time::Duration;

/// Timing knobs of the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed backoff between attempts to reach the peripheral service
    pub reconnect_period: Duration,
    /// Flip period of the blink shown for an identify request
    pub identify_period: Duration,
    /// How long an identify blink runs before it is stopped
    pub identify_window: Duration,
    /// Flip period of the attention blink shown while pairing
    pub pairing_period: Duration,
    /// How often an idle connection is probed, `None` disables probing
    pub heartbeat_period: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reconnect_period: Duration::from_secs(1),
            identify_period: Duration::from_millis(500),
            identify_window: Duration::from_secs(2),
            pairing_period: Duration::from_millis(500),
            heartbeat_period: Some(Duration::from_secs(5)),
        }
    }
}
