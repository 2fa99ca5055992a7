use std::thread;
use std::time::Duration;

use netloom::{Error, Result, SessionConfig};

/// Default connect timeout of connectors.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default largest datagram read at once, a typical MTU rounded up to a power of 2.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 2048;

/// How a new session picks its reactor worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentStrategy {
    /// Workers in turn.
    #[default]
    RoundRobin,
    /// The worker currently owning the fewest sessions.
    LeastLoaded,
}

/// Settings of an acceptor or connector.
///
/// ```rust
/// use std::time::Duration;
/// use netloom::IdleStatus;
/// use netloom_bootstrap::{AssignmentStrategy, ServiceConfig};
///
/// let mut config = ServiceConfig::default();
/// config
///     .workers(2)
///     .thread_name_prefix("echo")
///     .strategy(AssignmentStrategy::LeastLoaded)
///     .nodelay(true);
/// config
///     .session_config_mut()
///     .idle_time(IdleStatus::BothIdle, Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    workers: usize,
    thread_name_prefix: String,
    pin_cores: bool,
    strategy: AssignmentStrategy,
    connect_timeout: Duration,
    session: SessionConfig,
    nodelay: bool,
    reuse_address: bool,
    close_on_unbind: bool,
    max_datagram_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            thread_name_prefix: "netloom-worker".to_owned(),
            pin_cores: false,
            strategy: AssignmentStrategy::RoundRobin,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session: SessionConfig::default(),
            nodelay: false,
            reuse_address: true,
            close_on_unbind: true,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Number of reactor worker threads.
    pub fn workers(&mut self, workers: usize) -> &mut Self {
        self.workers = workers;
        self
    }

    /// Worker threads are named `{prefix}-{index}`.
    pub fn thread_name_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Pins worker `i` to core `i % cores`.
    pub fn pin_cores(&mut self, pin: bool) -> &mut Self {
        self.pin_cores = pin;
        self
    }

    pub fn strategy(&mut self, strategy: AssignmentStrategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replaces the configuration copied into new sessions.
    pub fn session_config(&mut self, session: SessionConfig) -> &mut Self {
        self.session = session;
        self
    }

    pub fn session_config_mut(&mut self) -> &mut SessionConfig {
        &mut self.session
    }

    /// Sets `TCP_NODELAY` on every stream.
    pub fn nodelay(&mut self, nodelay: bool) -> &mut Self {
        self.nodelay = nodelay;
        self
    }

    /// Sets `SO_REUSEADDR` on listening sockets.
    pub fn reuse_address(&mut self, reuse: bool) -> &mut Self {
        self.reuse_address = reuse;
        self
    }

    /// Closes the sessions of a listener when it is unbound.
    pub fn close_on_unbind(&mut self, close: bool) -> &mut Self {
        self.close_on_unbind = close;
        self
    }

    pub fn max_datagram_size(&mut self, size: usize) -> &mut Self {
        self.max_datagram_size = size;
        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers
    }

    pub fn get_thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    pub fn get_pin_cores(&self) -> bool {
        self.pin_cores
    }

    pub fn get_strategy(&self) -> AssignmentStrategy {
        self.strategy
    }

    pub fn get_connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn get_session_config(&self) -> &SessionConfig {
        &self.session
    }

    pub fn get_nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn get_reuse_address(&self) -> bool {
        self.reuse_address
    }

    pub fn get_close_on_unbind(&self) -> bool {
        self.close_on_unbind
    }

    pub fn get_max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("at least one worker is required".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig("connect timeout must be positive".into()));
        }
        if self.max_datagram_size == 0 {
            return Err(Error::InvalidConfig("max datagram size must be positive".into()));
        }
        self.session.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.get_workers() >= 1);
        assert_eq!(config.get_strategy(), AssignmentStrategy::RoundRobin);
        assert_eq!(config.get_connect_timeout(), Duration::from_secs(60));
        assert_eq!(config.get_max_datagram_size(), 2048);
        assert!(config.get_close_on_unbind());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = ServiceConfig::default();
        config.workers(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
