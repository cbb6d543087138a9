use std::time::Duration;

/// Tunables of the execution core.
#[derive(Debug, Clone)]
pub struct ClosureServiceConfig {
    /// Interval between two timeout sweeps
    pub maintenance_interval: Duration,

    /// Upper bound of the log buffer kept on an instance
    pub max_log_size_bytes: usize,

    /// Time-to-live of an instance record, counted from creation
    pub expiration_days: i64,

    /// Keep sandboxes around after a run settles
    pub keep_on_completion: bool,

    /// Extra attempts for tracker updates of FINISHED/FAILED outcomes
    pub tracker_retries: u32,

    /// Pause between two tracker attempts
    pub tracker_retry_delay: Duration,

    /// Request timeout for webhooks and external caller callbacks
    pub webhook_timeout: Duration,

    /// Delay before the last log fetch of a settled instance
    pub final_log_fetch_delay: Duration,

    /// Attempts for a read-validate-write cycle that loses an optimistic race
    pub write_retries: u32,
}

impl Default for ClosureServiceConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(5),
            max_log_size_bytes: 200 * 1024,
            expiration_days: 10,
            keep_on_completion: false,
            tracker_retries: 3,
            tracker_retry_delay: Duration::from_millis(300),
            webhook_timeout: Duration::from_secs(30),
            final_log_fetch_delay: Duration::from_secs(3),
            write_retries: 3,
        }
    }
}

impl ClosureServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout sweep interval
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the maximum stored log size
    pub fn max_log_size_bytes(mut self, size: usize) -> Self {
        self.max_log_size_bytes = size;
        self
    }

    /// Set the record TTL in days
    pub fn expiration_days(mut self, days: i64) -> Self {
        self.expiration_days = days;
        self
    }

    /// Keep or clean sandboxes after completion
    pub fn keep_on_completion(mut self, keep: bool) -> Self {
        self.keep_on_completion = keep;
        self
    }

    /// Set tracker retry count and delay
    pub fn tracker_retry(mut self, retries: u32, delay: Duration) -> Self {
        self.tracker_retries = retries;
        self.tracker_retry_delay = delay;
        self
    }

    /// Set the webhook request timeout
    pub fn webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    /// Set the delay of the final log fetch
    pub fn final_log_fetch_delay(mut self, delay: Duration) -> Self {
        self.final_log_fetch_delay = delay;
        self
    }

    /// Set the optimistic write retry budget
    pub fn write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Clamps values that would make the service misbehave.
    pub fn normalized(mut self) -> Self {
        self.maintenance_interval = self.maintenance_interval.max(Duration::from_millis(10));
        self.max_log_size_bytes = self.max_log_size_bytes.max(1);
        self.expiration_days = self.expiration_days.max(1);
        self.write_retries = self.write_retries.max(1);
        self
    }
}
