use mxu_common::timing::{
    DEFAULT_FLAG_BUDGET, DEFAULT_MAX_WAIT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STEP_TIMEOUT_MS,
    RESET_HOLD_UNITS, RESULT_PULSE_UNITS,
};
use std::time::Duration;

/// Bounds applied to one offload request.
///
/// Serial budgets are in clock units, batch budgets in wall-clock time. The
/// defaults mirror the reference simulation bench: 200 000 units per flag,
/// a two-unit result trigger pulse and a 100 ms artifact poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadConfig {
    /// Maximum clock units polled for each handshake flag.
    pub flag_budget: u32,
    /// Maximum clock units polled across all handshakes of one request.
    /// `None` leaves only the per-flag bound.
    pub request_budget: Option<u64>,
    /// Units the result-transmit trigger is held high.
    pub result_pulse_units: u32,
    /// Units the reset line is held low.
    pub reset_hold_units: u32,
    /// Maximum run time of the batch external step. A child process still
    /// running at the deadline is killed.
    pub step_timeout: Duration,
    /// Interval between result-artifact existence checks.
    pub poll_interval: Duration,
    /// Total time allowed for the result artifact to appear.
    pub max_wait: Duration,
    /// Leave request and result artifacts on disk after the request.
    pub keep_artifacts: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            flag_budget: DEFAULT_FLAG_BUDGET,
            request_budget: None,
            result_pulse_units: RESULT_PULSE_UNITS,
            reset_hold_units: RESET_HOLD_UNITS,
            step_timeout: Duration::from_millis(DEFAULT_STEP_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            keep_artifacts: false,
        }
    }
}

impl OffloadConfig {
    /// Sets the clock units polled for each handshake flag.
    ///
    /// # Arguments
    ///
    /// * `units` - Poll iterations allowed per flag; zero fails every
    ///   handshake without clocking
    pub fn with_flag_budget(mut self, units: u32) -> Self {
        self.flag_budget = units;
        self
    }

    /// Caps the clock units polled across all handshakes of one request.
    /// Each handshake gets the smaller of its flag budget and what is left.
    pub fn with_request_budget(mut self, units: u64) -> Self {
        self.request_budget = Some(units);
        self
    }

    /// Sets the result-transmit trigger width, at least one unit.
    pub fn with_result_pulse(mut self, units: u32) -> Self {
        self.result_pulse_units = units.max(1);
        self
    }

    /// Sets how long reset is held low, at least one unit.
    pub fn with_reset_hold(mut self, units: u32) -> Self {
        self.reset_hold_units = units.max(1);
        self
    }

    /// Bounds the run time of the batch external step.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Sets the interval between result-artifact checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds the total wait for the result artifact after the external
    /// step returns.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Keeps both artifacts on disk after the request when `keep` is set.
    pub fn with_keep_artifacts(mut self, keep: bool) -> Self {
        self.keep_artifacts = keep;
        self
    }
}
