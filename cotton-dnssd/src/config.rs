use serde::Deserialize;

/// Settings for a [`crate::PollDriver`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DriverConfig {
    /// Stop the whole driver, not just the service concerned, when
    /// any service fails
    ///
    /// Off by default. A driver usually carries several independent
    /// services, and with one driver per thread a quit driver cannot
    /// be restarted short of `shutdown` and `init`, which tears down
    /// the healthy services too. Turn this on to get the stop-the-world
    /// behaviour of a libavahi `simple_poll` loop, which quits on any
    /// fatal error.
    #[serde(default)]
    pub quit_on_failure: bool,
}
