//! Collector configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Collection algorithm selected for a cycle.
///
/// Only mark-and-sweep exists today. Names that do not parse fall back to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum GcPolicy {
    /// Stop-the-world parallel mark-and-sweep.
    #[default]
    MarkAndSweep,
}

impl GcPolicy {
    /// Parse `name`, falling back to [`GcPolicy::MarkAndSweep`] with a warning
    /// when it is not recognised.
    #[must_use]
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            #[cfg(feature = "tracing")]
            tracing::warn!(policy = name, "unknown gc policy, using mark-and-sweep");
            Self::MarkAndSweep
        })
    }

    /// Canonical name of the policy.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MarkAndSweep => "mark-and-sweep",
        }
    }
}

impl fmt::Display for GcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned by [`GcPolicy::from_str`] for an unrecognised name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown gc policy: {}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for GcPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark-and-sweep" | "mark_and_sweep" | "ms" => Ok(Self::MarkAndSweep),
            other => Err(UnknownPolicy(other.to_owned())),
        }
    }
}

/// Configuration for a [`Collector`](crate::Collector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Number of worker threads. Always at least 1.
    pub workers: usize,
    /// Prefix of worker thread names; workers are `"{name}-{index}"`.
    pub worker_name: String,
    /// Policy used when the caller does not pick one.
    pub policy: GcPolicy,
    /// When set, a mutator blocked at the safepoint logs a warning each time
    /// this much time passes without the quorum being reached.
    pub safepoint_timeout: Option<Duration>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            worker_name: "gc-worker".to_owned(),
            policy: GcPolicy::MarkAndSweep,
            safepoint_timeout: None,
        }
    }
}

impl GcConfig {
    /// Create a configuration with the given worker count.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Default::default()
        }
    }

    /// Set the worker count. Zero is clamped to 1.
    pub const fn set_workers(&mut self, workers: usize) {
        self.workers = if workers < 1 { 1 } else { workers };
    }

    /// Set the worker thread name prefix.
    pub fn set_worker_name(&mut self, name: impl Into<String>) {
        self.worker_name = name.into();
    }

    /// Set the default policy.
    pub const fn set_policy(&mut self, policy: GcPolicy) {
        self.policy = policy;
    }

    /// Set the safepoint hang diagnostic interval.
    pub const fn set_safepoint_timeout(&mut self, timeout: Option<Duration>) {
        self.safepoint_timeout = timeout;
    }
}
