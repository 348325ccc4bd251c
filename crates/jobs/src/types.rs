//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::{JobId, RequirementKind};

use crate::requirement::{Requirement, RequirementContext};

/// Attempt budget used when a job declares nothing else.
pub const DEFAULT_RETRY_COUNT: u32 = 100;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Delay curve between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10 * 60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            // Deterministic spread derived from the attempt number.
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// How long a job may keep retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBudget {
    /// At most this many `run()` invocations.
    Attempts(u32),
    /// Keep retrying until this much time has passed since the first attempt.
    Duration(Duration),
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::Attempts(DEFAULT_RETRY_COUNT)
    }
}

impl RetryBudget {
    /// Whether another attempt is allowed after `attempts` runs.
    pub fn allows(&self, attempts: u32, first_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            RetryBudget::Attempts(max) => attempts < *max,
            RetryBudget::Duration(window) => match first_attempt_at {
                Some(first) => now < first + to_chrono(*window),
                None => true,
            },
        }
    }

    /// Time left in a duration budget; `None` for attempt budgets.
    pub fn remaining(&self, first_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
        match (self, first_attempt_at) {
            (RetryBudget::Duration(window), Some(first)) => {
                let deadline = first + to_chrono(*window);
                Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
            }
            (RetryBudget::Duration(window), None) => Some(*window),
            (RetryBudget::Attempts(_), _) => None,
        }
    }
}

/// Immutable per-job configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobParameters {
    /// Serialization lane. Jobs without a group run in a lane of their own.
    pub group_id: Option<String>,
    pub requirements: Vec<Requirement>,
    pub retry: RetryBudget,
    pub backoff: BackoffPolicy,
    /// Drop a new enqueue while an equivalent job is pending or running.
    pub ignore_duplicates: bool,
}

impl JobParameters {
    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn requirements_met(&self, ctx: &dyn RequirementContext) -> bool {
        self.requirements.iter().all(|r| r.is_present(ctx))
    }

    pub fn mentions(&self, kind: RequirementKind) -> bool {
        self.requirements.iter().any(|r| r.mentions(kind))
    }

    /// Delay before the next attempt, clamped to what is left of a duration budget.
    pub fn next_delay(&self, attempt: u32, first_attempt_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let delay = self.backoff.delay_for_attempt(attempt);
        match self.retry.remaining(first_attempt_at, now) {
            Some(left) => delay.min(left),
            None => delay,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobParametersBuilder {
    params: JobParameters,
}

impl JobParametersBuilder {
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.params.group_id = Some(group_id.into());
        self
    }

    pub fn requirement(mut self, requirement: Requirement) -> Self {
        self.params.requirements.push(requirement);
        self
    }

    pub fn network(self) -> Self {
        self.requirement(Requirement::network())
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.params.retry = RetryBudget::Attempts(count);
        self
    }

    pub fn retry_duration(mut self, duration: Duration) -> Self {
        self.params.retry = RetryBudget::Duration(duration);
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.params.backoff = backoff;
        self
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.params.ignore_duplicates = true;
        self
    }

    pub fn build(self) -> JobParameters {
        self.params
    }
}

/// Externally visible state of a persisted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its lane, its requirements, or its first run
    Pending,
    /// Currently being executed
    Running,
    /// Failed at least once, waiting for the backoff to expire
    RetryScheduled,
}

/// Serialization lane a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneKey {
    Group(String),
    Solo(JobId),
}

impl std::fmt::Display for LaneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaneKey::Group(group) => f.write_str(group),
            LaneKey::Solo(id) => write!(f, "solo:{id}"),
        }
    }
}

/// Durable form of a job, owned by the scheduler for the job's whole life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Registry tag used to rebuild the job from `payload`.
    pub kind: String,
    pub parameters: JobParameters,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Number of `run()` invocations so far.
    pub attempt: u32,
    /// Global enqueue order.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_attempt_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set while the job sits blocked on requirements after its first attempt.
    #[serde(default)]
    pub blocked_since: Option<DateTime<Utc>>,
    /// Time spent blocked after the first attempt; extends a duration budget.
    #[serde(default)]
    pub blocked_ms: i64,
}

impl JobRecord {
    pub fn new(kind: impl Into<String>, parameters: JobParameters, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: kind.into(),
            parameters,
            payload,
            status: JobStatus::Pending,
            attempt: 0,
            sequence: 0,
            created_at: now,
            updated_at: now,
            first_attempt_at: None,
            next_run_at: None,
            last_error: None,
            blocked_since: None,
            blocked_ms: 0,
        }
    }

    pub fn lane(&self) -> LaneKey {
        match &self.parameters.group_id {
            Some(group) => LaneKey::Group(group.clone()),
            None => LaneKey::Solo(self.id),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Start of the retry window, pushed back by the time spent blocked.
    pub fn budget_start(&self) -> Option<DateTime<Utc>> {
        self.first_attempt_at.map(|first| {
            first
                .checked_add_signed(chrono::Duration::milliseconds(self.blocked_ms))
                .unwrap_or(first)
        })
    }

    pub(crate) fn pause_budget(&mut self, now: DateTime<Utc>) {
        if self.first_attempt_at.is_some() && self.blocked_since.is_none() {
            self.blocked_since = Some(now);
        }
    }

    pub(crate) fn resume_budget(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.blocked_since.take() {
            self.blocked_ms = self
                .blocked_ms
                .saturating_add((now - since).num_milliseconds().max(0));
        }
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500))
            .without_jitter();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = BackoffPolicy::linear(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn default_backoff_grows_across_first_attempts() {
        let policy = BackoffPolicy::default();
        let first = policy.delay_for_attempt(1);
        let second = policy.delay_for_attempt(2);
        let third = policy.delay_for_attempt(3);

        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn attempt_budget_counts_runs() {
        let budget = RetryBudget::Attempts(3);
        let now = Utc::now();

        assert!(budget.allows(2, Some(now), now));
        assert!(!budget.allows(3, Some(now), now));
    }

    #[test]
    fn duration_budget_measures_from_first_attempt() {
        let budget = RetryBudget::Duration(Duration::from_secs(60));
        let first = Utc::now();

        assert!(budget.allows(50, Some(first), first + chrono::Duration::seconds(59)));
        assert!(!budget.allows(1, Some(first), first + chrono::Duration::seconds(60)));
    }

    #[test]
    fn next_delay_never_exceeds_remaining_duration() {
        let params = JobParameters::builder()
            .retry_duration(Duration::from_secs(10))
            .backoff(BackoffPolicy::fixed(Duration::from_secs(60)))
            .build();
        let first = Utc::now();

        let delay = params.next_delay(1, Some(first), first + chrono::Duration::seconds(7));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn default_parameters_allow_one_hundred_runs() {
        let params = JobParameters::default();
        assert_eq!(params.retry, RetryBudget::Attempts(DEFAULT_RETRY_COUNT));
        assert!(params.group_id.is_none());
        assert!(!params.ignore_duplicates);
    }

    #[test]
    fn ungrouped_records_get_a_lane_of_their_own() {
        let a = JobRecord::new("k", JobParameters::default(), serde_json::json!({}));
        let b = JobRecord::new("k", JobParameters::default(), serde_json::json!({}));
        assert_ne!(a.lane(), b.lane());

        let grouped = JobRecord::new(
            "k",
            JobParameters::builder().group_id("G1").build(),
            serde_json::json!({}),
        );
        assert_eq!(grouped.lane(), LaneKey::Group("G1".into()));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn unjittered_exponential_is_monotone_and_capped(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..600_000,
            attempt in 1u32..80,
        ) {
            let policy = BackoffPolicy::exponential(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
            ).without_jitter();

            let here = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(here <= next);
            prop_assert!(next <= Duration::from_millis(cap_ms.max(base_ms)));
        }

        #[test]
        fn jitter_stays_within_its_band(attempt in 1u32..200) {
            let policy = BackoffPolicy::default();
            let raw = policy.clone().without_jitter().delay_for_attempt(attempt).as_millis() as f64;
            let jittered = policy.delay_for_attempt(attempt).as_millis() as f64;

            prop_assert!(jittered >= raw * (1.0 - policy.jitter) - 1.0);
            prop_assert!(jittered <= raw * (1.0 + policy.jitter) + 1.0);
        }
    }
}
