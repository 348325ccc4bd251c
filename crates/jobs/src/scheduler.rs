//! Lane scheduler: pure admission and ordering state.
//!
//! Every job belongs to a lane (its `group_id`, or a private lane when it has
//! none). Only the head of a lane is ever considered for execution, so a lane
//! runs strictly FIFO while distinct lanes proceed in parallel. A lane head is
//! in exactly one of:
//!
//! - `Delayed`: backing off until `next_run_at`
//! - `Blocked`: requirements unmet; woken by [`Scheduler::requirements_changed`]
//! - `Ready`: waiting for a worker
//! - `Running`: claimed by a worker
//!
//! Jobs behind the head are `Waiting`. A job that is retried keeps the head of
//! its lane, so later jobs in the lane never overtake it.
//!
//! The scheduler does no IO and takes the current time as an argument.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tracing::trace;

use courier_core::{JobId, RequirementKind};

use crate::requirement::RequirementContext;
use crate::types::{JobRecord, JobStatus, LaneKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Delayed,
    Blocked,
    Ready,
    Running,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Finish {
    /// Succeeded or canceled; the record leaves the scheduler.
    Done,
    /// Try again no earlier than `run_at`.
    Retry { run_at: DateTime<Utc>, error: String },
}

#[derive(Debug)]
struct Slot {
    record: JobRecord,
    lane: LaneKey,
    phase: Phase,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    slots: HashMap<JobId, Slot>,
    lanes: HashMap<LaneKey, VecDeque<JobId>>,
    ready: VecDeque<JobId>,
    delayed: BTreeSet<(DateTime<Utc>, u64, JobId)>,
    blocked: BTreeMap<u64, JobId>,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reserve the next enqueue sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    pub fn record(&self, id: JobId) -> Option<&JobRecord> {
        self.slots.get(&id).map(|s| &s.record)
    }

    pub fn phase(&self, id: JobId) -> Option<Phase> {
        self.slots.get(&id).map(|s| s.phase)
    }

    /// Records in enqueue order.
    pub fn records(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.slots.values().map(|s| s.record.clone()).collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    pub fn running_count(&self) -> usize {
        self.slots.values().filter(|s| s.phase == Phase::Running).count()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Whether an equivalent job (same kind, same group) is pending or running.
    pub fn has_equivalent(&self, kind: &str, group_id: Option<&str>) -> bool {
        self.slots.values().any(|s| {
            s.record.kind == kind && s.record.parameters.group_id.as_deref() == group_id
        })
    }

    /// Earliest backoff deadline, if any job is delayed.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.delayed.first().map(|(at, _, _)| *at)
    }

    /// Admit a persisted record into its lane.
    pub fn admit(&mut self, mut record: JobRecord, ctx: &dyn RequirementContext, now: DateTime<Utc>) -> Phase {
        if record.status == JobStatus::Running {
            record.status = JobStatus::Pending;
        }
        self.next_sequence = self.next_sequence.max(record.sequence);

        let id = record.id;
        let lane = record.lane();
        let queue = self.lanes.entry(lane.clone()).or_default();
        queue.push_back(id);
        let is_head = queue.len() == 1;

        self.slots.insert(
            id,
            Slot {
                record,
                lane,
                phase: Phase::Waiting,
            },
        );

        if is_head {
            self.activate(id, ctx, now);
        }
        self.slots.get(&id).map(|s| s.phase).unwrap_or(Phase::Waiting)
    }

    /// Re-admit records loaded from storage, preserving enqueue order and attempts.
    pub fn restore(&mut self, mut records: Vec<JobRecord>, ctx: &dyn RequirementContext, now: DateTime<Utc>) {
        records.sort_by_key(|r| r.sequence);
        for record in records {
            if self.slots.contains_key(&record.id) {
                continue;
            }
            self.admit(record, ctx, now);
        }
    }

    fn activate(&mut self, id: JobId, ctx: &dyn RequirementContext, now: DateTime<Utc>) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };

        if let Some(at) = slot.record.next_run_at.filter(|at| *at > now) {
            slot.phase = Phase::Delayed;
            self.delayed.insert((at, slot.record.sequence, id));
        } else if slot.record.parameters.requirements_met(ctx) {
            slot.record.resume_budget(now);
            slot.phase = Phase::Ready;
            self.ready.push_back(id);
        } else {
            slot.record.pause_budget(now);
            slot.phase = Phase::Blocked;
            self.blocked.insert(slot.record.sequence, id);
            trace!(job_id = %id, lane = %slot.lane, "job blocked on requirements");
        }
    }

    fn promote_due(&mut self, ctx: &dyn RequirementContext, now: DateTime<Utc>) {
        while let Some(&(at, seq, id)) = self.delayed.first() {
            if at > now {
                break;
            }
            self.delayed.remove(&(at, seq, id));
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.phase = Phase::Waiting;
                slot.record.next_run_at = None;
                self.activate(id, ctx, now);
            }
        }
    }

    /// Re-evaluate jobs blocked on a requirement mentioning `kind`.
    ///
    /// Returns how many became ready.
    pub fn requirements_changed(
        &mut self,
        kind: RequirementKind,
        ctx: &dyn RequirementContext,
        now: DateTime<Utc>,
    ) -> usize {
        let candidates: Vec<(u64, JobId)> = self
            .blocked
            .iter()
            .filter(|(_, id)| {
                self.slots
                    .get(id)
                    .is_some_and(|s| s.record.parameters.mentions(kind))
            })
            .map(|(seq, id)| (*seq, *id))
            .collect();

        let mut unblocked = 0;
        for (seq, id) in candidates {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            if slot.record.parameters.requirements_met(ctx) {
                self.blocked.remove(&seq);
                slot.record.resume_budget(now);
                slot.phase = Phase::Ready;
                self.ready.push_back(id);
                unblocked += 1;
            }
        }
        unblocked
    }

    /// Claim the next runnable job: bumps its attempt counter and marks it running.
    pub fn claim_next(&mut self, ctx: &dyn RequirementContext, now: DateTime<Utc>) -> Option<JobRecord> {
        self.promote_due(ctx, now);

        while let Some(id) = self.ready.pop_front() {
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };
            if slot.phase != Phase::Ready {
                continue;
            }

            // Conditions may have flipped since admission.
            if !slot.record.parameters.requirements_met(ctx) {
                slot.record.pause_budget(now);
                slot.phase = Phase::Blocked;
                self.blocked.insert(slot.record.sequence, id);
                continue;
            }

            slot.phase = Phase::Running;
            slot.record.status = JobStatus::Running;
            slot.record.attempt += 1;
            slot.record.first_attempt_at.get_or_insert(now);
            slot.record.next_run_at = None;
            slot.record.updated_at = now;
            return Some(slot.record.clone());
        }
        None
    }

    /// Replace the stored payload of a job (used before persisting a retry).
    pub fn set_payload(&mut self, id: JobId, payload: serde_json::Value) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.record.payload = payload;
        }
    }

    /// Settle a running job.
    ///
    /// `Done` releases the lane to its next entry and returns the removed
    /// record; `Retry` keeps the lane and returns the updated record.
    pub fn finish(
        &mut self,
        id: JobId,
        outcome: Finish,
        ctx: &dyn RequirementContext,
        now: DateTime<Utc>,
    ) -> Option<JobRecord> {
        match outcome {
            Finish::Done => {
                let slot = self.slots.remove(&id)?;
                self.ready.retain(|r| *r != id);
                self.blocked.remove(&slot.record.sequence);
                self.delayed.retain(|(_, _, d)| *d != id);

                let mut next_head = None;
                if let Some(queue) = self.lanes.get_mut(&slot.lane) {
                    queue.retain(|q| *q != id);
                    next_head = queue.front().copied();
                    if queue.is_empty() {
                        self.lanes.remove(&slot.lane);
                    }
                }
                if let Some(next) = next_head {
                    if self.slots.get(&next).is_some_and(|s| s.phase == Phase::Waiting) {
                        self.activate(next, ctx, now);
                    }
                }
                Some(slot.record)
            }
            Finish::Retry { run_at, error } => {
                let slot = self.slots.get_mut(&id)?;
                slot.record.status = JobStatus::RetryScheduled;
                slot.record.next_run_at = Some(run_at);
                slot.record.last_error = Some(error);
                slot.record.updated_at = now;
                slot.phase = Phase::Waiting;
                let record = slot.record.clone();
                self.activate(id, ctx, now);
                Some(record)
            }
        }
    }
}
