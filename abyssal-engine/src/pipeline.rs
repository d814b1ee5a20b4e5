//! Tile job scheduling: queueing, priorities, dispatch gating,
//! cancellation and the render/error lifecycle.
//!
//! The pipeline owns no threads; the coordinator drains worker
//! responses and feeds them back here. Visible jobs always scan ahead
//! of prefetch jobs, but a dispatched job is never preempted.

use crate::cancellation::CancelToken;
use crate::messages::JobPriority;
use abyssal_core::{Tier, TileKey};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug)]
pub struct QueuedJob {
    pub key: TileKey,
    pub tier: Tier,
    pub priority: JobPriority,
    seq: u64,
}

#[derive(Clone, Debug)]
pub struct InFlightJob {
    pub key: TileKey,
    pub tier: Tier,
    pub priority: JobPriority,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct TilePipeline {
    queue: Vec<QueuedJob>,
    awaiting_l3: HashSet<TileKey>,
    rendering: HashMap<u64, InFlightJob>,
    retried: HashSet<TileKey>,
    gave_up: HashSet<TileKey>,
    next_job_id: u64,
    next_seq: u64,
    max_concurrent: usize,
}

impl TilePipeline {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            queue: Vec::new(),
            awaiting_l3: HashSet::new(),
            rendering: HashMap::new(),
            retried: HashSet::new(),
            gave_up: HashSet::new(),
            next_job_id: 0,
            next_seq: 0,
            max_concurrent,
        }
    }

    /// Queue a tile for rendering. Deduplicates against queued and
    /// in-flight work; a visible request upgrades a queued prefetch.
    /// `awaiting_l3` holds dispatch until the store answers.
    pub fn enqueue(
        &mut self,
        key: TileKey,
        tier: Tier,
        priority: JobPriority,
        awaiting_l3: bool,
    ) -> bool {
        if self.rendering.values().any(|j| j.key == key) {
            return false;
        }
        if let Some(existing) = self.queue.iter_mut().find(|j| j.key == key) {
            if priority < existing.priority {
                existing.priority = priority;
            }
            return false;
        }
        if awaiting_l3 {
            self.awaiting_l3.insert(key);
        }
        self.gave_up.remove(&key);
        self.queue.push(QueuedJob {
            key,
            tier,
            priority,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// The store answered (hit or miss); the key may dispatch now.
    pub fn mark_l3_resolved(&mut self, key: &TileKey) {
        self.awaiting_l3.remove(key);
    }

    pub fn is_awaiting_l3(&self, key: &TileKey) -> bool {
        self.awaiting_l3.contains(key)
    }

    /// An L3 hit satisfied the tile; drop its queued job.
    pub fn remove_pending(&mut self, key: &TileKey) -> bool {
        let before = self.queue.len();
        self.queue.retain(|j| j.key != *key);
        self.queue.len() != before
    }

    /// Drop queued jobs that no longer matter (viewport moved on).
    /// Prefetch entries survive; their tiles still cache.
    pub fn retain_wanted(&mut self, wanted: &HashSet<TileKey>) {
        self.queue
            .retain(|j| j.priority == JobPriority::Prefetch || wanted.contains(&j.key));
    }

    /// Direction reversal: remove still-pending prefetch jobs. In-flight
    /// prefetch jobs finish and cache.
    pub fn cancel_pending_prefetch(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(|j| j.priority != JobPriority::Prefetch);
        before - self.queue.len()
    }

    /// Deliver a cancel signal to an in-flight job; the worker aborts
    /// at its next row boundary.
    pub fn cancel_in_flight(&mut self, key: &TileKey) {
        for job in self.rendering.values() {
            if job.key == *key {
                job.cancel.cancel();
            }
        }
    }

    pub fn can_dispatch(&self) -> bool {
        self.rendering.len() < self.max_concurrent
    }

    /// Pop the next dispatchable job in (priority, age) scan order.
    /// Orbit-consuming jobs stay queued until the orbit exists; jobs
    /// with an outstanding L3 lookup stay queued until it resolves.
    pub fn next_job(&mut self, orbit_available: bool) -> Option<(u64, QueuedJob, CancelToken)> {
        if !self.can_dispatch() {
            return None;
        }
        let mut best: Option<usize> = None;
        for (i, job) in self.queue.iter().enumerate() {
            if self.awaiting_l3.contains(&job.key) {
                continue;
            }
            if job.tier.needs_orbit() && !orbit_available {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let cur = &self.queue[b];
                    (job.priority, job.seq) < (cur.priority, cur.seq)
                }
            };
            if better {
                best = Some(i);
            }
        }
        let idx = best?;
        let job = self.queue.remove(idx);
        let cancel = CancelToken::new();
        self.next_job_id += 1;
        let job_id = self.next_job_id;
        self.rendering.insert(
            job_id,
            InFlightJob {
                key: job.key,
                tier: job.tier,
                priority: job.priority,
                cancel: cancel.clone(),
            },
        );
        Some((job_id, job, cancel))
    }

    pub fn complete(&mut self, job_id: u64) -> Option<InFlightJob> {
        let job = self.rendering.remove(&job_id);
        if let Some(j) = &job {
            self.retried.remove(&j.key);
        }
        job
    }

    pub fn cancelled(&mut self, job_id: u64) -> Option<InFlightJob> {
        self.rendering.remove(&job_id)
    }

    /// A worker reported an error. The tile re-enqueues once at its old
    /// priority; a second failure gives up for good.
    pub fn failed(&mut self, job_id: u64) -> Option<(InFlightJob, bool)> {
        let job = self.rendering.remove(&job_id)?;
        let requeue = self.retried.insert(job.key);
        if requeue {
            self.queue.push(QueuedJob {
                key: job.key,
                tier: job.tier,
                priority: job.priority,
                seq: self.next_seq,
            });
            self.next_seq += 1;
        } else {
            self.gave_up.insert(job.key);
        }
        Some((job, requeue))
    }

    pub fn gave_up_on(&self, key: &TileKey) -> bool {
        self.gave_up.contains(key)
    }

    /// The reference orbit is conclusively unavailable: give up on every
    /// queued job that would consume it. Returns the failed keys.
    pub fn fail_orbit_jobs(&mut self) -> Vec<TileKey> {
        let mut failed = Vec::new();
        self.queue.retain(|job| {
            if job.tier.needs_orbit() {
                failed.push(job.key);
                false
            } else {
                true
            }
        });
        for key in &failed {
            self.gave_up.insert(*key);
        }
        failed
    }

    /// Queued or in-flight work at visible priority.
    pub fn has_visible_work(&self) -> bool {
        self.queue.iter().any(|j| j.priority == JobPriority::Visible)
            || self
                .rendering
                .values()
                .any(|j| j.priority == JobPriority::Visible)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_prefetch_len(&self) -> usize {
        self.queue
            .iter()
            .filter(|j| j.priority == JobPriority::Prefetch)
            .count()
    }

    pub fn rendering_len(&self) -> usize {
        self.rendering.len()
    }

    pub fn error_len(&self) -> usize {
        self.gave_up.len()
    }

    pub fn is_queued(&self, key: &TileKey) -> bool {
        self.queue.iter().any(|j| j.key == *key)
    }

    pub fn is_rendering(&self, key: &TileKey) -> bool {
        self.rendering.values().any(|j| j.key == *key)
    }
}
