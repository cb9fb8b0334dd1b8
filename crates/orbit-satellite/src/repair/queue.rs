// Copyright (c) Orbit Foundation
// SPDX-License-Identifier: Apache-2.0

//! The repair queue: FIFO with per-segment deduplication.

use std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
    time::SystemTime,
};

use orbit_core::SegmentPath;

/// One segment awaiting repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairJob {
    /// The path of the segment to repair.
    pub path: SegmentPath,
    /// How many times this job has already been attempted.
    pub attempt_count: u32,
    /// When the job was first enqueued.
    pub enqueued_at: SystemTime,
}

#[derive(Debug, Default)]
struct QueueInner {
    jobs: VecDeque<RepairJob>,
    // INV: `queued` holds exactly the paths in `jobs`; `in_flight` holds the paths
    // popped but not yet finished or requeued. A path is never in both.
    queued: HashSet<SegmentPath>,
    in_flight: HashSet<SegmentPath>,
}

/// A bounded FIFO queue of repair jobs with per-segment deduplication.
///
/// A segment that is already enqueued or in flight is never enqueued twice. When the
/// queue is full, new enqueues are dropped silently; the next checker scan
/// re-discovers them.
#[derive(Debug)]
pub struct RepairQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl RepairQueue {
    /// Creates a queue holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity,
        }
    }

    /// Enqueues a fresh job for `path`. Returns false if the segment is already
    /// tracked or the queue is full.
    pub fn push(&self, path: SegmentPath) -> bool {
        self.insert(RepairJob {
            path,
            attempt_count: 0,
            enqueued_at: SystemTime::now(),
        })
    }

    /// Returns a previously popped job to the queue for another attempt.
    ///
    /// Returns false if the queue is full; the job is dropped either way from the
    /// in-flight set.
    pub fn requeue(&self, mut job: RepairJob) -> bool {
        job.attempt_count += 1;
        let mut inner = self.inner.lock().expect("repair queue is never poisoned");
        inner.in_flight.remove(&job.path);
        Self::insert_locked(&mut inner, job, self.capacity)
    }

    /// Takes the oldest job, marking its segment as in flight.
    pub fn pop(&self) -> Option<RepairJob> {
        let mut inner = self.inner.lock().expect("repair queue is never poisoned");
        let job = inner.jobs.pop_front()?;
        inner.queued.remove(&job.path);
        inner.in_flight.insert(job.path.clone());
        Some(job)
    }

    /// Marks a popped job as done, terminally or successfully.
    pub fn finish(&self, path: &SegmentPath) {
        self.inner
            .lock()
            .expect("repair queue is never poisoned")
            .in_flight
            .remove(path);
    }

    /// The number of jobs waiting in the queue.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("repair queue is never poisoned")
            .jobs
            .len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, job: RepairJob) -> bool {
        let mut inner = self.inner.lock().expect("repair queue is never poisoned");
        Self::insert_locked(&mut inner, job, self.capacity)
    }

    fn insert_locked(inner: &mut QueueInner, job: RepairJob, capacity: usize) -> bool {
        if inner.queued.contains(&job.path) || inner.in_flight.contains(&job.path) {
            return false;
        }
        if inner.jobs.len() >= capacity {
            tracing::debug!(path = %job.path, "repair queue full, dropping enqueue");
            return false;
        }
        inner.queued.insert(job.path.clone());
        inner.jobs.push_back(job);
        true
    }
}
