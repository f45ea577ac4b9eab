//! Cross-thread scheduler for asynchronous procedure calls.
//!
//! The coordinator owns a fixed pool of worker threads. [`Scheduler::submit`]
//! assigns a call to a worker and returns immediately; results are collected
//! later, without blocking, through [`Scheduler::poll_completions`].
//!
//! Each worker runs one call at a time. Calls assigned to the same worker run
//! in submission order, calls on different workers are not ordered.

mod config;
mod procedure;
mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::apc::{self, CallBody, Frame, FromWorker, ToWorker};
use crate::core::{CallId, Payload, SharedRegion};
use crate::error::{CallError, ScheduleError};

pub use config::{AssignmentPolicy, SchedulerConfig, WorkerConfig};
pub use procedure::{Procedure, ProcedureContext, ProcedureTable};
pub use worker::WorkerStatus;

use worker::WorkerHandle;

/// Final outcome of a call. Exactly one is produced per call that was neither
/// cancelled nor dropped at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub call_id: CallId,
    pub result: Result<Payload, CallError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Dispatched,
    /// Running, but the result will be discarded.
    Cancelled,
}

struct PendingCall {
    worker: usize,
    /// Present until the call is handed to its worker.
    frame: Option<Frame>,
    state: CallState,
}

pub struct Scheduler {
    workers: Vec<WorkerHandle>,
    pending: HashMap<CallId, PendingCall>,
    ready: VecDeque<Completion>,
    events: Receiver<FromWorker>,
    procedures: Arc<ProcedureTable>,
    region: SharedRegion,
    policy: AssignmentPolicy,
    last_call_id: u64,
    next_worker: usize,
    shut_down: bool,
}

impl Scheduler {
    /// Spawns the worker pool. Every worker receives the shared region and the
    /// initial worker configuration before any call.
    pub fn new(config: &SchedulerConfig, procedures: ProcedureTable) -> Result<Self, ScheduleError> {
        let (event_sender, events) = crossbeam_channel::unbounded();
        let config_frame = apc::encode_config(&config.worker)?;
        let procedures = Arc::new(procedures);

        let mut scheduler = Self {
            workers: Vec::with_capacity(config.workers),
            pending: HashMap::new(),
            ready: VecDeque::new(),
            events,
            procedures: procedures.clone(),
            region: SharedRegion::new(config.shared_blocks, config.shared_block_size),
            policy: config.assignment,
            last_call_id: 0,
            next_worker: 0,
            shut_down: false,
        };

        for slot in 0..config.workers {
            let name = format!("{}-{}", config.thread_name, slot);
            let worker = WorkerHandle::spawn(slot, name, procedures.clone(), event_sender.clone())
                .map_err(|source| ScheduleError::Spawn { slot, source })?;

            // a fresh thread can't have dropped its inbox yet
            let _ = worker.send(ToWorker::Init(scheduler.region.clone()));
            let _ = worker.send(ToWorker::Config(config_frame.clone()));
            scheduler.workers.push(worker);
        }

        tracing::info!("scheduler started with {} workers", config.workers);
        Ok(scheduler)
    }

    /// Assigns a call to a worker and returns its id without waiting for it.
    pub fn submit(&mut self, procedure: &str, payload: Payload) -> Result<CallId, ScheduleError> {
        if !self.procedures.contains(procedure) {
            return Err(ScheduleError::UnknownProcedure(procedure.to_string()));
        }

        let slot = self.assign().ok_or(ScheduleError::NoWorkersAvailable)?;

        let call_id = CallId::new(self.last_call_id + 1);
        let body = CallBody {
            procedure: procedure.to_string(),
            payload,
        };
        let frame = apc::encode_call(call_id, &body)?;
        self.last_call_id = call_id.get();

        self.pending.insert(
            call_id,
            PendingCall {
                worker: slot,
                frame: Some(frame),
                state: CallState::Queued,
            },
        );
        self.workers[slot].queue.push_back(call_id);
        tracing::debug!("call {} to '{}' queued on worker {}", call_id, procedure, slot);

        self.pump(slot);
        Ok(call_id)
    }

    /// Yields every completion available right now, never blocking.
    ///
    /// Completions are produced lazily: results arriving while the iterator is
    /// being consumed are picked up too, so draining it leaves nothing behind.
    pub fn poll_completions(&mut self) -> Completions<'_> {
        Completions { scheduler: self }
    }

    /// Cancels a call. A queued call is dropped before it reaches a worker, a
    /// running call finishes but its result is discarded. Either way no
    /// completion is produced. Returns `false` if the call is unknown or
    /// already finished.
    pub fn cancel(&mut self, call_id: CallId) -> bool {
        let Some(call) = self.pending.get_mut(&call_id) else {
            return false;
        };

        match call.state {
            CallState::Queued => {
                let slot = call.worker;
                self.pending.remove(&call_id);
                self.workers[slot].queue.retain(|queued| *queued != call_id);
                tracing::debug!("call {} cancelled before dispatch", call_id);
                true
            }
            CallState::Dispatched => {
                call.state = CallState::Cancelled;
                tracing::debug!("call {} cancelled while running", call_id);
                true
            }
            CallState::Cancelled => false,
        }
    }

    /// Sends a new configuration to every live worker. Each worker applies it
    /// before the next call it takes.
    pub fn configure(&mut self, config: &WorkerConfig) -> Result<(), ScheduleError> {
        let frame = apc::encode_config(config)?;

        for slot in 0..self.workers.len() {
            if !self.workers[slot].is_live() {
                continue;
            }
            if self.workers[slot].send(ToWorker::Config(frame.clone())).is_err() {
                self.lose_worker(slot);
            }
        }

        Ok(())
    }

    pub fn worker_status(&self, slot: usize) -> Option<WorkerStatus> {
        self.workers.get(slot).map(|worker| worker.status)
    }

    pub fn live_workers(&self) -> usize {
        self.workers.iter().filter(|worker| worker.is_live()).count()
    }

    /// Number of submitted calls that have not completed yet, cancelled
    /// calls still running included.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Stops the pool. Calls still queued complete with
    /// [`CallError::Shutdown`], running calls are allowed to finish. Returns
    /// every completion that was not polled yet.
    pub fn shutdown(mut self) -> Vec<Completion> {
        self.teardown()
    }

    fn teardown(&mut self) -> Vec<Completion> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;

        for worker in self.workers.iter_mut() {
            for call_id in worker.queue.drain(..) {
                if self.pending.remove(&call_id).is_some() {
                    self.ready.push_back(Completion {
                        call_id,
                        result: Err(CallError::Shutdown),
                    });
                }
            }
            worker.disconnect();
        }

        for worker in self.workers.iter_mut() {
            worker.join();
        }

        // every thread has exited, whatever is in the channel is final
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
        }

        let stranded: Vec<CallId> = self.pending.keys().copied().collect();
        for call_id in stranded {
            if let Some(call) = self.pending.get(&call_id) {
                let slot = call.worker;
                self.finish(call_id, Err(CallError::WorkerLost { slot }));
            }
        }

        tracing::info!("scheduler stopped");
        self.ready.drain(..).collect()
    }

    fn assign(&mut self) -> Option<usize> {
        if self.shut_down {
            return None;
        }

        match self.policy {
            AssignmentPolicy::LeastLoaded => self
                .workers
                .iter()
                .filter(|worker| worker.is_live())
                .min_by_key(|worker| (worker.load(), worker.slot))
                .map(|worker| worker.slot),
            AssignmentPolicy::RoundRobin => {
                let count = self.workers.len();
                for step in 0..count {
                    let slot = (self.next_worker + step) % count;
                    if self.workers[slot].is_live() {
                        self.next_worker = slot + 1;
                        return Some(slot);
                    }
                }
                None
            }
        }
    }

    /// Dispatches the next queued call if the worker is idle.
    fn pump(&mut self, slot: usize) {
        let worker = &mut self.workers[slot];
        if worker.status != WorkerStatus::Idle {
            return;
        }

        while let Some(call_id) = worker.queue.pop_front() {
            let Some(call) = self.pending.get_mut(&call_id) else {
                continue;
            };
            let Some(frame) = call.frame.take() else {
                continue;
            };

            match worker.send(ToWorker::Call(frame)) {
                Ok(()) => {
                    call.state = CallState::Dispatched;
                    worker.status = WorkerStatus::Busy(call_id);
                    tracing::trace!("call {} dispatched to worker {}", call_id, slot);
                }
                Err(message) => {
                    // the thread is gone, keep the call for reassignment
                    if let ToWorker::Call(frame) = message {
                        call.frame = Some(frame);
                    }
                    worker.queue.push_front(call_id);
                    self.lose_worker(slot);
                }
            }
            return;
        }
    }

    fn handle(&mut self, event: FromWorker) {
        match event {
            FromWorker::Result { slot, frame } => {
                let WorkerStatus::Busy(call_id) = self.workers[slot].status else {
                    tracing::warn!("worker {} sent a result with no call in flight", slot);
                    return;
                };

                self.workers[slot].status = WorkerStatus::Idle;
                let result = apc::decode_result(call_id, &frame);
                self.finish(call_id, result);
                self.pump(slot);
            }
            FromWorker::Terminated { slot } => self.lose_worker(slot),
        }
    }

    fn finish(&mut self, call_id: CallId, result: Result<Payload, CallError>) {
        match self.pending.remove(&call_id) {
            Some(PendingCall {
                state: CallState::Cancelled,
                ..
            }) => {
                tracing::debug!("discarding result of cancelled call {}", call_id);
            }
            Some(_) => {
                if let Err(e) = &result {
                    tracing::warn!("call {} failed: {}", call_id, e);
                }
                self.ready.push_back(Completion { call_id, result });
            }
            None => tracing::warn!("result for unknown call {}", call_id),
        }
    }

    /// Marks a worker as terminated. Its running call fails, its queued calls
    /// move to other live workers or fail when none is left.
    fn lose_worker(&mut self, slot: usize) {
        let worker = &mut self.workers[slot];
        if worker.status == WorkerStatus::Terminated {
            return;
        }

        let running = match worker.status {
            WorkerStatus::Busy(call_id) => Some(call_id),
            _ => None,
        };
        worker.status = WorkerStatus::Terminated;
        worker.disconnect();
        let orphans: Vec<CallId> = worker.queue.drain(..).collect();

        tracing::warn!(
            "worker {} terminated, reassigning {} queued calls",
            slot,
            orphans.len()
        );

        if let Some(call_id) = running {
            self.finish(call_id, Err(CallError::WorkerLost { slot }));
        }

        for call_id in orphans {
            if !self.pending.contains_key(&call_id) {
                continue;
            }

            match self.assign() {
                Some(target) => {
                    if let Some(call) = self.pending.get_mut(&call_id) {
                        call.worker = target;
                    }
                    self.workers[target].queue.push_back(call_id);
                    self.pump(target);
                }
                None => self.finish(call_id, Err(CallError::WorkerLost { slot })),
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let dropped = self.teardown();
        if !dropped.is_empty() {
            tracing::debug!("dropping {} undelivered completions", dropped.len());
        }
    }
}

/// Iterator returned by [`Scheduler::poll_completions`].
pub struct Completions<'a> {
    scheduler: &'a mut Scheduler,
}

impl Iterator for Completions<'_> {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        loop {
            if let Some(completion) = self.scheduler.ready.pop_front() {
                return Some(completion);
            }

            let event = self.scheduler.events.try_recv().ok()?;
            self.scheduler.handle(event);
        }
    }
}
