use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::apc::{self, CallBody, Frame, FromWorker, Outcome, RemoteError, ToWorker};
use crate::core::{CallId, Payload, SharedRegion};
use crate::error::ProcedureError;
use crate::scheduler::{ProcedureContext, ProcedureTable, WorkerConfig};

/// Observable state of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    /// Running the call with this id.
    Busy(CallId),
    /// The thread is gone, the slot never receives work again.
    Terminated,
}

/// Coordinator-side handle of one worker thread.
pub(crate) struct WorkerHandle {
    pub(crate) slot: usize,
    pub(crate) status: WorkerStatus,
    /// Calls assigned to this worker and not yet dispatched, oldest first.
    pub(crate) queue: VecDeque<CallId>,
    sender: Option<Sender<ToWorker>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        slot: usize,
        name: String,
        procedures: Arc<ProcedureTable>,
        events: Sender<FromWorker>,
    ) -> std::io::Result<Self> {
        let (sender, inbox) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(slot, inbox, events, procedures))?;

        Ok(Self {
            slot,
            status: WorkerStatus::Idle,
            queue: VecDeque::new(),
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.status != WorkerStatus::Terminated
    }

    /// Calls assigned to this worker, queued or running.
    pub(crate) fn load(&self) -> usize {
        self.queue.len() + matches!(self.status, WorkerStatus::Busy(_)) as usize
    }

    /// Hands a message to the worker, giving it back if the thread is gone.
    pub(crate) fn send(&self, message: ToWorker) -> Result<(), ToWorker> {
        match &self.sender {
            Some(sender) => sender.send(message).map_err(|error| error.into_inner()),
            None => Err(message),
        }
    }

    /// Closes the inbox, the thread exits once it drains what is already there.
    pub(crate) fn disconnect(&mut self) {
        self.sender = None;
    }

    pub(crate) fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::debug!("worker {} exited by panicking", self.slot);
            }
        }
    }
}

/// Reports the death of a worker thread if it unwinds.
struct TerminationGuard {
    slot: usize,
    events: Sender<FromWorker>,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self.events.send(FromWorker::Terminated { slot: self.slot });
        }
    }
}

struct Worker {
    slot: usize,
    region: Option<SharedRegion>,
    config: WorkerConfig,
    procedures: Arc<ProcedureTable>,
}

fn run_worker(
    slot: usize,
    inbox: Receiver<ToWorker>,
    events: Sender<FromWorker>,
    procedures: Arc<ProcedureTable>,
) {
    let _guard = TerminationGuard {
        slot,
        events: events.clone(),
    };

    let mut worker = Worker {
        slot,
        region: None,
        config: WorkerConfig::default(),
        procedures,
    };

    tracing::debug!("worker {} started", slot);

    for message in inbox.iter() {
        match message {
            ToWorker::Init(region) => worker.region = Some(region),
            ToWorker::Config(frame) => match apc::decode_config(&frame) {
                Ok(config) => worker.config = config,
                Err(e) => tracing::warn!("worker {} ignored configuration: {}", slot, e),
            },
            ToWorker::Call(frame) => {
                let frame = worker.handle(&frame);
                if events.send(FromWorker::Result { slot, frame }).is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("worker {} stopped", slot);
}

impl Worker {
    fn handle(&self, frame: &[u8]) -> Frame {
        let (call_id, body) = match apc::decode_call(frame) {
            Ok(call) => call,
            Err(error) => {
                let call_id = apc::peek_call_id(frame).unwrap_or(CallId::new(0));
                return apc::encode_result(call_id, &Outcome::Err(RemoteError::Message(error)));
            }
        };

        let outcome = match self.invoke(body) {
            Ok(payload) => Outcome::Ok(payload),
            Err(error) => Outcome::Err(RemoteError::Procedure(error)),
        };

        apc::encode_result(call_id, &outcome)
    }

    fn invoke(&self, body: CallBody) -> Result<Payload, ProcedureError> {
        let procedure = self
            .procedures
            .get(&body.procedure)
            .ok_or_else(|| ProcedureError::UnknownProcedure(body.procedure.clone()))?;

        let context = ProcedureContext {
            slot: self.slot,
            region: self.region.as_ref(),
            config: &self.config,
        };

        if !self.config.catch_panics {
            return procedure.call(&context, body.payload);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| procedure.call(&context, body.payload))) {
            Ok(result) => result,
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    String::from("unknown payload")
                };
                Err(ProcedureError::Panicked(message))
            }
        }
    }
}
