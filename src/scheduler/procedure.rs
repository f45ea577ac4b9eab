use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{Payload, SharedRegion};
use crate::error::ProcedureError;
use crate::scheduler::WorkerConfig;

/// Work that can be executed on a worker in response to a call.
///
/// A procedure receives the call payload and returns the payload delivered to
/// the coordinator. It runs on whichever worker the call was assigned to, so
/// it must not rely on thread-local state.
pub trait Procedure: Send + Sync + 'static {
    fn call(&self, context: &ProcedureContext<'_>, payload: Payload) -> Result<Payload, ProcedureError>;
}

/// Worker-side view available to a running procedure.
pub struct ProcedureContext<'a> {
    pub(crate) slot: usize,
    pub(crate) region: Option<&'a SharedRegion>,
    pub(crate) config: &'a WorkerConfig,
}

impl<'a> ProcedureContext<'a> {
    /// Slot index of the worker running this call.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn region(&self) -> Option<&'a SharedRegion> {
        self.region
    }

    pub fn config(&self) -> &'a WorkerConfig {
        self.config
    }

    /// Bytes of `payload`, read through the shared region when needed.
    pub fn bytes<'p>(&self, payload: &'p Payload) -> Result<Cow<'p, [u8]>, ProcedureError> {
        match (payload, self.region) {
            (Payload::Inline(bytes), _) => Ok(Cow::Borrowed(bytes)),
            (Payload::Shared(_), Some(region)) => Ok(payload.resolve(region)?),
            (Payload::Shared(slice), None) => Err(ProcedureError::InvalidInput(format!(
                "shared payload {slice:?} received before the shared region"
            ))),
        }
    }
}

struct FnProcedure<F>(F);

impl<F> Procedure for FnProcedure<F>
where
    F: Fn(&ProcedureContext<'_>, Payload) -> anyhow::Result<Payload> + Send + Sync + 'static,
{
    fn call(&self, context: &ProcedureContext<'_>, payload: Payload) -> Result<Payload, ProcedureError> {
        (self.0)(context, payload).map_err(|error| match error.downcast::<ProcedureError>() {
            Ok(error) => error,
            Err(error) => ProcedureError::Failed(format!("{error:#}")),
        })
    }
}

/// Named procedures shared by every worker of a scheduler.
#[derive(Clone, Default)]
pub struct ProcedureTable {
    procedures: HashMap<Cow<'static, str>, Arc<dyn Procedure>>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `procedure` under `name`, replacing an earlier registration.
    pub fn register<P: Procedure>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        procedure: P,
    ) -> &mut Self {
        self.procedures.insert(name.into(), Arc::new(procedure));
        self
    }

    /// Registers a closure. Errors are reported as [`ProcedureError::Failed`]
    /// with the whole error chain, unless the error already is a
    /// [`ProcedureError`].
    pub fn register_fn<F>(&mut self, name: impl Into<Cow<'static, str>>, callback: F) -> &mut Self
    where
        F: Fn(&ProcedureContext<'_>, Payload) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.register(name, FnProcedure(callback))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(AsRef::as_ref)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn Procedure>> {
        self.procedures.get(name)
    }
}

impl fmt::Debug for ProcedureTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}
