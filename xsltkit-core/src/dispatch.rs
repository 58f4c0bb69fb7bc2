//! Sync/async dispatch and completion delivery
//!
//! A [`Runtime`] belongs to the calling thread. `call` runs an operation
//! inline, or, when the operation supports it and the last argument is a
//! callback, maps the arguments, parks the callback in a pending table and
//! submits `execute` to the worker pool. Workers send completions back over
//! a channel; the calling thread drains it with [`Runtime::run_until_idle`]
//! or [`Runtime::poll`] and invokes each callback exactly once.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{panic_message, Error, FatalError};
use crate::ops::parse::{
    READ_HTML_FILE, READ_HTML_STRING, READ_XML_FILE, READ_XML_STRING, READ_XSLT_FILE,
    READ_XSLT_STRING,
};
use crate::ops::transform::TRANSFORM;
use crate::ops::OperationKind;
use crate::pool;
use crate::task::{trace_state, Operation, TaskId, TaskState};
use crate::value::{Callback, Value};

/// Result of `execute`, turned into a [`Value`] on the calling thread
type Outcome = Box<dyn FnOnce() -> Result<Value, Error> + Send>;

struct Completion {
    id: TaskId,
    outcome: Outcome,
}

struct Pending {
    operation: &'static str,
    callback: Callback,
}

type FatalHandler = Box<dyn FnMut(FatalError)>;

/// Calling-thread state: pending callbacks and the completion channel
pub struct Runtime {
    pending: HashMap<TaskId, Pending>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    fatal_handler: Option<FatalHandler>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Runtime {
            pending: HashMap::new(),
            sender,
            receiver,
            fatal_handler: None,
        }
    }

    /// Receive callback failures instead of having them returned from the
    /// event loop
    pub fn set_fatal_handler(&mut self, handler: impl FnMut(FatalError) + 'static) {
        self.fatal_handler = Some(Box::new(handler));
    }

    /// Number of async tasks whose callback has not run yet
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Call an operation by its exported name
    pub fn call_by_name(&mut self, name: &str, args: &[Value]) -> Result<Value, Error> {
        let kind: OperationKind = name
            .parse()
            .map_err(|_| Error::argument(format!("Unknown operation \"{}\"", name)))?;
        self.call(kind, args)
    }

    /// Run an operation
    ///
    /// Returns the result for a sync call, or `Value::Undefined` once an
    /// async call has been submitted. Argument errors are always returned
    /// here, before anything is submitted.
    pub fn call(&mut self, kind: OperationKind, args: &[Value]) -> Result<Value, Error> {
        match kind {
            OperationKind::ReadXmlString => self.dispatch(&READ_XML_STRING, args),
            OperationKind::ReadXmlFile => self.dispatch(&READ_XML_FILE, args),
            OperationKind::ReadHtmlString => self.dispatch(&READ_HTML_STRING, args),
            OperationKind::ReadHtmlFile => self.dispatch(&READ_HTML_FILE, args),
            OperationKind::ReadXsltString => self.dispatch(&READ_XSLT_STRING, args),
            OperationKind::ReadXsltFile => self.dispatch(&READ_XSLT_FILE, args),
            OperationKind::Transform => self.dispatch(&TRANSFORM, args),
        }
    }

    fn dispatch<I, O>(&mut self, op: &'static Operation<I, O>, args: &[Value]) -> Result<Value, Error>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        match args.split_last() {
            Some((Value::Callback(callback), rest)) if op.kind.supports_async() => {
                self.submit(op, rest, callback.clone())
            }
            _ => run_sync(op, args),
        }
    }

    fn submit<I, O>(
        &mut self,
        op: &'static Operation<I, O>,
        args: &[Value],
        callback: Callback,
    ) -> Result<Value, Error>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let id = TaskId::next();
        let name = op.name();
        trace_state(id, name, TaskState::Created);

        let input = (op.map_arguments)(args)?;
        trace_state(id, name, TaskState::ArgumentsMapped);

        self.pending.insert(id, Pending { operation: name, callback });
        let sender = self.sender.clone();
        tracing::debug!(task = %id, operation = name, "submitting to worker pool");
        trace_state(id, name, TaskState::Queued);

        pool::spawn(move || {
            let result = execute_caught(op, input);
            trace_state(id, name, TaskState::Executed);
            let extract = op.extract_result;
            let outcome: Outcome = Box::new(move || result.map(extract));
            if sender.send(Completion { id, outcome }).is_err() {
                tracing::debug!(task = %id, operation = name, "runtime is gone, discarding result");
            }
        });
        Ok(Value::Undefined)
    }

    /// Block until every pending callback has run
    pub fn run_until_idle(&mut self) -> Result<(), FatalError> {
        while !self.pending.is_empty() {
            // the runtime holds a sender, so this only fails if it is dropped
            let Ok(completion) = self.receiver.recv() else {
                break;
            };
            self.deliver(completion)?;
        }
        Ok(())
    }

    /// Deliver the completions that have already arrived, without blocking
    ///
    /// Returns the number of callbacks run.
    pub fn poll(&mut self) -> Result<usize, FatalError> {
        let mut delivered = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.deliver(completion)? {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn deliver(&mut self, completion: Completion) -> Result<bool, FatalError> {
        let Completion { id, outcome } = completion;
        let Some(pending) = self.pending.remove(&id) else {
            tracing::warn!(task = %id, "completion for unknown task dropped");
            return Ok(false);
        };
        let operation = pending.operation;
        trace_state(id, operation, TaskState::CallbackScheduled);

        let (error, result) = match outcome() {
            Ok(value) => (None, Some(value)),
            Err(error) => (Some(error), None),
        };
        let callback = pending.callback;
        let invoked = catch_unwind(AssertUnwindSafe(|| callback.invoke(self, error, result)));
        drop(callback);
        trace_state(id, operation, TaskState::ResultDelivered);

        match invoked {
            Ok(Ok(())) => Ok(true),
            Ok(Err(error)) => self.fatal(FatalError::Callback { operation, error }).map(|_| true),
            Err(payload) => self
                .fatal(FatalError::CallbackPanicked {
                    operation,
                    message: panic_message(payload.as_ref()),
                })
                .map(|_| true),
        }
    }

    fn fatal(&mut self, error: FatalError) -> Result<(), FatalError> {
        match self.fatal_handler.as_mut() {
            Some(handler) => {
                handler(error);
                Ok(())
            }
            None => {
                tracing::error!(operation = error.operation(), "{}", error);
                Err(error)
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(
                pending = self.pending.len(),
                "runtime dropped with tasks in flight; their results will be discarded"
            );
        }
    }
}

fn run_sync<I, O>(op: &'static Operation<I, O>, args: &[Value]) -> Result<Value, Error> {
    let id = TaskId::next();
    let name = op.name();
    trace_state(id, name, TaskState::Created);
    let input = (op.map_arguments)(args)?;
    trace_state(id, name, TaskState::ArgumentsMapped);
    let output = execute_caught(op, input)?;
    trace_state(id, name, TaskState::Executed);
    let value = (op.extract_result)(output);
    trace_state(id, name, TaskState::ResultDelivered);
    Ok(value)
}

/// `execute`, with a panic turned into an error
fn execute_caught<I, O>(op: &'static Operation<I, O>, input: I) -> Result<O, Error> {
    let execute = op.execute;
    catch_unwind(AssertUnwindSafe(move || execute(input))).unwrap_or_else(|payload| {
        Err(Error::Panicked {
            operation: op.name(),
            message: panic_message(payload.as_ref()),
        })
    })
}
