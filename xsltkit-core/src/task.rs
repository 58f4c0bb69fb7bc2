//! Units of work
//!
//! Every operation is an [`Operation`] record: three plain functions that
//! map caller arguments into task-owned input, do the blocking work, and turn
//! the native output back into a [`Value`]. Only `execute` may run on a
//! worker thread, which is why `I` and `O` must be `Send` and `Value` is not.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::ops::OperationKind;
use crate::value::Value;

pub type MapArgumentsFn<I> = fn(&[Value]) -> Result<I, Error>;
pub type ExecuteFn<I, O> = fn(I) -> Result<O, Error>;
pub type ExtractResultFn<O> = fn(O) -> Value;

/// An operation's three hooks
pub struct Operation<I, O> {
    pub kind: OperationKind,
    pub map_arguments: MapArgumentsFn<I>,
    pub execute: ExecuteFn<I, O>,
    pub extract_result: ExtractResultFn<O>,
}

impl<I, O> Operation<I, O> {
    pub fn name(&self) -> &'static str {
        self.kind.into()
    }

    /// Run all three hooks on the current thread
    pub fn run_inline(&self, args: &[Value]) -> Result<Value, Error> {
        let input = (self.map_arguments)(args)?;
        let output = (self.execute)(input)?;
        Ok((self.extract_result)(output))
    }
}

/// Lifecycle of one task, logged at trace level
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TaskState {
    Created,
    ArgumentsMapped,
    Queued,
    Executed,
    CallbackScheduled,
    ResultDelivered,
}

/// Process-unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

pub(crate) fn trace_state(id: TaskId, operation: &'static str, state: TaskState) {
    tracing::trace!(task = %id, operation, %state);
}

/// Fail unless at least `arity` positional arguments were supplied
pub fn check_arity(args: &[Value], arity: usize) -> Result<(), Error> {
    if args.len() < arity {
        return Err(Error::argument(format!(
            "Expected {} arguments, got {}",
            arity,
            args.len()
        )));
    }
    Ok(())
}

/// Copy a string argument into task-owned storage
pub fn string_argument(args: &[Value], index: usize, what: &str) -> Result<String, Error> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::argument(format!(
            "Argument {} ({}) must be a string, got {}",
            index + 1,
            what,
            other.type_name()
        ))),
        None => Err(Error::argument(format!("Missing argument {} ({})", index + 1, what))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arity() {
        assert!(check_arity(&[Value::from("a")], 1).is_ok());
        assert!(check_arity(&[Value::from("a"), Value::Null], 1).is_ok());
        let err = check_arity(&[], 1).unwrap_err();
        assert_eq!(err.to_string(), "Expected 1 arguments, got 0");
    }

    #[test]
    fn test_string_argument() {
        let args = [Value::from("file.xml"), Value::from(1.0)];
        assert_eq!(string_argument(&args, 0, "filename").unwrap(), "file.xml");
        let err = string_argument(&args, 1, "filename").unwrap_err();
        assert_eq!(err.to_string(), "Argument 2 (filename) must be a string, got number");
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("task-"));
    }
}
