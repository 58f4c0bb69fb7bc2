//! Values exchanged with the calling thread
//!
//! `Value` is `!Send`: callbacks are reference counted with `Rc`, so the
//! compiler keeps every managed value on the thread that owns the
//! [`Runtime`](crate::dispatch::Runtime). Only task-owned inputs and outputs
//! cross to the worker pool.

use std::fmt;
use std::rc::Rc;

use crate::dispatch::Runtime;
use crate::error::Error;
use crate::handle::{DocumentShell, StylesheetShell};

type CallbackFn = dyn Fn(&mut Runtime, Option<Error>, Option<Value>) -> anyhow::Result<()>;

/// A completion callback, invoked as `(error, result)`
#[derive(Clone)]
pub struct Callback(Rc<CallbackFn>);

impl Callback {
    pub fn new(
        f: impl Fn(&mut Runtime, Option<Error>, Option<Value>) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Callback(Rc::new(f))
    }

    pub(crate) fn invoke(
        &self,
        runtime: &mut Runtime,
        error: Option<Error>,
        result: Option<Value>,
    ) -> anyhow::Result<()> {
        (self.0)(runtime, error, result)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Document(DocumentShell),
    Stylesheet(StylesheetShell),
    Callback(Callback),
}

impl Value {
    pub fn callback(
        f: impl Fn(&mut Runtime, Option<Error>, Option<Value>) -> anyhow::Result<()> + 'static,
    ) -> Self {
        Value::Callback(Callback::new(f))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Callback(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Name used in argument errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
            Value::Stylesheet(_) => "stylesheet",
            Value::Callback(_) => "function",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentShell> {
        match self {
            Value::Document(shell) => Some(shell),
            _ => None,
        }
    }

    pub fn as_stylesheet(&self) -> Option<&StylesheetShell> {
        match self {
            Value::Stylesheet(shell) => Some(shell),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<DocumentShell> {
        match self {
            Value::Document(shell) => Some(shell),
            _ => None,
        }
    }

    pub fn into_stylesheet(self) -> Option<StylesheetShell> {
        match self {
            Value::Stylesheet(shell) => Some(shell),
            _ => None,
        }
    }

    /// Text form of a scalar, the way a transform parameter is stringified
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<DocumentShell> for Value {
    fn from(shell: DocumentShell) -> Self {
        Value::Document(shell)
    }
}

impl From<StylesheetShell> for Value {
    fn from(shell: StylesheetShell) -> Self {
        Value::Stylesheet(shell)
    }
}

impl From<Callback> for Value {
    fn from(callback: Callback) -> Self {
        Value::Callback(callback)
    }
}
