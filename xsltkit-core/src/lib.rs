//! xsltkit-core: XML/HTML parsing and XSLT for a single-threaded caller
//!
//! This library provides:
//! - Owned native handles with managed shells that release exactly once
//! - Operations as units of work (map arguments, execute, extract result)
//! - Sync or async dispatch, with callbacks delivered on the calling thread
//! - XML and recovering HTML parsers, an XSLT 1.0 compiler and interpreter

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod markup;
pub mod ops;
pub mod pool;
pub mod task;
pub mod value;
pub mod xslt;

pub use config::Config;
pub use dispatch::Runtime;
pub use error::{Error, ErrorKind, FatalError, Format};
pub use handle::{
    print_handle_stats, DocumentKind, DocumentShell, HandleId, Owned, ResourceKind, Shell,
    StylesheetKind, StylesheetShell, WeakShell,
};
pub use markup::XmlDocument;
pub use ops::parse::Source;
pub use ops::transform::ParamList;
pub use ops::OperationKind;
pub use task::{Operation, TaskId, TaskState};
pub use value::{Callback, Value};
pub use xslt::{OutputMethod, Stylesheet};
