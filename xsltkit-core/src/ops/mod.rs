//! The exported operations

pub mod parse;
pub mod transform;

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Every operation callable through the runtime, by exported name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum OperationKind {
    ReadXmlString,
    ReadXmlFile,
    ReadHtmlString,
    ReadHtmlFile,
    ReadXsltString,
    ReadXsltFile,
    Transform,
}

impl OperationKind {
    /// Whether a trailing callable selects the async path
    pub fn supports_async(self) -> bool {
        !matches!(
            self,
            OperationKind::ReadXmlString | OperationKind::ReadHtmlString | OperationKind::ReadXsltString
        )
    }

    /// Number of positional arguments, not counting a callback
    pub fn arity(self) -> usize {
        match self {
            OperationKind::Transform => 3,
            _ => 1,
        }
    }
}
