//! The transform operation
//!
//! Arguments are a stylesheet, a document and a flat array alternating
//! parameter names and values. The task holds shell clones of both handles,
//! so neither is released while the transform is pending.

use crate::error::Error;
use crate::handle::{DocumentShell, StylesheetShell};
use crate::ops::OperationKind;
use crate::task::{check_arity, Operation};
use crate::value::Value;
use crate::xslt;

/// Owned name/value pairs passed to a stylesheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamList {
    pairs: Vec<(String, String)>,
}

impl ParamList {
    /// Copy a flat `[name, value, name, value, ...]` array
    pub fn from_flat(items: &[Value]) -> Result<Self, Error> {
        if items.len() % 2 != 0 {
            return Err(Error::argument("Array contains an odd number of parameters"));
        }

        let mut pairs = Vec::new();
        pairs
            .try_reserve_exact(items.len() / 2)
            .map_err(|_| Error::Allocation)?;
        for pair in items.chunks_exact(2) {
            pairs.push((param_text(&pair[0])?, param_text(&pair[1])?));
        }
        Ok(ParamList { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

fn param_text(value: &Value) -> Result<String, Error> {
    let text = value.to_scalar_string().ok_or_else(|| {
        Error::argument(format!(
            "Parameters must be strings, numbers or booleans, got {}",
            value.type_name()
        ))
    })?;
    let mut owned = String::new();
    owned.try_reserve_exact(text.len()).map_err(|_| Error::Allocation)?;
    owned.push_str(&text);
    Ok(owned)
}

/// Task-owned transform input
#[derive(Debug)]
pub struct TransformInput {
    pub stylesheet: StylesheetShell,
    pub document: DocumentShell,
    pub params: ParamList,
}

fn map_arguments(args: &[Value]) -> Result<TransformInput, Error> {
    check_arity(args, OperationKind::Transform.arity())?;
    let stylesheet = args[0].as_stylesheet().cloned().ok_or_else(|| {
        Error::argument(format!(
            "First parameter must be a stylesheet, got {}",
            args[0].type_name()
        ))
    })?;
    let document = args[1].as_document().cloned().ok_or_else(|| {
        Error::argument(format!(
            "Second parameter must be a document, got {}",
            args[1].type_name()
        ))
    })?;
    let items = args[2]
        .as_array()
        .ok_or_else(|| Error::argument("Third parameter must be an array"))?;
    let params = ParamList::from_flat(items)?;
    Ok(TransformInput {
        stylesheet,
        document,
        params,
    })
}

/// Apply the stylesheet; the result tree lives only inside this call
pub fn execute(input: TransformInput) -> Result<String, Error> {
    tracing::debug!(
        stylesheet = %input.stylesheet.id(),
        document = %input.document.id(),
        params = input.params.len(),
        "applying stylesheet"
    );
    xslt::transform(&input.stylesheet, &input.document, input.params.as_pairs())
}

fn extract_result(text: String) -> Value {
    Value::String(text)
}

pub static TRANSFORM: Operation<TransformInput, String> = Operation {
    kind: OperationKind::Transform,
    map_arguments,
    execute,
    extract_result,
};
