//! XSLT 1.0 stylesheets over xot trees
//!
//! [`compile`] turns a parsed stylesheet document into a [`Stylesheet`];
//! [`transform`] applies it to a document and serializes the result per
//! `xsl:output`. XPath expressions are evaluated by xee-xpath.

pub mod ast;
pub mod compile;
mod eval;
pub mod expr;
mod number;
pub mod output;

pub use ast::{OutputMethod, OutputSpec, Stylesheet};
pub use compile::compile;
pub use eval::MAX_DEPTH;

use crate::error::Error;
use crate::markup::XmlDocument;

/// Apply `sheet` to `source` and serialize the result
///
/// `params` are top-level parameter overrides. Each value is an XPath
/// expression, so a string value must be quoted: `"'Bob'"`.
pub fn transform(
    sheet: &Stylesheet,
    source: &XmlDocument,
    params: &[(String, String)],
) -> Result<String, Error> {
    let xml = source
        .to_xml_string()
        .map_err(|e| Error::Transform(e.to_string()))?;
    let mut transformer = eval::Transformer::new(sheet, &xml)?;
    let result = transformer.run(params)?;
    output::serialize(transformer.xot_mut(), result, sheet.output())
}
