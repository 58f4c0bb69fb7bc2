//! Parse tasks for XML, HTML and stylesheets
//!
//! All six parse operations share one shape: a [`Source`] argument, a parse
//! function producing an owned handle, and a result wrapped in a shell.

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::handle::{DocumentKind, Owned, ResourceKind, StylesheetKind};
use crate::markup::{html, xml};
use crate::ops::OperationKind;
use crate::task::{check_arity, string_argument, Operation};
use crate::value::Value;
use crate::xslt;

/// Where a parse reads its input from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Text(String),
    File(PathBuf),
}

impl Source {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Source::Text(text) => format!("{} bytes of text", text.len()),
            Source::File(path) => path.display().to_string(),
        }
    }
}

fn text_source(args: &[Value]) -> Result<Source, Error> {
    check_arity(args, 1)?;
    Ok(Source::Text(string_argument(args, 0, "text")?))
}

fn file_source(args: &[Value]) -> Result<Source, Error> {
    check_arity(args, 1)?;
    Ok(Source::File(PathBuf::from(string_argument(args, 0, "filename")?)))
}

/// Parse `source` with the text or file entry point of one parser
fn parse_with<K: ResourceKind>(
    source: Source,
    from_text: fn(&str) -> Result<K::Native, Error>,
    from_file: fn(&Path) -> Result<K::Native, Error>,
) -> Result<Owned<K>, Error> {
    tracing::debug!(kind = K::NAME, source = %source.describe(), "parsing");
    let native = match &source {
        Source::Text(text) => from_text(text)?,
        Source::File(path) => from_file(path)?,
    };
    Ok(Owned::new(native))
}

pub fn parse_xml(source: Source) -> Result<Owned<DocumentKind>, Error> {
    parse_with::<DocumentKind>(source, xml::parse_str, xml::parse_file)
}

pub fn parse_html(source: Source) -> Result<Owned<DocumentKind>, Error> {
    parse_with::<DocumentKind>(source, html::parse_str, html::parse_file)
}

/// Parse the stylesheet document, then compile it
///
/// The intermediate document handle is released on both paths: on failure
/// before the error is returned, on success once the compiled form exists.
pub fn parse_xslt(source: Source) -> Result<Owned<StylesheetKind>, Error> {
    let document = parse_xml(source)?;
    let compiled = xslt::compile(&document);
    drop(document);
    Ok(Owned::new(compiled?))
}

fn wrap_document(owned: Owned<DocumentKind>) -> Value {
    Value::Document(owned.into_shell())
}

fn wrap_stylesheet(owned: Owned<StylesheetKind>) -> Value {
    Value::Stylesheet(owned.into_shell())
}

pub type DocumentParse = Operation<Source, Owned<DocumentKind>>;
pub type StylesheetParse = Operation<Source, Owned<StylesheetKind>>;

pub static READ_XML_STRING: DocumentParse = Operation {
    kind: OperationKind::ReadXmlString,
    map_arguments: text_source,
    execute: parse_xml,
    extract_result: wrap_document,
};

pub static READ_XML_FILE: DocumentParse = Operation {
    kind: OperationKind::ReadXmlFile,
    map_arguments: file_source,
    execute: parse_xml,
    extract_result: wrap_document,
};

pub static READ_HTML_STRING: DocumentParse = Operation {
    kind: OperationKind::ReadHtmlString,
    map_arguments: text_source,
    execute: parse_html,
    extract_result: wrap_document,
};

pub static READ_HTML_FILE: DocumentParse = Operation {
    kind: OperationKind::ReadHtmlFile,
    map_arguments: file_source,
    execute: parse_html,
    extract_result: wrap_document,
};

pub static READ_XSLT_STRING: StylesheetParse = Operation {
    kind: OperationKind::ReadXsltString,
    map_arguments: text_source,
    execute: parse_xslt,
    extract_result: wrap_stylesheet,
};

pub static READ_XSLT_FILE: StylesheetParse = Operation {
    kind: OperationKind::ReadXsltFile,
    map_arguments: file_source,
    execute: parse_xslt,
    extract_result: wrap_stylesheet,
};
