//! XML parsing from memory and from files

use std::borrow::Cow;
use std::path::Path;

use xot::Xot;

use super::XmlDocument;
use crate::error::{Error, Format};

/// Parse an XML document held in memory
///
/// The text is already decoded, so an `encoding` pseudo-attribute in the
/// XML declaration is ignored.
pub fn parse_str(text: &str) -> Result<XmlDocument, Error> {
    let mut xot = Xot::new();
    let root = xot
        .parse(&strip_declared_encoding(text))
        .map_err(|e| Error::parse(Format::Xml, e))?;
    Ok(XmlDocument::new(xot, root, Format::Xml))
}

/// Parse raw bytes, honouring the declared encoding
pub fn parse_bytes(bytes: &[u8]) -> Result<XmlDocument, Error> {
    let mut xot = Xot::new();
    let root = xot
        .parse_bytes(bytes)
        .map_err(|e| Error::parse(Format::Xml, e))?;
    Ok(XmlDocument::new(xot, root, Format::Xml))
}

/// Read and parse an XML file
pub fn parse_file(path: &Path) -> Result<XmlDocument, Error> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::parse(Format::Xml, format!("{}: {}", path.display(), e)))?;
    parse_bytes(&bytes)
}

fn strip_declared_encoding(text: &str) -> Cow<'_, str> {
    let body = text.trim_start_matches('\u{feff}');
    if !body.starts_with("<?xml") {
        return Cow::Borrowed(text);
    }
    let Some(end) = body.find("?>") else {
        return Cow::Borrowed(text);
    };
    let declaration = &body[..end];
    let Some(start) = declaration.find("encoding") else {
        return Cow::Borrowed(text);
    };

    // encoding = "..." with optional whitespace around '='
    let rest = declaration[start + "encoding".len()..].trim_start();
    let Some(rest) = rest.strip_prefix('=') else {
        return Cow::Borrowed(text);
    };
    let rest = rest.trim_start();
    let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return Cow::Borrowed(text);
    };
    let Some(close) = rest[1..].find(quote) else {
        return Cow::Borrowed(text);
    };
    let value_end = declaration.len() - rest.len() + 1 + close + 1;

    let mut stripped = String::with_capacity(body.len());
    stripped.push_str(declaration[..start].trim_end());
    stripped.push_str(&body[value_end..]);
    Cow::Owned(stripped)
}
