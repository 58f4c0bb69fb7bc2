//! Parsed XML and HTML documents
//!
//! Both parsers produce an [`XmlDocument`]: an xot arena plus its document
//! node. HTML input is normalized into the same tree shape, so stylesheets
//! see no difference between the two.

pub mod html;
pub mod xml;

use xot::{Node, Xot};

use crate::error::{Error, Format};

/// A parsed document owning its xot arena
pub struct XmlDocument {
    xot: Xot,
    root: Node,
    format: Format,
}

impl XmlDocument {
    pub(crate) fn new(xot: Xot, root: Node, format: Format) -> Self {
        XmlDocument { xot, root, format }
    }

    pub fn xot(&self) -> &Xot {
        &self.xot
    }

    /// The document node
    pub fn root(&self) -> Node {
        self.root
    }

    /// Format the document was parsed from
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn document_element(&self) -> Option<Node> {
        self.xot.document_element(self.root).ok()
    }

    /// Local name of the document element
    pub fn root_name(&self) -> Option<String> {
        let element = self.document_element()?;
        let name = self.xot.element(element)?.name();
        Some(self.xot.local_name_str(name).to_string())
    }

    /// Serialize the whole document as XML
    pub fn to_xml_string(&self) -> Result<String, Error> {
        self.xot
            .to_string(self.root)
            .map_err(|e| Error::parse(self.format, e))
    }

    /// Release the arena. Only the handle layer calls this.
    pub(crate) fn free(self) {
        tracing::trace!(format = %self.format, "freeing document");
        drop(self);
    }
}

impl std::fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlDocument")
            .field("format", &self.format)
            .field("root", &self.root_name())
            .finish()
    }
}

/// Whether `name` can be used as an unprefixed XML name
pub(crate) fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_xml_name() {
        assert!(is_xml_name("div"));
        assert!(is_xml_name("data-id"));
        assert!(is_xml_name("_x.y"));
        assert!(!is_xml_name(""));
        assert!(!is_xml_name("1abc"));
        assert!(!is_xml_name("@click"));
        assert!(!is_xml_name("xlink:href"));
    }

    #[test]
    fn test_root_name_and_serialize() {
        let doc = xml::parse_str("<catalog><cd/></catalog>").unwrap();
        assert_eq!(doc.root_name().as_deref(), Some("catalog"));
        assert_eq!(doc.to_xml_string().unwrap(), "<catalog><cd/></catalog>");
        assert_eq!(doc.format(), Format::Xml);
    }
}
