//! HTML parsing in recovery mode
//!
//! TreeSitter's HTML grammar tolerates unclosed and unknown tags, so it is
//! used as the recovering tokenizer. The resulting syntax tree is folded
//! into an xot document:
//! - tag and attribute names are lower-cased
//! - text between tags is taken from the source bytes and entity-decoded
//! - `script` and `style` bodies are kept verbatim
//! - doctype and stray end tags are dropped
//! - anything other than a single root element is wrapped in `<html>`

use std::collections::HashMap;
use std::path::Path;

use quick_xml::escape::{resolve_html5_entity, unescape_with};
use tree_sitter::{Language, Node as TsNode, Parser};
use xot::{NameId, Node as XotNode, ValueType, Xot};

use super::{is_xml_name, XmlDocument};
use crate::error::{Error, Format};

/// Parse an HTML document held in memory
pub fn parse_str(text: &str) -> Result<XmlDocument, Error> {
    let mut parser = Parser::new();
    let language: Language = tree_sitter_html::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|e| Error::parse(Format::Html, e))?;
    let tree = parser
        .parse(text, None)
        .ok_or_else(|| Error::parse(Format::Html, "parser produced no tree"))?;

    let mut builder = HtmlBuilder::new(text);
    let root = builder
        .build(tree.root_node())
        .map_err(|e| Error::parse(Format::Html, e))?;
    let xot = builder.into_xot();
    if xot.first_child(root).is_none() {
        return Err(Error::parse(Format::Html, "document is empty"));
    }
    Ok(XmlDocument::new(xot, root, Format::Html))
}

/// Read and parse an HTML file; invalid UTF-8 is replaced
pub fn parse_file(path: &Path) -> Result<XmlDocument, Error> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::parse(Format::Html, format!("{}: {}", path.display(), e)))?;
    parse_str(&String::from_utf8_lossy(&bytes))
}

/// Decode character and HTML5 entity references, keeping malformed text as-is
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    match unescape_with(raw, resolve_html5_entity) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn is_element_kind(kind: &str) -> bool {
    matches!(kind, "element" | "script_element" | "style_element")
}

/// Builds an xot document from a TreeSitter HTML tree
struct HtmlBuilder<'s> {
    xot: Xot,
    source: &'s str,
    /// Cache of name strings to NameIds
    names: HashMap<String, NameId>,
}

impl<'s> HtmlBuilder<'s> {
    fn new(source: &'s str) -> Self {
        HtmlBuilder {
            xot: Xot::new(),
            source,
            names: HashMap::new(),
        }
    }

    fn into_xot(self) -> Xot {
        self.xot
    }

    fn name(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.names.get(name) {
            id
        } else {
            let id = self.xot.add_name(name);
            self.names.insert(name.to_string(), id);
            id
        }
    }

    fn text_of(&self, node: TsNode) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    fn build(&mut self, document: TsNode) -> Result<XotNode, xot::Error> {
        if self.has_single_root(document) {
            let root = self.xot.new_document();
            self.build_content(document, root, document.start_byte(), document.end_byte())?;
            Ok(root)
        } else {
            let html = self.name("html");
            let wrapper = self.xot.new_element(html);
            self.build_content(document, wrapper, document.start_byte(), document.end_byte())?;
            let xot = &self.xot;
            let has_content = xot.children(wrapper).any(|child| {
                xot.is_element(child)
                    || xot.text_str(child).is_some_and(|text| !text.trim().is_empty())
            });
            if !has_content {
                // nothing but whitespace, comments or a doctype
                return Ok(self.xot.new_document());
            }
            self.xot.new_document_with_element(wrapper)
        }
    }

    /// Exactly one element at top level and no text beside it
    fn has_single_root(&self, document: TsNode) -> bool {
        let mut elements = 0;
        let mut cursor = document.start_byte();
        let mut walker = document.walk();
        for child in document.children(&mut walker) {
            let kind = child.kind();
            if kind == "text" || kind == "entity" {
                continue;
            }
            if !self.gap(cursor, child.start_byte()).trim().is_empty() {
                return false;
            }
            cursor = child.end_byte();
            if is_element_kind(kind) {
                elements += 1;
            } else if child.is_error() {
                return false;
            }
        }
        elements == 1 && self.gap(cursor, document.end_byte()).trim().is_empty()
    }

    fn gap(&self, from: usize, to: usize) -> &'s str {
        if from >= to {
            return "";
        }
        self.source.get(from..to).unwrap_or("")
    }

    /// Append text for a source range to `parent`
    fn flush_text(&mut self, parent: XotNode, from: usize, to: usize) -> Result<(), xot::Error> {
        let raw = self.gap(from, to);
        if raw.is_empty() {
            return Ok(());
        }
        if matches!(self.xot.value_type(parent), ValueType::Document) {
            // the document node holds no text
            return Ok(());
        }
        let text = decode_entities(raw);
        self.xot.append_text(parent, &text)?;
        Ok(())
    }

    /// Build the children of `node` that lie between `start` and `end`
    ///
    /// Text is recovered from the gaps between structural children, since
    /// the grammar's text tokens drop surrounding whitespace.
    fn build_content(
        &mut self,
        node: TsNode,
        parent: XotNode,
        start: usize,
        end: usize,
    ) -> Result<usize, xot::Error> {
        let mut cursor = start;
        let mut walker = node.walk();
        for child in node.children(&mut walker) {
            if child.end_byte() <= start.max(cursor) || child.start_byte() >= end {
                continue;
            }
            if self.text_of(child).starts_with("</") && !is_element_kind(child.kind()) {
                // stray end tag: drop it up to its closing `>`
                self.flush_text(parent, cursor, child.start_byte())?;
                cursor = self.past_tag_close(child.start_byte());
                continue;
            }
            match child.kind() {
                "text" | "entity" => {}
                "start_tag" | "self_closing_tag" | "end_tag" => {
                    self.flush_text(parent, cursor, child.start_byte())?;
                    cursor = child.end_byte();
                }
                kind if is_element_kind(kind) => {
                    self.flush_text(parent, cursor, child.start_byte())?;
                    self.build_element(child, parent)?;
                    cursor = child.end_byte();
                }
                "comment" => {
                    self.flush_text(parent, cursor, child.start_byte())?;
                    let raw = self.text_of(child);
                    let body = raw
                        .strip_prefix("<!--")
                        .map(|s| s.strip_suffix("-->").unwrap_or(s))
                        .unwrap_or(raw)
                        .replace("--", "- -");
                    let comment = self.xot.new_comment(&body);
                    self.xot.append(parent, comment)?;
                    cursor = child.end_byte();
                }
                "ERROR" => {
                    self.flush_text(parent, cursor, child.start_byte())?;
                    cursor = self.build_content(child, parent, child.start_byte(), child.end_byte())?;
                    cursor = cursor.max(child.end_byte());
                }
                _ => {
                    // doctype, erroneous_end_tag and anything unknown
                    self.flush_text(parent, cursor, child.start_byte())?;
                    cursor = child.end_byte();
                }
            }
        }
        self.flush_text(parent, cursor, end)?;
        Ok(cursor.max(end))
    }

    /// Offset just past the first `>` at or after `from`
    fn past_tag_close(&self, from: usize) -> usize {
        self.source
            .get(from..)
            .and_then(|rest| rest.find('>'))
            .map(|offset| from + offset + 1)
            .unwrap_or(self.source.len())
    }

    fn build_element(&mut self, node: TsNode, parent: XotNode) -> Result<(), xot::Error> {
        let mut walker = node.walk();
        let children: Vec<TsNode> = node.children(&mut walker).collect();

        let tag = children
            .iter()
            .find(|c| matches!(c.kind(), "start_tag" | "self_closing_tag"))
            .copied();
        let tag_name = tag
            .and_then(|t| child_of_kind(t, "tag_name"))
            .map(|n| self.text_of(n).to_ascii_lowercase())
            .filter(|name| is_xml_name(name));

        let Some(tag_name) = tag_name else {
            // unusable element name: keep the content, drop the wrapper
            let start = tag.map(|t| t.end_byte()).unwrap_or(node.start_byte());
            self.build_content(node, parent, start, node.end_byte())?;
            return Ok(());
        };

        let name = self.name(&tag_name);
        let element = self.xot.new_element(name);
        if let Some(tag) = tag {
            self.add_attributes(tag, element)?;
        }
        self.xot.append(parent, element)?;

        let content_start = tag.map(|t| t.end_byte()).unwrap_or(node.start_byte());
        let content_end = children
            .iter()
            .rev()
            .find(|c| c.kind() == "end_tag")
            .map(|t| t.start_byte())
            .unwrap_or(node.end_byte());

        if node.kind() == "element" {
            self.build_content(node, element, content_start, content_end)?;
        } else if let Some(raw) = children.iter().find(|c| c.kind() == "raw_text") {
            let body = self.text_of(*raw);
            self.xot.append_text(element, body)?;
        }
        Ok(())
    }

    fn add_attributes(&mut self, tag: TsNode, element: XotNode) -> Result<(), xot::Error> {
        let mut seen: Vec<NameId> = Vec::new();
        let mut walker = tag.walk();
        for attribute in tag.children(&mut walker) {
            if attribute.kind() != "attribute" {
                continue;
            }
            let Some(name_node) = child_of_kind(attribute, "attribute_name") else {
                continue;
            };
            let attr_name = self.text_of(name_node).to_ascii_lowercase();
            if !is_xml_name(&attr_name) || attr_name.starts_with("xmlns") {
                continue;
            }

            let value = match child_of_kind(attribute, "attribute_value") {
                Some(value) => decode_entities(self.text_of(value)),
                None => match child_of_kind(attribute, "quoted_attribute_value") {
                    Some(quoted) => child_of_kind(quoted, "attribute_value")
                        .map(|v| decode_entities(self.text_of(v)))
                        .unwrap_or_default(),
                    None => String::new(),
                },
            };

            let name = self.name(&attr_name);
            // first occurrence wins, as in browsers
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            self.xot.attributes_mut(element).insert(name, value);
        }
        Ok(())
    }
}

fn child_of_kind<'t>(node: TsNode<'t>, kind: &str) -> Option<TsNode<'t>> {
    let mut walker = node.walk();
    let found = node.children(&mut walker).find(|c| c.kind() == kind);
    found
}
