//! Result tree serialization per `xsl:output`

use xot::output::xml::{Declaration, Parameters as XmlParameters};
use xot::output::html5::Parameters as HtmlParameters;
use xot::output::Indentation;
use xot::{Node, Xot};

use super::ast::{OutputMethod, OutputSpec};
use crate::error::Error;

fn serialize_error(e: xot::Error) -> Error {
    Error::Transform(format!("cannot serialize result: {}", e))
}

/// The explicit method, or html when the result root is a plain `<html>`
pub fn resolve_method(xot: &Xot, result: Node, spec: &OutputSpec) -> OutputMethod {
    if let Some(method) = spec.method {
        return method;
    }
    let root = xot.children(result).find(|&child| xot.is_element(child));
    let is_html = root
        .and_then(|root| xot.element(root))
        .map(|element| xot.name_ns_str(element.name()))
        .is_some_and(|(local, namespace)| namespace.is_empty() && local.eq_ignore_ascii_case("html"));
    if is_html {
        OutputMethod::Html
    } else {
        OutputMethod::Xml
    }
}

pub fn serialize(xot: &mut Xot, result: Node, spec: &OutputSpec) -> Result<String, Error> {
    let method = resolve_method(xot, result, spec);
    tracing::trace!(%method, "serializing result tree");

    match method {
        OutputMethod::Text => Ok(xot.string_value(result)),
        OutputMethod::Xml => {
            let parameters = XmlParameters {
                indentation: spec.indent.then(Indentation::default),
                declaration: (!spec.omit_xml_declaration).then(|| Declaration {
                    encoding: spec.encoding.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let mut text = xot
                .serialize_xml_string(parameters, result)
                .map_err(serialize_error)?;
            if !text.ends_with('\n') {
                text.push('\n');
            }
            Ok(text)
        }
        OutputMethod::Html => {
            let parameters = HtmlParameters {
                indentation: spec.indent.then(Indentation::default),
                ..Default::default()
            };
            let mut text = xot
                .html5()
                .serialize_string(parameters, result)
                .map_err(serialize_error)?;
            text.push('\n');
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(xot: &mut Xot, xml: &str) -> Node {
        xot.parse(xml).unwrap()
    }

    #[test]
    fn test_method_defaults_to_html_for_html_root() {
        let mut xot = Xot::new();
        let html = result(&mut xot, "<html><body/></html>");
        let other = result(&mut xot, "<doc/>");
        let spec = OutputSpec::default();
        assert_eq!(resolve_method(&xot, html, &spec), OutputMethod::Html);
        assert_eq!(resolve_method(&xot, other, &spec), OutputMethod::Xml);

        let explicit = OutputSpec { method: Some(OutputMethod::Text), ..Default::default() };
        assert_eq!(resolve_method(&xot, html, &explicit), OutputMethod::Text);
    }

    #[test]
    fn test_xml_declaration_and_newline() {
        let mut xot = Xot::new();
        let doc = result(&mut xot, "<doc><a>1</a></doc>");
        let text = serialize(&mut xot, doc, &OutputSpec::default()).unwrap();
        assert_eq!(text, "<?xml version=\"1.0\"?>\n<doc><a>1</a></doc>\n");

        let omitted = OutputSpec { omit_xml_declaration: true, ..Default::default() };
        assert_eq!(serialize(&mut xot, doc, &omitted).unwrap(), "<doc><a>1</a></doc>\n");
    }

    #[test]
    fn test_text_and_html() {
        let mut xot = Xot::new();
        let doc = result(&mut xot, "<html><body>a<br/>b</body></html>");
        let text = OutputSpec { method: Some(OutputMethod::Text), ..Default::default() };
        assert_eq!(serialize(&mut xot, doc, &text).unwrap(), "ab");

        let html = serialize(&mut xot, doc, &OutputSpec::default()).unwrap();
        assert!(html.contains("<body>a<br>b</body>"));
    }
}
