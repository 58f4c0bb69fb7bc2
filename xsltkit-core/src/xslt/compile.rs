//! Stylesheet compilation
//!
//! Walks a parsed stylesheet document and builds the instruction tree.
//! Every XPath expression and match pattern is compiled once here so that
//! syntax errors surface as compile errors rather than during a transform.

use xee_xpath::context::StaticContextBuilder;
use xee_xpath::Queries;
use xot::xmlname::OwnedName;
use xot::{NameId, Node, Xot};

use super::ast::*;
use super::expr::{Avt, Dialect, Expr, EXSLT_COMMON};
use crate::error::Error;
use crate::markup::{is_xml_name, XmlDocument};

/// Compile a parsed stylesheet document
pub fn compile(document: &XmlDocument) -> Result<Stylesheet, Error> {
    let xot = document.xot();
    let root = document
        .document_element()
        .ok_or_else(|| Error::Compile("document has no root element".into()))?;

    let namespaces: Vec<(String, String)> = in_scope_namespaces(xot, root)
        .into_iter()
        .filter(|(prefix, _)| !prefix.is_empty())
        .collect();
    let dialect = Dialect {
        node_set_prefixes: namespaces
            .iter()
            .filter(|(_, uri)| uri == EXSLT_COMMON)
            .map(|(prefix, _)| prefix.clone())
            .collect(),
        ..Dialect::default()
    };
    let mut compiler = Compiler {
        xot,
        excluded: vec![XSLT_NAMESPACE.to_string()],
        namespaces,
        dialect,
    };

    let stylesheet = if compiler.xsl_name(root).is_some() {
        compiler.compile_stylesheet(root)?
    } else {
        compiler.compile_simplified(root)?
    };
    tracing::debug!(
        templates = stylesheet.templates.len(),
        globals = stylesheet.globals.len(),
        "compiled stylesheet"
    );
    Ok(stylesheet)
}

/// Namespace declarations visible at `node`, innermost first
fn in_scope_namespaces(xot: &Xot, node: Node) -> Vec<(String, String)> {
    let mut seen: Vec<(String, String)> = Vec::new();
    let mut current = Some(node);
    while let Some(n) = current {
        for (prefix, namespace) in xot.namespaces(n).iter() {
            let prefix = xot.prefix_str(prefix);
            if prefix == "xml" || seen.iter().any(|(p, _)| p == prefix) {
                continue;
            }
            seen.push((prefix.to_string(), xot.namespace_str(*namespace).to_string()));
        }
        current = xot.parent(n);
    }
    seen
}

/// Split a pattern on top-level `|`
fn pattern_alternatives(pattern: &str) -> Vec<&str> {
    let mut alternatives = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in pattern.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth -= 1,
            (None, '|') if depth == 0 => {
                alternatives.push(pattern[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    alternatives.push(pattern[start..].trim());
    alternatives
}

fn is_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_xml_name(prefix) && is_xml_name(local),
        None => is_xml_name(name),
    }
}

/// XSLT 1.0 default priority of a single pattern alternative
fn default_priority(alternative: &str) -> f64 {
    if alternative.contains(['/', '[']) {
        return 0.5;
    }
    let step = alternative
        .strip_prefix("child::")
        .or_else(|| alternative.strip_prefix("attribute::"))
        .or_else(|| alternative.strip_prefix('@'))
        .unwrap_or(alternative)
        .trim();
    match step {
        "*" | "node()" | "text()" | "comment()" | "processing-instruction()" => -0.5,
        s if s.ends_with(":*") => -0.25,
        s if s.starts_with("processing-instruction(") => 0.0,
        s if is_qname(s) => 0.0,
        _ => 0.5,
    }
}

fn is_yes(value: Option<&str>) -> bool {
    value.map(str::trim) == Some("yes")
}

/// Stylesheets below version 2.0 get XPath 1.0 numbers
fn is_version_1(version: &str) -> bool {
    version.trim().parse::<f64>().map_or(true, |v| v < 2.0)
}

struct Compiler<'a> {
    xot: &'a Xot,
    /// Namespace URIs never copied to the result
    excluded: Vec<String>,
    /// Prefixes available to XPath expressions
    namespaces: Vec<(String, String)>,
    dialect: Dialect,
}

impl<'a> Compiler<'a> {
    /// Local name of an element in the XSLT namespace
    fn xsl_name(&self, node: Node) -> Option<&'a str> {
        let element = self.xot.element(node)?;
        let (local, namespace) = self.xot.name_ns_str(element.name());
        (namespace == XSLT_NAMESPACE).then_some(local)
    }

    fn attr(&self, node: Node, name: &str) -> Option<&'a str> {
        let name = self.xot.name(name)?;
        self.xot.get_attribute(node, name)
    }

    fn required(&self, node: Node, name: &str) -> Result<&'a str, Error> {
        self.attr(node, name).ok_or_else(|| {
            let instruction = self.xsl_name(node).unwrap_or("element");
            Error::Compile(format!("xsl:{} requires a {} attribute", instruction, name))
        })
    }

    /// Compile an expression, rejecting syntax errors now
    fn expr(&self, text: &str) -> Result<Expr, Error> {
        let expr = Expr::with_dialect(text, &self.dialect).map_err(|e| {
            Error::Compile(format!("invalid expression \"{}\": {}", text, e))
        })?;
        self.check(&expr)?;
        Ok(expr)
    }

    fn check(&self, expr: &Expr) -> Result<(), Error> {
        let mut builder = StaticContextBuilder::default();
        builder.namespaces(self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str())));
        builder.variable_names(expr.variables.iter().map(|name| OwnedName::name(name)));
        Queries::default()
            .sequence_with_context(&expr.source, builder.build())
            .map_err(|e| {
                Error::Compile(format!("invalid expression \"{}\": {}", expr.original, e))
            })?;
        Ok(())
    }

    fn avt(&self, text: &str) -> Result<Avt, Error> {
        let avt = Avt::parse_with(text, &self.dialect).map_err(Error::Compile)?;
        for expr in avt.expressions() {
            self.check(expr)?;
        }
        Ok(avt)
    }

    fn qname(&self, node: Node, name: NameId) -> QName {
        let (local, namespace) = self.xot.name_ns_str(name);
        let prefix = if namespace.is_empty() {
            ""
        } else {
            self.xot
                .prefix_for_namespace(node, self.xot.namespace_for_name(name))
                .map(|prefix| self.xot.prefix_str(prefix))
                .unwrap_or("")
        };
        QName {
            namespace: namespace.to_string(),
            local: local.to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn resolve_prefix(&self, node: Node, prefix: &str) -> Result<String, Error> {
        in_scope_namespaces(self.xot, node)
            .into_iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri)
            .ok_or_else(|| Error::Compile(format!("undeclared namespace prefix \"{}\"", prefix)))
    }

    fn compile_stylesheet(&mut self, root: Node) -> Result<Stylesheet, Error> {
        let name = self.xsl_name(root).unwrap_or_default();
        if name != "stylesheet" && name != "transform" {
            return Err(Error::Compile(format!(
                "root element must be xsl:stylesheet or xsl:transform, found xsl:{}",
                name
            )));
        }
        let version = self.required(root, "version")?;
        self.dialect.double_literals = is_version_1(version);

        for attribute in ["exclude-result-prefixes", "extension-element-prefixes"] {
            let Some(prefixes) = self.attr(root, attribute) else {
                continue;
            };
            for prefix in prefixes.split_whitespace() {
                let prefix = if prefix == "#default" { "" } else { prefix };
                let uri = self.resolve_prefix(root, prefix)?;
                self.excluded.push(uri);
            }
        }

        // keys first: any expression may call key()
        for child in self.xot.children(root) {
            if self.xsl_name(child) == Some("key") {
                let name = self.required(child, "name")?.trim().to_string();
                let use_expr = self.required(child, "use")?.to_string();
                self.dialect.keys.push((name, use_expr));
            }
        }

        let mut stylesheet = Stylesheet {
            templates: Vec::new(),
            globals: Vec::new(),
            output: OutputSpec::default(),
            strip_space: Vec::new(),
            preserve_space: Vec::new(),
            namespaces: self.namespaces.clone(),
            keys: Vec::new(),
            dialect: self.dialect.clone(),
        };

        for child in self.xot.children(root) {
            if let Some(text) = self.xot.text_str(child) {
                if !text.trim().is_empty() {
                    return Err(Error::Compile("text is not allowed at the top level".into()));
                }
                continue;
            }
            let Some(name) = self.xsl_name(child) else {
                // comments, processing instructions and user data elements
                continue;
            };
            match name {
                "template" => {
                    let template = self.compile_template(child)?;
                    stylesheet.templates.push(template);
                }
                "param" | "variable" => {
                    let binding = self.compile_binding(child, name == "param")?;
                    stylesheet.globals.push(binding);
                }
                "output" => self.compile_output(child, &mut stylesheet.output)?,
                "strip-space" => {
                    let tests = self.compile_name_tests(child)?;
                    stylesheet.strip_space.extend(tests);
                }
                "preserve-space" => {
                    let tests = self.compile_name_tests(child)?;
                    stylesheet.preserve_space.extend(tests);
                }
                "key" => {
                    let name = self.required(child, "name")?.trim().to_string();
                    let alternatives = self.compile_pattern(self.required(child, "match")?)?;
                    // checked here, evaluated inside key() rewrites
                    self.expr(self.required(child, "use")?)?;
                    tracing::trace!(key = %name, index = stylesheet.keys.len(), "compiled key");
                    stylesheet.keys.push(Key { name, alternatives });
                }
                "decimal-format" => {}
                other => {
                    return Err(Error::Compile(format!(
                        "unsupported top-level element xsl:{}",
                        other
                    )))
                }
            }
        }
        Ok(stylesheet)
    }

    /// A literal result element used as the whole stylesheet
    fn compile_simplified(&mut self, root: Node) -> Result<Stylesheet, Error> {
        let version = self.xot.attributes(root).iter().find_map(|(name, value)| {
            let (local, namespace) = self.xot.name_ns_str(name);
            (namespace == XSLT_NAMESPACE && local == "version").then_some(value)
        });
        let Some(version) = version else {
            return Err(Error::Compile(
                "root element is neither xsl:stylesheet nor a literal result element with xsl:version"
                    .into(),
            ));
        };
        self.dialect.double_literals = is_version_1(version);
        let body = vec![self.compile_literal(root, true)?];
        let alternative = PatternAlternative {
            select: Expr::new("/"),
            priority: 0.5,
            is_root: true,
        };
        Ok(Stylesheet {
            templates: vec![Template {
                pattern: Some("/".into()),
                alternatives: vec![alternative],
                name: None,
                mode: None,
                priority: None,
                params: Vec::new(),
                body,
            }],
            globals: Vec::new(),
            output: OutputSpec::default(),
            strip_space: Vec::new(),
            preserve_space: Vec::new(),
            namespaces: self.namespaces.clone(),
            keys: Vec::new(),
            dialect: self.dialect.clone(),
        })
    }

    fn compile_template(&self, node: Node) -> Result<Template, Error> {
        let pattern = self.attr(node, "match");
        let name = self.attr(node, "name");
        if pattern.is_none() && name.is_none() {
            return Err(Error::Compile(
                "xsl:template requires a match or name attribute".into(),
            ));
        }
        let alternatives = match pattern {
            Some(pattern) => self.compile_pattern(pattern)?,
            None => Vec::new(),
        };
        let priority = match self.attr(node, "priority") {
            Some(value) => Some(value.trim().parse::<f64>().map_err(|_| {
                Error::Compile(format!("invalid template priority \"{}\"", value))
            })?),
            None => None,
        };

        // leading xsl:param children are the template's parameters
        let mut params = Vec::new();
        let mut rest = Vec::new();
        let mut in_params = true;
        for child in self.xot.children(node) {
            if in_params {
                if self.xsl_name(child) == Some("param") {
                    params.push(self.compile_binding(child, true)?);
                    continue;
                }
                if self.xot.text_str(child).is_some_and(|t| t.trim().is_empty()) {
                    continue;
                }
                in_params = false;
            }
            rest.push(child);
        }
        let body = self.compile_nodes(&rest, false)?;

        Ok(Template {
            pattern: pattern.map(str::to_string),
            alternatives,
            name: name.map(|n| n.trim().to_string()),
            mode: self.attr(node, "mode").map(|m| m.trim().to_string()),
            priority,
            params,
            body,
        })
    }

    fn compile_pattern(&self, pattern: &str) -> Result<Vec<PatternAlternative>, Error> {
        let mut alternatives = Vec::new();
        for alternative in pattern_alternatives(pattern) {
            if alternative.is_empty() {
                return Err(Error::Compile(format!("invalid pattern \"{}\"", pattern)));
            }
            if alternative == "/" {
                alternatives.push(PatternAlternative {
                    select: Expr::new("/"),
                    priority: 0.5,
                    is_root: true,
                });
                continue;
            }
            let select = if alternative.starts_with('/')
                || alternative.starts_with("id(")
                || alternative.starts_with("key(")
            {
                alternative.to_string()
            } else {
                format!("//{}", alternative)
            };
            let select = Expr::with_dialect(&select, &self.dialect)
                .map_err(|e| Error::Compile(format!("invalid pattern \"{}\": {}", pattern, e)))?;
            self.check(&select).map_err(|_| {
                Error::Compile(format!("invalid pattern \"{}\"", pattern))
            })?;
            alternatives.push(PatternAlternative {
                select,
                priority: default_priority(alternative),
                is_root: false,
            });
        }
        Ok(alternatives)
    }

    fn compile_output(&self, node: Node, output: &mut OutputSpec) -> Result<(), Error> {
        if let Some(method) = self.attr(node, "method") {
            let method = method.trim().parse::<OutputMethod>().map_err(|_| {
                Error::Compile(format!("unsupported output method \"{}\"", method))
            })?;
            output.method = Some(method);
        }
        if let Some(indent) = self.attr(node, "indent") {
            output.indent = is_yes(Some(indent));
        }
        if let Some(omit) = self.attr(node, "omit-xml-declaration") {
            output.omit_xml_declaration = is_yes(Some(omit));
        }
        if let Some(encoding) = self.attr(node, "encoding") {
            output.encoding = Some(encoding.trim().to_string());
        }
        Ok(())
    }

    fn compile_name_tests(&self, node: Node) -> Result<Vec<NameTest>, Error> {
        let elements = self.required(node, "elements")?;
        elements
            .split_whitespace()
            .map(|token| {
                if token == "*" {
                    return Ok(NameTest::Any);
                }
                match token.split_once(':') {
                    Some((prefix, "*")) => Ok(NameTest::Namespace(self.resolve_prefix(node, prefix)?)),
                    Some((prefix, local)) => Ok(NameTest::Name {
                        namespace: self.resolve_prefix(node, prefix)?,
                        local: local.to_string(),
                    }),
                    None => Ok(NameTest::Name {
                        namespace: String::new(),
                        local: token.to_string(),
                    }),
                }
            })
            .collect()
    }

    fn compile_binding(&self, node: Node, is_param: bool) -> Result<Binding, Error> {
        let name = self.required(node, "name")?.trim().to_string();
        let value = match self.attr(node, "select") {
            Some(select) => BindingValue::Select(self.expr(select)?),
            None => {
                let body = self.compile_body(node, false)?;
                if body.is_empty() {
                    BindingValue::Empty
                } else {
                    BindingValue::Content(body)
                }
            }
        };
        Ok(Binding { name, value, is_param })
    }

    fn compile_body(&self, parent: Node, in_literal: bool) -> Result<Vec<Instruction>, Error> {
        let children: Vec<Node> = self.xot.children(parent).collect();
        self.compile_nodes(&children, in_literal)
    }

    fn compile_nodes(&self, nodes: &[Node], in_literal: bool) -> Result<Vec<Instruction>, Error> {
        let mut body = Vec::new();
        for &node in nodes {
            if let Some(text) = self.xot.text_str(node) {
                if !text.trim().is_empty() {
                    body.push(Instruction::Text(text.to_string()));
                }
                continue;
            }
            if !self.xot.is_element(node) {
                continue;
            }
            match self.xsl_name(node) {
                Some(name) => {
                    if let Some(instruction) = self.compile_instruction(node, name)? {
                        body.push(instruction);
                    }
                }
                None => body.push(self.compile_literal(node, !in_literal)?),
            }
        }
        Ok(body)
    }

    fn compile_literal(&self, node: Node, outermost: bool) -> Result<Instruction, Error> {
        let element = self
            .xot
            .element(node)
            .ok_or_else(|| Error::Compile("expected an element".into()))?;
        let name = self.qname(node, element.name());

        // the outermost literal element carries every in-scope declaration
        let declarations = if outermost {
            in_scope_namespaces(self.xot, node)
        } else {
            self.xot
                .namespaces(node)
                .iter()
                .map(|(prefix, namespace)| {
                    (
                        self.xot.prefix_str(prefix).to_string(),
                        self.xot.namespace_str(*namespace).to_string(),
                    )
                })
                .filter(|(prefix, _)| prefix != "xml")
                .collect()
        };
        let namespaces = declarations
            .into_iter()
            .filter(|(_, uri)| !self.excluded.contains(uri))
            .collect();

        let mut attributes = Vec::new();
        for (attribute, value) in self.xot.attributes(node).iter() {
            if self.xot.uri_str(attribute) == XSLT_NAMESPACE {
                continue;
            }
            attributes.push((self.qname(node, attribute), self.avt(value)?));
        }

        let body = self.compile_body(node, true)?;
        Ok(Instruction::LiteralElement {
            name,
            namespaces,
            attributes,
            body,
        })
    }

    fn compile_sorts_and_params(
        &self,
        node: Node,
    ) -> Result<(Vec<Sort>, Vec<Binding>, Vec<Node>), Error> {
        let mut sorts = Vec::new();
        let mut params = Vec::new();
        let mut rest = Vec::new();
        for child in self.xot.children(node) {
            match self.xsl_name(child) {
                Some("sort") => sorts.push(Sort {
                    select: self.expr(self.attr(child, "select").unwrap_or("."))?,
                    numeric: self.attr(child, "data-type").map(str::trim) == Some("number"),
                    descending: self.attr(child, "order").map(str::trim) == Some("descending"),
                }),
                Some("with-param") => params.push(self.compile_binding(child, true)?),
                _ => rest.push(child),
            }
        }
        Ok((sorts, params, rest))
    }

    fn compile_instruction(&self, node: Node, name: &str) -> Result<Option<Instruction>, Error> {
        let instruction = match name {
            "apply-templates" => {
                let (sorts, params, _) = self.compile_sorts_and_params(node)?;
                Instruction::ApplyTemplates {
                    select: self.attr(node, "select").map(|s| self.expr(s)).transpose()?,
                    mode: self.attr(node, "mode").map(|m| m.trim().to_string()),
                    sorts,
                    params,
                }
            }
            "call-template" => {
                let (_, params, _) = self.compile_sorts_and_params(node)?;
                Instruction::CallTemplate {
                    name: self.required(node, "name")?.trim().to_string(),
                    params,
                }
            }
            "for-each" => {
                let select = self.expr(self.required(node, "select")?)?;
                let (sorts, params, rest) = self.compile_sorts_and_params(node)?;
                if !params.is_empty() {
                    return Err(Error::Compile("xsl:with-param is not allowed in xsl:for-each".into()));
                }
                Instruction::ForEach {
                    select,
                    sorts,
                    body: self.compile_nodes(&rest, false)?,
                }
            }
            "value-of" => Instruction::ValueOf {
                select: self.expr(self.required(node, "select")?)?,
            },
            "copy-of" => Instruction::CopyOf {
                select: self.expr(self.required(node, "select")?)?,
            },
            "copy" => Instruction::Copy {
                body: self.compile_body(node, false)?,
            },
            "if" => Instruction::If {
                test: self.expr(self.required(node, "test")?)?,
                body: self.compile_body(node, false)?,
            },
            "choose" => {
                let mut branches = Vec::new();
                let mut otherwise = Vec::new();
                for child in self.xot.children(node) {
                    match self.xsl_name(child) {
                        Some("when") => branches.push((
                            self.expr(self.required(child, "test")?)?,
                            self.compile_body(child, false)?,
                        )),
                        Some("otherwise") => otherwise = self.compile_body(child, false)?,
                        _ => {}
                    }
                }
                if branches.is_empty() {
                    return Err(Error::Compile("xsl:choose requires at least one xsl:when".into()));
                }
                Instruction::Choose { branches, otherwise }
            }
            "text" => {
                let text: String = self
                    .xot
                    .children(node)
                    .filter_map(|child| self.xot.text_str(child))
                    .collect();
                if text.is_empty() {
                    return Ok(None);
                }
                Instruction::Text(text)
            }
            "element" => Instruction::Element {
                name: self.avt(self.required(node, "name")?)?,
                namespace: self.attr(node, "namespace").map(|n| self.avt(n)).transpose()?,
                scope: in_scope_namespaces(self.xot, node),
                body: self.compile_body(node, false)?,
            },
            "attribute" => Instruction::Attribute {
                name: self.avt(self.required(node, "name")?)?,
                namespace: self.attr(node, "namespace").map(|n| self.avt(n)).transpose()?,
                scope: in_scope_namespaces(self.xot, node),
                body: self.compile_body(node, false)?,
            },
            "comment" => Instruction::Comment {
                body: self.compile_body(node, false)?,
            },
            "processing-instruction" => Instruction::ProcessingInstruction {
                name: self.avt(self.required(node, "name")?)?,
                body: self.compile_body(node, false)?,
            },
            "number" => {
                let level = match self.attr(node, "level") {
                    Some(level) => level.trim().parse::<NumberLevel>().map_err(|_| {
                        Error::Compile(format!("invalid xsl:number level \"{}\"", level))
                    })?,
                    None => NumberLevel::Single,
                };
                let grouping = match (
                    self.attr(node, "grouping-separator"),
                    self.attr(node, "grouping-size"),
                ) {
                    (Some(separator), Some(size)) => size
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .filter(|&size| size > 0)
                        .map(|size| (separator.to_string(), size)),
                    _ => None,
                };
                Instruction::Number {
                    value: self.attr(node, "value").map(|v| self.expr(v)).transpose()?,
                    level,
                    count: self.attr(node, "count").map(|p| self.compile_pattern(p)).transpose()?,
                    from: self.attr(node, "from").map(|p| self.compile_pattern(p)).transpose()?,
                    format: self.avt(self.attr(node, "format").unwrap_or("1"))?,
                    grouping,
                }
            }
            "variable" | "param" => Instruction::Variable(self.compile_binding(node, false)?),
            "message" => Instruction::Message {
                body: self.compile_body(node, false)?,
                terminate: is_yes(self.attr(node, "terminate")),
            },
            "fallback" => return Ok(None),
            "sort" | "with-param" | "when" | "otherwise" => {
                return Err(Error::Compile(format!("xsl:{} is not allowed here", name)))
            }
            other => return Err(Error::Compile(format!("unsupported instruction xsl:{}", other))),
        };
        Ok(Some(instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::xml;

    fn compile_str(text: &str) -> Result<Stylesheet, Error> {
        compile(&xml::parse_str(text).unwrap())
    }

    const HEADER: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">"#;

    #[test]
    fn test_compile_templates_and_params() {
        let sheet = compile_str(&format!(
            r#"{}
                <xsl:param name="title" select="'Catalog'"/>
                <xsl:output method="text"/>
                <xsl:template match="/">
                    <xsl:apply-templates select="catalog/cd"><xsl:sort select="year"/></xsl:apply-templates>
                </xsl:template>
                <xsl:template match="cd" mode="list">
                    <xsl:param name="n"/>
                    <xsl:value-of select="title"/>
                </xsl:template>
            </xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap();
        assert_eq!(sheet.template_count(), 2);
        assert_eq!(sheet.param_names().collect::<Vec<_>>(), vec!["title"]);
        assert_eq!(sheet.output().method, Some(OutputMethod::Text));
        assert_eq!(sheet.templates[1].params.len(), 1);
        assert_eq!(sheet.templates[1].mode.as_deref(), Some("list"));
        assert_eq!(sheet.templates[1].body.len(), 1);
    }

    #[test]
    fn test_invalid_expression_is_compile_error() {
        let err = compile_str(&format!(
            r#"{}<xsl:template match="/"><xsl:value-of select="catalog/cd["/></xsl:template></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse XSLT stylesheet: invalid expression"));
    }

    #[test]
    fn test_unsupported_instruction() {
        let err = compile_str(&format!(
            r#"{}<xsl:template match="/"><xsl:apply-imports/></xsl:template></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap_err();
        assert_eq!(
            err,
            Error::Compile("unsupported instruction xsl:apply-imports".into())
        );
    }

    #[test]
    fn test_unsupported_top_level_element() {
        let err = compile_str(&format!(
            r#"{}<xsl:include href="other.xslt"/></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap_err();
        assert_eq!(err, Error::Compile("unsupported top-level element xsl:include".into()));
    }

    #[test]
    fn test_keys_may_follow_their_use() {
        let sheet = compile_str(&format!(
            r#"{}
                <xsl:template match="/"><xsl:value-of select="key('by-id', 'b')/@name"/></xsl:template>
                <xsl:key name="by-id" match="item" use="@id"/>
            </xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap();
        assert_eq!(sheet.keys.len(), 1);
        assert_eq!(sheet.keys[0].name, "by-id");
        assert_eq!(sheet.dialect.keys, vec![("by-id".to_string(), "@id".to_string())]);

        let err = compile_str(&format!(
            r#"{}<xsl:template match="/"><xsl:value-of select="key('nope', 1)"/></xsl:template></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap_err();
        assert!(err.to_string().contains("no xsl:key named \"nope\""), "{}", err);
    }

    #[test]
    fn test_number_attributes() {
        let sheet = compile_str(&format!(
            r#"{}<xsl:template match="item">
                <xsl:number level="multiple" count="list|item" format="1.a" grouping-separator="," grouping-size="3"/>
            </xsl:template></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap();
        match &sheet.templates[0].body[0] {
            Instruction::Number { value, level, count, from, grouping, .. } => {
                assert!(value.is_none());
                assert_eq!(*level, NumberLevel::Multiple);
                assert_eq!(count.as_ref().map(Vec::len), Some(2));
                assert!(from.is_none());
                assert_eq!(grouping, &Some((",".to_string(), 3)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = compile_str(&format!(
            r#"{}<xsl:template match="/"><xsl:number level="all"/></xsl:template></xsl:stylesheet>"#,
            HEADER
        ))
        .unwrap_err();
        assert_eq!(err, Error::Compile("invalid xsl:number level \"all\"".into()));
    }

    #[test]
    fn test_version_selects_number_literals() {
        let one = compile_str(&format!(r#"{}</xsl:stylesheet>"#, HEADER)).unwrap();
        assert!(one.is_version_1());
        let two = compile_str(
            r#"<xsl:stylesheet version="2.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"/>"#,
        )
        .unwrap();
        assert!(!two.is_version_1());
    }

    #[test]
    fn test_exslt_prefix_is_recognized() {
        let sheet = compile_str(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
                   xmlns:ext="http://exslt.org/common" extension-element-prefixes="ext">
                <xsl:template match="/"><out><xsl:value-of select="count(ext:node-set(.))"/></out></xsl:template>
            </xsl:stylesheet>"#,
        )
        .unwrap();
        assert_eq!(sheet.dialect.node_set_prefixes, vec!["ext"]);
        match &sheet.templates[0].body[0] {
            Instruction::LiteralElement { namespaces, .. } => assert!(namespaces.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_not_a_stylesheet() {
        assert!(matches!(compile_str("<catalog/>"), Err(Error::Compile(_))));
    }

    #[test]
    fn test_simplified_stylesheet() {
        let sheet = compile_str(
            r#"<html xsl:version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><p><xsl:value-of select="/a"/></p></html>"#,
        )
        .unwrap();
        assert_eq!(sheet.template_count(), 1);
        match &sheet.templates[0].body[0] {
            Instruction::LiteralElement { name, namespaces, attributes, .. } => {
                assert_eq!(name.local, "html");
                assert!(namespaces.is_empty());
                assert!(attributes.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pattern_priorities() {
        assert_eq!(default_priority("cd"), 0.0);
        assert_eq!(default_priority("@id"), 0.0);
        assert_eq!(default_priority("*"), -0.5);
        assert_eq!(default_priority("text()"), -0.5);
        assert_eq!(default_priority("x:*"), -0.25);
        assert_eq!(default_priority("catalog/cd"), 0.5);
        assert_eq!(default_priority("cd[1]"), 0.5);
        assert_eq!(
            pattern_alternatives("a | b[@x='|'] | c"),
            vec!["a", "b[@x='|']", "c"]
        );
    }

    #[test]
    fn test_strip_space_and_exclusions() {
        let sheet = compile_str(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
                   xmlns:h="urn:h" exclude-result-prefixes="h">
                <xsl:strip-space elements="* h:*"/>
                <xsl:preserve-space elements="pre"/>
                <xsl:template match="/"><out/></xsl:template>
            </xsl:stylesheet>"#,
        )
        .unwrap();
        assert_eq!(sheet.strip_space, vec![NameTest::Any, NameTest::Namespace("urn:h".into())]);
        assert_eq!(sheet.preserve_space.len(), 1);
        match &sheet.templates[0].body[0] {
            Instruction::LiteralElement { namespaces, .. } => assert!(namespaces.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
