//! Stylesheet interpreter
//!
//! The source document is loaded into an xee `Documents` store and the
//! result tree is built in the same xot arena, so copies are plain node
//! clones. Everything here is single-threaded: a `Transformer` lives for one
//! transform on one worker.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use xee_xpath::context::{StaticContextBuilder, Variables};
use xee_xpath::query::SequenceQuery;
use xee_xpath::{Atomic, Documents, Item, Queries, Query, Sequence};
use xot::xmlname::OwnedName;
use xot::{NameId, Node, ValueType, Xot};

use super::ast::*;
use super::expr::{Avt, AvtPart, Expr, CURRENT_VAR, LAST_VAR, POSITION_VAR};
use super::number;
use crate::error::Error;
use crate::markup::is_xml_name;

/// Nested template invocations before a transform is aborted
pub const MAX_DEPTH: usize = 500;

fn transform_error(e: impl std::fmt::Display) -> Error {
    Error::Transform(e.to_string())
}

/// Compiled queries, keyed by expression and the variables declared to it
struct QueryCache {
    queries: Queries<'static>,
    namespaces: Vec<(String, String)>,
    compiled: HashMap<String, Vec<(Vec<String>, SequenceQuery)>>,
}

impl QueryCache {
    fn new(namespaces: Vec<(String, String)>) -> Self {
        QueryCache {
            queries: Queries::default(),
            namespaces,
            compiled: HashMap::new(),
        }
    }

    fn get(&mut self, expr: &Expr, names: &[String]) -> Result<SequenceQuery, Error> {
        if let Some(entries) = self.compiled.get(expr.source.as_str()) {
            if let Some((_, query)) = entries.iter().find(|(declared, _)| declared == names) {
                return Ok(query.clone());
            }
        }

        let static_context = {
            let mut builder = StaticContextBuilder::default();
            builder.namespaces(self.namespaces.iter().map(|(p, u)| (p.as_str(), u.as_str())));
            builder.variable_names(names.iter().map(|name| OwnedName::name(name)));
            builder.build()
        };
        let query = self
            .queries
            .sequence_with_context(&expr.source, static_context)
            .map_err(|e| Error::Transform(format!("invalid expression \"{}\": {}", expr.original, e)))?;
        self.compiled
            .entry(expr.source.clone())
            .or_default()
            .push((names.to_vec(), query.clone()));
        Ok(query)
    }
}

/// A bound variable or parameter
#[derive(Clone)]
enum VarValue {
    Sequence(Sequence),
    /// Result tree fragment rooted at a document node
    Fragment(Node),
}

/// The XSLT focus: context node, position, size and current node
#[derive(Debug, Clone, Copy)]
struct Focus {
    node: Node,
    position: usize,
    size: usize,
    current: Node,
}

impl Focus {
    fn single(node: Node) -> Self {
        Focus {
            node,
            position: 1,
            size: 1,
            current: node,
        }
    }
}

type Locals = Vec<(String, VarValue)>;

enum SortKey {
    Text(String),
    Number(f64),
}

fn compare_keys(a: &[SortKey], b: &[SortKey], sorts: &[Sort]) -> Ordering {
    for ((a, b), sort) in a.iter().zip(b).zip(sorts) {
        let ordering = match (a, b) {
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            _ => Ordering::Equal,
        };
        let ordering = if sort.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) struct Transformer<'s> {
    sheet: &'s Stylesheet,
    documents: Documents,
    source: Node,
    queries: QueryCache,
    globals: HashMap<String, VarValue>,
    /// Matching node sets per pattern alternative and tree root
    matches: HashMap<(String, Node), HashSet<Node>>,
    /// Nodes of each `xsl:key`, in document order
    keys: HashMap<usize, Vec<Node>>,
    depth: usize,
}

impl<'s> Transformer<'s> {
    /// Load serialized source XML into a fresh document store
    pub(crate) fn new(sheet: &'s Stylesheet, source_xml: &str) -> Result<Self, Error> {
        let mut documents = Documents::new();
        let handle = documents
            .add_string_without_uri(source_xml)
            .map_err(transform_error)?;
        let source = documents
            .document_node(handle)
            .ok_or_else(|| Error::Transform("source document was not loaded".into()))?;
        Ok(Transformer {
            sheet,
            documents,
            source,
            queries: QueryCache::new(sheet.namespaces.clone()),
            globals: HashMap::new(),
            matches: HashMap::new(),
            keys: HashMap::new(),
            depth: 0,
        })
    }

    pub(crate) fn xot(&self) -> &Xot {
        self.documents.xot()
    }

    pub(crate) fn xot_mut(&mut self) -> &mut Xot {
        self.documents.xot_mut()
    }

    /// Run the transform, returning the result document node
    pub(crate) fn run(&mut self, params: &[(String, String)]) -> Result<Node, Error> {
        self.strip_whitespace()?;
        self.bind_globals(params)?;

        let result = self.xot_mut().new_document();
        let source = self.source;
        self.apply_templates(vec![source], None, &[], result)?;

        let elements: Vec<Node> = self
            .xot()
            .children(result)
            .filter(|&child| self.xot().is_element(child))
            .collect();
        for element in elements {
            self.xot_mut()
                .create_missing_prefixes(element)
                .map_err(transform_error)?;
        }
        Ok(result)
    }

    fn strip_whitespace(&mut self) -> Result<(), Error> {
        let sheet = self.sheet;
        if sheet.strip_space.is_empty() {
            return Ok(());
        }
        let xot = self.xot();
        let stripped: Vec<Node> = xot
            .descendants(self.source)
            .filter(|&node| xot.text_str(node).is_some_and(|t| t.trim().is_empty()))
            .filter(|&node| {
                let Some(parent) = xot.parent(node) else {
                    return false;
                };
                let Some(element) = xot.element(parent) else {
                    return false;
                };
                let (local, namespace) = xot.name_ns_str(element.name());
                let strip = sheet
                    .strip_space
                    .iter()
                    .filter(|test| test.matches(namespace, local))
                    .map(NameTest::priority)
                    .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.max(p))));
                let preserve = sheet
                    .preserve_space
                    .iter()
                    .filter(|test| test.matches(namespace, local))
                    .map(NameTest::priority)
                    .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.max(p))));
                match (strip, preserve) {
                    (Some(s), Some(p)) => s > p,
                    (Some(_), None) => true,
                    _ => false,
                }
            })
            .collect();
        for node in stripped {
            self.xot_mut().remove(node).map_err(transform_error)?;
        }
        Ok(())
    }

    fn bind_globals(&mut self, params: &[(String, String)]) -> Result<(), Error> {
        let sheet = self.sheet;
        for (name, _) in params {
            if !sheet.param_names().any(|declared| declared == name.as_str()) {
                tracing::debug!(param = %name, "ignoring parameter not declared by the stylesheet");
            }
        }

        let focus = Focus::single(self.source);
        for binding in &sheet.globals {
            let supplied = binding
                .is_param
                .then(|| params.iter().rev().find(|(name, _)| name == &binding.name))
                .flatten();
            let value = match supplied {
                Some((name, value)) => {
                    let invalid = |detail: String| {
                        Error::Transform(format!("invalid value for parameter {}: {}", name, detail))
                    };
                    let expr = Expr::with_dialect(value, &sheet.dialect).map_err(invalid)?;
                    let sequence = self.evaluate(&expr, &focus, &[]).map_err(|e| match e {
                        Error::Transform(detail) => invalid(detail),
                        other => other,
                    })?;
                    VarValue::Sequence(sequence)
                }
                None => self.bind(binding, &focus, &mut Vec::new())?,
            };
            self.globals.insert(binding.name.clone(), value);
        }
        Ok(())
    }

    fn lookup<'a>(&'a self, name: &str, locals: &'a [(String, VarValue)]) -> Option<&'a VarValue> {
        locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
            .or_else(|| self.globals.get(name))
    }

    fn to_sequence(&self, value: &VarValue) -> Sequence {
        match value {
            VarValue::Sequence(sequence) => sequence.clone(),
            // the fragment's document node; atomizes to its string value
            VarValue::Fragment(node) => Sequence::from(*node),
        }
    }

    fn evaluate(
        &mut self,
        expr: &Expr,
        focus: &Focus,
        locals: &[(String, VarValue)],
    ) -> Result<Sequence, Error> {
        let mut names = Vec::with_capacity(expr.variables.len());
        let mut variables = Variables::default();
        for name in &expr.variables {
            let value = match (name.as_str(), Expr::key_index(name)) {
                (POSITION_VAR, _) => Sequence::from(focus.position as i64),
                (LAST_VAR, _) => Sequence::from(focus.size as i64),
                (CURRENT_VAR, _) => Sequence::from(focus.current),
                (_, Some(index)) => self.key_nodes(index)?.iter().copied().collect(),
                _ => match self.lookup(name, locals) {
                    Some(value) => self.to_sequence(value),
                    // bound inside the expression itself, or undefined
                    None => continue,
                },
            };
            names.push(name.clone());
            variables.insert(OwnedName::name(name), value);
        }

        let query = self.queries.get(expr, &names)?;
        let node = focus.node;
        query
            .execute_build_context(&mut self.documents, move |builder| {
                builder.context_node(node);
                builder.variables(variables);
            })
            .map_err(|e| Error::Transform(format!("{} in \"{}\"", e, expr.original)))
    }

    fn evaluate_nodes(
        &mut self,
        expr: &Expr,
        focus: &Focus,
        locals: &[(String, VarValue)],
    ) -> Result<Vec<Node>, Error> {
        let sequence = self.evaluate(expr, focus, locals)?;
        let nodes: Result<Vec<Node>, _> = sequence.nodes().collect();
        nodes.map_err(|_| {
            Error::Transform(format!("\"{}\" must select nodes", expr.original))
        })
    }

    fn evaluate_bool(
        &mut self,
        expr: &Expr,
        focus: &Focus,
        locals: &[(String, VarValue)],
    ) -> Result<bool, Error> {
        let sequence = self.evaluate(expr, focus, locals)?;
        sequence.effective_boolean_value().map_err(transform_error)
    }

    /// String value of the first item, or empty
    fn first_string(&self, sequence: &Sequence) -> Result<String, Error> {
        match sequence.iter().next() {
            Some(item) => self.item_string(&item),
            None => Ok(String::new()),
        }
    }

    /// String value of an item; 1.0 stylesheets write doubles the XPath 1.0 way
    fn item_string(&self, item: &Item) -> Result<String, Error> {
        if self.sheet.is_version_1() {
            match item {
                Item::Atomic(Atomic::Double(n)) => return Ok(number::xpath1_string(n.0)),
                Item::Atomic(Atomic::Float(n)) => return Ok(number::xpath1_string(f64::from(n.0))),
                _ => {}
            }
        }
        item.string_value(self.xot()).map_err(transform_error)
    }

    fn evaluate_avt(
        &mut self,
        avt: &Avt,
        focus: &Focus,
        locals: &[(String, VarValue)],
    ) -> Result<String, Error> {
        let mut out = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(expr) => {
                    let sequence = self.evaluate(expr, focus, locals)?;
                    out.push_str(&self.first_string(&sequence)?);
                }
            }
        }
        Ok(out)
    }

    fn bind(&mut self, binding: &Binding, focus: &Focus, locals: &mut Locals) -> Result<VarValue, Error> {
        match &binding.value {
            BindingValue::Select(expr) => Ok(VarValue::Sequence(self.evaluate(expr, focus, locals)?)),
            BindingValue::Content(body) => {
                let fragment = self.xot_mut().new_document();
                self.execute(body, focus, locals, fragment)?;
                Ok(VarValue::Fragment(fragment))
            }
            BindingValue::Empty => Ok(VarValue::Sequence(Sequence::from(""))),
        }
    }

    fn bind_all(&mut self, bindings: &[Binding], focus: &Focus, locals: &mut Locals) -> Result<Locals, Error> {
        let mut bound = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let value = self.bind(binding, focus, locals)?;
            bound.push((binding.name.clone(), value));
        }
        Ok(bound)
    }

    /// Instantiate a body into a scratch node and take its string value
    fn body_string(&mut self, body: &[Instruction], focus: &Focus, locals: &mut Locals) -> Result<String, Error> {
        let scratch = self.xot_mut().new_document();
        self.execute(body, focus, locals, scratch)?;
        Ok(self.xot().string_value(scratch))
    }

    fn root_of(&self, node: Node) -> Node {
        self.xot().ancestors(node).last().unwrap_or(node)
    }

    /// Patterns match within the tree of the node tested, so templates also
    /// apply to nodes of `node-set()` fragments
    fn is_match(&mut self, pattern: &PatternAlternative, node: Node) -> Result<bool, Error> {
        let root = self.root_of(node);
        if pattern.is_root {
            return Ok(node == root && self.xot().value_type(node) == ValueType::Document);
        }
        let key = (pattern.select.source.clone(), root);
        if !self.matches.contains_key(&key) {
            let focus = Focus::single(root);
            let sequence = self.evaluate(&pattern.select, &focus, &[])?;
            let nodes: HashSet<Node> = sequence
                .iter()
                .filter_map(|item| match item {
                    Item::Node(node) => Some(node),
                    _ => None,
                })
                .collect();
            self.matches.insert(key.clone(), nodes);
        }
        Ok(self.matches.get(&key).is_some_and(|nodes| nodes.contains(&node)))
    }

    fn matches_any(&mut self, pattern: &[PatternAlternative], node: Node) -> Result<bool, Error> {
        for alternative in pattern {
            if self.is_match(alternative, node)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Nodes of the source document matching key `index`'s pattern
    fn key_nodes(&mut self, index: usize) -> Result<&[Node], Error> {
        if !self.keys.contains_key(&index) {
            let sheet = self.sheet;
            let key = sheet
                .keys
                .get(index)
                .ok_or_else(|| Error::Transform(format!("no xsl:key number {}", index)))?;
            let candidates: Vec<Node> = self.xot().all_descendants(self.source).collect();
            let mut nodes = Vec::new();
            for node in candidates {
                if self.matches_any(&key.alternatives, node)? {
                    nodes.push(node);
                }
            }
            tracing::trace!(key = %key.name, nodes = nodes.len(), "indexed key");
            self.keys.insert(index, nodes);
        }
        Ok(self.keys.get(&index).map(Vec::as_slice).unwrap_or_default())
    }

    /// Highest priority template for `node`; the last one wins ties
    fn find_template(&mut self, node: Node, mode: Option<&str>) -> Result<Option<usize>, Error> {
        let sheet = self.sheet;
        let mut best: Option<(f64, usize)> = None;
        for (index, template) in sheet.templates.iter().enumerate() {
            if template.mode.as_deref() != mode {
                continue;
            }
            for pattern in &template.alternatives {
                let priority = template.priority.unwrap_or(pattern.priority);
                if best.is_some_and(|(p, _)| priority < p) {
                    continue;
                }
                if self.is_match(pattern, node)? {
                    best = Some((priority, index));
                }
            }
        }
        Ok(best.map(|(_, index)| index))
    }

    fn apply_templates(
        &mut self,
        nodes: Vec<Node>,
        mode: Option<&str>,
        params: &[(String, VarValue)],
        parent: Node,
    ) -> Result<(), Error> {
        let size = nodes.len();
        for (i, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
                current: node,
            };
            match self.find_template(node, mode)? {
                Some(index) => self.invoke(index, &focus, params, parent)?,
                None => self.builtin(&focus, mode, parent)?,
            }
        }
        Ok(())
    }

    fn builtin(&mut self, focus: &Focus, mode: Option<&str>, parent: Node) -> Result<(), Error> {
        let node = focus.node;
        match self.xot().value_type(node) {
            ValueType::Document | ValueType::Element => {
                let children: Vec<Node> = self.xot().children(node).collect();
                self.apply_templates(children, mode, &[], parent)
            }
            ValueType::Text => {
                let text = self.xot().text_str(node).unwrap_or_default().to_string();
                self.add_text(parent, &text)
            }
            ValueType::Attribute => {
                let value = self
                    .xot()
                    .attribute_node(node)
                    .map(|attribute| attribute.value().to_string())
                    .unwrap_or_default();
                self.add_text(parent, &value)
            }
            _ => Ok(()),
        }
    }

    fn invoke(
        &mut self,
        index: usize,
        focus: &Focus,
        params: &[(String, VarValue)],
        parent: Node,
    ) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::Transform(format!(
                "template recursion deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let sheet = self.sheet;
        let template = &sheet.templates[index];
        let mut locals: Locals = Vec::new();
        for param in &template.params {
            let value = match params.iter().find(|(name, _)| name == &param.name) {
                Some((_, value)) => value.clone(),
                None => self.bind(param, focus, &mut locals)?,
            };
            locals.push((param.name.clone(), value));
        }
        self.execute(&template.body, focus, &mut locals, parent)?;

        self.depth -= 1;
        Ok(())
    }

    fn sort_nodes(
        &mut self,
        nodes: Vec<Node>,
        sorts: &[Sort],
        locals: &[(String, VarValue)],
    ) -> Result<Vec<Node>, Error> {
        if sorts.is_empty() {
            return Ok(nodes);
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (i, node) in nodes.into_iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
                current: node,
            };
            let mut keys = Vec::with_capacity(sorts.len());
            for sort in sorts {
                let sequence = self.evaluate(&sort.select, &focus, locals)?;
                let text = self.first_string(&sequence)?;
                keys.push(if sort.numeric {
                    SortKey::Number(text.trim().parse().unwrap_or(f64::NAN))
                } else {
                    SortKey::Text(text)
                });
            }
            keyed.push((keys, node));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, sorts));
        Ok(keyed.into_iter().map(|(_, node)| node).collect())
    }

    fn execute(
        &mut self,
        body: &[Instruction],
        focus: &Focus,
        locals: &mut Locals,
        parent: Node,
    ) -> Result<(), Error> {
        let mark = locals.len();
        for instruction in body {
            self.instruction(instruction, focus, locals, parent)?;
        }
        locals.truncate(mark);
        Ok(())
    }

    fn instruction(
        &mut self,
        instruction: &Instruction,
        focus: &Focus,
        locals: &mut Locals,
        parent: Node,
    ) -> Result<(), Error> {
        match instruction {
            Instruction::Text(text) => self.add_text(parent, text),
            Instruction::LiteralElement { name, namespaces, attributes, body } => {
                let name = self.result_name(&name.local, &name.namespace);
                let element = self.xot_mut().new_element(name);
                for (prefix, uri) in namespaces {
                    self.declare(element, prefix, uri);
                }
                self.xot_mut().append(parent, element).map_err(transform_error)?;
                for (attribute, avt) in attributes {
                    let value = self.evaluate_avt(avt, focus, locals)?;
                    let name = self.result_name(&attribute.local, &attribute.namespace);
                    self.xot_mut().attributes_mut(element).insert(name, value);
                }
                self.execute(body, focus, locals, element)
            }
            Instruction::ApplyTemplates { select, mode, sorts, params } => {
                let nodes = match select {
                    Some(select) => self.evaluate_nodes(select, focus, locals)?,
                    None => self.xot().children(focus.node).collect(),
                };
                let nodes = self.sort_nodes(nodes, sorts, locals)?;
                let params = self.bind_all(params, focus, locals)?;
                self.apply_templates(nodes, mode.as_deref(), &params, parent)
            }
            Instruction::CallTemplate { name, params } => {
                let sheet = self.sheet;
                let index = sheet
                    .templates
                    .iter()
                    .rposition(|template| template.name.as_deref() == Some(name.as_str()))
                    .ok_or_else(|| Error::Transform(format!("no template named \"{}\"", name)))?;
                let params = self.bind_all(params, focus, locals)?;
                self.invoke(index, focus, &params, parent)
            }
            Instruction::ForEach { select, sorts, body } => {
                let nodes = self.evaluate_nodes(select, focus, locals)?;
                let nodes = self.sort_nodes(nodes, sorts, locals)?;
                let size = nodes.len();
                for (i, node) in nodes.into_iter().enumerate() {
                    let inner = Focus {
                        node,
                        position: i + 1,
                        size,
                        current: node,
                    };
                    self.execute(body, &inner, locals, parent)?;
                }
                Ok(())
            }
            Instruction::ValueOf { select } => {
                let sequence = self.evaluate(select, focus, locals)?;
                let text = self.first_string(&sequence)?;
                self.add_text(parent, &text)
            }
            Instruction::CopyOf { select } => {
                let sequence = self.evaluate(select, focus, locals)?;
                for item in sequence.iter() {
                    match item {
                        Item::Node(node) => self.copy_node(node, parent)?,
                        other => {
                            let text = self.item_string(&other)?;
                            self.add_text(parent, &text)?;
                        }
                    }
                }
                Ok(())
            }
            Instruction::Copy { body } => self.shallow_copy(focus, body, locals, parent),
            Instruction::If { test, body } => {
                if self.evaluate_bool(test, focus, locals)? {
                    self.execute(body, focus, locals, parent)?;
                }
                Ok(())
            }
            Instruction::Choose { branches, otherwise } => {
                for (test, body) in branches {
                    if self.evaluate_bool(test, focus, locals)? {
                        return self.execute(body, focus, locals, parent);
                    }
                }
                self.execute(otherwise, focus, locals, parent)
            }
            Instruction::Element { name, namespace, scope, body } => {
                let (prefix, local, uri) =
                    self.computed_name(name, namespace.as_ref(), scope, true, focus, locals)?;
                let name = self.result_name(&local, &uri);
                let element = self.xot_mut().new_element(name);
                if !uri.is_empty() {
                    self.declare(element, &prefix, &uri);
                }
                self.xot_mut().append(parent, element).map_err(transform_error)?;
                self.execute(body, focus, locals, element)
            }
            Instruction::Attribute { name, namespace, scope, body } => {
                let (prefix, local, uri) =
                    self.computed_name(name, namespace.as_ref(), scope, false, focus, locals)?;
                let value = self.body_string(body, focus, locals)?;
                if !self.xot().is_element(parent) {
                    tracing::debug!(attribute = %local, "attribute outside an element is ignored");
                    return Ok(());
                }
                let name = self.result_name(&local, &uri);
                if !uri.is_empty() && !prefix.is_empty() {
                    self.declare(parent, &prefix, &uri);
                }
                self.xot_mut().attributes_mut(parent).insert(name, value);
                Ok(())
            }
            Instruction::Comment { body } => {
                let text = self.body_string(body, focus, locals)?.replace("--", "- -");
                let comment = self.xot_mut().new_comment(&text);
                self.xot_mut().append(parent, comment).map_err(transform_error)
            }
            Instruction::ProcessingInstruction { name, body } => {
                let target = self.evaluate_avt(name, focus, locals)?;
                if !is_xml_name(&target) {
                    return Err(Error::Transform(format!(
                        "invalid processing instruction name \"{}\"",
                        target
                    )));
                }
                let data = self.body_string(body, focus, locals)?;
                let target = self.xot_mut().add_name(&target);
                let data = (!data.is_empty()).then_some(data.as_str());
                let pi = self.xot_mut().new_processing_instruction(target, data);
                self.xot_mut().append(parent, pi).map_err(transform_error)
            }
            Instruction::Number { value, level, count, from, format, grouping } => {
                let numbers = match value {
                    Some(value) => {
                        let sequence = self.evaluate(value, focus, locals)?;
                        let text = self.first_string(&sequence)?;
                        let n = (text.trim().parse::<f64>().unwrap_or(f64::NAN) + 0.5).floor();
                        if !n.is_finite() || n < 0.0 {
                            return self.add_text(parent, &number::xpath1_string(n));
                        }
                        vec![n as u64]
                    }
                    None => self.count_nodes(focus.node, *level, count.as_deref(), from.as_deref())?,
                };
                let format = self.evaluate_avt(format, focus, locals)?;
                let text = number::format_numbers(&numbers, &format, grouping.as_ref());
                self.add_text(parent, &text)
            }
            Instruction::Variable(binding) => {
                let value = self.bind(binding, focus, locals)?;
                locals.push((binding.name.clone(), value));
                Ok(())
            }
            Instruction::Message { body, terminate } => {
                let message = self.body_string(body, focus, locals)?;
                tracing::info!(target: "xsltkit::message", "{}", message);
                if *terminate {
                    return Err(Error::Transform(format!(
                        "terminated by xsl:message: {}",
                        message
                    )));
                }
                Ok(())
            }
        }
    }

    /// The node `xsl:number` counts when no `count` pattern is given
    fn counts(&mut self, count: Option<&[PatternAlternative]>, node: Node, candidate: Node) -> Result<bool, Error> {
        match count {
            Some(pattern) => self.matches_any(pattern, candidate),
            None => {
                let xot = self.xot();
                Ok(xot.value_type(candidate) == xot.value_type(node)
                    && xot.node_name(candidate) == xot.node_name(node))
            }
        }
    }

    /// Position numbers for `xsl:number` without a `value`
    fn count_nodes(
        &mut self,
        node: Node,
        level: NumberLevel,
        count: Option<&[PatternAlternative]>,
        from: Option<&[PatternAlternative]>,
    ) -> Result<Vec<u64>, Error> {
        if level == NumberLevel::Any {
            let root = self.root_of(node);
            // every node up to and including `node`, in document order
            let mut preceding: Vec<Node> = Vec::new();
            for candidate in self.xot().all_descendants(root) {
                preceding.push(candidate);
                if candidate == node {
                    break;
                }
            }
            let mut n = 0;
            for candidate in preceding {
                if let Some(from) = from {
                    if self.matches_any(from, candidate)? {
                        n = 0;
                    }
                }
                if self.counts(count, node, candidate)? {
                    n += 1;
                }
            }
            return Ok(if n == 0 { Vec::new() } else { vec![n] });
        }

        let ancestors: Vec<Node> = self.xot().ancestors(node).collect();
        let mut counted = Vec::new();
        for ancestor in ancestors {
            if let Some(from) = from {
                if self.matches_any(from, ancestor)? {
                    break;
                }
            }
            if self.counts(count, node, ancestor)? {
                counted.push(ancestor);
                if level == NumberLevel::Single {
                    break;
                }
            }
        }

        let mut numbers = Vec::with_capacity(counted.len());
        for target in counted.into_iter().rev() {
            // preceding_siblings starts with the node itself
            let siblings: Vec<Node> = self.xot().preceding_siblings(target).skip(1).collect();
            let mut n = 1;
            for sibling in siblings {
                if self.counts(count, node, sibling)? {
                    n += 1;
                }
            }
            numbers.push(n);
        }
        Ok(numbers)
    }

    /// Resolve an `xsl:element` / `xsl:attribute` name to prefix, local, URI
    fn computed_name(
        &mut self,
        name: &Avt,
        namespace: Option<&Avt>,
        scope: &[(String, String)],
        use_default: bool,
        focus: &Focus,
        locals: &[(String, VarValue)],
    ) -> Result<(String, String, String), Error> {
        let qname = self.evaluate_avt(name, focus, locals)?;
        let (prefix, local) = match qname.split_once(':') {
            Some((prefix, local)) => (prefix.to_string(), local.to_string()),
            None => (String::new(), qname.clone()),
        };
        if !is_xml_name(&local) || (!prefix.is_empty() && !is_xml_name(&prefix)) {
            return Err(Error::Transform(format!("invalid name \"{}\"", qname)));
        }
        let uri = match namespace {
            Some(namespace) => self.evaluate_avt(namespace, focus, locals)?,
            None if prefix.is_empty() && !use_default => String::new(),
            None => scope
                .iter()
                .find(|(p, _)| p == &prefix)
                .map(|(_, uri)| uri.clone())
                .or_else(|| prefix.is_empty().then(String::new))
                .ok_or_else(|| {
                    Error::Transform(format!("undeclared namespace prefix \"{}\"", prefix))
                })?,
        };
        Ok((prefix, local, uri))
    }

    fn result_name(&mut self, local: &str, namespace: &str) -> NameId {
        let xot = self.xot_mut();
        if namespace.is_empty() {
            xot.add_name(local)
        } else {
            let namespace = xot.add_namespace(namespace);
            xot.add_name_ns(local, namespace)
        }
    }

    fn declare(&mut self, element: Node, prefix: &str, uri: &str) {
        let xot = self.xot_mut();
        let prefix = xot.add_prefix(prefix);
        let namespace = xot.add_namespace(uri);
        xot.namespaces_mut(element).insert(prefix, namespace);
    }

    fn add_text(&mut self, parent: Node, text: &str) -> Result<(), Error> {
        if text.is_empty() {
            return Ok(());
        }
        self.xot_mut().append_text(parent, text).map_err(transform_error)
    }

    /// Deep copy of a node; documents copy their children
    fn copy_node(&mut self, node: Node, parent: Node) -> Result<(), Error> {
        match self.xot().value_type(node) {
            ValueType::Document => {
                let children: Vec<Node> = self.xot().children(node).collect();
                for child in children {
                    self.copy_node(child, parent)?;
                }
                Ok(())
            }
            ValueType::Attribute => {
                let Some((name, value)) = self
                    .xot()
                    .attribute_node(node)
                    .map(|attribute| (attribute.name(), attribute.value().to_string()))
                else {
                    return Ok(());
                };
                if self.xot().is_element(parent) {
                    self.xot_mut().attributes_mut(parent).insert(name, value);
                }
                Ok(())
            }
            ValueType::Namespace => Ok(()),
            _ => {
                let copy = self.xot_mut().clone_node(node);
                self.xot_mut().append(parent, copy).map_err(transform_error)
            }
        }
    }

    fn shallow_copy(
        &mut self,
        focus: &Focus,
        body: &[Instruction],
        locals: &mut Locals,
        parent: Node,
    ) -> Result<(), Error> {
        let node = focus.node;
        match self.xot().value_type(node) {
            ValueType::Document => self.execute(body, focus, locals, parent),
            ValueType::Element => {
                let Some(name) = self.xot().element(node).map(|element| element.name()) else {
                    return Ok(());
                };
                let declarations: Vec<_> = self
                    .xot()
                    .namespaces(node)
                    .iter()
                    .map(|(prefix, namespace)| (prefix, *namespace))
                    .collect();
                let element = self.xot_mut().new_element(name);
                for (prefix, namespace) in declarations {
                    self.xot_mut().namespaces_mut(element).insert(prefix, namespace);
                }
                self.xot_mut().append(parent, element).map_err(transform_error)?;
                self.execute(body, focus, locals, element)
            }
            ValueType::Text => {
                let text = self.xot().text_str(node).unwrap_or_default().to_string();
                self.add_text(parent, &text)
            }
            ValueType::Namespace => Ok(()),
            ValueType::Attribute | ValueType::Comment | ValueType::ProcessingInstruction => {
                self.copy_node(node, parent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<Vec<SortKey>> {
        values.iter().map(|v| vec![SortKey::Text(v.to_string())]).collect()
    }

    #[test]
    fn test_compare_keys_text_and_order() {
        let ascending = [Sort { select: Expr::new("."), numeric: false, descending: false }];
        let descending = [Sort { select: Expr::new("."), numeric: false, descending: true }];
        let k = keys(&["a", "b"]);
        assert_eq!(compare_keys(&k[0], &k[1], &ascending), Ordering::Less);
        assert_eq!(compare_keys(&k[0], &k[1], &descending), Ordering::Greater);
    }

    #[test]
    fn test_compare_keys_numbers_put_nan_first() {
        let sorts = [Sort { select: Expr::new("."), numeric: true, descending: false }];
        let nan = [SortKey::Number(f64::NAN)];
        let two = [SortKey::Number(2.0)];
        let ten = [SortKey::Number(10.0)];
        assert_eq!(compare_keys(&nan, &two, &sorts), Ordering::Less);
        assert_eq!(compare_keys(&two, &ten, &sorts), Ordering::Less);
    }
}
