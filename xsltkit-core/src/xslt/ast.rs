//! Compiled stylesheet representation

use super::expr::{Avt, Dialect, Expr};

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// A compiled stylesheet
///
/// Holds no xot nodes, so it can be shared by transforms on any thread.
#[derive(Debug)]
pub struct Stylesheet {
    pub(crate) templates: Vec<Template>,
    /// Top-level params and variables in document order
    pub(crate) globals: Vec<Binding>,
    pub(crate) output: OutputSpec,
    pub(crate) strip_space: Vec<NameTest>,
    pub(crate) preserve_space: Vec<NameTest>,
    /// Prefix to namespace URI, for XPath compilation
    pub(crate) namespaces: Vec<(String, String)>,
    /// `xsl:key` declarations, indexed like `dialect.keys`
    pub(crate) keys: Vec<Key>,
    pub(crate) dialect: Dialect,
}

impl Stylesheet {
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn output(&self) -> &OutputSpec {
        &self.output
    }

    /// XSLT 1.0 number semantics are in effect
    pub fn is_version_1(&self) -> bool {
        self.dialect.double_literals
    }

    /// Names of the top-level `xsl:param` declarations
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.globals
            .iter()
            .filter(|binding| binding.is_param)
            .map(|binding| binding.name.as_str())
    }

    /// Release the compiled form. Only the handle layer calls this.
    pub(crate) fn free(self) {
        tracing::trace!(templates = self.templates.len(), "freeing stylesheet");
        drop(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutputMethod {
    #[default]
    Xml,
    Html,
    Text,
}

/// Settings from `xsl:output`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSpec {
    /// None selects html or xml from the result's root element
    pub method: Option<OutputMethod>,
    pub indent: bool,
    pub omit_xml_declaration: bool,
    pub encoding: Option<String>,
}

/// An element name test from `xsl:strip-space` / `xsl:preserve-space`
#[derive(Debug, Clone, PartialEq)]
pub enum NameTest {
    Any,
    Namespace(String),
    Name { namespace: String, local: String },
}

impl NameTest {
    pub fn matches(&self, namespace: &str, local: &str) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Namespace(ns) => ns == namespace,
            NameTest::Name { namespace: ns, local: l } => ns == namespace && l == local,
        }
    }

    /// Default priority, used to decide between strip and preserve
    pub fn priority(&self) -> f64 {
        match self {
            NameTest::Any => -0.5,
            NameTest::Namespace(_) => -0.25,
            NameTest::Name { .. } => 0.0,
        }
    }
}

/// One `|` alternative of a match pattern
#[derive(Debug, Clone)]
pub struct PatternAlternative {
    /// Expression selecting every matching node, evaluated from the root
    pub select: Expr,
    pub priority: f64,
    /// The alternative is exactly `/`
    pub is_root: bool,
}

/// An `xsl:key` declaration; its `use` expression lives in the dialect
#[derive(Debug, Clone)]
pub struct Key {
    pub name: String,
    pub alternatives: Vec<PatternAlternative>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub pattern: Option<String>,
    pub alternatives: Vec<PatternAlternative>,
    pub name: Option<String>,
    pub mode: Option<String>,
    /// Explicit `priority` attribute, overriding per-alternative defaults
    pub priority: Option<f64>,
    pub params: Vec<Binding>,
    pub body: Vec<Instruction>,
}

/// An `xsl:param`, `xsl:variable` or `xsl:with-param`
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub value: BindingValue,
    pub is_param: bool,
}

#[derive(Debug, Clone)]
pub enum BindingValue {
    Select(Expr),
    /// Content builds a result tree fragment
    Content(Vec<Instruction>),
    /// Neither select nor content: the empty string
    Empty,
}

/// An expanded name resolved at compile time
#[derive(Debug, Clone, PartialEq)]
pub struct QName {
    pub namespace: String,
    pub local: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub select: Expr,
    pub numeric: bool,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NumberLevel {
    #[default]
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone)]
pub enum Instruction {
    Text(String),
    LiteralElement {
        name: QName,
        /// Declarations to copy, prefix and URI
        namespaces: Vec<(String, String)>,
        attributes: Vec<(QName, Avt)>,
        body: Vec<Instruction>,
    },
    ApplyTemplates {
        select: Option<Expr>,
        mode: Option<String>,
        sorts: Vec<Sort>,
        params: Vec<Binding>,
    },
    CallTemplate {
        name: String,
        params: Vec<Binding>,
    },
    ForEach {
        select: Expr,
        sorts: Vec<Sort>,
        body: Vec<Instruction>,
    },
    ValueOf {
        select: Expr,
    },
    CopyOf {
        select: Expr,
    },
    Copy {
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        branches: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Vec<Instruction>,
    },
    Element {
        name: Avt,
        namespace: Option<Avt>,
        /// In-scope prefixes for resolving a computed name
        scope: Vec<(String, String)>,
        body: Vec<Instruction>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        scope: Vec<(String, String)>,
        body: Vec<Instruction>,
    },
    Comment {
        body: Vec<Instruction>,
    },
    ProcessingInstruction {
        name: Avt,
        body: Vec<Instruction>,
    },
    Number {
        value: Option<Expr>,
        level: NumberLevel,
        /// None counts nodes of the current node's type and name
        count: Option<Vec<PatternAlternative>>,
        from: Option<Vec<PatternAlternative>>,
        format: Avt,
        /// Separator and group size
        grouping: Option<(String, usize)>,
    },
    Variable(Binding),
    Message {
        body: Vec<Instruction>,
        terminate: bool,
    },
}
