//! XPath expressions as they appear in stylesheets
//!
//! The XPath engine always evaluates with a context position of 1, so the
//! XSLT focus functions are rewritten into hidden variables before
//! compilation: `position()` and `last()` outside predicates, and
//! `current()` everywhere.
//!
//! A stylesheet's [`Dialect`] adds rewrites of its own: `key()` calls become
//! predicates over hidden per-key variables, EXSLT `node-set()` becomes a
//! plain grouping, and 1.0 stylesheets get double number literals so that
//! arithmetic follows XPath 1.0 (`1 div 0` is infinity, not an error).

/// Hidden variable holding the context position
pub const POSITION_VAR: &str = "xsltkit-position";
/// Hidden variable holding the context size
pub const LAST_VAR: &str = "xsltkit-last";
/// Hidden variable holding the XSLT current node
pub const CURRENT_VAR: &str = "xsltkit-current";

/// Prefix of the hidden variables holding each `xsl:key`'s nodes
pub const KEY_VAR_PREFIX: &str = "xsltkit-key-";
/// Let-bound variable holding the looked-up key value
const KEY_VALUE_VAR: &str = "xsltkit-key-value";

/// The EXSLT common functions namespace
pub const EXSLT_COMMON: &str = "http://exslt.org/common";

/// Stylesheet-wide rewriting rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dialect {
    /// Number literals are doubles, as in XPath 1.0
    pub double_literals: bool,
    /// Prefixes bound to [`EXSLT_COMMON`]
    pub node_set_prefixes: Vec<String>,
    /// `xsl:key` declarations in stylesheet order: name and `use` text
    pub keys: Vec<(String, String)>,
}

impl Dialect {
    fn is_node_set(&self, name: &str) -> bool {
        name.split_once(':').is_some_and(|(prefix, local)| {
            local == "node-set" && self.node_set_prefixes.iter().any(|p| p == prefix)
        })
    }

    /// Rewrite `key()` and `node-set()` calls, innermost arguments included
    fn rewrite_calls(&self, text: &str) -> Result<String, String> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '\'' || c == '"' {
                let end = string_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
                continue;
            }
            let preceded_by_name = i > 0 && {
                let p = chars[i - 1];
                is_name_char(p) || matches!(p, '$' | ':' | '@')
            };
            if !(c.is_alphabetic() || c == '_') || preceded_by_name {
                out.push(c);
                i += 1;
                continue;
            }

            let start = i;
            i = qname_end(&chars, i);
            let name: String = chars[start..i].iter().collect();
            let mut open = i;
            while open < chars.len() && chars[open].is_whitespace() {
                open += 1;
            }
            let is_call = chars.get(open) == Some(&'(') && chars.get(open + 1) != Some(&':');
            if !is_call || !(name == "key" || self.is_node_set(&name)) {
                out.push_str(&name);
                continue;
            }

            let (args, close) = split_arguments(&chars, open)
                .ok_or_else(|| format!("unbalanced parentheses in \"{}\"", text))?;
            out.push_str(&self.expand_call(&name, &args)?);
            i = close;
        }
        Ok(out)
    }

    fn expand_call(&self, name: &str, args: &[String]) -> Result<String, String> {
        if name != "key" {
            // result tree fragments already are node sequences
            let [arg] = args else {
                return Err(format!("{}() takes 1 argument, not {}", name, args.len()));
            };
            return Ok(format!("({})", self.rewrite_calls(arg)?));
        }

        let [key_name, value] = args else {
            return Err(format!("key() takes 2 arguments, not {}", args.len()));
        };
        let key_name = unquote(key_name)
            .ok_or_else(|| format!("key() needs a literal key name, not {}", key_name))?;
        let terms: Vec<String> = self
            .keys
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| name == key_name)
            .map(|(index, (_, use_expr))| {
                format!("${}{}[({}) = ${}]", KEY_VAR_PREFIX, index, use_expr, KEY_VALUE_VAR)
            })
            .collect();
        if terms.is_empty() {
            return Err(format!("no xsl:key named \"{}\"", key_name));
        }
        Ok(format!(
            "(let ${} := ({}) return ({}))",
            KEY_VALUE_VAR,
            self.rewrite_calls(value)?,
            terms.join(" | ")
        ))
    }
}

/// A rewritten XPath expression and the variables it references
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Text as written in the stylesheet
    pub original: String,
    /// Text handed to the XPath compiler
    pub source: String,
    /// Referenced variable names, without `$`, deduplicated
    pub variables: Vec<String>,
}

impl Expr {
    pub fn new(original: &str) -> Self {
        Expr::from_source(original, rewrite_focus_functions(original))
    }

    pub fn with_dialect(original: &str, dialect: &Dialect) -> Result<Self, String> {
        let mut text = dialect.rewrite_calls(original)?;
        if dialect.double_literals {
            text = double_literals(&text);
        }
        Ok(Expr::from_source(original, rewrite_focus_functions(&text)))
    }

    fn from_source(original: &str, source: String) -> Self {
        let variables = referenced_variables(&source);
        Expr {
            original: original.to_string(),
            source,
            variables,
        }
    }

    /// Index of the `xsl:key` a hidden variable stands for
    pub fn key_index(variable: &str) -> Option<usize> {
        variable.strip_prefix(KEY_VAR_PREFIX)?.parse().ok()
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Index just past the string literal starting at `start`
fn string_end(chars: &[char], start: usize) -> usize {
    chars[start + 1..]
        .iter()
        .position(|&q| q == chars[start])
        .map(|p| start + p + 2)
        .unwrap_or(chars.len())
}

/// Index just past the (possibly prefixed) name starting at `start`
fn qname_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_name_char(chars[end]) {
        end += 1;
    }
    let prefixed = chars.get(end) == Some(&':')
        && chars.get(end + 1).is_some_and(|&c| c.is_alphabetic() || c == '_');
    if prefixed {
        end += 1;
        while end < chars.len() && is_name_char(chars[end]) {
            end += 1;
        }
    }
    end
}

/// Top-level arguments of the call whose `(` is at `open`, and the index
/// just past its `)`
fn split_arguments(chars: &[char], open: usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = open + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = string_end(chars, i);
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => {
                if !current.trim().is_empty() || !args.is_empty() {
                    args.push(current.trim().to_string());
                }
                return Some((args, i + 1));
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }
    None
}

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    let quote = text.chars().next().filter(|&c| c == '\'' || c == '"')?;
    text.strip_prefix(quote)?.strip_suffix(quote)
}

/// Give integer and decimal literals an exponent, making them doubles
fn double_literals(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            // names may contain digits and dots
            let start = i;
            while i < chars.len() && is_name_char(chars[i]) {
                i += 1;
            }
            out.extend(&chars[start..i]);
            continue;
        }
        let starts_number =
            c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit));
        if !starts_number {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if chars.get(i) == Some(&'.') && chars.get(i + 1) != Some(&'.') {
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
        out.extend(&chars[start..i]);
        if matches!(chars.get(i), Some('e' | 'E')) {
            continue;
        }
        out.push_str("e0");
    }
    out
}

/// Replace `position()`, `last()` and `current()` calls
fn rewrite_focus_functions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .map(|p| i + 1 + p)
                    .unwrap_or(chars.len() - 1);
                out.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }

        let preceded_by_name = i > 0 && {
            let p = chars[i - 1];
            is_name_char(p) || p == '$' || p == ':'
        };
        if c.is_alphabetic() && !preceded_by_name {
            let start = i;
            while i < chars.len() && is_name_char(chars[i]) {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();

            // `name ( )` with optional whitespace
            let mut j = i;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let mut call_end = None;
            if j < chars.len() && chars[j] == '(' && !(j + 1 < chars.len() && chars[j + 1] == ':') {
                let mut k = j + 1;
                while k < chars.len() && chars[k].is_whitespace() {
                    k += 1;
                }
                if k < chars.len() && chars[k] == ')' {
                    call_end = Some(k + 1);
                }
            }
            let is_prefixed = i < chars.len() && chars[i] == ':' && chars.get(i + 1) != Some(&':');

            let replacement = match (name.as_str(), call_end, is_prefixed) {
                ("position", Some(_), false) if depth == 0 => Some(POSITION_VAR),
                ("last", Some(_), false) if depth == 0 => Some(LAST_VAR),
                ("current", Some(_), false) => Some(CURRENT_VAR),
                _ => None,
            };
            match (replacement, call_end) {
                (Some(var), Some(end)) => {
                    out.push('$');
                    out.push_str(var);
                    i = end;
                }
                _ => out.push_str(&name),
            }
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

/// Names of `$variable` references outside string literals
fn referenced_variables(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut names: Vec<String> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' {
            i = chars[i + 1..]
                .iter()
                .position(|&q| q == c)
                .map(|p| i + 2 + p)
                .unwrap_or(chars.len());
            continue;
        }
        if c == '$' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_name_char(chars[end]) {
                end += 1;
            }
            if end > start {
                let name: String = chars[start..end].iter().collect();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            i = end;
            continue;
        }
        i += 1;
    }
    names
}

/// One piece of an attribute value template
#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expr(Expr),
}

/// An attribute value template such as `item-{position()}`
#[derive(Debug, Clone, PartialEq)]
pub struct Avt {
    pub parts: Vec<AvtPart>,
}

impl Avt {
    pub fn parse(text: &str) -> Result<Self, String> {
        Avt::parse_with(text, &Dialect::default())
    }

    pub fn parse_with(text: &str, dialect: &Dialect) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(format!("unmatched '}}' in attribute value template \"{}\"", text)),
                '{' => {
                    let mut expr = String::new();
                    let mut quote: Option<char> = None;
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match quote {
                            Some(q) if c == q => quote = None,
                            Some(_) => {}
                            None if c == '\'' || c == '"' => quote = Some(c),
                            None if c == '}' => {
                                closed = true;
                                break;
                            }
                            None => {}
                        }
                        expr.push(c);
                    }
                    if !closed {
                        return Err(format!("unterminated '{{' in attribute value template \"{}\"", text));
                    }
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expr(Expr::with_dialect(expr.trim(), dialect)?));
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Avt { parts })
    }

    /// The template has no expressions
    pub fn as_literal(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Expr(_) => return None,
            }
        }
        Some(out)
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.parts.iter().filter_map(|part| match part {
            AvtPart::Expr(expr) => Some(expr),
            AvtPart::Literal(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_focus_functions_outside_predicates() {
        assert_eq!(
            Expr::new("position() = last()").source,
            "$xsltkit-position = $xsltkit-last"
        );
        assert_eq!(Expr::new("item[position() > 1]").source, "item[position() > 1]");
        assert_eq!(
            Expr::new("concat(position( ), '.')").source,
            "concat($xsltkit-position, '.')"
        );
        assert_eq!(
            Expr::new("//a[@id = current()/@ref]").source,
            "//a[@id = $xsltkit-current/@ref]"
        );
    }

    #[test]
    fn test_leaves_strings_and_other_names_alone() {
        assert_eq!(Expr::new("'position()'").source, "'position()'");
        assert_eq!(Expr::new("my-last()").source, "my-last()");
        assert_eq!(Expr::new("fn:position()").source, "fn:position()");
        assert_eq!(Expr::new("last").source, "last");
    }

    #[test]
    fn test_collects_variables() {
        let expr = Expr::new("$a + $b-c * $a + string('$d')");
        assert_eq!(expr.variables, vec!["a", "b-c"]);
        assert_eq!(Expr::new("position()").variables, vec![POSITION_VAR]);
    }

    fn keyed() -> Dialect {
        Dialect {
            double_literals: false,
            node_set_prefixes: vec!["exsl".into()],
            keys: vec![("by-id".into(), "@id".into()), ("by-id".into(), "@ref".into())],
        }
    }

    #[test]
    fn test_key_calls_become_predicates() {
        let expr = Expr::with_dialect("key('by-id', @target)/name", &keyed()).unwrap();
        assert_eq!(
            expr.source,
            "(let $xsltkit-key-value := (@target) return \
             ($xsltkit-key-0[(@id) = $xsltkit-key-value] | $xsltkit-key-1[(@ref) = $xsltkit-key-value]))/name"
        );
        assert!(expr.variables.contains(&"xsltkit-key-0".to_string()));
        assert_eq!(Expr::key_index("xsltkit-key-1"), Some(1));
        assert_eq!(Expr::key_index("xsltkit-key-value"), None);
    }

    #[test]
    fn test_key_call_errors() {
        let dialect = keyed();
        assert!(Expr::with_dialect("key('missing', 1)", &dialect).unwrap_err().contains("missing"));
        assert!(Expr::with_dialect("key($name, 1)", &dialect).is_err());
        assert!(Expr::with_dialect("key('by-id')", &dialect).is_err());
        assert!(Expr::with_dialect("key('by-id', (1)", &dialect).is_err());
        // element and variable names are not calls
        assert_eq!(Expr::with_dialect("key/@id", &dialect).unwrap().source, "key/@id");
    }

    #[test]
    fn test_node_set_is_unwrapped() {
        let dialect = keyed();
        assert_eq!(Expr::with_dialect("exsl:node-set($tree)/item", &dialect).unwrap().source, "($tree)/item");
        assert_eq!(Expr::with_dialect("other:node-set($tree)", &dialect).unwrap().source, "other:node-set($tree)");
        assert_eq!(Expr::with_dialect("'exsl:node-set(x)'", &dialect).unwrap().source, "'exsl:node-set(x)'");
    }

    #[test]
    fn test_double_literals() {
        let dialect = Dialect { double_literals: true, ..Dialect::default() };
        let rewrite = |text: &str| Expr::with_dialect(text, &dialect).unwrap().source;
        assert_eq!(rewrite("1 div 0"), "1e0 div 0e0");
        assert_eq!(rewrite("item[2] + .5 - 3.25"), "item[2e0] + .5e0 - 3.25e0");
        assert_eq!(rewrite("5-1"), "5e0-1e0");
        assert_eq!(rewrite("h1 | $v2 | '10' | 1e3"), "h1 | $v2 | '10' | 1e3");
        assert_eq!(rewrite("../x"), "../x");
    }

    #[test]
    fn test_avt() {
        let avt = Avt::parse("row-{position()} {{x}}").unwrap();
        assert_eq!(avt.parts.len(), 3);
        assert_eq!(avt.parts[0], AvtPart::Literal("row-".into()));
        assert_eq!(avt.parts[2], AvtPart::Literal(" {x}".into()));
        assert_eq!(Avt::parse("plain").unwrap().as_literal().as_deref(), Some("plain"));
        assert_eq!(Avt::parse("{'}'}").unwrap().expressions().count(), 1);
        assert!(Avt::parse("{oops").is_err());
        assert!(Avt::parse("oops}").is_err());
    }
}
