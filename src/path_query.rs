//! Path-style selector queries over a parsed HTML document.
//!
//! Selector tables mix CSS queries with XPath-like location paths such as
//! `//div[@class='byline']/a/text()` or `//span[contains(text(), 'updated')]`.
//! This module implements the subset of XPath 1.0 those tables use:
//!
//! - absolute or relative (`./`) location paths with `/` (child) and `//`
//!   (descendant-or-self, then child) steps
//! - element name tests and `*`
//! - predicates: `[n]`, `[last()]`, `@attr`, `@attr='v'`, `@attr!='v'`, `text()='v'`,
//!   `.='v'`, `contains(x, 'v')`, `starts-with(x, 'v')`, `not(...)`, `and`, `or`, parentheses
//! - a terminal `/text()` (direct text children) or `/@attr` (attribute values)
//!
//! Comparisons against `text()` are case-insensitive: the node text and the literal are
//! both lower-cased when compared. The document itself is never modified, so extracted
//! text keeps its original case.

use itertools::Itertools;
use scraper::{ElementRef, Html};
use thiserror::Error;

/// A query string that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path query at byte {position}: {message}")]
pub struct PathQueryError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attr(String),
    /// `text()`, compared lower-cased.
    LowerText,
    /// `.`, the string value of the element.
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Exists(Operand),
    Equals(Operand, String),
    NotEquals(Operand, String),
    Contains(Operand, String),
    StartsWith(Operand, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    Filter(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    name: NameTest,
    predicates: Vec<Predicate>,
}

/// What a query yields for each selected element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Output {
    /// All descendant text.
    Descendants,
    /// Direct text children (`/text()`).
    DirectText,
    /// An attribute value (`/@name`).
    Attribute(String),
}

/// A compiled path query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    steps: Vec<Step>,
    output: Output,
}

/// Returns true when a selector string should be treated as a path query rather than CSS.
pub fn is_path_query(query: &str) -> bool {
    let q = query.trim_start();
    q.starts_with('/') || q.starts_with("./")
}

impl PathQuery {
    /// Compile a query string.
    pub fn parse(query: &str) -> Result<Self, PathQueryError> {
        Parser::new(query).parse_path()
    }

    /// Run the query and return the matched text fragments in document order.
    pub fn texts(&self, document: &Html) -> Vec<String> {
        let elements = self.select(document);
        match &self.output {
            Output::Descendants => elements
                .iter()
                .flat_map(|el| el.text().map(str::to_string))
                .collect(),
            Output::DirectText => elements
                .iter()
                .flat_map(|el| direct_text(*el))
                .collect(),
            Output::Attribute(name) => elements
                .iter()
                .filter_map(|el| el.value().attr(name))
                .map(str::to_string)
                .collect(),
        }
    }

    fn select<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        let mut contexts = vec![Context::Document];
        for step in &self.steps {
            let mut next: Vec<ElementRef<'a>> = Vec::new();
            let parents = match step.axis {
                Axis::Child => contexts.clone(),
                Axis::Descendant => contexts
                    .iter()
                    .flat_map(|ctx| self_and_descendants(document, *ctx))
                    .collect(),
            };
            for parent in parents {
                let matched: Vec<ElementRef<'a>> = child_elements(document, parent)
                    .into_iter()
                    .filter(|el| step.name.matches(el))
                    .collect();
                next.extend(apply_predicates(matched, &step.predicates));
            }
            contexts = next
                .into_iter()
                .unique_by(|el| el.id())
                .map(Context::Element)
                .collect();
        }
        contexts
            .into_iter()
            .filter_map(|ctx| match ctx {
                Context::Element(el) => Some(el),
                Context::Document => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Context<'a> {
    Document,
    Element(ElementRef<'a>),
}

fn child_elements<'a>(document: &'a Html, ctx: Context<'a>) -> Vec<ElementRef<'a>> {
    match ctx {
        Context::Document => vec![document.root_element()],
        Context::Element(el) => el.children().filter_map(ElementRef::wrap).collect(),
    }
}

fn self_and_descendants<'a>(document: &'a Html, ctx: Context<'a>) -> Vec<Context<'a>> {
    let start = match ctx {
        Context::Document => {
            let mut all = vec![Context::Document];
            all.extend(
                document
                    .root_element()
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .map(Context::Element),
            );
            return all;
        }
        Context::Element(el) => el,
    };
    start
        .descendants()
        .filter_map(ElementRef::wrap)
        .map(Context::Element)
        .collect()
}

fn direct_text(el: ElementRef<'_>) -> Vec<String> {
    el.children()
        .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
        .collect()
}

fn apply_predicates<'a>(
    mut nodes: Vec<ElementRef<'a>>,
    predicates: &[Predicate],
) -> Vec<ElementRef<'a>> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
            Predicate::Last => nodes.last().copied().into_iter().collect(),
            Predicate::Filter(expr) => nodes.into_iter().filter(|el| expr.eval(*el)).collect(),
        };
    }
    nodes
}

impl NameTest {
    fn matches(&self, el: &ElementRef<'_>) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Named(name) => el.value().name().eq_ignore_ascii_case(name),
        }
    }
}

impl Operand {
    fn values(&self, el: ElementRef<'_>) -> Vec<String> {
        match self {
            Operand::Attr(name) => el.value().attr(name).map(str::to_string).into_iter().collect(),
            Operand::LowerText => direct_text(el)
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            Operand::Context => vec![el.text().collect::<String>()],
        }
    }
}

impl Expr {
    fn eval(&self, el: ElementRef<'_>) -> bool {
        match self {
            Expr::Or(a, b) => a.eval(el) || b.eval(el),
            Expr::And(a, b) => a.eval(el) && b.eval(el),
            Expr::Not(inner) => !inner.eval(el),
            Expr::Exists(op) => !op.values(el).is_empty(),
            Expr::Equals(op, lit) => op.values(el).iter().any(|v| v == lit),
            Expr::NotEquals(op, lit) => op.values(el).iter().any(|v| v != lit),
            // String functions see the first node of a node-set, or "" when empty.
            Expr::Contains(op, lit) => first_value(op, el).contains(lit.as_str()),
            Expr::StartsWith(op, lit) => first_value(op, el).starts_with(lit.as_str()),
        }
    }
}

fn first_value(op: &Operand, el: ElementRef<'_>) -> String {
    op.values(el).into_iter().next().unwrap_or_default()
}

struct Parser<'q> {
    src: &'q str,
    pos: usize,
}

impl<'q> Parser<'q> {
    fn new(src: &'q str) -> Self {
        Self { src, pos: 0 }
    }

    fn err<T>(&self, message: impl Into<String>) -> Result<T, PathQueryError> {
        Err(PathQueryError {
            position: self.pos,
            message: message.into(),
        })
    }

    fn rest(&self) -> &'q str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        let rest = self.rest();
        if rest.starts_with(word) {
            let boundary = rest[word.len()..]
                .chars()
                .next()
                .is_none_or(|c| !is_name_char(c));
            if boundary {
                self.pos += word.len();
                return true;
            }
        }
        false
    }

    fn expect(&mut self, token: &str) -> Result<(), PathQueryError> {
        self.skip_ws();
        if self.eat(token) {
            Ok(())
        } else {
            self.err(format!("expected `{token}`"))
        }
    }

    fn name(&mut self) -> Result<String, PathQueryError> {
        let len = self
            .rest()
            .char_indices()
            .find(|(_, c)| !is_name_char(*c))
            .map_or(self.rest().len(), |(i, _)| i);
        if len == 0 {
            return self.err("expected a name");
        }
        let name = self.rest()[..len].to_string();
        if let Some(axis) = name.find("::").map(|i| &name[..i]) {
            return self.err(format!("axis `{axis}::` is not supported"));
        }
        self.pos += len;
        Ok(name)
    }

    fn literal(&mut self) -> Result<String, PathQueryError> {
        self.skip_ws();
        let quote = match self.rest().chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return self.err("expected a quoted string"),
        };
        self.pos += 1;
        match self.rest().find(quote) {
            Some(end) => {
                let value = self.rest()[..end].to_string();
                self.pos += end + 1;
                Ok(value)
            }
            None => self.err("unterminated string"),
        }
    }

    fn parse_path(&mut self) -> Result<PathQuery, PathQueryError> {
        self.skip_ws();
        // A leading `.` anchors at the document, which is where every query starts.
        if self.rest().starts_with("./") {
            self.pos += 1;
        }
        if !self.rest().starts_with('/') {
            return self.err("path queries must start with `/`, `//` or `./`");
        }

        let mut steps = Vec::new();
        let mut output = Output::Descendants;
        while !self.rest().trim_end().is_empty() {
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return self.err("expected `/` or `//`");
            };

            if self.eat("text()") {
                if axis == Axis::Descendant {
                    return self.err("`//text()` is not supported; use `/text()`");
                }
                output = Output::DirectText;
                break;
            }
            if self.eat("@") {
                output = Output::Attribute(self.name()?.to_ascii_lowercase());
                break;
            }

            let name = if self.eat("*") {
                NameTest::Any
            } else {
                NameTest::Named(self.name()?.to_ascii_lowercase())
            };
            let mut predicates = Vec::new();
            while self.eat("[") {
                predicates.push(self.predicate()?);
                self.expect("]")?;
            }
            steps.push(Step {
                axis,
                name,
                predicates,
            });
        }

        if !self.rest().trim_end().is_empty() {
            return self.err("unexpected trailing input");
        }
        if steps.is_empty() {
            return self.err("query selects no elements");
        }
        Ok(PathQuery { steps, output })
    }

    fn predicate(&mut self) -> Result<Predicate, PathQueryError> {
        self.skip_ws();
        let digits = self
            .rest()
            .chars()
            .take_while(char::is_ascii_digit)
            .count();
        if digits > 0 {
            let Ok(n) = self.rest()[..digits].parse::<usize>() else {
                return self.err("position is too large");
            };
            if n == 0 {
                return self.err("positions start at 1");
            }
            self.pos += digits;
            return Ok(Predicate::Position(n));
        }
        if self.eat("last()") {
            return Ok(Predicate::Last);
        }
        Ok(Predicate::Filter(self.or_expr()?))
    }

    fn or_expr(&mut self) -> Result<Expr, PathQueryError> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if !self.eat_keyword("or") {
                return Ok(left);
            }
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
    }

    fn and_expr(&mut self) -> Result<Expr, PathQueryError> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            if !self.eat_keyword("and") {
                return Ok(left);
            }
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, PathQueryError> {
        self.skip_ws();
        if self.eat("not(") {
            let inner = self.or_expr()?;
            self.expect(")")?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.eat("(") {
            let inner = self.or_expr()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if self.eat("contains(") {
            let (op, lit) = self.function_args()?;
            return Ok(Expr::Contains(op, lit));
        }
        if self.eat("starts-with(") {
            let (op, lit) = self.function_args()?;
            return Ok(Expr::StartsWith(op, lit));
        }

        let op = self.operand()?;
        self.skip_ws();
        if self.eat("!=") {
            let lit = self.comparison_literal(&op)?;
            return Ok(Expr::NotEquals(op, lit));
        }
        if self.eat("=") {
            let lit = self.comparison_literal(&op)?;
            return Ok(Expr::Equals(op, lit));
        }
        Ok(Expr::Exists(op))
    }

    fn function_args(&mut self) -> Result<(Operand, String), PathQueryError> {
        self.skip_ws();
        let op = self.operand()?;
        self.expect(",")?;
        let lit = self.comparison_literal(&op)?;
        self.expect(")")?;
        Ok((op, lit))
    }

    fn comparison_literal(&mut self, op: &Operand) -> Result<String, PathQueryError> {
        let lit = self.literal()?;
        Ok(match op {
            Operand::LowerText => lit.to_lowercase(),
            _ => lit,
        })
    }

    fn operand(&mut self) -> Result<Operand, PathQueryError> {
        self.skip_ws();
        if self.eat("@") {
            return Ok(Operand::Attr(self.name()?.to_ascii_lowercase()));
        }
        if self.eat("text()") {
            return Ok(Operand::LowerText);
        }
        if self.eat(".") {
            return Ok(Operand::Context);
        }
        self.err("expected `@attr`, `text()` or `.`")
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head>
            <meta property="og:title" content="Harbour Reopens">
            <meta name="author" content="Jane Roe">
        </head><body>
            <div class="byline">By <a href="/staff/jr">Jane Roe</a></div>
            <div class="meta">
                <span>Filed</span>
                <span>UPDATED: March 3, 2021</span>
            </div>
            <article>
                <p>First paragraph.</p>
                <p>Second <b>bold</b> paragraph.</p>
                <section><p>Nested paragraph.</p></section>
            </article>
        </body></html>"#;

    fn run(query: &str) -> Vec<String> {
        let doc = Html::parse_document(PAGE);
        PathQuery::parse(query)
            .unwrap()
            .texts(&doc)
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    #[test]
    fn test_is_path_query() {
        assert!(is_path_query("//div"));
        assert!(is_path_query("/html/body"));
        assert!(is_path_query("./p"));
        assert!(!is_path_query("div.byline"));
        assert!(!is_path_query("meta[name='author']"));
    }

    #[test]
    fn test_attribute_output() {
        assert_eq!(run("//meta[@property='og:title']/@content"), vec!["Harbour Reopens"]);
    }

    #[test]
    fn test_descendant_text_output() {
        assert_eq!(run("//div[@class='byline']"), vec!["By", "Jane Roe"]);
    }

    #[test]
    fn test_direct_text_output() {
        assert_eq!(run("//div[@class='byline']/text()"), vec!["By"]);
    }

    #[test]
    fn test_absolute_child_path() {
        assert_eq!(run("/html/body/article/p[1]/text()"), vec!["First paragraph."]);
    }

    #[test]
    fn test_descendant_position_is_per_parent() {
        // `//p[1]` is the first <p> child of every parent, XPath style.
        assert_eq!(run("//p[1]/text()"), vec!["First paragraph.", "Nested paragraph."]);
    }

    #[test]
    fn test_last_predicate() {
        assert_eq!(run("//div[@class='meta']/span[last()]"), vec!["UPDATED: March 3, 2021"]);
    }

    #[test]
    fn test_text_comparison_is_case_insensitive() {
        assert_eq!(
            run("//span[contains(text(), 'updated')]"),
            vec!["UPDATED: March 3, 2021"]
        );
        assert_eq!(
            run("//span[starts-with(text(), 'Updated')]"),
            vec!["UPDATED: March 3, 2021"]
        );
        assert_eq!(run("//span[text()='FILED']"), vec!["Filed"]);
    }

    #[test]
    fn test_attribute_comparison_is_exact() {
        assert!(run("//div[@class='BYLINE']").is_empty());
    }

    #[test]
    fn test_boolean_predicates() {
        assert_eq!(
            run("//meta[@name='author' or @property='og:title']/@content"),
            vec!["Harbour Reopens", "Jane Roe"]
        );
        assert_eq!(
            run("//div[@class and not(@class='byline')]/span[1]"),
            vec!["Filed"]
        );
    }

    #[test]
    fn test_wildcard_and_relative() {
        assert_eq!(run(".//section/*"), vec!["Nested paragraph."]);
    }

    #[test]
    fn test_no_match_is_empty() {
        assert!(run("//aside").is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(PathQuery::parse("div").is_err());
        assert!(PathQuery::parse("//div[@class='x'").is_err());
        assert!(PathQuery::parse("//div[contains(@class 'x')]").is_err());
        assert!(PathQuery::parse("//p[0]").is_err());
        assert!(PathQuery::parse("//text()").is_err());
        let err = PathQuery::parse("//div[@class=unquoted]").unwrap_err();
        assert!(err.to_string().contains("quoted string"));
    }

    #[test]
    fn test_axis_steps_rejected() {
        let err = PathQuery::parse("//div[@class='a']/descendant::p").unwrap_err();
        assert!(err.to_string().contains("descendant::"));
        assert!(PathQuery::parse("//h1/following-sibling::p").is_err());
        assert!(PathQuery::parse("//p[@attribute::class]").is_err());
        // Prefixed attribute names are still names.
        assert!(PathQuery::parse("//html/@xml:lang").is_ok());
    }

    #[test]
    fn test_oversized_position_rejected() {
        let err = PathQuery::parse("//p[99999999999999999999999999]").unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(PathQuery::parse("//p[0]").unwrap_err().to_string().contains("start at 1"));
    }
}
