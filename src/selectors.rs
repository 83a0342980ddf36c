//! The selector table: for every article field, an ordered list of queries.
//!
//! Order is priority. A field's list is never empty; fields without an entry are
//! simply never extracted.

use crate::path_query::{is_path_query, PathQuery, PathQueryError};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Logical article fields that selectors can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Description,
    Date,
    Author,
    Keywords,
    Text,
    Editor,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Title,
        Field::Description,
        Field::Date,
        Field::Author,
        Field::Keywords,
        Field::Text,
        Field::Editor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Date => "date",
            Field::Author => "author",
            Field::Keywords => "keywords",
            Field::Text => "text",
            Field::Editor => "editor",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selector string that failed to compile.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid CSS selector `{query}`: {message}")]
    Css { query: String, message: String },
    #[error("invalid path query `{query}`: {source}")]
    Path {
        query: String,
        #[source]
        source: PathQueryError,
    },
}

/// What a CSS query yields for each matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssOutput {
    /// All descendant text.
    Descendants,
    /// `::text`, direct text children only.
    DirectText,
    /// `::attr(name)`.
    Attribute(String),
}

/// One compiled extraction strategy.
#[derive(Debug, Clone)]
pub enum Query {
    Css {
        source: String,
        selector: Selector,
        output: CssOutput,
    },
    Path {
        source: String,
        query: PathQuery,
    },
}

impl Query {
    /// Compile a selector string. Strings starting with `/` or `./` are path queries,
    /// everything else is CSS with optional `::text` / `::attr(name)` suffixes.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let raw = raw.trim();
        if is_path_query(raw) {
            let query = PathQuery::parse(raw).map_err(|source| QueryError::Path {
                query: raw.to_string(),
                source,
            })?;
            return Ok(Query::Path {
                source: raw.to_string(),
                query,
            });
        }

        let (css, output) = split_pseudo_element(raw);
        let selector = Selector::parse(css).map_err(|e| QueryError::Css {
            query: raw.to_string(),
            message: e.to_string(),
        })?;
        Ok(Query::Css {
            source: raw.to_string(),
            selector,
            output,
        })
    }

    /// The selector string this query was compiled from.
    pub fn source(&self) -> &str {
        match self {
            Query::Css { source, .. } | Query::Path { source, .. } => source,
        }
    }

    /// Run the query and return every matched text fragment, untrimmed.
    pub fn texts(&self, document: &Html) -> Vec<String> {
        match self {
            Query::Path { query, .. } => query.texts(document),
            Query::Css {
                selector, output, ..
            } => {
                let matched = document.select(selector);
                match output {
                    CssOutput::Descendants => matched
                        .flat_map(|el| el.text().map(str::to_string).collect::<Vec<_>>())
                        .collect(),
                    CssOutput::DirectText => matched
                        .flat_map(|el| {
                            el.children()
                                .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
                                .collect::<Vec<_>>()
                        })
                        .collect(),
                    CssOutput::Attribute(name) => matched
                        .filter_map(|el| el.value().attr(name).map(str::to_string))
                        .collect(),
                }
            }
        }
    }
}

fn split_pseudo_element(raw: &str) -> (&str, CssOutput) {
    if let Some(css) = raw.strip_suffix("::text") {
        return (css.trim_end(), CssOutput::DirectText);
    }
    if let Some(idx) = raw.rfind("::attr(") {
        if let Some(name) = raw[idx + "::attr(".len()..].strip_suffix(')') {
            return (
                raw[..idx].trim_end(),
                CssOutput::Attribute(name.trim().to_ascii_lowercase()),
            );
        }
    }
    (raw, CssOutput::Descendants)
}

/// Field → ordered, non-empty list of compiled queries.
#[derive(Debug, Clone, Default)]
pub struct SelectorTable {
    fields: HashMap<Field, Vec<Query>>,
}

impl SelectorTable {
    /// Compile a table from raw selector strings.
    ///
    /// Fails on the first selector that does not compile, or on a field whose list
    /// is empty.
    pub fn compile(raw: HashMap<Field, Vec<String>>) -> Result<Self, SelectorTableError> {
        let mut fields = HashMap::with_capacity(raw.len());
        for (field, queries) in raw {
            if queries.is_empty() {
                return Err(SelectorTableError::EmptyField(field));
            }
            let compiled = queries
                .iter()
                .map(|q| Query::parse(q))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| SelectorTableError::Query { field, source })?;
            fields.insert(field, compiled);
        }
        Ok(Self { fields })
    }

    /// Queries for a field in priority order; empty when the field is not configured.
    pub fn queries(&self, field: Field) -> &[Query] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn configured_fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.fields.contains_key(f))
    }
}

#[derive(Debug, Error)]
pub enum SelectorTableError {
    #[error("selector list for `{0}` is empty")]
    EmptyField(Field),
    #[error("field `{field}`: {source}")]
    Query {
        field: Field,
        #[source]
        source: QueryError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(Field, &[&str])]) -> Result<SelectorTable, SelectorTableError> {
        SelectorTable::compile(
            entries
                .iter()
                .map(|(f, qs)| (*f, qs.iter().map(|q| q.to_string()).collect()))
                .collect(),
        )
    }

    #[test]
    fn test_query_kind_detection() {
        assert!(matches!(Query::parse("h1.headline").unwrap(), Query::Css { .. }));
        assert!(matches!(Query::parse("//h1").unwrap(), Query::Path { .. }));
        assert!(matches!(Query::parse("  ./h1").unwrap(), Query::Path { .. }));
    }

    #[test]
    fn test_css_attr_suffix() {
        let doc = Html::parse_document(
            r#"<html><head><meta name="description" content="A summary"></head></html>"#,
        );
        let q = Query::parse("meta[name='description']::attr(content)").unwrap();
        assert_eq!(q.texts(&doc), vec!["A summary"]);
    }

    #[test]
    fn test_css_text_suffix_is_direct_text() {
        let doc = Html::parse_document("<p class='x'>Outer <b>inner</b></p>");
        let q = Query::parse("p.x::text").unwrap();
        assert_eq!(q.texts(&doc), vec!["Outer "]);
        let all = Query::parse("p.x").unwrap();
        assert_eq!(all.texts(&doc), vec!["Outer ", "inner"]);
    }

    #[test]
    fn test_invalid_css_rejected() {
        let err = Query::parse("div[[").unwrap_err();
        assert!(matches!(err, QueryError::Css { .. }));
    }

    #[test]
    fn test_compile_table() {
        let t = table(&[
            (Field::Title, &["h1", "//meta[@property='og:title']/@content"]),
            (Field::Text, &["article p"]),
        ])
        .unwrap();
        assert_eq!(t.queries(Field::Title).len(), 2);
        assert_eq!(t.queries(Field::Title)[0].source(), "h1");
        assert!(t.queries(Field::Editor).is_empty());
        let fields: Vec<Field> = t.configured_fields().collect();
        assert_eq!(fields, vec![Field::Title, Field::Text]);
    }

    #[test]
    fn test_empty_field_rejected() {
        let err = table(&[(Field::Author, &[])]).unwrap_err();
        assert!(matches!(err, SelectorTableError::EmptyField(Field::Author)));
    }

    #[test]
    fn test_bad_query_names_field() {
        let err = table(&[(Field::Date, &["//time[@datetime"])]).unwrap_err();
        assert!(err.to_string().starts_with("field `date`"));
    }
}
