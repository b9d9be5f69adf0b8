// Copyright 2025 Cowboy AI, LLC.

//! Search index compiler and reference evaluator

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{unsupported_backend, Criterion, QueryBackend, Specification};
use crate::errors::PersistenceResult;

/// Occurrence of a boolean clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occur {
    /// Clause must match
    Must,
    /// Clause contributes to `minimum_should_match`
    Should,
    /// Clause must not match
    MustNot,
}

/// Clause of a boolean query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchClause {
    /// How the clause participates
    pub occur: Occur,
    /// Clause query
    pub query: SearchQuery,
}

/// Boolean combination of clauses
///
/// A query with neither MUST nor SHOULD clauses matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanQuery {
    /// Clauses in source order
    pub clauses: Vec<SearchClause>,
    /// Number of SHOULD clauses that must match
    pub minimum_should_match: usize,
}

/// Compiled search query tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchQuery {
    /// Matches every document
    MatchAll,
    /// Exact term on a field
    Term {
        /// Indexed field
        field: String,
        /// Term text
        value: String,
    },
    /// Prefix term on a field
    Prefix {
        /// Indexed field
        field: String,
        /// Prefix text
        value: String,
    },
    /// Inclusive term range; an open bound is unbounded
    Range {
        /// Indexed field
        field: String,
        /// Lower bound
        lower: Option<String>,
        /// Upper bound
        upper: Option<String>,
    },
    /// Boolean query
    Boolean(BooleanQuery),
    /// Weighted query
    Boosted {
        /// Wrapped query
        query: Box<SearchQuery>,
        /// Score multiplier
        weight: f32,
    },
}

impl SearchQuery {
    /// Term query
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        SearchQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Prefix query
    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        SearchQuery::Prefix {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Range query
    pub fn range(field: impl Into<String>, lower: Option<String>, upper: Option<String>) -> Self {
        SearchQuery::Range {
            field: field.into(),
            lower,
            upper,
        }
    }

    /// Conjunction of queries
    pub fn all_of(queries: impl IntoIterator<Item = SearchQuery>) -> Self {
        SearchQuery::Boolean(BooleanQuery {
            clauses: queries
                .into_iter()
                .map(|query| SearchClause {
                    occur: Occur::Must,
                    query,
                })
                .collect(),
            minimum_should_match: 0,
        })
    }

    /// Query matching nothing
    pub fn nothing() -> Self {
        SearchQuery::Boolean(BooleanQuery::default())
    }

    /// Weight multiplier, 1.0 unless boosted
    pub fn weight(&self) -> f32 {
        match self {
            SearchQuery::Boosted { weight, .. } => *weight,
            _ => 1.0,
        }
    }

    /// Whether a document matches
    pub fn matches(&self, doc: &SearchDocument) -> bool {
        self.score(doc).is_some()
    }

    /// Relevance score of a matching document, `None` when it does not match
    pub fn score(&self, doc: &SearchDocument) -> Option<f32> {
        match self {
            SearchQuery::MatchAll => Some(1.0),
            SearchQuery::Term { field, value } => {
                doc.values(field).iter().any(|v| v == value).then_some(1.0)
            }
            SearchQuery::Prefix { field, value } => doc
                .values(field)
                .iter()
                .any(|v| v.starts_with(value.as_str()))
                .then_some(1.0),
            SearchQuery::Range {
                field,
                lower,
                upper,
            } => doc
                .values(field)
                .iter()
                .any(|v| {
                    lower.as_ref().map_or(true, |l| v >= l)
                        && upper.as_ref().map_or(true, |u| v <= u)
                })
                .then_some(1.0),
            SearchQuery::Boolean(query) => query.score(doc),
            SearchQuery::Boosted { query, weight } => query.score(doc).map(|s| s * weight),
        }
    }
}

impl BooleanQuery {
    fn score(&self, doc: &SearchDocument) -> Option<f32> {
        let mut total = 0.0;
        let mut positive = 0;
        let mut should_matched = 0;
        for clause in &self.clauses {
            let score = clause.query.score(doc);
            match clause.occur {
                Occur::Must => {
                    total += score?;
                    positive += 1;
                }
                Occur::Should => {
                    positive += 1;
                    if let Some(s) = score {
                        total += s;
                        should_matched += 1;
                    }
                }
                Occur::MustNot => {
                    if score.is_some() {
                        return None;
                    }
                }
            }
        }
        (positive > 0 && should_matched >= self.minimum_should_match).then_some(total)
    }
}

/// Indexed document: multi-valued fields of terms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    fields: IndexMap<String, Vec<String>>,
}

impl SearchDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term to a field
    pub fn add(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.entry(field.into()).or_default().push(value.into());
        self
    }

    /// Terms of a field
    pub fn values(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Field names in insertion order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<C: Criterion> Specification<C> {
    /// Compile to a search query tree
    pub fn to_search(&self) -> PersistenceResult<SearchQuery> {
        match self {
            Specification::MatchAll => Ok(SearchQuery::MatchAll),
            Specification::MatchNone => Ok(SearchQuery::nothing()),
            Specification::Leaf(c) => c
                .to_search()
                .ok_or_else(|| unsupported_backend(QueryBackend::Search, c)),
            Specification::And(children) => {
                if children.is_empty() {
                    return Ok(SearchQuery::nothing());
                }
                let mut clauses = Vec::with_capacity(children.len() + 1);
                for child in children {
                    let clause = match child {
                        Specification::Not(inner) => SearchClause {
                            occur: Occur::MustNot,
                            query: inner.to_search()?,
                        },
                        other => SearchClause {
                            occur: Occur::Must,
                            query: other.to_search()?,
                        },
                    };
                    clauses.push(clause);
                }
                if clauses.iter().all(|c| c.occur == Occur::MustNot) {
                    clauses.insert(
                        0,
                        SearchClause {
                            occur: Occur::Must,
                            query: SearchQuery::MatchAll,
                        },
                    );
                }
                Ok(SearchQuery::Boolean(BooleanQuery {
                    clauses,
                    minimum_should_match: 0,
                }))
            }
            Specification::Or(children) => {
                let clauses = children
                    .iter()
                    .map(|child| {
                        Ok(SearchClause {
                            occur: Occur::Should,
                            query: child.to_search()?,
                        })
                    })
                    .collect::<PersistenceResult<Vec<_>>>()?;
                Ok(SearchQuery::Boolean(BooleanQuery {
                    clauses,
                    minimum_should_match: 1,
                }))
            }
            Specification::Not(inner) => Ok(SearchQuery::Boolean(BooleanQuery {
                clauses: vec![
                    SearchClause {
                        occur: Occur::Must,
                        query: SearchQuery::MatchAll,
                    },
                    SearchClause {
                        occur: Occur::MustNot,
                        query: inner.to_search()?,
                    },
                ],
                minimum_should_match: 0,
            })),
            Specification::Boost {
                specification,
                weight,
            } => Ok(SearchQuery::Boosted {
                query: Box::new(specification.to_search()?),
                weight: *weight,
            }),
        }
    }
}
