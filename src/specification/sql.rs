// Copyright 2025 Cowboy AI, LLC.

//! Relational compiler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{unsupported_backend, Criterion, QueryBackend, Specification};
use crate::errors::PersistenceResult;

/// Positional parameter bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlParam {
    /// Text value
    Text(String),
    /// Integer value
    Integer(i64),
    /// UUID value
    Uuid(Uuid),
    /// Timestamp value
    Timestamp(DateTime<Utc>),
}

/// Parametrized WHERE fragment
///
/// The template holds exactly one `?` per entry in `params`, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlQuery {
    template: String,
    params: Vec<SqlParam>,
}

impl SqlQuery {
    /// Create a fragment
    pub fn new(template: impl Into<String>, params: Vec<SqlParam>) -> Self {
        let query = Self {
            template: template.into(),
            params,
        };
        debug_assert_eq!(query.placeholder_count(), query.params.len());
        query
    }

    /// `column = ?`
    pub fn equals(column: &str, param: SqlParam) -> Self {
        Self::new(format!("{column} = ?"), vec![param])
    }

    /// `column LIKE ?` matching values starting with `prefix`
    pub fn starts_with(column: &str, prefix: &str) -> Self {
        let mut pattern = String::with_capacity(prefix.len() + 1);
        for ch in prefix.chars() {
            if matches!(ch, '\\' | '%' | '_') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push('%');
        Self::new(
            format!("{column} LIKE ? ESCAPE '\\'"),
            vec![SqlParam::Text(pattern)],
        )
    }

    /// Inclusive range on a column; both bounds open yields `column IS NOT NULL`
    pub fn between(column: &str, lower: Option<SqlParam>, upper: Option<SqlParam>) -> Self {
        match (lower, upper) {
            (None, None) => Self::new(format!("{column} IS NOT NULL"), vec![]),
            (Some(lower), None) => Self::new(format!("{column} >= ?"), vec![lower]),
            (None, Some(upper)) => Self::new(format!("{column} <= ?"), vec![upper]),
            (Some(lower), Some(upper)) => Self::new(
                format!("{column} >= ? AND {column} <= ?"),
                vec![lower, upper],
            ),
        }
    }

    /// Require `column` to be non-null before evaluating the fragment
    ///
    /// A NULL column makes the fragment false rather than unknown, so its
    /// negation matches.
    pub fn non_null(self, column: &str) -> Self {
        let guard = format!("{column} IS NOT NULL");
        if self.template == guard {
            return self;
        }
        Self {
            template: format!("{guard} AND {}", self.template),
            params: self.params,
        }
    }

    /// Fragment true for every row
    pub fn always() -> Self {
        Self::new("1 = 1", vec![])
    }

    /// Fragment false for every row
    pub fn never() -> Self {
        Self::new("1 = 0", vec![])
    }

    /// Fragment text
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parameters in placeholder order
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    /// Number of `?` placeholders in the template
    pub fn placeholder_count(&self) -> usize {
        self.template.matches('?').count()
    }

    /// Split into template and parameters
    pub fn into_parts(self) -> (String, Vec<SqlParam>) {
        (self.template, self.params)
    }

    fn join(children: Vec<SqlQuery>, separator: &str) -> Self {
        if children.is_empty() {
            return Self::never();
        }
        let mut template = String::new();
        let mut params = Vec::new();
        for (i, child) in children.into_iter().enumerate() {
            if i > 0 {
                template.push_str(separator);
            }
            template.push('(');
            template.push_str(&child.template);
            template.push(')');
            params.extend(child.params);
        }
        Self { template, params }
    }
}

impl<C: Criterion> Specification<C> {
    /// Compile to a relational fragment
    pub fn to_sql(&self) -> PersistenceResult<SqlQuery> {
        match self {
            Specification::MatchAll => Ok(SqlQuery::always()),
            Specification::MatchNone => Ok(SqlQuery::never()),
            Specification::Leaf(c) => c
                .to_sql()
                .ok_or_else(|| unsupported_backend(QueryBackend::Relational, c)),
            Specification::And(children) => Ok(SqlQuery::join(
                children.iter().map(|s| s.to_sql()).collect::<PersistenceResult<_>>()?,
                " AND ",
            )),
            Specification::Or(children) => Ok(SqlQuery::join(
                children.iter().map(|s| s.to_sql()).collect::<PersistenceResult<_>>()?,
                " OR ",
            )),
            Specification::Not(inner) => {
                let (template, params) = inner.to_sql()?.into_parts();
                Ok(SqlQuery {
                    template: format!("NOT ({template})"),
                    params,
                })
            }
            Specification::Boost { specification, .. } => specification.to_sql(),
        }
    }
}
