// Copyright 2025 Cowboy AI, LLC.

//! Query options for specification-based enumeration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::specification::{QueryBackend, Specification};

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    /// Sort in ascending order
    #[default]
    Ascending,
    /// Sort in descending order
    Descending,
}

/// Field to sort enumeration results by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Field name understood by the value's [`Sortable`] impl
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

impl SortKey {
    /// Ascending sort on a field
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on a field
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Comparable projection of a stored value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SortValue {
    /// Text, compared lexicographically
    Text(String),
    /// Integer
    Integer(i64),
    /// Timestamp
    Timestamp(DateTime<Utc>),
}

/// Values that can be sorted by named fields
pub trait Sortable {
    /// Value of a sort field, `None` when absent
    fn sort_value(&self, field: &str) -> Option<SortValue>;
}

/// Specification-based enumeration request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query<C> {
    /// Filter
    pub specification: Specification<C>,
    /// Sort keys, applied in order; empty keeps storage order
    pub sort: Vec<SortKey>,
    /// Maximum number of results
    pub limit: Option<usize>,
    /// Backend the specification must compile for
    pub backend: QueryBackend,
}

impl<C> Query<C> {
    /// Query with storage order and no limit, evaluated in memory
    pub fn new(specification: Specification<C>) -> Self {
        Self {
            specification,
            sort: Vec::new(),
            limit: None,
            backend: QueryBackend::InMemory,
        }
    }

    /// Query matching every entry
    pub fn all() -> Self {
        Self::new(Specification::MatchAll)
    }

    /// Start building a query
    pub fn builder(specification: Specification<C>) -> QueryBuilder<C> {
        QueryBuilder::new(specification)
    }
}

/// Builder for queries
pub struct QueryBuilder<C> {
    query: Query<C>,
}

impl<C> QueryBuilder<C> {
    /// Create a new query builder
    pub fn new(specification: Specification<C>) -> Self {
        Self {
            query: Query::new(specification),
        }
    }

    /// Add a sort key
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Require a backend
    pub fn backend(mut self, backend: QueryBackend) -> Self {
        self.query.backend = backend;
        self
    }

    /// Build the query
    pub fn build(self) -> Query<C> {
        self.query
    }
}

/// Stable sort by the given keys, ties broken by key order; missing values sort last
pub fn sort_entries<K: Ord, V: Sortable>(entries: &mut [(K, V)], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    entries.sort_by(|(ka, va), (kb, vb)| {
        for key in sort {
            let ordering = match (va.sort_value(&key.field), vb.sort_value(&key.field)) {
                (Some(a), Some(b)) => match key.direction {
                    SortDirection::Ascending => a.cmp(&b),
                    SortDirection::Descending => b.cmp(&a),
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        ka.cmp(kb)
    });
}

/// Sort then truncate to the query limit
pub fn finish_query<K: Ord, V: Sortable, C>(
    mut entries: Vec<(K, V)>,
    query: &Query<C>,
) -> Vec<(K, V)> {
    sort_entries(&mut entries, &query.sort);
    if let Some(limit) = query.limit {
        entries.truncate(limit);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        name: Option<&'static str>,
        rank: i64,
    }

    impl Sortable for Row {
        fn sort_value(&self, field: &str) -> Option<SortValue> {
            match field {
                "name" => self.name.map(|n| SortValue::Text(n.to_string())),
                "rank" => Some(SortValue::Integer(self.rank)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_query_builder() {
        let query: Query<()> = QueryBuilder::new(Specification::MatchAll)
            .sort_by("name", SortDirection::Descending)
            .limit(10)
            .backend(QueryBackend::Search)
            .build();

        assert_eq!(query.limit, Some(10));
        assert_eq!(query.sort, vec![SortKey::desc("name")]);
        assert_eq!(query.backend, QueryBackend::Search);
    }

    #[test]
    fn test_sort_ties_broken_by_key_and_missing_last() {
        let mut entries = vec![
            (3, Row { name: Some("b"), rank: 1 }),
            (1, Row { name: None, rank: 1 }),
            (2, Row { name: Some("b"), rank: 1 }),
            (4, Row { name: Some("a"), rank: 2 }),
        ];
        sort_entries(&mut entries, &[SortKey::asc("name")]);
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![4, 2, 3, 1]);

        sort_entries(&mut entries, &[SortKey::desc("rank"), SortKey::asc("name")]);
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![4, 2, 3, 1]);
    }

    #[test]
    fn test_finish_query_limits_after_sort() {
        let entries = vec![
            (1, Row { name: Some("c"), rank: 0 }),
            (2, Row { name: Some("a"), rank: 0 }),
            (3, Row { name: Some("b"), rank: 0 }),
        ];
        let query: Query<()> = Query::builder(Specification::MatchAll)
            .sort_by("name", SortDirection::Ascending)
            .limit(2)
            .build();
        let keys: Vec<_> = finish_query(entries, &query).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![2, 3]);
    }
}
