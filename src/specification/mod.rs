// Copyright 2025 Cowboy AI, LLC.

//! # Specification Algebra
//!
//! Filter predicates expressed once and evaluated three ways: in memory through
//! [`Specification::accept`], as a parametrized relational fragment through
//! [`Specification::to_sql`], and as a search query tree through
//! [`Specification::to_search`].
//!
//! ## Components
//!
//! - **Criterion**: a domain leaf predicate declaring which backends it supports
//! - **Specification**: the composite tree (and / or / not / boost)
//! - **Normal forms**: simplification, DNF and CNF conversion
//!
//! ```
//! use cim_term_store::node::NodeCriterion;
//! use cim_term_store::specification::{and, boost, leaf, not, or, Specification};
//!
//! let spec: Specification<NodeCriterion> = or([
//!     and([leaf(NodeCriterion::ByTypeId("Concept".into()))]),
//!     and([boost(leaf(NodeCriterion::ByCode("cat".into())), 2.0)]),
//! ]);
//! assert!(spec.to_sql().is_ok());
//! let negated = not(spec);
//! assert!(matches!(negated, Specification::Not(_)));
//! ```

mod normal_form;
mod search;
mod sql;

pub use search::{BooleanQuery, Occur, SearchClause, SearchDocument, SearchQuery};
pub use sql::{SqlParam, SqlQuery};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::errors::{PersistenceError, PersistenceResult};

/// Query engine a specification is evaluated by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QueryBackend {
    /// In-process evaluation through `accept`
    #[default]
    InMemory,
    /// Parametrized relational fragment
    Relational,
    /// Search index query tree
    Search,
}

impl fmt::Display for QueryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryBackend::InMemory => write!(f, "in-memory"),
            QueryBackend::Relational => write!(f, "relational"),
            QueryBackend::Search => write!(f, "search"),
        }
    }
}

/// A leaf predicate over stored key/value pairs
///
/// Returning `None` from a compiler hook declares the leaf unsupported by that
/// backend; compiling a tree containing it fails with
/// [`PersistenceError::UnsupportedQueryBackend`]. `Display` renders the leaf
/// in query syntax.
pub trait Criterion: Clone + fmt::Debug + fmt::Display + Eq + Hash + Send + Sync + 'static {
    /// Storage key type
    type Key: Send + Sync;
    /// Storage value type
    type Value: Send + Sync;

    /// Evaluate against a stored pair
    fn accept(&self, key: &Self::Key, value: &Self::Value) -> bool;

    /// Relational fragment, if supported
    fn to_sql(&self) -> Option<SqlQuery> {
        None
    }

    /// Search query node, if supported
    fn to_search(&self) -> Option<SearchQuery> {
        None
    }
}

/// Composable predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Specification<C> {
    /// Accepts every pair
    MatchAll,
    /// Accepts no pair
    MatchNone,
    /// Domain leaf
    Leaf(C),
    /// All children accept; empty accepts nothing
    And(Vec<Specification<C>>),
    /// Any child accepts
    Or(Vec<Specification<C>>),
    /// Child rejects
    Not(Box<Specification<C>>),
    /// Child with a relevance weight; matching is unchanged
    Boost {
        /// Wrapped specification
        specification: Box<Specification<C>>,
        /// Relevance multiplier, positive
        weight: f32,
    },
}

// Weights are positive finite numbers, so bitwise hashing agrees with `==`.
impl<C: Eq> Eq for Specification<C> {}

impl<C: Hash> Hash for Specification<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Specification::MatchAll | Specification::MatchNone => {}
            Specification::Leaf(c) => c.hash(state),
            Specification::And(children) | Specification::Or(children) => children.hash(state),
            Specification::Not(inner) => inner.hash(state),
            Specification::Boost {
                specification,
                weight,
            } => {
                specification.hash(state);
                weight.to_bits().hash(state);
            }
        }
    }
}

impl<C> From<C> for Specification<C> {
    fn from(criterion: C) -> Self {
        Specification::Leaf(criterion)
    }
}

/// Leaf specification
pub fn leaf<C>(criterion: C) -> Specification<C> {
    Specification::Leaf(criterion)
}

/// Conjunction of specifications
pub fn and<C>(children: impl IntoIterator<Item = Specification<C>>) -> Specification<C> {
    Specification::And(children.into_iter().collect())
}

/// Disjunction of specifications
pub fn or<C>(children: impl IntoIterator<Item = Specification<C>>) -> Specification<C> {
    Specification::Or(children.into_iter().collect())
}

/// Negation of a specification
pub fn not<C>(specification: Specification<C>) -> Specification<C> {
    Specification::Not(Box::new(specification))
}

/// Attach a relevance weight
pub fn boost<C>(specification: Specification<C>, weight: f32) -> Specification<C> {
    Specification::Boost {
        specification: Box::new(specification),
        weight,
    }
}

/// Specification accepting everything
pub fn match_all<C>() -> Specification<C> {
    Specification::MatchAll
}

/// Specification accepting nothing
pub fn match_none<C>() -> Specification<C> {
    Specification::MatchNone
}

impl<C> Specification<C> {
    /// Iterate over leaf criteria, depth first
    pub fn leaves(&self) -> Vec<&C> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a C>) {
        match self {
            Specification::MatchAll | Specification::MatchNone => {}
            Specification::Leaf(c) => out.push(c),
            Specification::And(children) | Specification::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Specification::Not(inner) => inner.collect_leaves(out),
            Specification::Boost { specification, .. } => specification.collect_leaves(out),
        }
    }
}

impl<C: Criterion> Specification<C> {
    /// Evaluate against a stored pair
    pub fn accept(&self, key: &C::Key, value: &C::Value) -> bool {
        match self {
            Specification::MatchAll => true,
            Specification::MatchNone => false,
            Specification::Leaf(c) => c.accept(key, value),
            Specification::And(children) => {
                !children.is_empty() && children.iter().all(|s| s.accept(key, value))
            }
            Specification::Or(children) => children.iter().any(|s| s.accept(key, value)),
            Specification::Not(inner) => !inner.accept(key, value),
            Specification::Boost { specification, .. } => specification.accept(key, value),
        }
    }

    /// Whether every leaf compiles for a backend
    pub fn supports(&self, backend: QueryBackend) -> bool {
        self.ensure_supported(backend).is_ok()
    }

    /// Fail with `UnsupportedQueryBackend` naming the first leaf the backend cannot compile
    pub fn ensure_supported(&self, backend: QueryBackend) -> PersistenceResult<()> {
        let unsupported = self.leaves().into_iter().find(|c| match backend {
            QueryBackend::InMemory => false,
            QueryBackend::Relational => c.to_sql().is_none(),
            QueryBackend::Search => c.to_search().is_none(),
        });
        match unsupported {
            Some(c) => Err(unsupported_backend(backend, c)),
            None => Ok(()),
        }
    }
}

pub(crate) fn unsupported_backend<C: fmt::Display>(backend: QueryBackend, c: &C) -> PersistenceError {
    PersistenceError::UnsupportedQueryBackend {
        backend,
        criterion: c.to_string(),
    }
}

impl<C: fmt::Display> fmt::Display for Specification<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn group<C: fmt::Display>(
            f: &mut fmt::Formatter<'_>,
            children: &[Specification<C>],
            separator: &str,
        ) -> fmt::Result {
            write!(f, "(")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {separator} ")?;
                }
                write!(f, "{child}")?;
            }
            write!(f, ")")
        }

        match self {
            Specification::MatchAll => write!(f, "*:*"),
            Specification::MatchNone => write!(f, "-*:*"),
            Specification::Leaf(c) => write!(f, "{c}"),
            Specification::And(children) => group(f, children, "AND"),
            Specification::Or(children) => group(f, children, "OR"),
            Specification::Not(inner) => write!(f, "NOT {inner}"),
            Specification::Boost {
                specification,
                weight,
            } => write!(f, "{specification}^{weight}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Tiny criterion over integers used by the algebra tests

    use super::*;
    use crate::storage::{SortValue, Sortable};

    impl Sortable for i64 {
        fn sort_value(&self, _field: &str) -> Option<SortValue> {
            Some(SortValue::Integer(*self))
        }
    }

    /// Predicates over an integer value keyed by an integer
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub enum Num {
        Eq(i64),
        Even,
        Positive,
        /// Only evaluable in memory
        Opaque(i64),
    }

    impl fmt::Display for Num {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Num::Eq(n) => write!(f, "value:{n}"),
                Num::Even => write!(f, "parity:even"),
                Num::Positive => write!(f, "sign:positive"),
                Num::Opaque(n) => write!(f, "opaque:{n}"),
            }
        }
    }

    impl Criterion for Num {
        type Key = u32;
        type Value = i64;

        fn accept(&self, _key: &u32, value: &i64) -> bool {
            match self {
                Num::Eq(n) => value == n,
                Num::Even => value % 2 == 0,
                Num::Positive => *value > 0,
                Num::Opaque(n) => value == n,
            }
        }

        fn to_sql(&self) -> Option<SqlQuery> {
            match self {
                Num::Eq(n) => Some(SqlQuery::equals("value", SqlParam::Integer(*n))),
                Num::Even => Some(SqlQuery::new("value % 2 = 0", vec![])),
                Num::Positive => Some(SqlQuery::new("value > ?", vec![SqlParam::Integer(0)])),
                Num::Opaque(_) => None,
            }
        }

        fn to_search(&self) -> Option<SearchQuery> {
            match self {
                Num::Eq(n) => Some(SearchQuery::term("value", n.to_string())),
                Num::Even => Some(SearchQuery::term("parity", "even")),
                Num::Positive => Some(SearchQuery::term("sign", "positive")),
                Num::Opaque(_) => None,
            }
        }
    }
}
