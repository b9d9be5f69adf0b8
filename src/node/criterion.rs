// Copyright 2025 Cowboy AI, LLC.

//! Leaf predicates over nodes and their attribute-value rows

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::document::format_timestamp;
use super::model::{LangValue, Node, NodeAttributeValueId, NodeId};
use crate::query_parser::{FieldTerm, FromTerm, TermValue};
use crate::specification::{
    BooleanQuery, Criterion, Occur, SearchClause, SearchQuery, SqlParam, SqlQuery,
};

/// Audit timestamp a date criterion applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateField {
    /// `created_date`
    Created,
    /// `last_modified_date`
    LastModified,
}

impl DateField {
    fn column(self) -> &'static str {
        match self {
            DateField::Created => "created_date",
            DateField::LastModified => "last_modified_date",
        }
    }

    fn search_field(self) -> &'static str {
        match self {
            DateField::Created => "createdDate",
            DateField::LastModified => "lastModifiedDate",
        }
    }

    fn of(self, node: &Node) -> Option<DateTime<Utc>> {
        match self {
            DateField::Created => node.created_date,
            DateField::LastModified => node.last_modified_date,
        }
    }
}

/// Leaf predicate over nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeCriterion {
    /// Node identifier
    ById(Uuid),
    /// Owning graph
    ByGraphId(Uuid),
    /// Node type
    ByTypeId(String),
    /// Exact code
    ByCode(String),
    /// Code prefix
    ByCodePrefix(String),
    /// Exact URI
    ByUri(String),
    /// Sequence number
    ByNumber(i64),
    /// Audit timestamp within inclusive bounds
    ByDate {
        /// Timestamp checked
        field: DateField,
        /// Inclusive lower bound
        lower: Option<DateTime<Utc>>,
        /// Inclusive upper bound
        upper: Option<DateTime<Utc>>,
    },
    /// Text attribute value, optionally in one language
    ByProperty {
        /// Attribute name
        attribute: String,
        /// Language tag
        lang: Option<String>,
        /// Exact value
        value: String,
    },
    /// Text attribute value prefix, optionally in one language
    ByPropertyPrefix {
        /// Attribute name
        attribute: String,
        /// Language tag
        lang: Option<String>,
        /// Value prefix
        prefix: String,
    },
    /// Reference attribute pointing at a node id
    ByReference {
        /// Attribute name
        attribute: String,
        /// Target node identifier
        target: Uuid,
    },
    /// No reference under an attribute
    ByReferenceAbsent {
        /// Attribute name
        attribute: String,
    },
    /// Field path with no known mapping; matches nothing and compiles nowhere
    Unknown {
        /// Field path as written
        field: String,
        /// Value as written
        value: String,
    },
}

fn property_values<'a>(
    node: &'a Node,
    attribute: &str,
    lang: &'a Option<String>,
) -> impl Iterator<Item = &'a str> + 'a {
    node.property(attribute)
        .iter()
        .filter(move |v| lang.as_ref().map_or(true, |l| *l == v.lang))
        .map(|v| v.value.as_str())
}

fn property_field(attribute: &str, lang: &Option<String>) -> String {
    match lang {
        Some(lang) => format!("properties.{attribute}.{lang}"),
        None => format!("properties.{attribute}"),
    }
}

impl Criterion for NodeCriterion {
    type Key = NodeId;
    type Value = Node;

    fn accept(&self, key: &NodeId, node: &Node) -> bool {
        match self {
            NodeCriterion::ById(id) => key.id == *id,
            NodeCriterion::ByGraphId(id) => key.graph_id == *id,
            NodeCriterion::ByTypeId(type_id) => key.type_id == *type_id,
            NodeCriterion::ByCode(code) => node.code.as_deref() == Some(code.as_str()),
            NodeCriterion::ByCodePrefix(prefix) => node
                .code
                .as_deref()
                .is_some_and(|c| c.starts_with(prefix.as_str())),
            NodeCriterion::ByUri(uri) => node.uri.as_deref() == Some(uri.as_str()),
            NodeCriterion::ByNumber(n) => node.number == Some(*n),
            NodeCriterion::ByDate {
                field,
                lower,
                upper,
            } => field.of(node).is_some_and(|d| {
                lower.map_or(true, |l| d >= l) && upper.map_or(true, |u| d <= u)
            }),
            NodeCriterion::ByProperty {
                attribute,
                lang,
                value,
            } => property_values(node, attribute, lang).any(|v| v == value),
            NodeCriterion::ByPropertyPrefix {
                attribute,
                lang,
                prefix,
            } => property_values(node, attribute, lang).any(|v| v.starts_with(prefix.as_str())),
            NodeCriterion::ByReference { attribute, target } => {
                node.reference(attribute).iter().any(|r| r.id == *target)
            }
            NodeCriterion::ByReferenceAbsent { attribute } => node.reference(attribute).is_empty(),
            NodeCriterion::Unknown { .. } => false,
        }
    }

    fn to_sql(&self) -> Option<SqlQuery> {
        let sql = match self {
            NodeCriterion::ById(id) => SqlQuery::equals("id", SqlParam::Uuid(*id)),
            NodeCriterion::ByGraphId(id) => SqlQuery::equals("graph_id", SqlParam::Uuid(*id)),
            NodeCriterion::ByTypeId(t) => SqlQuery::equals("type_id", SqlParam::Text(t.clone())),
            NodeCriterion::ByCode(code) => {
                SqlQuery::equals("code", SqlParam::Text(code.clone())).non_null("code")
            }
            NodeCriterion::ByCodePrefix(prefix) => {
                SqlQuery::starts_with("code", prefix).non_null("code")
            }
            NodeCriterion::ByUri(uri) => {
                SqlQuery::equals("uri", SqlParam::Text(uri.clone())).non_null("uri")
            }
            NodeCriterion::ByNumber(n) => {
                SqlQuery::equals("number", SqlParam::Integer(*n)).non_null("number")
            }
            NodeCriterion::ByDate {
                field,
                lower,
                upper,
            } => SqlQuery::between(
                field.column(),
                lower.map(SqlParam::Timestamp),
                upper.map(SqlParam::Timestamp),
            )
            .non_null(field.column()),
            NodeCriterion::ByProperty { .. }
            | NodeCriterion::ByPropertyPrefix { .. }
            | NodeCriterion::ByReference { .. }
            | NodeCriterion::ByReferenceAbsent { .. }
            | NodeCriterion::Unknown { .. } => return None,
        };
        Some(sql)
    }

    fn to_search(&self) -> Option<SearchQuery> {
        let query = match self {
            NodeCriterion::ById(id) => SearchQuery::term("id", id.to_string()),
            NodeCriterion::ByGraphId(id) => SearchQuery::term("graph.id", id.to_string()),
            NodeCriterion::ByTypeId(t) => SearchQuery::term("type.id", t.as_str()),
            NodeCriterion::ByCode(code) => SearchQuery::term("code", code.as_str()),
            NodeCriterion::ByCodePrefix(prefix) => SearchQuery::prefix("code", prefix.as_str()),
            NodeCriterion::ByUri(uri) => SearchQuery::term("uri", uri.as_str()),
            NodeCriterion::ByNumber(n) => SearchQuery::term("number", n.to_string()),
            NodeCriterion::ByDate {
                field,
                lower,
                upper,
            } => SearchQuery::range(
                field.search_field(),
                lower.as_ref().map(format_timestamp),
                upper.as_ref().map(format_timestamp),
            ),
            NodeCriterion::ByProperty {
                attribute,
                lang,
                value,
            } => SearchQuery::term(property_field(attribute, lang), value.as_str()),
            NodeCriterion::ByPropertyPrefix {
                attribute,
                lang,
                prefix,
            } => SearchQuery::prefix(property_field(attribute, lang), prefix.as_str()),
            NodeCriterion::ByReference { attribute, target } => {
                SearchQuery::term(format!("references.{attribute}.id"), target.to_string())
            }
            // an empty prefix matches any indexed target
            NodeCriterion::ByReferenceAbsent { attribute } => SearchQuery::Boolean(BooleanQuery {
                clauses: vec![
                    SearchClause {
                        occur: Occur::Must,
                        query: SearchQuery::MatchAll,
                    },
                    SearchClause {
                        occur: Occur::MustNot,
                        query: SearchQuery::prefix(format!("references.{attribute}.id"), ""),
                    },
                ],
                minimum_should_match: 0,
            }),
            NodeCriterion::Unknown { .. } => return None,
        };
        Some(query)
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    let quoted = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '^' | '*' | '"'));
    if quoted {
        write!(f, "{value:?}")
    } else {
        write!(f, "{value}")
    }
}

fn write_attribute(f: &mut fmt::Formatter<'_>, attribute: &str, lang: &Option<String>) -> fmt::Result {
    match lang {
        Some(lang) => write!(f, "p.{attribute}.{lang}:"),
        None => write!(f, "p.{attribute}:"),
    }
}

impl fmt::Display for NodeCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCriterion::ById(id) => write!(f, "id:{id}"),
            NodeCriterion::ByGraphId(id) => write!(f, "graph.id:{id}"),
            NodeCriterion::ByTypeId(type_id) => {
                write!(f, "type.id:")?;
                write_value(f, type_id)
            }
            NodeCriterion::ByCode(code) => {
                write!(f, "code:")?;
                write_value(f, code)
            }
            NodeCriterion::ByCodePrefix(prefix) => write!(f, "code:{prefix}*"),
            NodeCriterion::ByUri(uri) => {
                write!(f, "uri:")?;
                write_value(f, uri)
            }
            NodeCriterion::ByNumber(n) => write!(f, "number:{n}"),
            NodeCriterion::ByDate {
                field,
                lower,
                upper,
            } => {
                let bound = |b: &Option<DateTime<Utc>>| {
                    b.as_ref().map_or_else(|| "*".to_string(), format_timestamp)
                };
                write!(
                    f,
                    "{}:[{} TO {}]",
                    field.search_field(),
                    bound(lower),
                    bound(upper)
                )
            }
            NodeCriterion::ByProperty {
                attribute,
                lang,
                value,
            } => {
                write_attribute(f, attribute, lang)?;
                write_value(f, value)
            }
            NodeCriterion::ByPropertyPrefix {
                attribute,
                lang,
                prefix,
            } => {
                write_attribute(f, attribute, lang)?;
                write!(f, "{prefix}*")
            }
            NodeCriterion::ByReference { attribute, target } => {
                write!(f, "r.{attribute}.id:{target}")
            }
            NodeCriterion::ByReferenceAbsent { attribute } => write!(f, "r.{attribute}.id:null"),
            NodeCriterion::Unknown { field, value } => write!(f, "{field}:{value}"),
        }
    }
}

fn exact_text<'a>(term: &'a FieldTerm) -> Result<&'a str, String> {
    match &term.value {
        TermValue::Exact(s) | TermValue::Phrase(s) => Ok(s),
        TermValue::Prefix(_) => Err(format!("prefix search is not supported on {}", term.field)),
        TermValue::Range { .. } => Err(format!("range search is not supported on {}", term.field)),
    }
}

fn parse_uuid(term: &FieldTerm) -> Result<Uuid, String> {
    let text = exact_text(term)?;
    Uuid::parse_str(text).map_err(|e| format!("invalid id {text:?}: {e}"))
}

/// RFC 3339 timestamp or a plain `YYYY-MM-DD` date at midnight UTC
fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| format!("invalid date {text:?}"))
}

fn date_criterion(field: DateField, term: &FieldTerm) -> Result<NodeCriterion, String> {
    let (lower, upper) = match &term.value {
        TermValue::Range { lower, upper } => (
            lower.as_deref().map(parse_timestamp).transpose()?,
            upper.as_deref().map(parse_timestamp).transpose()?,
        ),
        _ => {
            let at = parse_timestamp(exact_text(term)?)?;
            (Some(at), Some(at))
        }
    };
    Ok(NodeCriterion::ByDate {
        field,
        lower,
        upper,
    })
}

fn property_criterion(
    attribute: &str,
    lang: Option<&str>,
    term: &FieldTerm,
) -> Result<NodeCriterion, String> {
    let attribute = attribute.to_string();
    let lang = lang.map(str::to_string);
    match &term.value {
        TermValue::Prefix(prefix) => Ok(NodeCriterion::ByPropertyPrefix {
            attribute,
            lang,
            prefix: prefix.clone(),
        }),
        _ => Ok(NodeCriterion::ByProperty {
            attribute,
            lang,
            value: exact_text(term)?.to_string(),
        }),
    }
}

impl FromTerm for NodeCriterion {
    fn from_term(term: &FieldTerm) -> Result<Self, String> {
        let path: Vec<&str> = term.field.split('.').collect();
        match path.as_slice() {
            ["id"] => Ok(NodeCriterion::ById(parse_uuid(term)?)),
            ["urn"] if term.value.text().is_some_and(|v| v.starts_with("uuid:")) => {
                let text = exact_text(term)?;
                let id = &text["uuid:".len()..];
                Uuid::parse_str(id)
                    .map(NodeCriterion::ById)
                    .map_err(|e| format!("invalid id {id:?}: {e}"))
            }
            ["graph", "id"] | ["graphId"] => Ok(NodeCriterion::ByGraphId(parse_uuid(term)?)),
            ["type", "id"] | ["typeId"] => {
                Ok(NodeCriterion::ByTypeId(exact_text(term)?.to_string()))
            }
            ["code"] => match &term.value {
                TermValue::Prefix(prefix) => Ok(NodeCriterion::ByCodePrefix(prefix.clone())),
                _ => Ok(NodeCriterion::ByCode(exact_text(term)?.to_string())),
            },
            ["uri"] => Ok(NodeCriterion::ByUri(exact_text(term)?.to_string())),
            ["number"] | ["n"] => {
                let text = exact_text(term)?;
                text.parse()
                    .map(NodeCriterion::ByNumber)
                    .map_err(|_| format!("invalid number {text:?}"))
            }
            ["createdDate"] => date_criterion(DateField::Created, term),
            ["lastModifiedDate"] => date_criterion(DateField::LastModified, term),
            ["properties" | "props" | "p", attribute] => property_criterion(attribute, None, term),
            ["properties" | "props" | "p", attribute, lang] => {
                property_criterion(attribute, Some(*lang), term)
            }
            ["references" | "refs" | "r", attribute, "id"]
                if matches!(&term.value, TermValue::Exact(v) if v == "null") =>
            {
                Ok(NodeCriterion::ByReferenceAbsent {
                    attribute: attribute.to_string(),
                })
            }
            ["references" | "refs" | "r", attribute] | ["references" | "refs" | "r", attribute, "id"] => {
                Ok(NodeCriterion::ByReference {
                    attribute: attribute.to_string(),
                    target: parse_uuid(term)?,
                })
            }
            _ => Ok(NodeCriterion::Unknown {
                field: term.field.clone(),
                value: match &term.value {
                    TermValue::Range { lower, upper } => format!(
                        "[{} TO {}]",
                        lower.as_deref().unwrap_or("*"),
                        upper.as_deref().unwrap_or("*")
                    ),
                    other => other.text().unwrap_or_default().to_string(),
                },
            }),
        }
    }
}

/// Leaf predicate over text attribute-value rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextValueCriterion {
    /// Rows owned by a node
    ByNode(NodeId),
}

fn node_columns(prefix: &str, id: &NodeId) -> SqlQuery {
    SqlQuery::new(
        format!("{prefix}graph_id = ? AND {prefix}type_id = ? AND {prefix}id = ?"),
        vec![
            SqlParam::Uuid(id.graph_id),
            SqlParam::Text(id.type_id.clone()),
            SqlParam::Uuid(id.id),
        ],
    )
}

impl fmt::Display for TextValueCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextValueCriterion::ByNode(node) => write!(f, "node:{node}"),
        }
    }
}

impl Criterion for TextValueCriterion {
    type Key = NodeAttributeValueId;
    type Value = LangValue;

    fn accept(&self, key: &NodeAttributeValueId, _value: &LangValue) -> bool {
        match self {
            TextValueCriterion::ByNode(node) => key.node_id == *node,
        }
    }

    fn to_sql(&self) -> Option<SqlQuery> {
        match self {
            TextValueCriterion::ByNode(node) => Some(node_columns("node_", node)),
        }
    }
}

/// Leaf predicate over reference attribute-value rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceValueCriterion {
    /// Rows owned by a node
    ByNode(NodeId),
    /// Rows pointing at a node
    ByTarget(NodeId),
}

impl fmt::Display for ReferenceValueCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceValueCriterion::ByNode(node) => write!(f, "node:{node}"),
            ReferenceValueCriterion::ByTarget(node) => write!(f, "target:{node}"),
        }
    }
}

impl Criterion for ReferenceValueCriterion {
    type Key = NodeAttributeValueId;
    type Value = NodeId;

    fn accept(&self, key: &NodeAttributeValueId, target: &NodeId) -> bool {
        match self {
            ReferenceValueCriterion::ByNode(node) => key.node_id == *node,
            ReferenceValueCriterion::ByTarget(node) => target == node,
        }
    }

    fn to_sql(&self) -> Option<SqlQuery> {
        match self {
            ReferenceValueCriterion::ByNode(node) => Some(node_columns("node_", node)),
            ReferenceValueCriterion::ByTarget(node) => Some(node_columns("target_", node)),
        }
    }
}
