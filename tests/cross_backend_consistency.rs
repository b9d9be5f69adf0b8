// Copyright 2025 Cowboy AI, LLC.

//! The same specification selects the same nodes whether it is evaluated in
//! memory, compiled to SQL and run against SQLite, or compiled to a search
//! query and matched against indexed documents.

use chrono::{DateTime, Duration, TimeZone, Utc};
use cim_term_store::node::{
    format_timestamp, node_document, DateField, LangValue, Node, NodeCriterion, NodeId,
};
use cim_term_store::specification::{and, boost, leaf, not, or, Specification, SqlParam};
use proptest::prelude::*;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeSet;
use uuid::Uuid;

const TYPES: [&str; 2] = ["Concept", "Term"];

fn graph(index: usize) -> Uuid {
    Uuid::from_u128(index as u128 + 1)
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn at(seconds: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(seconds)
}

struct Fixture {
    connection: Connection,
    nodes: Vec<Node>,
}

impl Fixture {
    fn new(nodes: Vec<Node>) -> Self {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "PRAGMA case_sensitive_like = ON;
                 CREATE TABLE nodes (
                     graph_id TEXT NOT NULL,
                     type_id TEXT NOT NULL,
                     id TEXT NOT NULL PRIMARY KEY,
                     code TEXT,
                     uri TEXT,
                     number INTEGER,
                     created_date TEXT,
                     last_modified_date TEXT
                 );",
            )
            .unwrap();
        for node in &nodes {
            connection
                .execute(
                    "INSERT INTO nodes VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        node.id.graph_id.to_string(),
                        node.id.type_id,
                        node.id.id.to_string(),
                        node.code,
                        node.uri,
                        node.number,
                        node.created_date.as_ref().map(format_timestamp),
                        node.last_modified_date.as_ref().map(format_timestamp),
                    ],
                )
                .unwrap();
        }
        Self { connection, nodes }
    }

    fn in_memory(&self, spec: &Specification<NodeCriterion>) -> BTreeSet<String> {
        self.nodes
            .iter()
            .filter(|n| spec.accept(&n.id, n))
            .map(|n| n.id.id.to_string())
            .collect()
    }

    fn relational(&self, spec: &Specification<NodeCriterion>) -> BTreeSet<String> {
        let (template, params) = spec.to_sql().unwrap().into_parts();
        let values: Vec<Value> = params.into_iter().map(bind).collect();
        let mut statement = self
            .connection
            .prepare(&format!("SELECT id FROM nodes WHERE {template}"))
            .unwrap();
        let rows = statement
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))
            .unwrap();
        rows.map(Result::unwrap).collect()
    }

    fn search(&self, spec: &Specification<NodeCriterion>) -> BTreeSet<String> {
        let query = spec.to_search().unwrap();
        self.nodes
            .iter()
            .filter(|n| query.matches(&node_document(n)))
            .map(|n| n.id.id.to_string())
            .collect()
    }
}

fn bind(param: SqlParam) -> Value {
    match param {
        SqlParam::Text(text) => Value::Text(text),
        SqlParam::Integer(n) => Value::Integer(n),
        SqlParam::Uuid(id) => Value::Text(id.to_string()),
        SqlParam::Timestamp(at) => Value::Text(format_timestamp(&at)),
    }
}

fn nodes_strategy() -> impl Strategy<Value = Vec<Node>> {
    let parts = (
        0..2usize,
        prop::sample::select(TYPES.to_vec()),
        prop::option::of("[ab]{1,3}"),
        prop::option::of(0i64..5),
        prop::option::of(0i64..3),
        prop::option::of(0i64..100),
        prop::collection::vec((prop::sample::select(vec!["en", "de"]), "[ab]{1,2}"), 0..3),
    );
    prop::collection::vec(parts, 0..12).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (g, type_id, code, number, uri, created, labels))| {
                let mut node = Node::new(NodeId::new(graph(g), type_id, Uuid::from_u128(1000 + i as u128)));
                node.code = code;
                node.number = number;
                node.uri = uri.map(|u| format!("urn:test:{u}"));
                node.created_date = created.map(at);
                node.last_modified_date = node.created_date;
                for (lang, value) in labels {
                    node.properties
                        .entry("label".to_string())
                        .or_default()
                        .push(LangValue::new(lang, value));
                }
                if i > 0 && i % 3 == 0 {
                    node.references
                        .entry("broader".to_string())
                        .or_default()
                        .push(NodeId::new(graph(g), "Concept", Uuid::from_u128(1000)));
                }
                node
            })
            .collect()
    })
}

fn relational_criterion() -> impl Strategy<Value = NodeCriterion> {
    prop_oneof![
        (0..2usize).prop_map(|g| NodeCriterion::ByGraphId(graph(g))),
        prop::sample::select(TYPES.to_vec()).prop_map(|t| NodeCriterion::ByTypeId(t.to_string())),
        "[ab]{1,3}".prop_map(NodeCriterion::ByCode),
        "[ab_%]{0,2}".prop_map(NodeCriterion::ByCodePrefix),
        (0i64..5).prop_map(NodeCriterion::ByNumber),
        (0i64..3).prop_map(|u| NodeCriterion::ByUri(format!("urn:test:{u}"))),
        (prop::option::of(0i64..100), prop::option::of(0i64..100)).prop_map(|(lower, upper)| {
            NodeCriterion::ByDate {
                field: DateField::Created,
                lower: lower.map(at),
                upper: upper.map(at),
            }
        }),
    ]
}

fn searchable_criterion() -> impl Strategy<Value = NodeCriterion> {
    prop_oneof![
        3 => relational_criterion(),
        1 => (prop::option::of(prop::sample::select(vec!["en", "de"])), "[ab]{1,2}").prop_map(
            |(lang, value)| NodeCriterion::ByProperty {
                attribute: "label".into(),
                lang: lang.map(str::to_string),
                value,
            }
        ),
        1 => (prop::option::of(prop::sample::select(vec!["en", "de"])), "[ab]{0,1}").prop_map(
            |(lang, prefix)| NodeCriterion::ByPropertyPrefix {
                attribute: "label".into(),
                lang: lang.map(str::to_string),
                prefix,
            }
        ),
        1 => Just(NodeCriterion::ByReference {
            attribute: "broader".into(),
            target: Uuid::from_u128(1000),
        }),
        1 => Just(NodeCriterion::ByReferenceAbsent {
            attribute: "broader".into(),
        }),
    ]
}

fn specification(
    criterion: impl Strategy<Value = NodeCriterion> + 'static,
) -> impl Strategy<Value = Specification<NodeCriterion>> {
    criterion
        .prop_map(|c| leaf(c))
        .prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(|children| and(children)),
                prop::collection::vec(inner.clone(), 1..4).prop_map(|children| or(children)),
                inner.clone().prop_map(|s| not(s)),
                (inner, 0.5f32..4.0).prop_map(|(s, w)| boost(s, w)),
            ]
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn relational_search_and_memory_agree(
        nodes in nodes_strategy(),
        spec in specification(relational_criterion()),
    ) {
        let fixture = Fixture::new(nodes);
        let expected = fixture.in_memory(&spec);
        prop_assert_eq!(&fixture.relational(&spec), &expected, "sql for {}", spec);
        prop_assert_eq!(&fixture.search(&spec), &expected, "search for {}", spec);
    }

    #[test]
    fn search_and_memory_agree_on_attributes(
        nodes in nodes_strategy(),
        spec in specification(searchable_criterion()),
    ) {
        let fixture = Fixture::new(nodes);
        prop_assert_eq!(fixture.search(&spec), fixture.in_memory(&spec), "search for {}", spec);
    }
}

#[test]
fn negation_matches_rows_with_missing_columns() {
    let with_code = Node::new(NodeId::new(graph(0), "Concept", Uuid::from_u128(1))).with_code("cat");
    let without_code = Node::new(NodeId::new(graph(0), "Concept", Uuid::from_u128(2)));
    let fixture = Fixture::new(vec![with_code, without_code]);

    let spec = not(leaf(NodeCriterion::ByCode("cat".into())));
    let expected: BTreeSet<String> = [Uuid::from_u128(2).to_string()].into_iter().collect();
    assert_eq!(fixture.in_memory(&spec), expected);
    assert_eq!(fixture.relational(&spec), expected);
    assert_eq!(fixture.search(&spec), expected);
}

#[test]
fn prefix_wildcards_are_literal() {
    let plain = Node::new(NodeId::new(graph(0), "Concept", Uuid::from_u128(1))).with_code("abc");
    let underscored = Node::new(NodeId::new(graph(0), "Concept", Uuid::from_u128(2))).with_code("a_c");
    let fixture = Fixture::new(vec![plain, underscored]);

    let spec = leaf(NodeCriterion::ByCodePrefix("a_".into()));
    let expected: BTreeSet<String> = [Uuid::from_u128(2).to_string()].into_iter().collect();
    assert_eq!(fixture.relational(&spec), expected);
    assert_eq!(fixture.search(&spec), expected);
    assert_eq!(fixture.in_memory(&spec), expected);
}
