// Copyright 2025 Cowboy AI, LLC.

//! Simplification and normal forms
//!
//! Boosts are transparent to matching and do not survive DNF/CNF conversion.

use super::Specification;

/// Leaf or negated leaf
type Literal<C> = (bool, C);

impl<C: Clone + PartialEq> Specification<C> {
    /// Flatten nested groups, drop duplicates and constant children, remove double negation
    pub fn simplify(&self) -> Specification<C> {
        match self {
            Specification::MatchAll | Specification::MatchNone | Specification::Leaf(_) => {
                self.clone()
            }
            Specification::And(children) => {
                let mut flat = Vec::new();
                for child in children.iter().map(Specification::simplify) {
                    match child {
                        Specification::MatchNone => return Specification::MatchNone,
                        Specification::MatchAll => {}
                        Specification::And(grand) => extend_unique(&mut flat, grand),
                        other => extend_unique(&mut flat, vec![other]),
                    }
                }
                if children.is_empty() {
                    Specification::MatchNone
                } else {
                    collapse(flat, Specification::MatchAll, Specification::And)
                }
            }
            Specification::Or(children) => {
                let mut flat = Vec::new();
                for child in children.iter().map(Specification::simplify) {
                    match child {
                        Specification::MatchAll => return Specification::MatchAll,
                        Specification::MatchNone => {}
                        Specification::Or(grand) => extend_unique(&mut flat, grand),
                        other => extend_unique(&mut flat, vec![other]),
                    }
                }
                collapse(flat, Specification::MatchNone, Specification::Or)
            }
            Specification::Not(inner) => match inner.simplify() {
                Specification::Not(grand) => *grand,
                Specification::MatchAll => Specification::MatchNone,
                Specification::MatchNone => Specification::MatchAll,
                other => Specification::Not(Box::new(other)),
            },
            Specification::Boost {
                specification,
                weight,
            } => Specification::Boost {
                specification: Box::new(specification.simplify()),
                weight: *weight,
            },
        }
    }

    /// Disjunctive normal form: `or(and(literal, ..), ..)`
    ///
    /// A constant-true conjunction is rendered as `MatchAll`; a false tree as `MatchNone`.
    pub fn to_dnf(&self) -> Specification<C> {
        let clauses = self.dnf_clauses(false);
        if clauses.is_empty() {
            return Specification::MatchNone;
        }
        Specification::Or(
            clauses
                .into_iter()
                .map(|clause| group(clause, Specification::MatchAll, Specification::And))
                .collect(),
        )
    }

    /// Conjunctive normal form: `and(or(literal, ..), ..)`
    ///
    /// A constant-false disjunction is rendered as `MatchNone`; a true tree as `MatchAll`.
    pub fn to_cnf(&self) -> Specification<C> {
        let clauses = self.cnf_clauses(false);
        if clauses.is_empty() {
            return Specification::MatchAll;
        }
        Specification::And(
            clauses
                .into_iter()
                .map(|clause| group(clause, Specification::MatchNone, Specification::Or))
                .collect(),
        )
    }

    // Outer list is a disjunction, inner lists are conjunctions.
    fn dnf_clauses(&self, negated: bool) -> Vec<Vec<Literal<C>>> {
        match (self, negated) {
            (Specification::Leaf(c), _) => vec![vec![(!negated, c.clone())]],
            (Specification::MatchAll, false) | (Specification::MatchNone, true) => vec![vec![]],
            (Specification::MatchAll, true) | (Specification::MatchNone, false) => vec![],
            (Specification::And(children), false) => {
                if children.is_empty() {
                    vec![]
                } else {
                    product(children.iter().map(|c| c.dnf_clauses(false)))
                }
            }
            (Specification::And(children), true) => {
                if children.is_empty() {
                    vec![vec![]]
                } else {
                    children.iter().flat_map(|c| c.dnf_clauses(true)).collect()
                }
            }
            (Specification::Or(children), false) => {
                children.iter().flat_map(|c| c.dnf_clauses(false)).collect()
            }
            (Specification::Or(children), true) => {
                if children.is_empty() {
                    vec![vec![]]
                } else {
                    product(children.iter().map(|c| c.dnf_clauses(true)))
                }
            }
            (Specification::Not(inner), _) => inner.dnf_clauses(!negated),
            (Specification::Boost { specification, .. }, _) => specification.dnf_clauses(negated),
        }
    }

    // Outer list is a conjunction, inner lists are disjunctions.
    fn cnf_clauses(&self, negated: bool) -> Vec<Vec<Literal<C>>> {
        match (self, negated) {
            (Specification::Leaf(c), _) => vec![vec![(!negated, c.clone())]],
            (Specification::MatchAll, false) | (Specification::MatchNone, true) => vec![],
            (Specification::MatchAll, true) | (Specification::MatchNone, false) => vec![vec![]],
            (Specification::And(children), false) => {
                if children.is_empty() {
                    vec![vec![]]
                } else {
                    children.iter().flat_map(|c| c.cnf_clauses(false)).collect()
                }
            }
            (Specification::And(children), true) => {
                if children.is_empty() {
                    vec![]
                } else {
                    product(children.iter().map(|c| c.cnf_clauses(true)))
                }
            }
            (Specification::Or(children), false) => {
                if children.is_empty() {
                    vec![vec![]]
                } else {
                    product(children.iter().map(|c| c.cnf_clauses(false)))
                }
            }
            (Specification::Or(children), true) => {
                children.iter().flat_map(|c| c.cnf_clauses(true)).collect()
            }
            (Specification::Not(inner), _) => inner.cnf_clauses(!negated),
            (Specification::Boost { specification, .. }, _) => specification.cnf_clauses(negated),
        }
    }
}

/// Pairwise concatenation of one clause from each operand
fn product<C: Clone + PartialEq>(
    operands: impl Iterator<Item = Vec<Vec<Literal<C>>>>,
) -> Vec<Vec<Literal<C>>> {
    let mut acc: Vec<Vec<Literal<C>>> = vec![vec![]];
    for clauses in operands {
        let mut next = Vec::with_capacity(acc.len() * clauses.len());
        for left in &acc {
            for right in &clauses {
                let mut merged = left.clone();
                for literal in right {
                    if !merged.contains(literal) {
                        merged.push(literal.clone());
                    }
                }
                next.push(merged);
            }
        }
        acc = next;
    }
    acc
}

fn group<C>(
    clause: Vec<Literal<C>>,
    empty: Specification<C>,
    wrap: fn(Vec<Specification<C>>) -> Specification<C>,
) -> Specification<C> {
    if clause.is_empty() {
        return empty;
    }
    wrap(
        clause
            .into_iter()
            .map(|(positive, c)| {
                if positive {
                    Specification::Leaf(c)
                } else {
                    Specification::Not(Box::new(Specification::Leaf(c)))
                }
            })
            .collect(),
    )
}

fn extend_unique<C: PartialEq>(target: &mut Vec<Specification<C>>, items: Vec<Specification<C>>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

fn collapse<C>(
    mut children: Vec<Specification<C>>,
    empty: Specification<C>,
    wrap: fn(Vec<Specification<C>>) -> Specification<C>,
) -> Specification<C> {
    match children.len() {
        0 => empty,
        1 => children.remove(0),
        _ => wrap(children),
    }
}
