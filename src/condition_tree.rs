//! Three-valued evaluation of nested `and`/`or`/`not` condition trees.
//!
//! Trees are written as nested arrays where the first element may be an operator token:
//! `["and", leaf, ["or", leaf, leaf], ["not", leaf]]`. An array that does not start with an
//! operator is an implicit `or` of its elements. Leaves are opaque to this module and are
//! evaluated by a [`LeafEvaluator`].
use serde::{de::DeserializeOwned, Deserialize, Deserializer};

/// Result of evaluating a condition: boolean logic extended with `Unknown` for conditions that
/// cannot be evaluated (e.g., a missing attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ternary {
    True,
    False,
    Unknown,
}

impl Ternary {
    /// Only a definite `True` counts as a match.
    pub fn is_true(self) -> bool {
        self == Ternary::True
    }
}

impl From<bool> for Ternary {
    fn from(value: bool) -> Self {
        if value {
            Ternary::True
        } else {
            Ternary::False
        }
    }
}

impl From<Option<bool>> for Ternary {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Ternary::Unknown, Ternary::from)
    }
}

impl std::ops::Not for Ternary {
    type Output = Ternary;

    fn not(self) -> Ternary {
        match self {
            Ternary::True => Ternary::False,
            Ternary::False => Ternary::True,
            Ternary::Unknown => Ternary::Unknown,
        }
    }
}

impl std::fmt::Display for Ternary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Ternary::True => "TRUE",
            Ternary::False => "FALSE",
            Ternary::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl LogicalOperator {
    fn from_token(token: &str) -> Option<LogicalOperator> {
        match token {
            "and" => Some(LogicalOperator::And),
            "or" => Some(LogicalOperator::Or),
            "not" => Some(LogicalOperator::Not),
            _ => None,
        }
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree<L> {
    Leaf(L),
    Node {
        operator: LogicalOperator,
        children: Vec<ConditionTree<L>>,
    },
}

/// Evaluates a single opaque leaf of a [`ConditionTree`].
pub trait LeafEvaluator<L> {
    fn evaluate_leaf(&self, leaf: &L) -> Ternary;
}

impl<L, F: Fn(&L) -> Ternary> LeafEvaluator<L> for F {
    fn evaluate_leaf(&self, leaf: &L) -> Ternary {
        self(leaf)
    }
}

impl<L> ConditionTree<L> {
    /// Returns `true` for a node without children. Such trees are treated as "no conditions" by
    /// audience evaluation.
    pub fn is_empty(&self) -> bool {
        matches!(self, ConditionTree::Node { children, .. } if children.is_empty())
    }

    pub fn evaluate(&self, leaf_evaluator: &impl LeafEvaluator<L>) -> Ternary {
        match self {
            ConditionTree::Leaf(leaf) => leaf_evaluator.evaluate_leaf(leaf),
            ConditionTree::Node { operator, children } => match operator {
                LogicalOperator::And => and(children, leaf_evaluator),
                LogicalOperator::Or => or(children, leaf_evaluator),
                LogicalOperator::Not => not(children, leaf_evaluator),
            },
        }
    }
}

fn and<L>(children: &[ConditionTree<L>], leaf_evaluator: &impl LeafEvaluator<L>) -> Ternary {
    let mut saw_unknown = false;
    for child in children {
        match child.evaluate(leaf_evaluator) {
            Ternary::False => return Ternary::False,
            Ternary::Unknown => saw_unknown = true,
            Ternary::True => {}
        }
    }
    if saw_unknown {
        Ternary::Unknown
    } else {
        Ternary::True
    }
}

fn or<L>(children: &[ConditionTree<L>], leaf_evaluator: &impl LeafEvaluator<L>) -> Ternary {
    let mut saw_unknown = false;
    for child in children {
        match child.evaluate(leaf_evaluator) {
            Ternary::True => return Ternary::True,
            Ternary::Unknown => saw_unknown = true,
            Ternary::False => {}
        }
    }
    if saw_unknown {
        Ternary::Unknown
    } else {
        Ternary::False
    }
}

fn not<L>(children: &[ConditionTree<L>], leaf_evaluator: &impl LeafEvaluator<L>) -> Ternary {
    match children.first() {
        Some(child) => !child.evaluate(leaf_evaluator),
        None => Ternary::Unknown,
    }
}

impl<L: DeserializeOwned> ConditionTree<L> {
    /// Build a tree from its JSON array form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value {
            serde_json::Value::Array(items) => {
                let mut items = items.into_iter().peekable();
                let operator = match items.peek() {
                    Some(serde_json::Value::String(token)) => LogicalOperator::from_token(token),
                    _ => None,
                };
                if operator.is_some() {
                    items.next();
                }
                let children = items
                    .map(ConditionTree::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ConditionTree::Node {
                    operator: operator.unwrap_or(LogicalOperator::Or),
                    children,
                })
            }
            leaf => Ok(ConditionTree::Leaf(serde_json::from_value(leaf)?)),
        }
    }
}

impl<'de, L: DeserializeOwned> Deserialize<'de> for ConditionTree<L> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ConditionTree::from_json(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::{ConditionTree, LogicalOperator, Ternary};

    use Ternary::{False, True, Unknown};

    fn node(operator: LogicalOperator, leaves: &[Ternary]) -> ConditionTree<Ternary> {
        ConditionTree::Node {
            operator,
            children: leaves.iter().copied().map(ConditionTree::Leaf).collect(),
        }
    }

    fn eval(tree: &ConditionTree<Ternary>) -> Ternary {
        tree.evaluate(&|leaf: &Ternary| *leaf)
    }

    #[test]
    fn and_laws() {
        assert_eq!(eval(&node(LogicalOperator::And, &[True, True])), True);
        assert_eq!(eval(&node(LogicalOperator::And, &[True, False])), False);
        assert_eq!(eval(&node(LogicalOperator::And, &[True, Unknown])), Unknown);
        assert_eq!(eval(&node(LogicalOperator::And, &[False, Unknown])), False);
        assert_eq!(eval(&node(LogicalOperator::And, &[Unknown, False])), False);
        assert_eq!(eval(&node(LogicalOperator::And, &[])), True);
    }

    #[test]
    fn or_laws() {
        assert_eq!(eval(&node(LogicalOperator::Or, &[False, False])), False);
        assert_eq!(eval(&node(LogicalOperator::Or, &[False, True])), True);
        assert_eq!(eval(&node(LogicalOperator::Or, &[False, Unknown])), Unknown);
        assert_eq!(eval(&node(LogicalOperator::Or, &[True, Unknown])), True);
        assert_eq!(eval(&node(LogicalOperator::Or, &[Unknown, True])), True);
        assert_eq!(eval(&node(LogicalOperator::Or, &[])), False);
    }

    #[test]
    fn not_laws() {
        assert_eq!(eval(&node(LogicalOperator::Not, &[Unknown])), Unknown);
        assert_eq!(eval(&node(LogicalOperator::Not, &[])), Unknown);
        assert_eq!(eval(&node(LogicalOperator::Not, &[True])), False);
        // Only the first child is negated.
        assert_eq!(eval(&node(LogicalOperator::Not, &[False, True])), True);

        for x in [True, False] {
            let double = ConditionTree::Node {
                operator: LogicalOperator::Not,
                children: vec![node(LogicalOperator::Not, &[x])],
            };
            assert_eq!(eval(&double), x);
        }
    }

    #[test]
    fn and_short_circuits_on_false() {
        let calls = Cell::new(0);
        let tree = node(LogicalOperator::And, &[True, False, True, Unknown]);
        let result = tree.evaluate(&|leaf: &Ternary| {
            calls.set(calls.get() + 1);
            *leaf
        });
        assert_eq!(result, False);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn or_short_circuits_on_true() {
        let calls = Cell::new(0);
        let tree = node(LogicalOperator::Or, &[Unknown, True, False]);
        let result = tree.evaluate(&|leaf: &Ternary| {
            calls.set(calls.get() + 1);
            *leaf
        });
        assert_eq!(result, True);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn parses_explicit_operators() {
        let tree: ConditionTree<String> =
            serde_json::from_value(json!(["and", "1", ["or", "2", ["not", "3"]]])).unwrap();
        assert_eq!(
            tree,
            ConditionTree::Node {
                operator: LogicalOperator::And,
                children: vec![
                    ConditionTree::Leaf("1".to_owned()),
                    ConditionTree::Node {
                        operator: LogicalOperator::Or,
                        children: vec![
                            ConditionTree::Leaf("2".to_owned()),
                            ConditionTree::Node {
                                operator: LogicalOperator::Not,
                                children: vec![ConditionTree::Leaf("3".to_owned())],
                            },
                        ],
                    },
                ],
            }
        );
    }

    #[test]
    fn array_without_operator_is_implicit_or() {
        let tree: ConditionTree<String> = serde_json::from_value(json!(["1", "2"])).unwrap();
        let result = tree.evaluate(&|leaf: &String| Ternary::from(leaf == "2"));
        assert_eq!(result, True);
        assert!(matches!(
            tree,
            ConditionTree::Node {
                operator: LogicalOperator::Or,
                ..
            }
        ));
    }

    #[test]
    fn empty_array_is_empty_tree() {
        let tree: ConditionTree<String> = serde_json::from_value(json!([])).unwrap();
        assert!(tree.is_empty());
        let tree: ConditionTree<String> = serde_json::from_value(json!(["and"])).unwrap();
        assert!(tree.is_empty());
    }
}
