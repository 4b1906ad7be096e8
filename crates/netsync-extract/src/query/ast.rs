//! Abstract syntax tree for path queries.

use serde_json::Value;

/// Comparison operator in filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A compiled query node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `@`, the current value.
    Identity,
    /// Object field access.
    Field(String),
    /// Array index; negative indexes count from the end.
    Index(i64),
    /// Constant value.
    Literal(Value),
    /// Evaluate `rhs` against the result of `lhs`.
    Subexpr(Box<Node>, Box<Node>),
    /// Evaluate `rhs` against every element of the list `lhs`.
    Projection(Box<Node>, Box<Node>),
    /// Evaluate `rhs` against every value of the object `lhs`.
    ObjectProjection(Box<Node>, Box<Node>),
    /// Flatten one level of nested lists.
    Flatten(Box<Node>),
    /// Projection over the elements of `lhs` for which `condition` holds.
    FilterProjection {
        lhs: Box<Node>,
        condition: Box<Node>,
        rhs: Box<Node>,
    },
    Compare(Comparator, Box<Node>, Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    /// `[a, b]`
    MultiList(Vec<Node>),
    /// `{k: a, l: b}`
    MultiHash(Vec<(String, Node)>),
    Pipe(Box<Node>, Box<Node>),
    Function(String, Vec<Node>),
}

impl Node {
    pub(crate) fn boxed(self) -> Box<Node> {
        Box::new(self)
    }

    /// Returns true if evaluating this node can yield a list produced by a
    /// projection (used by result-shape coercion diagnostics).
    pub fn is_projection(&self) -> bool {
        match self {
            Node::Projection(..)
            | Node::ObjectProjection(..)
            | Node::FilterProjection { .. }
            | Node::Flatten(_) => true,
            Node::Subexpr(lhs, rhs) => lhs.is_projection() || rhs.is_projection(),
            Node::Pipe(_, rhs) => rhs.is_projection(),
            _ => false,
        }
    }
}
