//! The access-query language.
//!
//! Queries are small declarative expressions mixing boolean combinators with
//! live directory predicates. They arrive from configuration as literal
//! values; the closed AST below rejects unknown shapes at deserialization
//! time, so the evaluator never sees a malformed query.
//!
//! Evaluation (see [`eval`]) produces a [`Value`]: a boolean, a string, a
//! string list, or an error marker. Combinators deliberately treat error
//! markers as false so that a transient directory fault can never flip a
//! denial into a grant.

pub mod eval;
pub mod groups;

use serde::Deserialize;

pub use eval::Evaluator;

/// Default membership attribute for group predicates.
pub(crate) const DEFAULT_MEMBER_ATTRIBUTE: &str = "member";

/// Search scope for nested-group traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupScope {
    /// Search the whole subtree under the group base.
    #[default]
    Subtree,
    /// Search only the immediate children of the group base.
    OneLevel,
}

/// One arm of a [`Query::For`] dispatch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForArm {
    /// Variable to dispatch on.
    pub name: String,
    /// Value the binding must equal for this arm to be selected.
    pub value: String,
    /// Sub-query evaluated when the arm is selected.
    pub query: Query,
}

/// A query expression.
///
/// Leaves evaluate to booleans, strings, string lists, or error markers;
/// combinators fold child results with the short-circuit rules documented on
/// the evaluator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Literal boolean.
    Constant(bool),

    /// Dispatch on the value of a variable binding: the first arm whose
    /// value equals the current binding selects its sub-query.
    For(Vec<ForArm>),

    /// True iff the filled DN resolves to at least one directory object.
    Exists(String),

    /// True iff the group at the filled DN lists the principal's DN in the
    /// membership attribute.
    InGroup {
        /// DN pattern of the group.
        dn: String,
        /// Membership attribute.
        #[serde(default = "default_member_attribute")]
        attribute: String,
    },

    /// True iff a chain of membership edges leads from the principal's DN to
    /// the group at the filled DN. Cycles do not loop.
    InGroupNested {
        /// DN pattern of the target group.
        dn: String,
        /// Membership attribute.
        #[serde(default = "default_member_attribute")]
        attribute: String,
        /// Scope of the per-step group searches.
        #[serde(default)]
        scope: GroupScope,
    },

    /// Boolean negation; a non-boolean child (string or error) negates to
    /// true.
    Not(Box<Query>),

    /// Conjunction with short-circuit; any non-true child makes it false.
    And(Vec<Query>),

    /// Disjunction with short-circuit; non-true children count as false.
    Or(Vec<Query>),

    /// String equality with multi-valued-attribute semantics.
    Equals(Box<Query>, Box<Query>),

    /// Regex match; retried with operands swapped when both sides are
    /// multi-valued and the forward direction fails.
    Match(Box<Query>, Box<Query>),

    /// Template evaluated against the variable map.
    String(String),

    /// Value(s) of an attribute on the object at the filled DN.
    Attribute {
        /// DN pattern of the object.
        dn: String,
        /// Attribute name.
        name: String,
    },
}

fn default_member_attribute() -> String {
    DEFAULT_MEMBER_ATTRIBUTE.to_string()
}

impl Query {
    /// Whether evaluating this query reads the principal's DN.
    ///
    /// Entry points refuse such queries for principals whose DN was never
    /// resolved, before any directory traffic happens.
    pub fn reads_user_dn(&self) -> bool {
        match self {
            Query::InGroup { .. } | Query::InGroupNested { .. } => true,
            Query::Not(q) => q.reads_user_dn(),
            Query::And(qs) | Query::Or(qs) => qs.iter().any(Query::reads_user_dn),
            Query::Equals(a, b) | Query::Match(a, b) => {
                a.reads_user_dn() || b.reads_user_dn()
            }
            Query::For(arms) => arms.iter().any(|arm| arm.query.reads_user_dn()),
            Query::Constant(_)
            | Query::Exists(_)
            | Query::String(_)
            | Query::Attribute { .. } => false,
        }
    }
}

/// Reason a query leaf could not produce a usable value.
///
/// Faults are values, not errors: combinators treat them as false, and only
/// a fault that survives to the top of a tag query fails the enclosing
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalFault {
    /// An attribute lookup returned no values.
    NotFound,
    /// A `for` arm referenced a variable with no binding.
    MissingVariable(String),
    /// No `for` arm matched the current bindings.
    NoArmMatched,
    /// The principal's DN is required but was never resolved.
    UserDnUnknown,
    /// A directory search failed; detail went to the log.
    SearchFailed,
    /// Nested-group traversal had no usable search base.
    NoGroupBase,
}

/// Result of evaluating a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean result.
    Bool(bool),
    /// Scalar string (template fill, single-valued attribute).
    Str(String),
    /// Multi-valued attribute, preserving directory order.
    List(Vec<String>),
    /// Error marker; treated as false by combinators.
    Error(EvalFault),
}

impl Value {
    /// True iff this is exactly `Bool(true)`.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// The value as a list of strings, when string-valued.
    pub(crate) fn as_strings(&self) -> Option<Vec<&str>> {
        match self {
            Value::Str(s) => Some(vec![s.as_str()]),
            Value::List(vs) => Some(vs.iter().map(String::as_str).collect()),
            _ => None,
        }
    }
}

/// Canonicalizes raw attribute values: zero values is a fault, one value is
/// a scalar, several stay a list in directory order.
pub(crate) fn canonicalize(mut values: Vec<String>) -> Value {
    match values.len() {
        0 => Value::Error(EvalFault::NotFound),
        1 => Value::Str(values.remove(0)),
        _ => Value::List(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Query {
        serde_json::from_value(v).expect("query")
    }

    #[test]
    fn test_constant_shape() {
        assert_eq!(parse(json!({"constant": true})), Query::Constant(true));
    }

    #[test]
    fn test_in_group_defaults_member_attribute() {
        let q = parse(json!({"in_group": {"dn": "cn=g,dc=x"}}));
        assert_eq!(
            q,
            Query::InGroup {
                dn: "cn=g,dc=x".into(),
                attribute: "member".into(),
            }
        );
    }

    #[test]
    fn test_in_group_nested_defaults() {
        let q = parse(json!({"in_group_nested": {"dn": "cn=g,dc=x"}}));
        assert_eq!(
            q,
            Query::InGroupNested {
                dn: "cn=g,dc=x".into(),
                attribute: "member".into(),
                scope: GroupScope::Subtree,
            }
        );
        let q = parse(json!({
            "in_group_nested": {"dn": "cn=g,dc=x", "attribute": "uniqueMember",
                                "scope": "one_level"}
        }));
        assert_eq!(
            q,
            Query::InGroupNested {
                dn: "cn=g,dc=x".into(),
                attribute: "uniqueMember".into(),
                scope: GroupScope::OneLevel,
            }
        );
    }

    #[test]
    fn test_nested_combinators_parse() {
        let q = parse(json!({
            "and": [
                {"exists": "ou=${vhost},dc=x"},
                {"not": {"in_group": {"dn": "cn=banned,dc=x"}}}
            ]
        }));
        match q {
            Query::And(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Query::Not(_)));
            }
            other => panic!("expected and, got {:?}", other),
        }
    }

    #[test]
    fn test_equals_and_match_are_pairs() {
        let q = parse(json!({
            "equals": [{"string": "${permission}"}, {"string": "read"}]
        }));
        assert!(matches!(q, Query::Equals(_, _)));

        let q = parse(json!({
            "match": [{"attribute": {"dn": "${user_dn}", "name": "memberOf"}},
                      {"string": "cn=admins,.*"}]
        }));
        assert!(matches!(q, Query::Match(_, _)));
    }

    #[test]
    fn test_for_arms() {
        let q = parse(json!({
            "for": [
                {"name": "permission", "value": "configure", "query": {"constant": false}},
                {"name": "permission", "value": "read", "query": {"constant": true}}
            ]
        }));
        match q {
            Query::For(arms) => {
                assert_eq!(arms[0].name, "permission");
                assert_eq!(arms[1].value, "read");
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shape_rejected() {
        assert!(serde_json::from_value::<Query>(json!({"frobnicate": 1})).is_err());
        assert!(serde_json::from_value::<Query>(json!({
            "in_group": {"dn": "cn=g,dc=x", "bogus": true}
        }))
        .is_err());
    }

    #[test]
    fn test_reads_user_dn() {
        assert!(parse(json!({"in_group": {"dn": "cn=g,dc=x"}})).reads_user_dn());
        assert!(parse(json!({"not": {"in_group_nested": {"dn": "cn=g,dc=x"}}})).reads_user_dn());
        assert!(parse(json!({
            "or": [{"constant": false}, {"in_group": {"dn": "cn=g,dc=x"}}]
        }))
        .reads_user_dn());
        assert!(!parse(json!({"exists": "ou=${vhost},dc=x"})).reads_user_dn());
        assert!(!parse(json!({"constant": true})).reads_user_dn());
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize(vec![]), Value::Error(EvalFault::NotFound));
        assert_eq!(canonicalize(vec!["a".into()]), Value::Str("a".into()));
        assert_eq!(
            canonicalize(vec!["a".into(), "b".into()]),
            Value::List(vec!["a".into(), "b".into()])
        );
    }
}
