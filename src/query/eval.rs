//! The query evaluator.
//!
//! Interprets a [`Query`] against the per-request variable map, the
//! principal's DN, and a live directory. Children evaluate strictly
//! left-to-right; the short-circuit rules are observable through the
//! searches they trigger and must stay that way.
//!
//! Directory faults become [`EvalFault`] markers rather than errors, and
//! the combinators treat markers as false. A flaky directory therefore
//! degrades to deny, never to allow: in particular a fault inside `and` or
//! `or` cannot reach an enclosing `not` and flip into a grant.

use std::future::Future;
use std::pin::Pin;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::ldap::{eq_filter, Directory, SearchScope, NO_ATTRS, PRESENCE_FILTER};
use crate::query::{canonicalize, groups, EvalFault, ForArm, GroupScope, Query, Value};
use crate::scrub;
use crate::template::{self, VariableMap};

/// Evaluates queries for one request.
pub struct Evaluator<'a> {
    cfg: &'a Config,
    vars: &'a VariableMap,
    user_dn: Option<&'a str>,
    dir: &'a mut dyn Directory,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator over the given bindings and directory handle.
    pub fn new(
        cfg: &'a Config,
        vars: &'a VariableMap,
        user_dn: Option<&'a str>,
        dir: &'a mut dyn Directory,
    ) -> Self {
        Self {
            cfg,
            vars,
            user_dn,
            dir,
        }
    }

    /// Evaluates a query to a [`Value`].
    pub async fn evaluate(&mut self, query: &Query) -> Value {
        self.eval(query).await
    }

    // Recursion through combinators needs the boxed indirection.
    fn eval<'f>(
        &'f mut self,
        query: &'f Query,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'f>> {
        Box::pin(async move {
            match query {
                Query::Constant(b) => Value::Bool(*b),

                Query::String(pattern) => Value::Str(template::fill(pattern, self.vars)),

                Query::For(arms) => self.eval_for(arms).await,

                Query::Not(sub) => match self.eval(sub).await {
                    Value::Bool(b) => Value::Bool(!b),
                    // Strings and faults are not true, so their negation is.
                    _ => Value::Bool(true),
                },

                Query::And(children) => {
                    for child in children {
                        if !self.eval(child).await.is_true() {
                            return Value::Bool(false);
                        }
                    }
                    Value::Bool(true)
                }

                Query::Or(children) => {
                    for child in children {
                        if self.eval(child).await.is_true() {
                            return Value::Bool(true);
                        }
                    }
                    Value::Bool(false)
                }

                Query::Equals(a, b) => {
                    let left = self.eval(a).await;
                    let right = self.eval(b).await;
                    equals(&left, &right)
                }

                Query::Match(subject, pattern) => {
                    let subject = self.eval(subject).await;
                    let pattern = self.eval(pattern).await;
                    regex_match(&subject, &pattern)
                }

                Query::Exists(pattern) => self.exists(pattern).await,

                Query::InGroup { dn, attribute } => self.in_group(dn, attribute).await,

                Query::InGroupNested {
                    dn,
                    attribute,
                    scope,
                } => self.in_group_nested(dn, attribute, *scope).await,

                Query::Attribute { dn, name } => self.attribute(dn, name).await,
            }
        })
    }

    async fn eval_for(&mut self, arms: &[ForArm]) -> Value {
        for arm in arms {
            match self.vars.get(&arm.name) {
                None => return Value::Error(EvalFault::MissingVariable(arm.name.clone())),
                Some(value) if value == arm.value => return self.eval(&arm.query).await,
                Some(_) => {}
            }
        }
        Value::Error(EvalFault::NoArmMatched)
    }

    async fn exists(&mut self, pattern: &str) -> Value {
        let dn = template::fill(pattern, self.vars);
        if self.cfg.log.chatty() {
            debug!(dn = %scrub::dn(&dn, self.cfg.log), "checking object existence");
        }
        match self
            .dir
            .search(&dn, SearchScope::Base, PRESENCE_FILTER, &[NO_ATTRS])
            .await
        {
            Ok(entries) => Value::Bool(!entries.is_empty()),
            Err(e) => {
                warn!(error = %e, "existence search failed");
                Value::Error(EvalFault::SearchFailed)
            }
        }
    }

    async fn in_group(&mut self, pattern: &str, attribute: &str) -> Value {
        let Some(user_dn) = self.user_dn else {
            return Value::Error(EvalFault::UserDnUnknown);
        };
        let group_dn = template::fill(pattern, self.vars);
        if self.cfg.log.chatty() {
            debug!(
                group = %scrub::dn(&group_dn, self.cfg.log),
                "checking group membership"
            );
        }
        let filter = eq_filter(attribute, user_dn);
        match self
            .dir
            .search(&group_dn, SearchScope::Base, &filter, &[NO_ATTRS])
            .await
        {
            Ok(entries) => Value::Bool(!entries.is_empty()),
            Err(e) => {
                warn!(error = %e, "group membership search failed");
                Value::Error(EvalFault::SearchFailed)
            }
        }
    }

    async fn in_group_nested(
        &mut self,
        pattern: &str,
        attribute: &str,
        scope: GroupScope,
    ) -> Value {
        let Some(user_dn) = self.user_dn else {
            return Value::Error(EvalFault::UserDnUnknown);
        };
        let Some(base) = self.cfg.group_search_base() else {
            warn!("nested group query configured without a group or DN lookup base");
            return Value::Error(EvalFault::NoGroupBase);
        };
        let target_dn = template::fill(pattern, self.vars);
        Value::Bool(
            groups::is_member_nested(
                self.dir,
                base,
                scope,
                attribute,
                &target_dn,
                user_dn,
                self.cfg.log,
            )
            .await,
        )
    }

    async fn attribute(&mut self, pattern: &str, name: &str) -> Value {
        let dn = template::fill(pattern, self.vars);
        match self
            .dir
            .search(&dn, SearchScope::Base, PRESENCE_FILTER, &[name])
            .await
        {
            Ok(entries) => match entries.into_iter().next() {
                Some(entry) => canonicalize(entry.values(name).to_vec()),
                None => Value::Error(EvalFault::NotFound),
            },
            Err(e) => {
                warn!(error = %e, "attribute search failed");
                Value::Error(EvalFault::SearchFailed)
            }
        }
    }
}

/// Equality with multi-valued-attribute semantics: scalar/scalar compares
/// byte-exact, scalar/list is membership, list/list is non-empty
/// intersection. Faults (and booleans) on either side yield false.
fn equals(a: &Value, b: &Value) -> Value {
    match (a.as_strings(), b.as_strings()) {
        (Some(left), Some(right)) => {
            Value::Bool(left.iter().any(|value| right.contains(value)))
        }
        _ => Value::Bool(false),
    }
}

/// Regex match over possibly multi-valued operands. The forward direction
/// treats the second operand as the pattern set; if it fails and both sides
/// carry more than one value, the operands swap roles once.
fn regex_match(subject: &Value, pattern: &Value) -> Value {
    let (Some(subjects), Some(patterns)) = (subject.as_strings(), pattern.as_strings()) else {
        return Value::Bool(false);
    };

    if match_direction(&subjects, &patterns) {
        return Value::Bool(true);
    }
    if subjects.len() > 1 && patterns.len() > 1 && match_direction(&patterns, &subjects) {
        return Value::Bool(true);
    }
    Value::Bool(false)
}

fn match_direction(haystacks: &[&str], regexes: &[&str]) -> bool {
    regexes.iter().any(|source| match Regex::new(source) {
        Ok(re) => haystacks.iter().any(|haystack| re.is_match(haystack)),
        Err(e) => {
            warn!(error = %e, "invalid regex in match query");
            false
        }
    })
}
