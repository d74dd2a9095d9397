//! Matching rules: predicates selecting which methods a handler set wraps.
//!
//! Rules run once per method when the pipeline set is created, never per
//! call.

use crate::call::MethodProfile;

pub trait MatchingRule: Send + Sync {
    fn matches(&self, method: &MethodProfile) -> bool;
}

/// Matches methods by exact name
pub struct MemberNameRule {
    names: Vec<&'static str>,
}
impl MemberNameRule {
    pub fn new(names: impl IntoIterator<Item = &'static str>) -> Self {
        MemberNameRule {
            names: names.into_iter().collect(),
        }
    }
}
impl MatchingRule for MemberNameRule {
    fn matches(&self, method: &MethodProfile) -> bool {
        self.names.contains(&method.name)
    }
}

/// Matches methods whose name starts with a prefix
pub struct PrefixRule {
    prefix: &'static str,
}
impl PrefixRule {
    pub fn new(prefix: &'static str) -> Self {
        PrefixRule { prefix }
    }
}
impl MatchingRule for PrefixRule {
    fn matches(&self, method: &MethodProfile) -> bool {
        method.name.starts_with(self.prefix)
    }
}

/// Matches every method
pub struct AnyRule;
impl MatchingRule for AnyRule {
    fn matches(&self, _method: &MethodProfile) -> bool {
        true
    }
}

/// Inverts another rule
pub struct NotRule<R: MatchingRule>(pub R);
impl<R: MatchingRule> MatchingRule for NotRule<R> {
    fn matches(&self, method: &MethodProfile) -> bool {
        !self.0.matches(method)
    }
}
