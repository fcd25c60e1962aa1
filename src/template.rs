//! String templates and the per-request variable map.
//!
//! Query patterns carry `${name}` placeholders which are substituted from an
//! ordered variable map before being handed to the directory predicates. The
//! filler knows nothing about LDAP syntax; escaping is the concern of the
//! predicate that consumes the filled string.

/// Well-known variable names bound by the authorization entry points.
pub mod vars {
    /// The raw username as presented at login.
    pub const USERNAME: &str = "username";
    /// The resolved distinguished name of the principal.
    pub const USER_DN: &str = "user_dn";
    /// The virtual host being accessed.
    pub const VHOST: &str = "vhost";
    /// The resource kind (`queue`, `exchange`, `topic`).
    pub const RESOURCE: &str = "resource";
    /// The resource name.
    pub const NAME: &str = "name";
    /// The permission being exercised (`configure`, `write`, `read`).
    pub const PERMISSION: &str = "permission";

    /// All names reserved by the entry points; topic context keys colliding
    /// with these are dropped.
    pub const RESERVED: &[&str] = &[USERNAME, USER_DN, VHOST, RESOURCE, NAME, PERMISSION];
}

/// Ordered association from variable name to value.
///
/// Insertion order is preserved; lookups scan linearly. The maps built per
/// request hold a handful of entries, so a vector beats a hash map here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMap {
    entries: Vec<(String, String)>,
}

impl VariableMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any existing binding of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Looks up a binding.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Checks whether a binding exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Substitutes `${name}` placeholders in `pattern` from `vars`.
///
/// Unknown placeholders expand to the empty string. Substitution is a single
/// pass: values are never re-scanned for placeholders, so a variable-free
/// fill is the identity.
pub fn fill(pattern: &str, vars: &VariableMap) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                // Unterminated placeholder: keep the tail verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn sample_vars() -> VariableMap {
        let mut vars = VariableMap::new();
        vars.set("username", "alice").set("vhost", "prod");
        vars
    }

    #[rstest]
    #[case("uid=${username},ou=People,dc=x", "uid=alice,ou=People,dc=x")]
    #[case("${username}", "alice")]
    #[case("${username}@${vhost}", "alice@prod")]
    #[case("no placeholders", "no placeholders")]
    #[case("${unknown}", "")]
    #[case("a${unknown}b", "ab")]
    #[case("", "")]
    fn test_fill(#[case] pattern: &str, #[case] expected: &str) {
        assert_eq!(fill(pattern, &sample_vars()), expected);
    }

    #[test]
    fn test_fill_unterminated_placeholder_kept() {
        assert_eq!(fill("uid=${username", &sample_vars()), "uid=${username");
    }

    #[test]
    fn test_fill_variable_free_is_identity() {
        let filled = fill("uid=alice,ou=People,dc=x", &VariableMap::new());
        assert_eq!(fill(&filled, &VariableMap::new()), filled);
    }

    #[test]
    fn test_fill_does_not_rescan_values() {
        let mut vars = VariableMap::new();
        vars.set("a", "${b}").set("b", "boom");
        assert_eq!(fill("${a}", &vars), "${b}");
    }

    #[test]
    fn test_set_replaces_existing() {
        let mut vars = sample_vars();
        vars.set("username", "bob");
        assert_eq!(vars.get("username"), Some("bob"));
        assert_eq!(vars.iter().count(), 2);
    }

    #[test]
    fn test_iter_preserves_insertion_order() {
        let vars = sample_vars();
        let names: Vec<&str> = vars.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["username", "vhost"]);
    }
}
