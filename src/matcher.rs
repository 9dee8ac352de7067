//! Resource and field selectors.
//!
//! Every processor that accepts a `resources` selector goes through
//! [`ResourceMatcher`], so exact names, name lists, the `*` wildcard and
//! anchored regular expressions behave identically across the whole chain.

use anyhow::{Context, Result};
use regex::Regex;

/// Selects which resources a processor applies to.
#[derive(Clone, Debug, Default)]
pub enum ResourceMatcher {
    /// Match every resource (also produced by the `"*"` wildcard).
    #[default]
    All,
    /// Match any of an explicit list of names.
    Names(Vec<String>),
    /// Match resource names against an anchored regular expression.
    Pattern(Regex),
}

impl ResourceMatcher {
    pub fn all() -> Self {
        ResourceMatcher::All
    }

    pub fn name(name: impl Into<String>) -> Self {
        ResourceMatcher::Names(vec![name.into()])
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResourceMatcher::Names(names.into_iter().map(Into::into).collect())
    }

    /// An anchored regex pattern; `"*"` is the match-everything sentinel.
    pub fn pattern(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(ResourceMatcher::All);
        }
        let re = Regex::new(&format!("^{pattern}$"))
            .with_context(|| format!("invalid resource pattern {pattern:?}"))?;
        Ok(ResourceMatcher::Pattern(re))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ResourceMatcher::All => true,
            ResourceMatcher::Names(names) => names.iter().any(|n| n == name),
            ResourceMatcher::Pattern(re) => re.is_match(name),
        }
    }
}

impl From<&str> for ResourceMatcher {
    fn from(name: &str) -> Self {
        ResourceMatcher::name(name)
    }
}

impl From<Vec<&str>> for ResourceMatcher {
    fn from(names: Vec<&str>) -> Self {
        ResourceMatcher::names(names)
    }
}

/// Match a field name against a selector: exact match first, otherwise an
/// anchored regex when the selector compiles to one.
pub fn field_matches(selector: &str, name: &str) -> bool {
    if selector == name {
        return true;
    }
    match Regex::new(&format!("^{selector}$")) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_everything() {
        let m = ResourceMatcher::default();
        assert!(m.matches("anything"));
    }

    #[test]
    fn list_and_pattern() {
        let m = ResourceMatcher::names(["a", "b"]);
        assert!(m.matches("a"));
        assert!(!m.matches("c"));

        let m = ResourceMatcher::pattern("res_[0-9]+").unwrap();
        assert!(m.matches("res_12"));
        assert!(!m.matches("res_12x"));
        assert!(!m.matches("xres_12"));
    }

    #[test]
    fn wildcard_sentinel() {
        let m = ResourceMatcher::pattern("*").unwrap();
        assert!(m.matches("whatever"));
    }

    #[test]
    fn field_selector() {
        assert!(field_matches("col[0-9]", "col3"));
        assert!(field_matches("exact", "exact"));
        assert!(!field_matches("col[0-9]", "col30"));
    }
}
