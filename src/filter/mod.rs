//! Inclusion-only tag filters built from comma separated rule lists.
//!
//! A rule is either a plain key (`boundary`), matching any value, or a
//! key/value pair joined by a separator (`type:route`). There is no invalid
//! rule: anything without the separator is taken as a key.

use std::fmt;

use crate::osm::Tags;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub key: String,
    pub value: Option<String>,
}

impl TagRule {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn matches(&self, key: &str, value: &str) -> bool {
        if self.key != key {
            return false;
        }
        match &self.value {
            Some(expected) => expected == value,
            None => true,
        }
    }
}

/// A list of rules with a default result of `false`: tags match only if a
/// rule fires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    rules: Vec<TagRule>,
    source: Vec<String>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a rule list such as `type:route,network`, adding to any rules
    /// already present.
    pub fn add_rules(&mut self, list: &str, separator: char) {
        for item in list.split(',').filter(|item| !item.is_empty()) {
            let rule = match item.split_once(separator) {
                Some((key, value)) => TagRule::key_value(key, value),
                None => TagRule::key(item),
            };
            self.rules.push(rule);
            self.source.push(item.to_string());
        }
    }

    pub fn parse(list: &str, separator: char) -> Self {
        let mut filter = Self::new();
        filter.add_rules(list, separator);
        filter
    }

    pub fn rules(&self) -> &[TagRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True iff any rule matches any tag.
    pub fn matches_any(&self, tags: &Tags) -> bool {
        tags.iter()
            .any(|(key, value)| self.rules.iter().any(|rule| rule.matches(key, value)))
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source.join(","))
    }
}
