//! Topic filter validation and wildcard matching
//!
//! Follows MQTT 3.1.1 section 4.7 semantics:
//! - levels are separated by `/`
//! - `+` matches exactly one level and must occupy a whole level
//! - `#` matches zero or more trailing levels, must occupy a whole level
//!   and must be the last level
//! - topics starting with `$` are never matched by a leading wildcard

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const SINGLE_LEVEL_WILDCARD: &str = "+";
const MULTI_LEVEL_WILDCARD: &str = "#";

/// Topic validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,
    #[error("topic contains a NUL character")]
    NulCharacter,
    #[error("'{0}': wildcards must occupy a whole topic level")]
    PartialWildcard(String),
    #[error("'{0}': multi-level wildcard must be the last level")]
    MultiLevelNotLast(String),
    #[error("'{0}': wildcards are not allowed in a publish topic")]
    WildcardInPublishTopic(String),
}

/// A validated subscription filter, possibly containing wildcards
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPattern(String);

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        validate_topic_filter(pattern)?;
        Ok(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn levels(&self) -> std::str::Split<'_, char> {
        self.0.split('/')
    }

    /// Check a concrete topic against this filter
    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(topic, &self.0)
    }

    /// Ranking key used when several patterns match the same topic
    pub fn specificity(&self) -> Specificity {
        let literal_prefix = self
            .levels()
            .take_while(|level| *level != SINGLE_LEVEL_WILDCARD && *level != MULTI_LEVEL_WILDCARD)
            .count();
        let literal_levels = self
            .levels()
            .filter(|level| *level != SINGLE_LEVEL_WILDCARD && *level != MULTI_LEVEL_WILDCARD)
            .count();
        let multi_level = self.levels().any(|level| level == MULTI_LEVEL_WILDCARD);

        Specificity {
            literal_prefix,
            literal_levels,
            multi_level,
        }
    }

    /// Total order for resolution: the greatest pattern is the most specific
    ///
    /// Ties on specificity fall back to the lexicographically smallest pattern
    /// so resolution never depends on registration or hash order.
    pub fn cmp_specificity(&self, other: &TopicPattern) -> Ordering {
        self.specificity()
            .cmp(&other.specificity())
            .then_with(|| other.0.cmp(&self.0))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for TopicPattern {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        TopicPattern::parse(value)
    }
}

/// How specific a topic filter is
///
/// Ordered field by field: longer literal prefix first, then more literal
/// levels overall, then filters without `#` over filters with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    pub literal_prefix: usize,
    pub literal_levels: usize,
    pub multi_level: bool,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.literal_prefix
            .cmp(&other.literal_prefix)
            .then_with(|| self.literal_levels.cmp(&other.literal_levels))
            .then_with(|| other.multi_level.cmp(&self.multi_level))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    if filter.is_empty() {
        return Err(TopicError::Empty);
    }
    if filter.contains('\0') {
        return Err(TopicError::NulCharacter);
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        let has_plus = level.contains('+');
        let has_hash = level.contains('#');

        if (has_plus && *level != SINGLE_LEVEL_WILDCARD)
            || (has_hash && *level != MULTI_LEVEL_WILDCARD)
        {
            return Err(TopicError::PartialWildcard(filter.to_string()));
        }
        if has_hash && index != last {
            return Err(TopicError::MultiLevelNotLast(filter.to_string()));
        }
    }

    Ok(())
}

/// Validate a concrete topic used for publishing
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    if topic.contains('+') || topic.contains('#') {
        return Err(TopicError::WildcardInPublishTopic(topic.to_string()));
    }
    Ok(())
}

/// Match a concrete topic against a (valid) filter
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
