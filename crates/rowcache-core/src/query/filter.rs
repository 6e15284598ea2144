use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Comparison applied by a single filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    IsEmpty,
    IsNotEmpty,
}

impl FilterOperator {
    /// Short token used on the command line and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "eq",
            FilterOperator::NotEquals => "ne",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts",
            FilterOperator::EndsWith => "ends",
            FilterOperator::GreaterThan => "gt",
            FilterOperator::GreaterThanOrEqual => "gte",
            FilterOperator::LessThan => "lt",
            FilterOperator::LessThanOrEqual => "lte",
            FilterOperator::IsEmpty => "empty",
            FilterOperator::IsNotEmpty => "notempty",
        }
    }

    /// Whether the operator compares against a value at all.
    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" | "equals" => FilterOperator::Equals,
            "ne" | "!=" | "not" => FilterOperator::NotEquals,
            "contains" | "like" => FilterOperator::Contains,
            "starts" | "startswith" => FilterOperator::StartsWith,
            "ends" | "endswith" => FilterOperator::EndsWith,
            "gt" | ">" => FilterOperator::GreaterThan,
            "gte" | ">=" => FilterOperator::GreaterThanOrEqual,
            "lt" | "<" => FilterOperator::LessThan,
            "lte" | "<=" => FilterOperator::LessThanOrEqual,
            "empty" | "isempty" => FilterOperator::IsEmpty,
            "notempty" | "isnotempty" => FilterOperator::IsNotEmpty,
            other => return Err(format!("unknown filter operator '{}'", other)),
        };
        Ok(op)
    }
}

/// One `{field, operator, value}` predicate as sent to the data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: String,
}

/// A raw filter edit coming from the table UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEdit {
    /// Set (or replace) the predicate on a field. An empty value clears the
    /// field unless the operator takes no value.
    Set {
        field: String,
        operator: FilterOperator,
        value: String,
    },
    /// Remove the predicate on a field.
    Clear { field: String },
    /// Remove every predicate.
    ClearAll,
}

impl FilterEdit {
    pub fn set(field: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        FilterEdit::Set {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn clear(field: impl Into<String>) -> Self {
        FilterEdit::Clear { field: field.into() }
    }
}

impl FromStr for FilterEdit {
    type Err = String;

    /// Parse `field:op:value` (value may itself contain ':') or `field:op`
    /// for operators that take no value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let field = parts.next().unwrap_or_default().trim();
        if field.is_empty() {
            return Err(format!("filter '{}' is missing a field name", s));
        }
        let operator: FilterOperator = parts
            .next()
            .ok_or_else(|| format!("filter '{}' is missing an operator", s))?
            .parse()?;
        let value = parts.next().unwrap_or_default();
        if operator.takes_value() && value.trim().is_empty() {
            return Err(format!("filter '{}' is missing a value", s));
        }
        Ok(FilterEdit::set(field, operator, value))
    }
}

/// Canonical filter state: at most one predicate per field, ordered by field
/// name so equal specs always produce identical query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    predicates: BTreeMap<String, Filter>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an edit. Returns true when the canonical spec actually changed.
    pub fn apply(&mut self, edit: FilterEdit) -> bool {
        match edit {
            FilterEdit::Set {
                field,
                operator,
                value,
            } => {
                let field = field.trim().to_string();
                if field.is_empty() {
                    return false;
                }
                let value = if operator.takes_value() {
                    value.trim().to_string()
                } else {
                    String::new()
                };
                if operator.takes_value() && value.is_empty() {
                    return self.predicates.remove(&field).is_some();
                }

                let filter = Filter {
                    field: field.clone(),
                    operator,
                    value,
                };
                if self.predicates.get(&field) == Some(&filter) {
                    return false;
                }
                self.predicates.insert(field, filter);
                true
            }
            FilterEdit::Clear { field } => self.predicates.remove(field.trim()).is_some(),
            FilterEdit::ClearAll => {
                let changed = !self.predicates.is_empty();
                self.predicates.clear();
                changed
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&Filter> {
        self.predicates.get(field)
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.predicates.values()
    }

    /// Ordered query parameters for the data source.
    pub fn to_query(&self) -> Vec<Filter> {
        self.predicates.values().cloned().collect()
    }
}

impl FromIterator<FilterEdit> for FilterSpec {
    fn from_iter<I: IntoIterator<Item = FilterEdit>>(iter: I) -> Self {
        let mut spec = FilterSpec::new();
        for edit in iter {
            spec.apply(edit);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_edit_replaces_predicate() {
        let mut spec = FilterSpec::new();
        assert!(spec.apply(FilterEdit::set("species", FilterOperator::Equals, "oak")));
        assert!(spec.apply(FilterEdit::set("species", FilterOperator::Contains, "pine")));

        assert_eq!(spec.len(), 1);
        let filter = spec.get("species").expect("predicate present");
        assert_eq!(filter.operator, FilterOperator::Contains);
        assert_eq!(filter.value, "pine");
    }

    #[test]
    fn test_identical_edit_is_not_a_change() {
        let mut spec = FilterSpec::new();
        assert!(spec.apply(FilterEdit::set("donor", FilterOperator::Equals, "acme")));
        assert!(!spec.apply(FilterEdit::set(" donor ", FilterOperator::Equals, " acme ")));
    }

    #[test]
    fn test_empty_value_clears_field() {
        let mut spec = FilterSpec::new();
        spec.apply(FilterEdit::set("donor", FilterOperator::Equals, "acme"));
        assert!(spec.apply(FilterEdit::set("donor", FilterOperator::Equals, "   ")));
        assert!(spec.is_empty());
        // Clearing an absent field changes nothing
        assert!(!spec.apply(FilterEdit::set("donor", FilterOperator::Equals, "")));
    }

    #[test]
    fn test_valueless_operator_kept_without_value() {
        let mut spec = FilterSpec::new();
        assert!(spec.apply(FilterEdit::set("notes", FilterOperator::IsEmpty, "ignored")));
        assert_eq!(spec.get("notes").map(|f| f.value.as_str()), Some(""));
    }

    #[test]
    fn test_query_is_ordered_by_field() {
        let spec: FilterSpec = vec![
            FilterEdit::set("zone", FilterOperator::Equals, "north"),
            FilterEdit::set("age", FilterOperator::GreaterThan, "3"),
            FilterEdit::set("mass", FilterOperator::LessThan, "10"),
        ]
        .into_iter()
        .collect();

        let fields: Vec<_> = spec.to_query().into_iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["age", "mass", "zone"]);
    }

    #[test]
    fn test_clear_and_clear_all() {
        let mut spec = FilterSpec::new();
        spec.apply(FilterEdit::set("a", FilterOperator::Equals, "1"));
        spec.apply(FilterEdit::set("b", FilterOperator::Equals, "2"));

        assert!(spec.apply(FilterEdit::clear("a")));
        assert!(!spec.apply(FilterEdit::clear("a")));
        assert!(spec.apply(FilterEdit::ClearAll));
        assert!(!spec.apply(FilterEdit::ClearAll));
    }

    #[test]
    fn test_parse_filter_edit() {
        let edit: FilterEdit = "status:eq:active".parse().expect("valid filter");
        assert_eq!(edit, FilterEdit::set("status", FilterOperator::Equals, "active"));

        let edit: FilterEdit = "url:starts:https://x".parse().expect("value keeps colons");
        assert_eq!(edit, FilterEdit::set("url", FilterOperator::StartsWith, "https://x"));

        let edit: FilterEdit = "notes:empty".parse().expect("valueless operator");
        assert_eq!(edit, FilterEdit::set("notes", FilterOperator::IsEmpty, ""));

        assert!("status".parse::<FilterEdit>().is_err());
        assert!(":eq:x".parse::<FilterEdit>().is_err());
        assert!("status:bogus:x".parse::<FilterEdit>().is_err());
        assert!("status:eq".parse::<FilterEdit>().is_err());
    }

    #[test]
    fn test_operator_serializes_camel_case() {
        let json = serde_json::to_string(&FilterOperator::GreaterThanOrEqual).expect("serialize");
        assert_eq!(json, "\"greaterThanOrEqual\"");
    }
}
