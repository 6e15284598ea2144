use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl FromStr for SortKey {
    type Err = String;

    /// Parse `field`, `field:asc` or `field:desc`. A trailing segment that
    /// is not a direction stays part of the field name (`ns:field`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.rsplit_once(':') {
            Some((field, dir)) => match dir.trim().to_lowercase().as_str() {
                "asc" => (field, SortDirection::Asc),
                "desc" => (field, SortDirection::Desc),
                _ => (s, SortDirection::Asc),
            },
            None => (s, SortDirection::Asc),
        };
        let field = field.trim();
        if field.is_empty() {
            return Err(format!("sort '{}' is missing a field name", s));
        }
        Ok(SortKey {
            field: field.to_string(),
            direction,
        })
    }
}

/// A click on a sortable column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortToggle {
    pub field: String,
    /// Keep the other sort keys (shift-click) instead of replacing them.
    pub multi: bool,
}

impl SortToggle {
    pub fn single(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            multi: false,
        }
    }

    pub fn multi(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            multi: true,
        }
    }
}

/// Ordered sort keys; the first entry is the primary key.
///
/// Each field cycles unset -> ASC -> DESC -> unset. A field entering the
/// spec in multi mode is appended as the lowest-priority key; changing its
/// direction keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit keys, dropping later duplicates of a field.
    pub fn from_keys(keys: impl IntoIterator<Item = SortKey>) -> Self {
        let mut spec = SortSpec::new();
        for key in keys {
            if spec.direction_of(&key.field).is_none() {
                spec.keys.push(key);
            }
        }
        spec
    }

    pub fn direction_of(&self, field: &str) -> Option<SortDirection> {
        self.keys
            .iter()
            .find(|k| k.field == field)
            .map(|k| k.direction)
    }

    /// Advance the toggle cycle for a field. Returns true when the spec changed.
    pub fn toggle(&mut self, toggle: &SortToggle) -> bool {
        let field = toggle.field.trim();
        if field.is_empty() {
            return false;
        }

        let next = match self.direction_of(field) {
            None => Some(SortDirection::Asc),
            Some(SortDirection::Asc) => Some(SortDirection::Desc),
            Some(SortDirection::Desc) => None,
        };

        if !toggle.multi {
            let before = std::mem::take(&mut self.keys);
            if let Some(direction) = next {
                self.keys.push(SortKey {
                    field: field.to_string(),
                    direction,
                });
            }
            return before != self.keys;
        }

        match (self.keys.iter().position(|k| k.field == field), next) {
            (Some(idx), Some(direction)) => self.keys[idx].direction = direction,
            (Some(idx), None) => {
                self.keys.remove(idx);
            }
            (None, Some(direction)) => self.keys.push(SortKey {
                field: field.to_string(),
                direction,
            }),
            (None, None) => return false,
        }
        true
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.keys.is_empty();
        self.keys.clear();
        changed
    }

    /// Ordered query parameters for the data source.
    pub fn to_query(&self) -> Vec<SortKey> {
        self.keys.clone()
    }
}
