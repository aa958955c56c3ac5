use serde_json::{Map, Value};

/// Fields of a proposal that actually change the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    pub has_update: bool,
    pub changes: Map<String, Value>,
}

/// Computes the minimal set of changed fields between a record's current values and a
/// partial proposal.
///
/// Only keys present in `proposed` are considered: an absent key means "leave as is",
/// never "set to null". A proposed value equal to the current one is dropped. A key
/// missing from `current` compares as `null`, so proposing `null` for an unset field is
/// not a change either.
pub fn diff_fields(current: &Map<String, Value>, proposed: &Map<String, Value>) -> FieldDiff {
    let changes: Map<String, Value> = proposed
        .iter()
        .filter(|(key, value)| current.get(key.as_str()).unwrap_or(&Value::Null) != *value)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    FieldDiff {
        has_update: !changes.is_empty(),
        changes,
    }
}
