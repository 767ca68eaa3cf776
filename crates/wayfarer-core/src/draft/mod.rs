//! Draft accumulation for multi-turn slot filling.
//!
//! A `Draft` holds the partial request built up across conversation turns.
//! Its fields are split into required and optional names fixed by a
//! `DraftSchema`. Merging is pure: a merge only ever fills or replaces
//! values and never empties a field. Optional fields are emptied through the
//! explicit [`clear_optional`] operation; required fields cannot be emptied.
//!
//! The accumulator does not look inside values; whether a date or a party
//! size makes sense is for the capability that consumes the finished draft.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

/// Draft errors
#[derive(Debug, Error, PartialEq)]
pub enum DraftError {
    #[error("draft state must be a JSON object, got {0}")]
    NotAnObject(String),
    #[error("field '{0}' is required and cannot be cleared")]
    RequiredField(String),
    #[error("field '{0}' is not part of the draft schema")]
    UnknownField(String),
}

/// Whether a field must be filled for the draft to be complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Required,
    Optional,
}

/// Field names of a draft, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSchema {
    required: Vec<String>,
    optional: Vec<String>,
}

impl DraftSchema {
    pub fn new(required: &[&str], optional: &[&str]) -> Self {
        Self {
            required: required.iter().map(|name| name.to_string()).collect(),
            optional: optional.iter().map(|name| name.to_string()).collect(),
        }
    }

    /// Schema of the travel-plan task.
    pub fn travel_plan() -> Self {
        Self::new(
            &["destination", "origin", "start_date", "end_date"],
            &["people", "attractions"],
        )
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        if self.required.iter().any(|name| name == field) {
            Some(FieldKind::Required)
        } else if self.optional.iter().any(|name| name == field) {
            Some(FieldKind::Optional)
        } else {
            None
        }
    }

    fn fields(&self) -> impl Iterator<Item = &String> {
        self.required.iter().chain(self.optional.iter())
    }
}

/// Partially filled request state
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    schema: Arc<DraftSchema>,
    values: BTreeMap<String, Value>,
}

impl Draft {
    /// Empty draft at conversation start.
    pub fn empty(schema: Arc<DraftSchema>) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    /// Rebuild a draft from client-supplied state.
    ///
    /// Keys outside the schema and empty values are dropped.
    pub fn rehydrate(schema: Arc<DraftSchema>, state: &Value) -> Result<Self, DraftError> {
        let object = match state {
            Value::Object(object) => object,
            Value::Null => return Ok(Self::empty(schema)),
            other => return Err(DraftError::NotAnObject(json_type_name(other).to_string())),
        };
        let values = object
            .iter()
            .filter(|(key, value)| schema.kind_of(key).is_some() && !is_empty_value(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &DraftSchema {
        &self.schema
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Text value of a field, when it holds a non-empty string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn missing_required(&self) -> Vec<String> {
        missing_required(self)
    }

    pub fn is_complete(&self) -> bool {
        is_complete(self)
    }

    /// Object with every schema field; absent fields are `null`.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for field in self.schema.fields() {
            let value = self.values.get(field).cloned().unwrap_or(Value::Null);
            object.insert(field.clone(), value);
        }
        Value::Object(object)
    }
}

/// Merge `updates` into `current` and return the new draft.
///
/// A non-empty update replaces the current value. Absent, `null` and empty
/// updates leave the current value alone. Keys outside the schema are ignored.
pub fn merge(current: &Draft, updates: &Map<String, Value>) -> Draft {
    let mut next = current.clone();
    for (key, value) in updates {
        if current.schema.kind_of(key).is_none() || is_empty_value(value) {
            continue;
        }
        next.values.insert(key.clone(), value.clone());
    }
    next
}

/// Empty the given optional fields.
pub fn clear_optional(current: &Draft, fields: &[String]) -> Result<Draft, DraftError> {
    let mut next = current.clone();
    for field in fields {
        match current.schema.kind_of(field) {
            Some(FieldKind::Optional) => {
                next.values.remove(field);
            }
            Some(FieldKind::Required) => return Err(DraftError::RequiredField(field.clone())),
            None => return Err(DraftError::UnknownField(field.clone())),
        }
    }
    Ok(next)
}

/// Required fields without a non-empty value, in declaration order.
pub fn missing_required(draft: &Draft) -> Vec<String> {
    draft
        .schema
        .required
        .iter()
        .filter(|field| {
            draft
                .values
                .get(field.as_str())
                .map_or(true, is_empty_value)
        })
        .cloned()
        .collect()
}

/// Whether every required field holds a non-empty value.
pub fn is_complete(draft: &Draft) -> bool {
    missing_required(draft).is_empty()
}

/// `null`, blank strings, empty arrays and empty objects count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};

    use super::*;

    const KEYS: [&str; 7] = [
        "destination",
        "origin",
        "start_date",
        "end_date",
        "people",
        "attractions",
        "budget",
    ];

    fn arb_field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            Just(json!("")),
            Just(json!("   ")),
            Just(json!([])),
            Just(json!({})),
            "[A-Za-z ]{1,10}".prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            prop::collection::vec("[A-Za-z]{1,6}", 1..3).prop_map(|items| json!(items)),
        ]
    }

    fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map(prop::sample::select(KEYS.to_vec()), arb_field_value(), 0..7)
            .prop_map(|fields| {
                fields
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value))
                    .collect()
            })
    }

    fn draft(fields: Map<String, Value>) -> Draft {
        Draft::rehydrate(Arc::new(DraftSchema::travel_plan()), &Value::Object(fields))
            .expect("object state")
    }

    proptest! {
        #[test]
        fn merge_never_empties_a_filled_field(state in arb_fields(), updates in arb_fields()) {
            let current = draft(state);
            let next = merge(&current, &updates);
            for field in current.schema().fields() {
                if current.get(field).is_some_and(|value| !is_empty_value(value)) {
                    prop_assert!(next.get(field).is_some_and(|value| !is_empty_value(value)));
                }
            }
        }

        #[test]
        fn merge_only_shrinks_missing_fields(state in arb_fields(), updates in arb_fields()) {
            let current = draft(state);
            let before = current.missing_required();
            let after = merge(&current, &updates).missing_required();
            prop_assert!(after.iter().all(|field| before.contains(field)));
            if current.is_complete() {
                prop_assert!(after.is_empty());
            }
        }

        #[test]
        fn empty_updates_leave_values_untouched(state in arb_fields(), updates in arb_fields()) {
            let current = draft(state);
            let next = merge(&current, &updates);
            for (key, value) in &updates {
                if is_empty_value(value) {
                    prop_assert_eq!(next.get(key), current.get(key));
                }
            }
        }
    }
}
