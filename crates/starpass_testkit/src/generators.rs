//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::Value;
use starpass_protocol::shifts::ShiftRow;
use starpass_protocol::{Fields, LocalRecord};

/// Strategy for field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,11}").expect("Invalid regex")
}

/// Strategy for scalar field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 @.]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for record fields. Never generates an `id` field.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 1..6).prop_map(
        |map| {
            map.into_iter()
                .filter(|(name, _)| name != "id")
                .collect()
        },
    )
}

/// Strategy for local records, some of which carry a remote id.
pub fn local_record_strategy() -> impl Strategy<Value = LocalRecord> {
    (fields_strategy(), prop::option::of(1u64..10_000)).prop_map(|(fields, id)| {
        let record = LocalRecord::new(fields);
        match id {
            Some(id) => record.with_remote_id(id),
            None => record,
        }
    })
}

/// Strategy for record batches of up to `max` records.
pub fn local_records_strategy(max: usize) -> impl Strategy<Value = Vec<LocalRecord>> {
    prop::collection::vec(local_record_strategy(), 0..=max)
}

/// Strategy for CSV-style shift rows over a few need ids.
pub fn shift_row_strategy() -> impl Strategy<Value = ShiftRow> {
    (1u32..6, 1u32..29, 6u32..20, 1u32..5).prop_map(|(need, day, hour, slots)| {
        [
            ("need_id", need.to_string()),
            ("start_date", format!("2023-05-{day:02}")),
            ("start_time", format!("{hour:02}:00")),
            ("slots", slots.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    })
}
