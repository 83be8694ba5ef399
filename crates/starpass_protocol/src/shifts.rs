//! Shift batch planning.
//!
//! Shifts arrive as flat rows (one per shift, typically from a CSV export)
//! and are uploaded grouped by need: one `POST /needs/{need_id}/shifts` per
//! need with a `{"shifts": [...]}` body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::field_map::FieldMap;
use crate::record::LocalRecord;
use crate::Fields;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A flat shift row keyed by column name.
pub type ShiftRow = BTreeMap<String, String>;

/// Column layout of a shift export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftLayout {
    /// Column holding the need id.
    pub group_by: String,
    /// Column holding the start date.
    pub start_date: String,
    /// Column holding the start time.
    pub start_time: String,
    /// Column that receives `"<date> <time>"`.
    pub start: String,
    /// Body key wrapping the shift list.
    pub shifts_key: String,
    /// Whether to build the start column from date and time.
    pub merge_start: bool,
    /// Informational columns removed before grouping.
    pub drop_columns: Vec<String>,
    /// Columns kept in each shift. `None` keeps every remaining column.
    pub keep_columns: Option<Vec<String>>,
}

impl Default for ShiftLayout {
    fn default() -> Self {
        Self {
            group_by: "need_id".into(),
            start_date: "start_date".into(),
            start_time: "start_time".into(),
            start: "start".into(),
            shifts_key: "shifts".into(),
            merge_start: true,
            drop_columns: Vec::new(),
            keep_columns: None,
        }
    }
}

impl ShiftLayout {
    /// Sets the dropped columns.
    pub fn with_drop_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the kept columns.
    pub fn with_keep_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keep_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Field map targeting the per-need shift collection.
    pub fn field_map(&self) -> FieldMap {
        FieldMap::new(format!("/needs/{{{}}}/shifts", self.group_by))
            .require(self.group_by.clone())
            .require(self.shifts_key.clone())
    }
}

/// Turns flat shift rows into one local record per need.
///
/// Duplicate rows are removed (first occurrence wins), the start column is
/// built, dropped columns are removed, and the rest are grouped by need id
/// in ascending id order.
pub fn plan_shift_batches(rows: &[ShiftRow], layout: &ShiftLayout) -> ProtocolResult<Vec<LocalRecord>> {
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<GroupKey, Vec<Value>> = BTreeMap::new();

    for (line, row) in rows.iter().enumerate() {
        if !seen.insert(row) {
            continue;
        }

        let mut row = row.clone();
        if layout.merge_start {
            let date = column(&row, &layout.start_date, line)?;
            let time = column(&row, &layout.start_time, line)?;
            let start = format!("{date} {time}");
            row.insert(layout.start.clone(), start);
        }
        for dropped in &layout.drop_columns {
            row.remove(dropped);
        }

        let need_id = column(&row, &layout.group_by, line)?.to_string();
        let shift: Fields = match &layout.keep_columns {
            Some(keep) => keep
                .iter()
                .filter_map(|name| {
                    row.get(name)
                        .map(|value| (name.clone(), Value::String(value.clone())))
                })
                .collect(),
            None => row
                .iter()
                .filter(|(name, _)| **name != layout.group_by)
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect(),
        };

        groups
            .entry(GroupKey::new(need_id))
            .or_default()
            .push(Value::Object(shift));
    }

    Ok(groups
        .into_iter()
        .map(|(key, shifts)| {
            LocalRecord::default()
                .with_field(layout.group_by.clone(), key.raw)
                .with_field(layout.shifts_key.clone(), Value::Array(shifts))
        })
        .collect())
}

fn column<'a>(row: &'a ShiftRow, name: &str, line: usize) -> ProtocolResult<&'a str> {
    row.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ProtocolError::validation(format!("row {} has no value for `{name}`", line + 1))
        })
}

/// Orders need ids numerically when they are numbers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    numeric: Option<u64>,
    raw: String,
}

impl GroupKey {
    fn new(raw: String) -> Self {
        Self {
            numeric: raw.parse().ok(),
            raw,
        }
    }
}
