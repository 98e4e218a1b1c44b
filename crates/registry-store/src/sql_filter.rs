use rusqlite::types::Value as SqlValue;

use crate::filter::{Condition, Filter};
use crate::schema::{CollectionSchema, ColumnMapping};
use crate::value::Value;

/// Compiled SQL pre-filter with bound parameters.
///
/// The WHERE clause narrows rows using the key and denormalized columns.
/// When `exact` is false some conditions had no column form, and every
/// returned row must still pass `Filter::matches`.
pub(crate) struct CompiledFilter {
    pub where_clause: String,
    pub params: Vec<SqlValue>,
    pub exact: bool,
}

/// Translate a Filter into SQL fragments for `schema`'s table.
pub(crate) fn compile_filter(schema: &CollectionSchema, filter: &Filter) -> CompiledFilter {
    let mut params = Vec::new();
    let mut conditions = Vec::new();
    let mut exact = true;

    for field in &filter.conditions {
        let compiled = schema
            .column_for(&field.path)
            .and_then(|mapping| compile_condition(schema, mapping, &field.condition, &mut params));
        match compiled {
            Some(sql) => conditions.push(sql),
            None => exact = false,
        }
    }

    // Conditions that always hold compile to "1"; drop them.
    conditions.retain(|c| c != "1");
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    CompiledFilter {
        where_clause,
        params,
        exact,
    }
}

/// SQL for one condition on a mapped column, or `None` when the column
/// cannot express it exactly.
///
/// The key column always holds the document's string key, so every key
/// condition is exact. A denormalized column is NULL for both an absent
/// and a non-string value, so only string comparisons are exact there.
fn compile_condition(
    schema: &CollectionSchema,
    mapping: &ColumnMapping,
    condition: &Condition,
    params: &mut Vec<SqlValue>,
) -> Option<String> {
    let is_key = schema.is_key(mapping);
    let col = mapping.column;
    match condition {
        Condition::Eq(Value::String(s)) => {
            params.push(SqlValue::Text(s.clone()));
            Some(format!("{} = ?", col))
        }
        Condition::Eq(_) if is_key => Some("0".to_string()),
        Condition::Eq(_) => None,
        Condition::In(values) => {
            let strings: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
            if !is_key && strings.len() != values.len() {
                return None;
            }
            if strings.is_empty() {
                return Some("0".to_string());
            }
            let placeholders: Vec<&str> = strings
                .iter()
                .map(|s| {
                    params.push(SqlValue::Text(s.to_string()));
                    "?"
                })
                .collect();
            Some(format!("{} IN ({})", col, placeholders.join(", ")))
        }
        Condition::Exists(true) if is_key => Some("1".to_string()),
        Condition::Exists(false) if is_key => Some("0".to_string()),
        Condition::Exists(_) => None,
    }
}
