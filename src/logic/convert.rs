//! Value conversions used by the default field type change migration.
//! `None` means the value cannot be carried over and the field is dropped.

use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use serde_json::{Number, Value};

use crate::model::{FieldSchema, FieldType};

/// Convert a stored value of field `from` into the shape of field `to`
pub fn convert_value(value: &Value, from: &FieldSchema, to: &FieldSchema) -> Option<Value> {
    match (from.field_type, to.field_type) {
        (FieldType::List, FieldType::List) => {
            let (source, target) = (from.list_type?, to.list_type?);
            let items = value.as_array()?;
            Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| convert_scalar(item, source, target))
                    .collect(),
            ))
        }
        (FieldType::List, target) => {
            let source = from.list_type?;
            let items = value.as_array()?;
            if target.is_textual() {
                let joined = items
                    .iter()
                    .filter_map(|item| convert_scalar(item, source, FieldType::String))
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .join(",");
                (!joined.is_empty()).then_some(Value::String(joined))
            } else {
                items.iter().find_map(|item| convert_scalar(item, source, target))
            }
        }
        (source, FieldType::List) => {
            let target = to.list_type?;
            convert_scalar(value, source, target).map(|item| Value::Array(vec![item]))
        }
        (source, target) => convert_scalar(value, source, target),
    }
}

/// Conversion table between non-list field types
pub fn convert_scalar(value: &Value, from: FieldType, to: FieldType) -> Option<Value> {
    if from == to || (from.is_textual() && to.is_textual()) {
        return Some(value.clone());
    }

    match (from, to) {
        (FieldType::Number, target) if target.is_textual() => match value {
            Value::Number(number) => Some(Value::String(number.to_string())),
            _ => None,
        },
        (FieldType::Boolean, target) if target.is_textual() => {
            value.as_bool().map(|flag| Value::String(flag.to_string()))
        }
        (FieldType::Date, target) if target.is_textual() => {
            value.as_str().map(|date| Value::String(date.to_string()))
        }
        (source, FieldType::Number) if source.is_textual() => parse_number(value.as_str()?.trim()),
        (source, FieldType::Boolean) if source.is_textual() => {
            match value.as_str()?.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            }
        }
        (source, FieldType::Date) if source.is_textual() => parse_date(value.as_str()?.trim())
            .map(|date| Value::String(date.to_rfc3339())),
        (FieldType::Number, FieldType::Boolean) => match value.as_f64()? {
            n if n == 0.0 => Some(Value::Bool(false)),
            n if n == 1.0 => Some(Value::Bool(true)),
            _ => None,
        },
        (FieldType::Boolean, FieldType::Number) => value
            .as_bool()
            .map(|flag| Value::Number(Number::from(u8::from(flag)))),
        (FieldType::Number, FieldType::Date) => Utc
            .timestamp_millis_opt(value.as_i64()?)
            .single()
            .map(|date| Value::String(date.to_rfc3339())),
        (FieldType::Date, FieldType::Number) => parse_date(value.as_str()?)
            .map(|date| Value::Number(Number::from(date.timestamp_millis()))),
        // node, micronode and binary values only convert to their own type
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(integer) = raw.parse::<i64>() {
        return Some(Value::Number(Number::from(integer)));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
