//! Conversion between runtime [`Value`]s and `preserves::IOValue`.
//!
//! Maps become `<map <entry "key" value> ...>` records, addresses
//! `<address "/a/b.c">` and errors `<error "category" "message">`, so a
//! snapshot survives the preserves text syntax unchanged.

use preserves::IOValue;
use std::collections::BTreeMap;
use std::convert::TryFrom;

use crate::runtime::address::Address;
use crate::runtime::value::{PError, Value};

const NONE_SYMBOL: &str = "none";
const MAP_LABEL: &str = "map";
const ENTRY_LABEL: &str = "entry";
const ADDRESS_LABEL: &str = "address";
const ERROR_LABEL: &str = "error";

/// Lightweight view over a preserves record.
pub struct RecordView<'a> {
    value: &'a IOValue,
}

impl<'a> RecordView<'a> {
    /// Return the number of fields in the record.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record label as a symbol string.
    pub fn label(&self) -> Option<String> {
        self.value.label().as_symbol().map(|sym| sym.to_string())
    }

    /// Access a field by index.
    pub fn field(&self, index: usize) -> IOValue {
        IOValue::from(self.value.index(index))
    }

    /// Interpret the field at `index` as a UTF-8 string.
    pub fn field_string(&self, index: usize) -> Option<String> {
        self.field(index).as_string().map(|s| s.to_string())
    }
}

/// Attempt to treat an [`IOValue`] as a record.
pub fn as_record(value: &IOValue) -> Option<RecordView<'_>> {
    if value.is_record() {
        Some(RecordView { value })
    } else {
        None
    }
}

/// Convert a runtime value into a preserves value.
pub fn to_io_value(value: &Value) -> IOValue {
    match value {
        Value::None => IOValue::symbol(NONE_SYMBOL),
        Value::Bool(flag) => IOValue::new(*flag),
        Value::Int(num) => IOValue::new(*num),
        Value::Float(num) => IOValue::new(*num),
        Value::Text(text) => IOValue::new(text.clone()),
        Value::List(items) => {
            let converted: Vec<IOValue> = items.iter().map(to_io_value).collect();
            IOValue::new(converted)
        }
        Value::Map(map) => {
            let entries: Vec<IOValue> = map
                .iter()
                .map(|(key, item)| {
                    IOValue::record(
                        IOValue::symbol(ENTRY_LABEL),
                        vec![IOValue::new(key.clone()), to_io_value(item)],
                    )
                })
                .collect();
            IOValue::record(IOValue::symbol(MAP_LABEL), entries)
        }
        Value::Address(address) => IOValue::record(
            IOValue::symbol(ADDRESS_LABEL),
            vec![IOValue::new(address.to_string())],
        ),
        Value::Error(error) => IOValue::record(
            IOValue::symbol(ERROR_LABEL),
            vec![
                IOValue::new(error.category.clone()),
                IOValue::new(error.message.clone()),
            ],
        ),
    }
}

/// Reconstruct a runtime value from a preserves value.
pub fn from_io_value(value: &IOValue) -> Option<Value> {
    if let Some(sym) = value.as_symbol() {
        let text: &str = sym.as_ref();
        if text == NONE_SYMBOL {
            return Some(Value::None);
        }
        return Some(Value::Text(text.to_string()));
    }

    if let Some(text) = value.as_string() {
        return Some(Value::Text(text.to_string()));
    }

    if let Some(flag) = value.as_boolean() {
        return Some(Value::Bool(flag));
    }

    if let Some(int) = value.as_signed_integer() {
        if let Ok(num) = i64::try_from(int.as_ref()) {
            return Some(Value::Int(num));
        }
        return None;
    }

    if let Some(float) = value.as_double() {
        return Some(Value::Float(float));
    }

    if value.is_sequence() {
        let mut items = Vec::new();
        for item in value.iter() {
            items.push(from_io_value(&IOValue::from(item))?);
        }
        return Some(Value::List(items));
    }

    let record = as_record(value)?;
    match record.label()?.as_str() {
        MAP_LABEL => {
            let mut map = BTreeMap::new();
            for idx in 0..record.len() {
                let entry = record.field(idx);
                let entry = as_record(&entry)?;
                if entry.label().as_deref() != Some(ENTRY_LABEL) || entry.len() != 2 {
                    return None;
                }
                let key = entry.field_string(0)?;
                map.insert(key, from_io_value(&entry.field(1))?);
            }
            Some(Value::Map(map))
        }
        ADDRESS_LABEL => {
            let text = record.field_string(0)?;
            Address::parse(&text).ok().map(Value::Address)
        }
        ERROR_LABEL => {
            let category = record.field_string(0)?;
            let message = record.field_string(1)?;
            Some(Value::Error(PError::new(category, message)))
        }
        _ => None,
    }
}

/// Render a value in preserves text syntax.
pub fn to_text(value: &Value) -> String {
    format!("{:?}", to_io_value(value))
}

/// Parse preserves text syntax back into a value.
pub fn from_text(text: &str) -> Result<Value, String> {
    let io: IOValue = text.parse().map_err(|err| format!("{}", err))?;
    from_io_value(&io).ok_or_else(|| "unsupported preserves value".to_string())
}
