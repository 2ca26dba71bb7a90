//! Response decoding and cardinality restoration.
//!
//! The wire format collapses a repeated field holding exactly one item into a
//! bare element, and cannot express "void". Decoding turns the response
//! element into a [`Value`]; restoration then reshapes it to what the schema
//! declares.

use crate::parser::XmlElement;
use crate::schema::{is_base_type, strip_prefix, FieldDescriptor, MaxOccurs, TypeDirectory};
use crate::value::Value;
use indexmap::IndexMap;
use tracing::trace;

/// Decode an operation response element (`<getResponse>`) into the raw
/// positional result for `outputs`.
///
/// No outputs yields `Null`, a single output its value (or `Null` when
/// absent), several outputs a positional list.
pub fn decode_response(response: &XmlElement, outputs: &[FieldDescriptor]) -> Value {
    let record = decode_children(response);
    match outputs {
        [] => Value::Null,
        [single] => record.get(&single.name).cloned().unwrap_or_default(),
        many => Value::List(
            many.iter()
                .map(|output| record.get(&output.name).cloned().unwrap_or_default())
                .collect(),
        ),
    }
}

/// Decode an element into a native value: leaves become text, elements with
/// children become records.
pub fn decode_element(element: &XmlElement) -> Value {
    if element.attribute("nil").map(|v| v == "true" || v == "1") == Some(true) {
        return Value::Null;
    }
    if element.is_leaf() {
        return Value::Text(element.text().to_string());
    }
    Value::Record(decode_children(element))
}

/// Decode the children of an element, grouping repeated siblings into
/// lists. Dots in element names become underscores.
fn decode_children(element: &XmlElement) -> IndexMap<String, Value> {
    let mut grouped: IndexMap<String, Vec<Value>> = IndexMap::new();
    for child in &element.children {
        grouped
            .entry(child.local_name().replace('.', "_"))
            .or_default()
            .push(decode_element(child));
    }
    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::List(values)
            };
            (key, value)
        })
        .collect()
}

/// Restores schema cardinality on decoded responses.
pub struct Restorer<'a> {
    directory: &'a TypeDirectory,
    item_element: &'a str,
}

impl<'a> Restorer<'a> {
    pub fn new(directory: &'a TypeDirectory) -> Self {
        Self {
            directory,
            item_element: "item",
        }
    }

    /// Element name that wraps the items of a SOAP-encoded array.
    pub fn item_element(mut self, name: &'a str) -> Self {
        self.item_element = name;
        self
    }

    /// Restore a decoded response against the operation's outputs.
    pub fn restore(&self, response: Value, outputs: &[FieldDescriptor]) -> Value {
        match outputs {
            [] => Value::Null,
            [single] => self.restore_output(response, single),
            many => match response {
                Value::List(items) => Value::List(
                    items
                        .into_iter()
                        .zip(many)
                        .map(|(item, output)| self.restore_output(item, output))
                        .collect(),
                ),
                other => other,
            },
        }
    }

    fn restore_output(&self, value: Value, output: &FieldDescriptor) -> Value {
        let namespace = if output.namespace.is_empty() {
            self.directory.namespace()
        } else {
            output.namespace.as_str()
        };
        self.restore_value(value, namespace, &output.type_name, &output.max_occurs)
    }

    /// Restore a value of `type_name` with the given cardinality.
    pub fn restore_value(
        &self,
        value: Value,
        namespace: &str,
        type_name: &str,
        max_occurs: &MaxOccurs,
    ) -> Value {
        let is_array = self.directory.is_array_type(namespace, type_name);
        if !max_occurs.is_repeated() && !is_array {
            return self.restore_single(value, namespace, type_name);
        }

        let item_type = if is_array {
            self.directory.array_item_type(namespace, type_name)
        } else {
            type_name.to_string()
        };
        let items = match value {
            Value::List(items) => items,
            empty if empty.is_empty() => Vec::new(),
            Value::Record(fields)
                if is_array
                    && item_type != strip_prefix(type_name)
                    && self.is_item_wrapper(&fields, namespace, &item_type) =>
            {
                match fields.into_iter().next() {
                    Some((_, Value::List(items))) => items,
                    Some((_, single)) => vec![single],
                    None => Vec::new(),
                }
            }
            single => vec![single],
        };
        Value::List(
            items
                .into_iter()
                .filter(|item| !item.is_null())
                .map(|item| self.restore_single(item, namespace, &item_type))
                .collect(),
        )
    }

    fn restore_single(&self, value: Value, namespace: &str, type_name: &str) -> Value {
        match value {
            Value::Record(fields) => self.restore_record(fields, namespace, type_name),
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .filter(|item| !item.is_null())
                    .map(|item| self.restore_single(item, namespace, type_name))
                    .collect(),
            ),
            other => other,
        }
    }

    fn restore_record(
        &self,
        fields: IndexMap<String, Value>,
        namespace: &str,
        type_name: &str,
    ) -> Value {
        let effective = self
            .subtype_marker(&fields, namespace)
            .unwrap_or_else(|| type_name.to_string());

        if is_base_type(&effective) || self.directory.resolve(namespace, &effective).is_err() {
            return Value::Record(fields);
        }
        if effective != type_name {
            trace!(declared = type_name, subtype = %effective, "Restoring with subtype marker");
        }

        let restored = fields
            .into_iter()
            .map(|(key, value)| {
                let value = match self.schema_field(namespace, &effective, &key) {
                    Some(field) => {
                        let field_ns = if field.namespace.is_empty() {
                            namespace
                        } else {
                            field.namespace.as_str()
                        };
                        self.restore_value(value, field_ns, &field.type_name, &field.max_occurs)
                    }
                    None => value,
                };
                (key, value)
            })
            .collect();
        Value::Record(restored)
    }

    /// A SOAP-encoded array (`<ids><item>1</item></ids>`) decodes as a record
    /// whose only key is the item element. A record of the item type with a
    /// single present field is an item, not a wrapper.
    fn is_item_wrapper(
        &self,
        fields: &IndexMap<String, Value>,
        namespace: &str,
        item_type: &str,
    ) -> bool {
        match fields.keys().next() {
            Some(key) if fields.len() == 1 && key == self.item_element => {
                self.schema_field(namespace, item_type, key).is_none()
            }
            _ => false,
        }
    }

    /// Subtype named by a `*_Type` or `xsi_type` marker, when it resolves.
    fn subtype_marker(&self, fields: &IndexMap<String, Value>, namespace: &str) -> Option<String> {
        fields
            .iter()
            .find(|(key, _)| key.as_str() == "xsi_type" || key.ends_with("_Type"))
            .and_then(|(_, value)| value.as_str())
            .filter(|name| self.directory.resolve(namespace, name).is_ok())
            .map(String::from)
    }

    /// Field lookup that also accepts decoded keys (`Foo_Type` for `Foo.Type`).
    fn schema_field(&self, namespace: &str, type_name: &str, key: &str) -> Option<&FieldDescriptor> {
        if let Ok(field) = self.directory.field(namespace, type_name, key) {
            return Some(field);
        }
        let (head, tail) = key.rsplit_once('_')?;
        self.directory
            .field(namespace, type_name, &format!("{}.{}", head, tail))
            .ok()
    }
}
