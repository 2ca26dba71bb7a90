//! Marshaling of native values into wire-typed structures and SOAP envelopes.

use crate::error::{Result, SoapError};
use crate::parser::{SOAP_11_NS, XSI_NS};
use crate::schema::{is_base_type, TypeDirectory};
use crate::value::{Value, WireStruct, WireValue};
use indexmap::IndexMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashMap;
use std::fmt::Display;

/// Escape XML special characters.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Maps namespace URIs to element prefixes.
///
/// Explicit mappings win; otherwise the prefix is the second-to-last path
/// segment of the namespace URL (`.../api/cm/v1` gives `cm`).
#[derive(Debug, Clone, Default)]
pub struct NamespacePrefixer {
    explicit: HashMap<String, String>,
}

impl NamespacePrefixer {
    pub const FALLBACK: &'static str = "ns";

    pub fn new(explicit: HashMap<String, String>) -> Self {
        Self { explicit }
    }

    pub fn prefix(&self, namespace: &str) -> String {
        if let Some(prefix) = self.explicit.get(namespace) {
            return prefix.clone();
        }
        let segments: Vec<&str> = namespace.split('/').collect();
        match segments.len().checked_sub(2).map(|i| segments[i]) {
            Some(segment) if is_valid_prefix(segment) => segment.to_string(),
            _ => Self::FALLBACK.to_string(),
        }
    }
}

fn is_valid_prefix(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Converts native values into [`WireValue`]s using the type directory.
///
/// Input is expected to be validated already; `pack` only reports errors it
/// cannot avoid (unresolvable types and unknown fields).
pub struct Marshaler<'a> {
    directory: &'a TypeDirectory,
    prefixer: &'a NamespacePrefixer,
    wrap_lists: bool,
    item_element: &'a str,
}

impl<'a> Marshaler<'a> {
    pub fn new(directory: &'a TypeDirectory, prefixer: &'a NamespacePrefixer) -> Self {
        Self {
            directory,
            prefixer,
            wrap_lists: false,
            item_element: "item",
        }
    }

    /// Wrap every list item under `item_element`.
    pub fn wrap_lists(mut self, wrap: bool, item_element: &'a str) -> Self {
        self.wrap_lists = wrap;
        self.item_element = item_element;
        self
    }

    pub fn pack(&self, value: &Value, namespace: &str, type_name: &str) -> Result<WireValue> {
        match value {
            Value::Null => Ok(WireValue::Null),
            Value::Raw(raw) => Ok(WireValue::Raw(raw.clone())),
            Value::Text(text) => Ok(WireValue::Text(xml_escape(text))),
            Value::Bool(b) => Ok(WireValue::Text(b.to_string())),
            Value::Int(n) => Ok(WireValue::Text(n.to_string())),
            Value::Float(n) => Ok(WireValue::Text(n.to_string())),
            Value::List(items) => self.pack_list(items, namespace, type_name),
            Value::Record(fields) => self.pack_record(fields, namespace, type_name),
        }
    }

    fn pack_list(&self, items: &[Value], namespace: &str, type_name: &str) -> Result<WireValue> {
        let item_type = if self.directory.is_array_type(namespace, type_name) {
            self.directory.array_item_type(namespace, type_name)
        } else {
            type_name.to_string()
        };

        let packed = items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| self.pack(item, namespace, &item_type))
            .collect::<Result<Vec<_>>>()?;

        if self.wrap_lists {
            Ok(WireValue::Struct(WireStruct {
                type_name: None,
                fields: packed
                    .into_iter()
                    .map(|item| (self.item_element.to_string(), item))
                    .collect(),
            }))
        } else {
            Ok(WireValue::Sequence(packed))
        }
    }

    fn pack_record(
        &self,
        record: &IndexMap<String, Value>,
        namespace: &str,
        type_name: &str,
    ) -> Result<WireValue> {
        if is_base_type(type_name) {
            return Err(SoapError::violation(format!(
                "Value for type '{}' must be a scalar, got record",
                type_name
            )));
        }

        let subtype_key = self
            .directory
            .declared_subtype_key(namespace, type_name, record);
        let effective = subtype_key
            .and_then(|key| record.get(key))
            .and_then(Value::as_str)
            .unwrap_or(type_name);

        let descriptor = self.directory.resolve(namespace, effective)?;
        let fields = self.directory.fields_of(namespace, effective)?;

        if let Some(unknown) = record
            .keys()
            .filter(|key| Some(key.as_str()) != subtype_key)
            .find(|key| !fields.iter().any(|f| &f.name == *key))
        {
            return Err(SoapError::UnknownField {
                field: unknown.clone(),
                type_name: effective.to_string(),
            });
        }

        let mut packed = Vec::new();
        for field in fields {
            if Some(field.name.as_str()) == subtype_key {
                continue;
            }
            let Some(value) = record.get(&field.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            let declaring_ns = self
                .directory
                .field_namespace(namespace, effective, &field.name)?;
            let value_ns = if field.namespace.is_empty() {
                namespace
            } else {
                field.namespace.as_str()
            };
            let key = format!("{}:{}", self.prefixer.prefix(declaring_ns), field.name);
            packed.push((key, self.pack(value, value_ns, &field.type_name)?));
        }

        Ok(WireValue::Struct(WireStruct {
            type_name: Some(format!(
                "{}:{}",
                self.prefixer.prefix(&descriptor.namespace),
                descriptor.name
            )),
            fields: packed,
        }))
    }
}

/// A SOAP 1.1 request ready to be serialized.
#[derive(Debug, Clone, Default)]
pub struct SoapRequest {
    /// Namespace of the `RequestHeader` element
    pub header_namespace: String,
    /// Request header values, unescaped
    pub header: Vec<(String, String)>,
    pub operation: String,
    /// Default namespace of the operation element
    pub namespace: String,
    /// Extra `xmlns:prefix` declarations on the operation element
    pub prefixes: Vec<(String, String)>,
    pub params: Vec<(String, WireValue)>,
}

fn xml_write_err<E: Display>(e: E) -> SoapError {
    SoapError::Local(format!("XML write error: {}", e))
}

impl SoapRequest {
    /// Serialize the request as a SOAP 1.1 envelope.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_write_err)?;

        let mut envelope = BytesStart::new("soapenv:Envelope");
        envelope.push_attribute(("xmlns:soapenv", SOAP_11_NS));
        envelope.push_attribute(("xmlns:xsi", XSI_NS));
        writer
            .write_event(Event::Start(envelope))
            .map_err(xml_write_err)?;

        if !self.header.is_empty() {
            writer
                .write_event(Event::Start(BytesStart::new("soapenv:Header")))
                .map_err(xml_write_err)?;
            let mut request_header = BytesStart::new("RequestHeader");
            request_header.push_attribute(("xmlns", self.header_namespace.as_str()));
            writer
                .write_event(Event::Start(request_header))
                .map_err(xml_write_err)?;
            for (name, value) in &self.header {
                write_text_element(&mut writer, name, BytesText::new(value))?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("RequestHeader")))
                .map_err(xml_write_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("soapenv:Header")))
                .map_err(xml_write_err)?;
        }

        writer
            .write_event(Event::Start(BytesStart::new("soapenv:Body")))
            .map_err(xml_write_err)?;

        let mut method = BytesStart::new(self.operation.as_str());
        method.push_attribute(("xmlns", self.namespace.as_str()));
        for (prefix, uri) in &self.prefixes {
            let key = format!("xmlns:{}", prefix);
            method.push_attribute((key.as_str(), uri.as_str()));
        }
        writer
            .write_event(Event::Start(method))
            .map_err(xml_write_err)?;
        for (name, value) in &self.params {
            write_wire(&mut writer, name, value)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.operation.as_str())))
            .map_err(xml_write_err)?;

        writer
            .write_event(Event::End(BytesEnd::new("soapenv:Body")))
            .map_err(xml_write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new("soapenv:Envelope")))
            .map_err(xml_write_err)?;

        String::from_utf8(writer.into_inner()).map_err(xml_write_err)
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: BytesText) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_write_err)?;
    writer.write_event(Event::Text(text)).map_err(xml_write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_write_err)?;
    Ok(())
}

fn write_wire(writer: &mut Writer<Vec<u8>>, name: &str, value: &WireValue) -> Result<()> {
    match value {
        WireValue::Null => Ok(()),
        WireValue::Text(text) | WireValue::Raw(text) => {
            write_text_element(writer, name, BytesText::from_escaped(text.as_str()))
        }
        WireValue::Sequence(items) => {
            for item in items {
                write_wire(writer, name, item)?;
            }
            Ok(())
        }
        WireValue::Struct(wire) => {
            let mut start = BytesStart::new(name);
            if let Some(type_name) = &wire.type_name {
                start.push_attribute(("xsi:type", type_name.as_str()));
            }
            writer
                .write_event(Event::Start(start))
                .map_err(xml_write_err)?;
            for (key, field) in &wire.fields {
                write_wire(writer, key, field)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_write_err)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, MaxOccurs, ServiceSchema, TypeDescriptor};

    const NS: &str = "https://api.example.com/api/cm/v1";
    const OTHER_NS: &str = "https://api.example.com/api/o/v1";

    fn directory() -> TypeDirectory {
        TypeDirectory::new(ServiceSchema {
            namespace: NS.to_string(),
            types: vec![
                TypeDescriptor::complex(OTHER_NS, "Entity")
                    .with_field(FieldDescriptor::new("id", OTHER_NS, "long", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Campaign")
                    .with_base(OTHER_NS, "Entity")
                    .with_field(FieldDescriptor::new("name", NS, "string", MaxOccurs::ONE))
                    .with_field(FieldDescriptor::new(
                        "labels",
                        NS,
                        "string",
                        MaxOccurs::Unbounded,
                    ))
                    .with_field(FieldDescriptor::new("status", NS, "string", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "SearchCampaign")
                    .with_base(NS, "Campaign")
                    .with_field(FieldDescriptor::new("network", NS, "string", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "ArrayOfCampaign").array_of("Campaign[]"),
            ],
            operations: vec![],
        })
    }

    fn struct_of(value: WireValue) -> WireStruct {
        match value {
            WireValue::Struct(s) => s,
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("<a & 'b'>"), "&lt;a &amp; &apos;b&apos;&gt;");
    }

    #[test]
    fn test_prefix_derivation() {
        let prefixer = NamespacePrefixer::default();
        assert_eq!(prefixer.prefix(NS), "cm");
        assert_eq!(prefixer.prefix("urn:plain"), "ns");
        assert_eq!(prefixer.prefix(""), "ns");

        let mut explicit = HashMap::new();
        explicit.insert(NS.to_string(), "camp".to_string());
        assert_eq!(NamespacePrefixer::new(explicit).prefix(NS), "camp");
    }

    #[test]
    fn test_record_is_sparse_and_ordered() {
        let dir = directory();
        let prefixer = NamespacePrefixer::default();
        let marshaler = Marshaler::new(&dir, &prefixer);

        let value = Value::record([
            ("status", Value::from("PAUSED")),
            ("name", Value::from("Spring & Summer")),
            ("labels", Value::List(vec![])),
            ("id", Value::from("42")),
        ]);
        let packed = struct_of(marshaler.pack(&value, NS, "Campaign").unwrap());

        assert_eq!(packed.type_name.as_deref(), Some("cm:Campaign"));
        assert_eq!(packed.keys(), vec!["o:id", "cm:name", "cm:status"]);
        assert_eq!(
            packed.field("cm:name"),
            Some(&WireValue::Text("Spring &amp; Summer".to_string()))
        );
    }

    #[test]
    fn test_declared_subtype_overrides_type() {
        let dir = directory();
        let prefixer = NamespacePrefixer::default();
        let marshaler = Marshaler::new(&dir, &prefixer);

        let value = Value::record([
            ("xsi_type", Value::from("SearchCampaign")),
            ("network", Value::from("SEARCH")),
        ]);
        let packed = struct_of(marshaler.pack(&value, NS, "Campaign").unwrap());
        assert_eq!(packed.type_name.as_deref(), Some("cm:SearchCampaign"));
        assert_eq!(packed.keys(), vec!["cm:network"]);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let dir = directory();
        let prefixer = NamespacePrefixer::default();
        let marshaler = Marshaler::new(&dir, &prefixer);

        let value = Value::record([("bogus", Value::from("x"))]);
        assert!(matches!(
            marshaler.pack(&value, NS, "Campaign"),
            Err(SoapError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_lists() {
        let dir = directory();
        let prefixer = NamespacePrefixer::default();
        let value = Value::List(vec![
            Value::record([("name", Value::from("a"))]),
            Value::Null,
            Value::record([("name", Value::from("b"))]),
        ]);

        let plain = Marshaler::new(&dir, &prefixer)
            .pack(&value, NS, "ArrayOfCampaign")
            .unwrap();
        match plain {
            WireValue::Sequence(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    struct_of(items[0].clone()).type_name.as_deref(),
                    Some("cm:Campaign")
                );
            }
            other => panic!("expected sequence, got {:?}", other),
        }

        let wrapped = Marshaler::new(&dir, &prefixer)
            .wrap_lists(true, "item")
            .pack(&value, NS, "ArrayOfCampaign")
            .unwrap();
        assert_eq!(struct_of(wrapped).keys(), vec!["item", "item"]);
    }

    #[test]
    fn test_scalars_and_passthrough() {
        let dir = directory();
        let prefixer = NamespacePrefixer::default();
        let marshaler = Marshaler::new(&dir, &prefixer);
        assert_eq!(
            marshaler.pack(&Value::Int(7), NS, "long").unwrap(),
            WireValue::Text("7".to_string())
        );
        assert_eq!(
            marshaler.pack(&Value::Bool(true), NS, "boolean").unwrap(),
            WireValue::Text("true".to_string())
        );
        assert_eq!(
            marshaler.pack(&Value::Raw("<x/>".into()), NS, "string").unwrap(),
            WireValue::Raw("<x/>".to_string())
        );
        assert_eq!(marshaler.pack(&Value::Null, NS, "Campaign").unwrap(), WireValue::Null);
    }

    #[test]
    fn test_envelope() {
        let request = SoapRequest {
            header_namespace: NS.to_string(),
            header: vec![
                ("developerToken".to_string(), "dev&1".to_string()),
                ("validateOnly".to_string(), "true".to_string()),
            ],
            operation: "mutate".to_string(),
            namespace: NS.to_string(),
            prefixes: vec![("cm".to_string(), NS.to_string())],
            params: vec![(
                "operations".to_string(),
                WireValue::Sequence(vec![
                    WireValue::Struct(WireStruct {
                        type_name: Some("cm:CampaignOperation".to_string()),
                        fields: vec![(
                            "cm:operator".to_string(),
                            WireValue::Text("ADD".to_string()),
                        )],
                    }),
                    WireValue::Null,
                ]),
            )],
        };
        let xml = request.to_xml().unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(&format!(r#"<RequestHeader xmlns="{}">"#, NS)));
        assert!(xml.contains("<developerToken>dev&amp;1</developerToken>"));
        assert!(xml.contains(&format!(r#"<mutate xmlns="{}" xmlns:cm="{}">"#, NS, NS)));
        assert!(xml.contains(
            r#"<operations xsi:type="cm:CampaignOperation"><cm:operator>ADD</cm:operator></operations>"#
        ));
        assert_eq!(xml.matches("<operations").count(), 1);
    }

    #[test]
    fn test_envelope_without_header() {
        let request = SoapRequest {
            operation: "getInfo".to_string(),
            namespace: NS.to_string(),
            ..Default::default()
        };
        let xml = request.to_xml().unwrap();
        assert!(!xml.contains("soapenv:Header"));
        assert!(xml.contains(&format!(r#"<getInfo xmlns="{}"></getInfo>"#, NS)));
    }
}
