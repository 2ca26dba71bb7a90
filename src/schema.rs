//! Type Directory: a read-only view over a service's type and operation graph.
//!
//! The graph is supplied out-of-band (usually produced from a service
//! description document) and deserialized into a [`ServiceSchema`]. The
//! [`TypeDirectory`] answers resolution, inheritance and cardinality
//! questions for the validator, the marshaler and the restorer.

use crate::error::{Result, SoapError};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Primitive wire types. Values of these types are plain text.
pub const BASE_TYPES: &[&str] = &[
    "long",
    "string",
    "dateTime",
    "float",
    "int",
    "boolean",
    "base64Binary",
    "double",
];

/// Generic SOAP-encoded array type name.
pub const ARRAY_TYPE: &str = "Array";

/// Bound on base-type chain walks, guarding against cyclic schemas.
const MAX_CHAIN_DEPTH: usize = 64;

/// Whether `type_name` is a primitive wire type.
pub fn is_base_type(type_name: &str) -> bool {
    BASE_TYPES.contains(&strip_prefix(type_name))
}

/// Drop an `ns:` prefix from a qualified type name.
pub fn strip_prefix(type_name: &str) -> &str {
    type_name.rsplit(':').next().unwrap_or(type_name)
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    Count(u32),
    Unbounded,
}

impl MaxOccurs {
    pub const ONE: MaxOccurs = MaxOccurs::Count(1);

    /// Any value other than exactly 1 means the native value is a list.
    pub fn is_repeated(&self) -> bool {
        !matches!(self, MaxOccurs::Count(1))
    }
}

impl Default for MaxOccurs {
    fn default() -> Self {
        Self::ONE
    }
}

impl FromStr for MaxOccurs {
    type Err = SoapError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(MaxOccurs::Unbounded);
        }
        s.parse::<u32>()
            .map(MaxOccurs::Count)
            .map_err(|_| SoapError::Schema(format!("Invalid maxOccurs value '{}'", s)))
    }
}

impl fmt::Display for MaxOccurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxOccurs::Count(n) => write!(f, "{}", n),
            MaxOccurs::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl Serialize for MaxOccurs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MaxOccurs::Count(n) => serializer.serialize_u32(*n),
            MaxOccurs::Unbounded => serializer.serialize_str("unbounded"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxOccurs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(MaxOccurs::Count(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Namespace-qualified type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    pub namespace: String,
    pub name: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// A field of a complex type, or an operation input/output part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, rename = "maxOccurs", alias = "max_occurs")]
    pub max_occurs: MaxOccurs,
}

impl FieldDescriptor {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        type_name: impl Into<String>,
        max_occurs: MaxOccurs,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            type_name: type_name.into(),
            max_occurs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    #[default]
    Complex,
    Simple,
}

/// Description of one schema type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeDescriptor {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub is_array: bool,
    pub is_abstract: bool,
    pub base: Option<QName>,
    /// Item type named by a SOAP-encoded array's `arrayType`
    pub array_item_type: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl Default for TypeDescriptor {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            name: String::new(),
            kind: TypeKind::Complex,
            is_array: false,
            is_abstract: false,
            base: None,
            array_item_type: None,
            fields: Vec::new(),
        }
    }
}

impl TypeDescriptor {
    pub fn complex(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn simple(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Simple,
            ..Self::complex(namespace, name)
        }
    }

    pub fn with_base(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.base = Some(QName::new(namespace, name));
        self
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn array_of(mut self, item_type: impl Into<String>) -> Self {
        self.is_array = true;
        self.array_item_type = Some(item_type.into());
        self
    }

    pub fn is_simple(&self) -> bool {
        self.kind == TypeKind::Simple
    }
}

/// A remote operation's signature.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationDescriptor {
    pub name: String,
    pub inputs: Vec<FieldDescriptor>,
    pub outputs: Vec<FieldDescriptor>,
}

/// Serialized form of a service's type/operation graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSchema {
    /// Target namespace of the service's operations
    pub namespace: String,
    pub types: Vec<TypeDescriptor>,
    pub operations: Vec<OperationDescriptor>,
}

impl ServiceSchema {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SoapError::Schema(format!("Invalid service schema: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// Read-only lookup structure over a [`ServiceSchema`].
#[derive(Debug, Clone, Default)]
pub struct TypeDirectory {
    namespace: String,
    types: HashMap<QName, TypeDescriptor>,
    operations: HashMap<String, OperationDescriptor>,
    operation_order: Vec<String>,
}

impl TypeDirectory {
    pub fn new(schema: ServiceSchema) -> Self {
        let mut directory = Self {
            namespace: schema.namespace,
            ..Default::default()
        };
        for descriptor in schema.types {
            directory.add_type(descriptor);
        }
        for operation in schema.operations {
            directory.add_operation(operation);
        }
        directory
    }

    pub fn add_type(&mut self, descriptor: TypeDescriptor) {
        let key = QName::new(descriptor.namespace.clone(), descriptor.name.clone());
        self.types.insert(key, descriptor);
    }

    pub fn add_operation(&mut self, operation: OperationDescriptor) {
        if !self.operations.contains_key(&operation.name) {
            self.operation_order.push(operation.name.clone());
        }
        self.operations.insert(operation.name.clone(), operation);
    }

    /// The service's default namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Every namespace declared by a type, default namespace first.
    pub fn namespaces(&self) -> Vec<&str> {
        let mut namespaces = vec![self.namespace.as_str()];
        let mut rest: Vec<&str> = self
            .types
            .keys()
            .map(|q| q.namespace.as_str())
            .filter(|ns| !ns.is_empty() && *ns != self.namespace)
            .collect();
        rest.sort_unstable();
        rest.dedup();
        namespaces.extend(rest);
        namespaces
    }

    /// Operation names in declaration order.
    pub fn operation_names(&self) -> &[String] {
        &self.operation_order
    }

    /// Look up an operation. Callers may use either the declared name or the
    /// same name with a lowercase first letter.
    pub fn operation(&self, name: &str) -> Result<&OperationDescriptor> {
        if let Some(op) = self.operations.get(name) {
            return Ok(op);
        }
        let mut chars = name.chars();
        let lowered = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        self.operations
            .get(&lowered)
            .ok_or_else(|| SoapError::Schema(format!("Unknown operation '{}'", name)))
    }

    /// Resolve a type. A missing type is a schema error.
    pub fn resolve(&self, namespace: &str, type_name: &str) -> Result<&TypeDescriptor> {
        self.lookup(namespace, type_name).ok_or_else(|| {
            SoapError::Schema(format!(
                "Type '{}' not found in namespace '{}'",
                type_name, namespace
            ))
        })
    }

    fn lookup(&self, namespace: &str, type_name: &str) -> Option<&TypeDescriptor> {
        let name = strip_prefix(type_name);
        self.types
            .get(&QName::new(namespace, name))
            .or_else(|| {
                // Types referenced from another namespace without qualification.
                self.types.values().find(|t| t.name == name)
            })
    }

    /// Whether the type is an array wrapper, directly or through its base chain.
    /// Unresolvable types are not arrays.
    pub fn is_array_type(&self, namespace: &str, type_name: &str) -> bool {
        let mut current = self.lookup(namespace, type_name);
        if strip_prefix(type_name) == ARRAY_TYPE {
            return true;
        }
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(descriptor) = current else {
                return false;
            };
            if descriptor.is_array || descriptor.name == ARRAY_TYPE {
                return true;
            }
            current = descriptor
                .base
                .as_ref()
                .and_then(|b| self.lookup(&b.namespace, &b.name));
        }
        false
    }

    /// Whether `sub` is `sup` or inherits from it. Never fails.
    pub fn is_subtype_of(&self, namespace: &str, sub: &str, sup: &str) -> bool {
        let target = strip_prefix(sup);
        if strip_prefix(sub) == target {
            return true;
        }
        let mut current = self.lookup(namespace, sub);
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(descriptor) = current else {
                return false;
            };
            let Some(base) = &descriptor.base else {
                return false;
            };
            if base.name == target {
                return true;
            }
            current = self.lookup(&base.namespace, &base.name);
        }
        false
    }

    /// Resolve a type together with its base chain, root first.
    fn chain(&self, namespace: &str, type_name: &str) -> Result<Vec<&TypeDescriptor>> {
        let mut chain = vec![self.resolve(namespace, type_name)?];
        while let Some(base) = chain.last().copied().and_then(|t| t.base.as_ref()) {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(SoapError::Schema(format!(
                    "Inheritance chain of '{}' is too deep or cyclic",
                    type_name
                )));
            }
            chain.push(self.resolve(&base.namespace, &base.name)?);
        }
        chain.reverse();
        Ok(chain)
    }

    /// All fields of a type, base-type fields first, in wire order.
    pub fn fields_of(&self, namespace: &str, type_name: &str) -> Result<Vec<&FieldDescriptor>> {
        Ok(self
            .chain(namespace, type_name)?
            .into_iter()
            .flat_map(|t| t.fields.iter())
            .collect())
    }

    /// Find a field of a type (including inherited fields).
    pub fn field(
        &self,
        namespace: &str,
        type_name: &str,
        field: &str,
    ) -> Result<&FieldDescriptor> {
        self.fields_of(namespace, type_name)?
            .into_iter()
            .find(|f| f.name == field)
            .ok_or_else(|| SoapError::UnknownField {
                field: field.to_string(),
                type_name: type_name.to_string(),
            })
    }

    /// Whether a type declares (or inherits) a field with this name.
    /// Unresolvable types have no fields.
    pub fn has_native_field(&self, namespace: &str, type_name: &str, field: &str) -> bool {
        self.fields_of(namespace, type_name)
            .map(|fields| fields.iter().any(|f| f.name == field))
            .unwrap_or(false)
    }

    /// Namespace of the type in the inheritance chain that declares `field`.
    pub fn field_namespace(&self, namespace: &str, type_name: &str, field: &str) -> Result<&str> {
        self.chain(namespace, type_name)?
            .into_iter()
            .find(|t| t.fields.iter().any(|f| f.name == field))
            .map(|t| t.namespace.as_str())
            .ok_or_else(|| SoapError::UnknownField {
                field: field.to_string(),
                type_name: type_name.to_string(),
            })
    }

    /// The key of a record carrying a declared subtype, if any.
    ///
    /// Recognized keys are `xsi_type`, `type` (only when the declared type has
    /// no native `type` field) and any key containing `.Type` or `_Type`.
    /// The first matching key in record order wins.
    pub fn declared_subtype_key<'v>(
        &self,
        namespace: &str,
        type_name: &str,
        record: &'v IndexMap<String, Value>,
    ) -> Option<&'v str> {
        record
            .keys()
            .find(|key| match key.as_str() {
                "xsi_type" => true,
                "type" => !self.has_native_field(namespace, type_name, "type"),
                k => k.contains(".Type") || k.contains("_Type"),
            })
            .map(String::as_str)
    }

    /// Item type of an array type: its `arrayType` when SOAP-encoded,
    /// else the type itself (repeated-element arrays).
    pub fn array_item_type(&self, namespace: &str, type_name: &str) -> String {
        let mut current = self.lookup(namespace, type_name);
        for _ in 0..MAX_CHAIN_DEPTH {
            let Some(descriptor) = current else {
                break;
            };
            if let Some(item) = &descriptor.array_item_type {
                return strip_prefix(item.trim_end_matches("[]")).to_string();
            }
            current = descriptor
                .base
                .as_ref()
                .and_then(|b| self.lookup(&b.namespace, &b.name));
        }
        strip_prefix(type_name).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "https://api.example.com/api/cm/v1";

    fn directory() -> TypeDirectory {
        let schema = ServiceSchema {
            namespace: NS.to_string(),
            types: vec![
                TypeDescriptor::complex(NS, "Operand")
                    .with_field(FieldDescriptor::new("id", NS, "long", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Campaign")
                    .with_base(NS, "Operand")
                    .with_field(FieldDescriptor::new("name", NS, "string", MaxOccurs::ONE))
                    .with_field(FieldDescriptor::new(
                        "labels",
                        NS,
                        "string",
                        MaxOccurs::Unbounded,
                    )),
                TypeDescriptor::complex(NS, "SearchCampaign")
                    .with_base(NS, "Campaign")
                    .with_field(FieldDescriptor::new("network", NS, "string", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Budget"),
                TypeDescriptor::complex(NS, "ArrayOfCampaign").array_of("Campaign[]"),
                TypeDescriptor::complex(NS, "CampaignList").with_base(NS, "ArrayOfCampaign"),
                TypeDescriptor::simple(NS, "Status"),
            ],
            operations: vec![OperationDescriptor {
                name: "getCampaigns".to_string(),
                inputs: vec![],
                outputs: vec![],
            }],
        };
        TypeDirectory::new(schema)
    }

    #[test]
    fn test_resolve() {
        let dir = directory();
        assert_eq!(dir.resolve(NS, "Campaign").unwrap().name, "Campaign");
        assert_eq!(dir.resolve(NS, "cm:Campaign").unwrap().name, "Campaign");
        assert!(matches!(
            dir.resolve(NS, "Missing"),
            Err(SoapError::Schema(_))
        ));
    }

    #[test]
    fn test_fields_of_puts_base_fields_first() {
        let dir = directory();
        let names: Vec<_> = dir
            .fields_of(NS, "SearchCampaign")
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "name", "labels", "network"]);
    }

    #[test]
    fn test_subtype_relation() {
        let dir = directory();
        assert!(dir.is_subtype_of(NS, "Campaign", "Campaign"));
        assert!(dir.is_subtype_of(NS, "SearchCampaign", "Operand"));
        assert!(!dir.is_subtype_of(NS, "Budget", "Campaign"));
        assert!(!dir.is_subtype_of(NS, "Unknown", "Campaign"));
        assert!(!dir.is_subtype_of(NS, "Operand", "Campaign"));
    }

    #[test]
    fn test_array_types() {
        let dir = directory();
        assert!(dir.is_array_type(NS, "ArrayOfCampaign"));
        assert!(dir.is_array_type(NS, "CampaignList"));
        assert!(dir.is_array_type(NS, "Array"));
        assert!(!dir.is_array_type(NS, "Campaign"));
        assert!(!dir.is_array_type(NS, "Missing"));
        assert_eq!(dir.array_item_type(NS, "ArrayOfCampaign"), "Campaign");
        assert_eq!(dir.array_item_type(NS, "CampaignList"), "Campaign");
        assert_eq!(dir.array_item_type(NS, "Campaign"), "Campaign");
    }

    #[test]
    fn test_field_namespace_walks_chain() {
        let dir = directory();
        assert_eq!(dir.field_namespace(NS, "SearchCampaign", "id").unwrap(), NS);
        assert!(matches!(
            dir.field_namespace(NS, "SearchCampaign", "bogus"),
            Err(SoapError::UnknownField { .. })
        ));
        assert!(dir.has_native_field(NS, "Campaign", "labels"));
        assert!(!dir.has_native_field(NS, "Campaign", "type"));
    }

    #[test]
    fn test_cyclic_chain_is_bounded() {
        let mut dir = directory();
        dir.add_type(TypeDescriptor::complex(NS, "A").with_base(NS, "B"));
        dir.add_type(TypeDescriptor::complex(NS, "B").with_base(NS, "A"));
        assert!(!dir.is_subtype_of(NS, "A", "Campaign"));
        assert!(!dir.is_array_type(NS, "A"));
        assert!(dir.fields_of(NS, "A").is_err());
    }

    #[test]
    fn test_declared_subtype_key() {
        let dir = directory();
        let record = |key: &str| {
            let mut map = IndexMap::new();
            map.insert("id".to_string(), Value::from("1"));
            map.insert(key.to_string(), Value::from("SearchCampaign"));
            map
        };
        assert_eq!(dir.declared_subtype_key(NS, "Campaign", &record("xsi_type")), Some("xsi_type"));
        assert_eq!(dir.declared_subtype_key(NS, "Campaign", &record("type")), Some("type"));
        assert_eq!(
            dir.declared_subtype_key(NS, "Campaign", &record("Campaign.Type")),
            Some("Campaign.Type")
        );
        assert_eq!(dir.declared_subtype_key(NS, "Campaign", &record("name")), None);

        let mut typed = directory();
        typed.add_type(
            TypeDescriptor::complex(NS, "Criterion")
                .with_field(FieldDescriptor::new("type", NS, "string", MaxOccurs::ONE)),
        );
        assert_eq!(typed.declared_subtype_key(NS, "Criterion", &record("type")), None);
    }

    #[test]
    fn test_operation_lookup() {
        let dir = directory();
        assert!(dir.operation("getCampaigns").is_ok());
        assert!(dir.operation("GetCampaigns").is_ok());
        assert!(dir.operation("mutate").is_err());
    }

    #[test]
    fn test_max_occurs() {
        assert!(!MaxOccurs::ONE.is_repeated());
        assert!(MaxOccurs::Unbounded.is_repeated());
        assert!(MaxOccurs::Count(0).is_repeated());
        assert!(MaxOccurs::Count(5).is_repeated());
        assert_eq!("unbounded".parse::<MaxOccurs>().unwrap(), MaxOccurs::Unbounded);
        assert!("many".parse::<MaxOccurs>().is_err());
    }

    #[test]
    fn test_schema_from_yaml() {
        let yaml = r#"
namespace: "https://api.example.com/api/cm/v1"
types:
  - namespace: "https://api.example.com/api/cm/v1"
    name: Selector
    fields:
      - { name: fields, type: string, maxOccurs: unbounded }
      - { name: limit, type: int, maxOccurs: 1 }
operations:
  - name: get
    inputs:
      - { name: selector, type: Selector }
"#;
        let dir = TypeDirectory::new(ServiceSchema::from_yaml(yaml).unwrap());
        let fields = dir.fields_of(NS, "Selector").unwrap();
        assert_eq!(fields[0].max_occurs, MaxOccurs::Unbounded);
        assert_eq!(fields[1].max_occurs, MaxOccurs::ONE);
        let op = dir.operation("get").unwrap();
        assert_eq!(op.inputs[0].max_occurs, MaxOccurs::ONE);
        assert_eq!(dir.namespaces(), vec![NS]);
    }
}
