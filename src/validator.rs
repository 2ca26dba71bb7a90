//! Local schema validation of native values before transmission.

use crate::error::{Result, SoapError};
use crate::schema::{is_base_type, MaxOccurs, TypeDirectory};
use crate::value::Value;
use tracing::trace;

/// Checks native values against the type directory.
///
/// Validation is a pure check: failures are reported, never corrected.
pub struct SchemaValidator<'a> {
    directory: &'a TypeDirectory,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(directory: &'a TypeDirectory) -> Self {
        Self { directory }
    }

    /// Validate `value` against `(namespace, type_name)` with the given
    /// cardinality.
    pub fn validate(
        &self,
        value: &Value,
        namespace: &str,
        type_name: &str,
        max_occurs: &MaxOccurs,
    ) -> Result<()> {
        // Absent values are valid for any type.
        if value.is_null() || value.as_str() == Some("") {
            return Ok(());
        }

        if max_occurs.is_repeated() {
            let items = value.as_list().ok_or_else(|| {
                SoapError::violation(format!(
                    "Value for repeated '{}' must be a list, got {}",
                    type_name,
                    value.kind()
                ))
            })?;
            for item in items.iter().filter(|item| !item.is_null()) {
                self.validate(item, namespace, type_name, &MaxOccurs::ONE)?;
            }
            return Ok(());
        }

        if is_base_type(type_name) {
            return expect_scalar(value, type_name);
        }

        let descriptor = self.directory.resolve(namespace, type_name)?;
        if descriptor.is_simple() {
            return expect_scalar(value, type_name);
        }

        if self.directory.is_array_type(namespace, type_name) {
            return self.validate_array(value, namespace, type_name);
        }

        self.validate_record(value, namespace, type_name)
    }

    fn validate_array(&self, value: &Value, namespace: &str, type_name: &str) -> Result<()> {
        let items = value.as_list().ok_or_else(|| {
            SoapError::violation(format!(
                "Value for array type '{}' must be a list, got {}",
                type_name,
                value.kind()
            ))
        })?;

        let item_type = self.directory.array_item_type(namespace, type_name);
        for item in items.iter().filter(|item| !item.is_null()) {
            if is_base_type(&item_type) {
                expect_scalar(item, &item_type)?;
            } else {
                self.validate(item, namespace, &item_type, &MaxOccurs::ONE)?;
            }
        }
        Ok(())
    }

    fn validate_record(&self, value: &Value, namespace: &str, type_name: &str) -> Result<()> {
        let record = value.as_record().ok_or_else(|| {
            SoapError::violation(format!(
                "Value for type '{}' must be a record, got {}",
                type_name,
                value.kind()
            ))
        })?;

        let subtype_key = self
            .directory
            .declared_subtype_key(namespace, type_name, record);

        let mut effective = type_name.to_string();
        if let Some(key) = subtype_key {
            let subtype = record.get(key).and_then(Value::as_str).ok_or_else(|| {
                SoapError::violation(format!(
                    "Declared subtype '{}' of '{}' must be a string",
                    key, type_name
                ))
            })?;
            if subtype != type_name {
                if self.directory.resolve(namespace, subtype).is_err() {
                    return Err(SoapError::violation(format!(
                        "Declared subtype '{}' is not defined in namespace '{}'",
                        subtype, namespace
                    )));
                }
                if !self.directory.is_subtype_of(namespace, subtype, type_name) {
                    return Err(SoapError::violation(format!(
                        "Expecting type of '{}' or its subtype, got '{}'",
                        type_name, subtype
                    )));
                }
                trace!(declared = type_name, subtype = subtype, "Using declared subtype");
                effective = subtype.to_string();
            }
        }

        for (key, field_value) in record {
            if Some(key.as_str()) == subtype_key {
                continue;
            }
            let field = self.directory.field(namespace, &effective, key)?;
            let field_ns = if field.namespace.is_empty() {
                namespace
            } else {
                field.namespace.as_str()
            };
            self.validate(field_value, field_ns, &field.type_name, &field.max_occurs)?;
        }
        Ok(())
    }
}

fn expect_scalar(value: &Value, type_name: &str) -> Result<()> {
    match value {
        Value::Text(_) | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Raw(_) => {
            Ok(())
        }
        other => Err(SoapError::violation(format!(
            "Value for type '{}' must be a scalar, got {}",
            type_name,
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, ServiceSchema, TypeDescriptor};

    const NS: &str = "https://api.example.com/api/cm/v1";

    fn directory() -> TypeDirectory {
        TypeDirectory::new(ServiceSchema {
            namespace: NS.to_string(),
            types: vec![
                TypeDescriptor::complex(NS, "Criterion")
                    .with_field(FieldDescriptor::new("id", NS, "long", MaxOccurs::ONE))
                    .with_field(FieldDescriptor::new(
                        "Criterion.Type",
                        NS,
                        "string",
                        MaxOccurs::ONE,
                    )),
                TypeDescriptor::complex(NS, "Keyword")
                    .with_base(NS, "Criterion")
                    .with_field(FieldDescriptor::new("text", NS, "string", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Placement")
                    .with_base(NS, "Criterion")
                    .with_field(FieldDescriptor::new("url", NS, "string", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Budget")
                    .with_field(FieldDescriptor::new("amount", NS, "long", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "Selector")
                    .with_field(FieldDescriptor::new(
                        "fields",
                        NS,
                        "string",
                        MaxOccurs::Unbounded,
                    ))
                    .with_field(FieldDescriptor::new(
                        "criteria",
                        NS,
                        "Criterion",
                        MaxOccurs::Unbounded,
                    ))
                    .with_field(FieldDescriptor::new("ids", NS, "ArrayOfLong", MaxOccurs::ONE)),
                TypeDescriptor::complex(NS, "ArrayOfLong").array_of("long[]"),
                TypeDescriptor::simple(NS, "Status"),
            ],
            operations: vec![],
        })
    }

    fn check(value: &Value, type_name: &str) -> Result<()> {
        let dir = directory();
        SchemaValidator::new(&dir).validate(value, NS, type_name, &MaxOccurs::ONE)
    }

    // --- Absent values ---

    #[test]
    fn test_absent_values_are_valid() {
        assert!(check(&Value::Null, "Selector").is_ok());
        assert!(check(&Value::from(""), "Missing").is_ok());
    }

    // --- Scalars ---

    #[test]
    fn test_base_type_requires_scalar() {
        assert!(check(&Value::from("42"), "long").is_ok());
        assert!(check(&Value::Int(42), "long").is_ok());
        let err = check(&Value::list(["1"]), "string").unwrap_err();
        assert!(matches!(err, SoapError::SchemaViolation(_)));
    }

    #[test]
    fn test_simple_type_requires_scalar() {
        assert!(check(&Value::from("ACTIVE"), "Status").is_ok());
        assert!(check(&Value::record([("a", Value::from("b"))]), "Status").is_err());
    }

    #[test]
    fn test_unresolvable_type_is_schema_error() {
        let err = check(&Value::record([("a", Value::from("b"))]), "Missing").unwrap_err();
        assert!(matches!(err, SoapError::Schema(_)));
    }

    // --- Lists ---

    #[test]
    fn test_repeated_field_requires_list() {
        let ok = Value::record([("fields", Value::list(["Id", "Name"]))]);
        assert!(check(&ok, "Selector").is_ok());

        let bad = Value::record([("fields", Value::from("Id"))]);
        assert!(matches!(
            check(&bad, "Selector"),
            Err(SoapError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_top_level_repeated_base_type() {
        let dir = directory();
        let validator = SchemaValidator::new(&dir);
        assert!(validator
            .validate(&Value::list(["a", "b"]), NS, "string", &MaxOccurs::Unbounded)
            .is_ok());
        assert!(validator
            .validate(&Value::from("a"), NS, "string", &MaxOccurs::Unbounded)
            .is_err());
    }

    #[test]
    fn test_array_type_items() {
        let ok = Value::record([("ids", Value::list(["1", "2"]))]);
        assert!(check(&ok, "Selector").is_ok());

        let nested = Value::record([(
            "ids",
            Value::List(vec![Value::list(["1"])]),
        )]);
        assert!(check(&nested, "Selector").is_err());
    }

    #[test]
    fn test_null_list_items_are_skipped() {
        let value = Value::record([(
            "criteria",
            Value::List(vec![Value::Null, Value::record([("id", Value::from("1"))])]),
        )]);
        assert!(check(&value, "Selector").is_ok());
    }

    // --- Records ---

    #[test]
    fn test_unknown_field() {
        let value = Value::record([("amount", Value::from("1")), ("bogus", Value::from("x"))]);
        let err = check(&value, "Budget").unwrap_err();
        match err {
            SoapError::UnknownField { field, type_name } => {
                assert_eq!(field, "bogus");
                assert_eq!(type_name, "Budget");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_declared_subtype_enables_subtype_fields() {
        let value = Value::record([
            ("xsi_type", Value::from("Keyword")),
            ("text", Value::from("shoes")),
        ]);
        assert!(check(&value, "Criterion").is_ok());

        let without = Value::record([("text", Value::from("shoes"))]);
        assert!(matches!(
            check(&without, "Criterion"),
            Err(SoapError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_unrelated_declared_subtype() {
        let value = Value::record([("xsi_type", Value::from("Budget"))]);
        let err = check(&value, "Criterion").unwrap_err();
        assert!(matches!(err, SoapError::SchemaViolation(_)));
        assert!(err.to_string().contains("Budget"));
    }

    #[test]
    fn test_undefined_declared_subtype() {
        let value = Value::record([("xsi_type", Value::from("Nope"))]);
        assert!(matches!(
            check(&value, "Criterion"),
            Err(SoapError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_dot_type_key_is_declared_subtype() {
        let value = Value::record([
            ("Criterion.Type", Value::from("Placement")),
            ("url", Value::from("example.com")),
        ]);
        assert!(check(&value, "Criterion").is_ok());
    }

    #[test]
    fn test_record_expected() {
        assert!(matches!(
            check(&Value::from("x"), "Budget"),
            Err(SoapError::SchemaViolation(_))
        ));
    }
}
