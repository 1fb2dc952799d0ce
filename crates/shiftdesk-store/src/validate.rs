//! Shape validation for candidate snapshots.
//!
//! Every snapshot passes through here before it is accepted into the cache or
//! sent to the store, so this is the only place that identifies bad data. A
//! failure is logged with the record index, id and field and returned as a
//! [`ValidationError`]; nothing here panics.

use serde_json::Value;
use tracing::warn;

use crate::records::DEFAULT_COUNTRIES;
use crate::{RecordField, Snapshot, ValidationError};

/// Checks snapshots against the shift table shape contract.
#[derive(Debug, Clone)]
pub struct Validator {
    countries: Vec<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRIES.iter().copied())
    }
}

impl Validator {
    /// Create a validator that recognizes the given countries.
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
        }
    }

    /// The recognized country tags.
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    fn recognizes(&self, country: &str) -> bool {
        self.countries.iter().any(|c| c == country)
    }

    /// Check a snapshot-shaped JSON value.
    pub fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let result = self.check_value(value);
        if let Err(ref e) = result {
            report(e);
        }
        result
    }

    /// Check a snapshot-shaped JSON value, returning only whether it passed.
    pub fn validate(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }

    /// Validate and decode a JSON value into a [`Snapshot`].
    pub fn parse(&self, value: Value) -> Result<Snapshot, ValidationError> {
        self.check(&value)?;
        serde_json::from_value(value).map_err(|e| {
            let error = ValidationError::Decode(e.to_string());
            report(&error);
            error
        })
    }

    /// Check an already-typed snapshot.
    pub fn check_snapshot(&self, snapshot: &Snapshot) -> Result<(), ValidationError> {
        for (index, table) in snapshot.tables.iter().enumerate() {
            let field = if table.id.is_empty() {
                Some(RecordField::Id)
            } else if !self.recognizes(&table.country) {
                Some(RecordField::Country)
            } else if table.date.is_empty() {
                Some(RecordField::Date)
            } else {
                None
            };

            if let Some(field) = field {
                let error = ValidationError::InvalidRecord {
                    index,
                    id: Some(table.id.clone()).filter(|id| !id.is_empty()),
                    field,
                };
                report(&error);
                return Err(error);
            }
        }
        Ok(())
    }

    fn check_value(&self, value: &Value) -> Result<(), ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;
        let tables = object
            .get("tables")
            .and_then(Value::as_array)
            .ok_or(ValidationError::TablesNotArray)?;

        for (index, table) in tables.iter().enumerate() {
            let id = table
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty());
            let invalid = |field| ValidationError::InvalidRecord {
                index,
                id: id.map(String::from),
                field,
            };

            if !table.is_object() {
                return Err(invalid(RecordField::Record));
            }
            if id.is_none() {
                return Err(invalid(RecordField::Id));
            }
            let country_ok = table
                .get("country")
                .and_then(Value::as_str)
                .is_some_and(|c| self.recognizes(c));
            if !country_ok {
                return Err(invalid(RecordField::Country));
            }
            let date_ok = table
                .get("date")
                .and_then(Value::as_str)
                .is_some_and(|d| !d.is_empty());
            if !date_ok {
                return Err(invalid(RecordField::Date));
            }
            if !table.get("agents").is_some_and(Value::is_array) {
                return Err(invalid(RecordField::Agents));
            }
        }

        Ok(())
    }
}

fn report(error: &ValidationError) {
    match error {
        ValidationError::InvalidRecord { index, id, field } => {
            warn!(index, record_id = ?id, field = %field, "invalid shift table");
        }
        other => warn!(error = %other, "invalid snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn table(id: &str) -> Value {
        json!({
            "id": id,
            "country": "Egypt",
            "date": "2024-05-01",
            "agents": [],
            "shiftType": "Morning"
        })
    }

    #[test]
    fn test_well_formed_snapshot_passes() {
        let validator = Validator::default();
        let value = json!({ "tables": [table("a"), table("b")] });
        assert!(validator.validate(&value));
    }

    #[test]
    fn test_empty_tables_pass() {
        assert!(Validator::default().validate(&json!({ "tables": [] })));
    }

    #[test_case(json!(null), ValidationError::NotAnObject ; "null")]
    #[test_case(json!([1, 2]), ValidationError::NotAnObject ; "array")]
    #[test_case(json!({}), ValidationError::TablesNotArray ; "missing tables")]
    #[test_case(json!({ "tables": {} }), ValidationError::TablesNotArray ; "tables object")]
    fn test_bad_container(value: Value, expected: ValidationError) {
        assert_eq!(Validator::default().check(&value), Err(expected));
    }

    #[test_case("id", json!(null), RecordField::Id ; "null id")]
    #[test_case("id", json!(""), RecordField::Id ; "empty id")]
    #[test_case("id", json!(7), RecordField::Id ; "numeric id")]
    #[test_case("country", json!("France"), RecordField::Country ; "unknown country")]
    #[test_case("date", json!(""), RecordField::Date ; "empty date")]
    #[test_case("agents", json!("Sara"), RecordField::Agents ; "agents string")]
    #[test_case("agents", json!(null), RecordField::Agents ; "agents null")]
    fn test_bad_record_field(key: &str, bad: Value, expected: RecordField) {
        let mut broken = table("x");
        broken[key] = bad;
        let value = json!({ "tables": [table("ok"), broken] });

        match Validator::default().check(&value) {
            Err(ValidationError::InvalidRecord { index, field, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(field, expected);
            }
            other => panic!("expected record error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_record() {
        let value = json!({ "tables": ["nope"] });
        assert!(matches!(
            Validator::default().check(&value),
            Err(ValidationError::InvalidRecord {
                field: RecordField::Record,
                ..
            })
        ));
    }

    #[test]
    fn test_custom_countries() {
        let validator = Validator::new(["Kenya"]);
        let mut t = table("a");
        t["country"] = json!("Kenya");
        assert!(validator.validate(&json!({ "tables": [t] })));
        assert!(!validator.validate(&json!({ "tables": [table("b")] })));
    }

    #[test]
    fn test_parse_rejects_mistyped_envelope() {
        let mut t = table("a");
        t["lastModified"] = json!("yesterday");
        let result = Validator::default().parse(json!({ "tables": [t] }));
        assert!(matches!(result, Err(ValidationError::Decode(_))));
    }

    #[test]
    fn test_parse_keeps_payload() {
        let snapshot = Validator::default()
            .parse(json!({ "tables": [table("a")] }))
            .unwrap();
        assert_eq!(snapshot.tables[0].payload["shiftType"], "Morning");
    }

    #[test]
    fn test_check_snapshot() {
        let validator = Validator::default();
        let mut snapshot = validator.parse(json!({ "tables": [table("a")] })).unwrap();
        assert!(validator.check_snapshot(&snapshot).is_ok());

        snapshot.tables[0].country = "Atlantis".into();
        assert!(matches!(
            validator.check_snapshot(&snapshot),
            Err(ValidationError::InvalidRecord {
                field: RecordField::Country,
                ..
            })
        ));
    }
}
