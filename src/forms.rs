//! Form, sub-form and field definitions.
//!
//! These records are authored elsewhere (the form-builder subsystem) and are
//! read-only inputs to this crate, except for `table_name`, which the schema
//! manager writes back once a dynamic table has been resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-authored form. `title` may be Thai or English.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDefinition {
    pub id: String,
    pub title: String,
    /// Main-form and sub-form fields together; ownership is per field.
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub sub_forms: Vec<SubFormDefinition>,
    /// Resolved dynamic table name; `None` until the first publish.
    #[serde(default)]
    pub table_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FormDefinition {
    /// Fields owned by the main form (sub-form fields are excluded).
    pub fn main_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.sub_form_id.is_none())
    }

    /// Fields owned by one sub-form.
    pub fn sub_form_fields<'a>(
        &'a self,
        sub_form_id: &'a str,
    ) -> impl Iterator<Item = &'a FieldDefinition> {
        self.fields
            .iter()
            .filter(move |f| f.sub_form_id.as_deref() == Some(sub_form_id))
    }
}

/// A repeating section of a form. Its dynamic table rows reference the
/// parent form's submission id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubFormDefinition {
    pub id: String,
    pub form_id: String,
    pub title: String,
    #[serde(default)]
    pub table_name: Option<String>,
}

/// A single question on a form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    pub position: u32,
    /// `Some(sub_form_id)` when the field belongs to a sub-form, `None` for
    /// the main form. The two scopes are mutually exclusive.
    #[serde(default)]
    pub sub_form_id: Option<String>,
}

/// The fixed semantic type enumeration for fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    ShortText,
    LongText,
    Email,
    Phone,
    Url,
    Number,
    Date,
    Time,
    Datetime,
    SingleChoice,
    MultiChoice,
    FileRef,
    ImageRef,
    Rating,
    Slider,
    GeoPoint,
    Region,
    Facility,
}

impl FieldKind {
    /// The PostgreSQL column type used for this semantic type.
    pub fn storage_type(self) -> &'static str {
        match self {
            FieldKind::ShortText
            | FieldKind::Email
            | FieldKind::Phone
            | FieldKind::Url
            | FieldKind::SingleChoice
            | FieldKind::Region
            | FieldKind::Facility => "varchar(255)",
            FieldKind::LongText
            | FieldKind::MultiChoice
            | FieldKind::FileRef
            | FieldKind::ImageRef => "text",
            FieldKind::Number => "numeric",
            FieldKind::Rating => "integer",
            FieldKind::Slider => "double precision",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Datetime => "timestamptz",
            FieldKind::GeoPoint => "point",
        }
    }

    /// Stable lowercase name, matching the serde wire form.
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::ShortText => "short-text",
            FieldKind::LongText => "long-text",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Url => "url",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Datetime => "datetime",
            FieldKind::SingleChoice => "single-choice",
            FieldKind::MultiChoice => "multi-choice",
            FieldKind::FileRef => "file-ref",
            FieldKind::ImageRef => "image-ref",
            FieldKind::Rating => "rating",
            FieldKind::Slider => "slider",
            FieldKind::GeoPoint => "geo-point",
            FieldKind::Region => "region",
            FieldKind::Facility => "facility",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str, label: &str, kind: FieldKind, sub: Option<&str>) -> FieldDefinition {
        FieldDefinition {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            required: false,
            position: 0,
            sub_form_id: sub.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_main_fields_excludes_sub_form_scope() {
        let form = FormDefinition {
            id: "form-1".to_string(),
            title: "แบบฟอร์มติดต่อ".to_string(),
            fields: vec![
                field("f-1", "ชื่อ", FieldKind::ShortText, None),
                field("f-2", "รายการ", FieldKind::ShortText, Some("sub-1")),
            ],
            sub_forms: vec![],
            table_name: None,
            created_at: Utc::now(),
        };

        let main: Vec<_> = form.main_fields().map(|f| f.id.as_str()).collect();
        assert_eq!(main, vec!["f-1"]);

        let sub: Vec<_> = form.sub_form_fields("sub-1").map(|f| f.id.as_str()).collect();
        assert_eq!(sub, vec!["f-2"]);
    }

    #[test]
    fn test_field_kind_serde_is_kebab_case() {
        let json = serde_json::to_string(&FieldKind::GeoPoint).unwrap();
        assert_eq!(json, "\"geo-point\"");

        let kind: FieldKind = serde_json::from_str("\"multi-choice\"").unwrap();
        assert_eq!(kind, FieldKind::MultiChoice);
    }

    #[test]
    fn test_field_kind_name_matches_wire_form() {
        for kind in [
            FieldKind::ShortText,
            FieldKind::Datetime,
            FieldKind::GeoPoint,
            FieldKind::SingleChoice,
        ] {
            let wire: String = serde_json::to_string(&kind).unwrap();
            assert_eq!(wire.trim_matches('"'), kind.name());
        }
    }

    #[test]
    fn test_storage_types_are_postgres_types() {
        assert_eq!(FieldKind::ShortText.storage_type(), "varchar(255)");
        assert_eq!(FieldKind::GeoPoint.storage_type(), "point");
        assert_eq!(FieldKind::Datetime.storage_type(), "timestamptz");
        assert_eq!(FieldKind::Number.storage_type(), "numeric");
    }

    #[test]
    fn test_form_definition_deserializes_with_defaults() {
        let json = r#"{
            "id": "form-9",
            "title": "แบบสำรวจ",
            "fields": [
                {"id": "f-1", "label": "ชื่อ", "kind": "short-text", "position": 1}
            ],
            "created_at": "2025-06-01T00:00:00Z"
        }"#;

        let form: FormDefinition = serde_json::from_str(json).unwrap();
        assert!(form.table_name.is_none());
        assert!(form.sub_forms.is_empty());
        assert!(!form.fields[0].required);
    }
}
