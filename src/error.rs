use std::time::Duration;
use thiserror::Error;

/// Errors produced by the translation tiers and the schema manager.
///
/// Translation-tier variants are recovered locally by falling through to the
/// next tier; schema-level variants surface to the caller because they need a
/// human decision (rename a field, retry later).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("translation request timed out after {0:?}")]
    TranslationTimeout(Duration),

    #[error("translation service is rate limited, cooling down for {retry_after:?}")]
    TranslationRateLimited { retry_after: Duration },

    #[error("translation match score {score} is below the quality floor {floor}")]
    TranslationQualityTooLow { score: f32, floor: f32 },

    #[error("translation result {0:?} looks like a transliteration, not a translation")]
    TransliterationRejected(String),

    #[error("{0:?} is not a valid table or column identifier")]
    InvalidIdentifier(String),

    #[error("field {field:?} resolves to column {column:?}, which already exists in table {table:?}; rename the field")]
    DuplicateColumnName {
        table: String,
        field: String,
        column: String,
    },

    #[error("table name {0:?} is already claimed by another form")]
    DuplicateTableName(String),

    #[error("table {0:?} does not exist")]
    TableNotFound(String),

    #[error("schema migration failed: {0}")]
    SchemaMigrationFailed(String),

    #[error("value for field {field:?} cannot be stored as {kind}: {reason}")]
    ValueCoercion {
        field: String,
        kind: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to write mapping file: {0}")]
    MappingFile(#[from] std::io::Error),
}

impl SchemaError {
    /// Whether this error belongs to the translation tiers (recoverable by
    /// falling through to the next tier) rather than the schema layer.
    pub fn is_translation_failure(&self) -> bool {
        matches!(
            self,
            SchemaError::TranslationTimeout(_)
                | SchemaError::TranslationRateLimited { .. }
                | SchemaError::TranslationQualityTooLow { .. }
                | SchemaError::TransliterationRejected(_)
                | SchemaError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_message_names_field_and_column() {
        let err = SchemaError::DuplicateColumnName {
            table: "contact_form".to_string(),
            field: "f-2".to_string(),
            column: "phone_number".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("f-2"));
        assert!(msg.contains("phone_number"));
        assert!(msg.contains("contact_form"));
    }

    #[test]
    fn test_quality_floor_message() {
        let err = SchemaError::TranslationQualityTooLow {
            score: 0.3,
            floor: 0.5,
        };
        assert!(err.to_string().contains("0.3"));
        assert!(err.to_string().contains("0.5"));
    }

    #[test]
    fn test_translation_failures_are_recoverable() {
        assert!(SchemaError::TranslationTimeout(Duration::from_secs(5)).is_translation_failure());
        assert!(SchemaError::TranslationRateLimited {
            retry_after: Duration::from_secs(60)
        }
        .is_translation_failure());
        assert!(
            SchemaError::TransliterationRejected("baep fom tit to".to_string())
                .is_translation_failure()
        );
    }

    #[test]
    fn test_schema_failures_are_not_recoverable() {
        assert!(!SchemaError::DuplicateTableName("contact_form".to_string())
            .is_translation_failure());
        assert!(!SchemaError::TableNotFound("missing".to_string()).is_translation_failure());
        assert!(
            !SchemaError::SchemaMigrationFailed("copy step failed".to_string())
                .is_translation_failure()
        );
    }
}
