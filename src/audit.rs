//! Consistency auditor.
//!
//! Compares the EAV submission store against each form's denormalized table
//! and repairs drift: duplicate table names, missing tables, missing rows,
//! orphan rows. Discrepancies are the auditor's normal output and never an
//! error; failures while attempting a repair do propagate. Every repair
//! logs its before/after counts.

use crate::eav::EavStore;
use crate::error::SchemaError;
use crate::forms::FormDefinition;
use crate::ident;
use crate::rows;
use crate::schema::{quote_ident, SchemaManager};
use serde::Serialize;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Whether a run may mutate the database or only report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    ReportOnly,
    Repair,
}

/// One inconsistency between the EAV store and a dynamic table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Discrepancy {
    DuplicateTableName {
        table: String,
        kept_form: String,
        conflicting_forms: Vec<String>,
    },
    MissingTable {
        form_id: String,
        table: String,
    },
    RowCountMismatch {
        form_id: String,
        table: String,
        eav_count: i64,
        table_count: i64,
    },
    OrphanRows {
        form_id: String,
        table: String,
        count: i64,
    },
}

/// One repair the auditor applied.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum RepairAction {
    ReassignedTableName {
        form_id: String,
        old_table: String,
        new_table: String,
    },
    CreatedTable {
        form_id: String,
        table: String,
    },
    BackfilledRows {
        form_id: String,
        table: String,
        before: i64,
        after: i64,
    },
    DeletedOrphans {
        form_id: String,
        table: String,
        before: i64,
        after: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub forms_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub repairs: Vec<RepairAction>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

pub struct ConsistencyAuditor {
    schema: Arc<SchemaManager>,
    eav: EavStore,
}

impl ConsistencyAuditor {
    pub fn new(schema: Arc<SchemaManager>, eav: EavStore) -> Self {
        Self { schema, eav }
    }

    /// Audit every form, repairing as allowed by `mode`. Repairs run in
    /// order: resolve duplicate table names, create missing tables,
    /// backfill missing rows, delete orphan rows.
    pub async fn run(
        &self,
        forms: &mut [FormDefinition],
        mode: RepairMode,
    ) -> Result<AuditReport, SchemaError> {
        let mut report = AuditReport {
            forms_checked: forms.len(),
            discrepancies: Vec::new(),
            repairs: Vec::new(),
        };

        self.check_duplicate_names(forms, mode, &mut report).await?;

        for form in forms.iter_mut() {
            self.check_form(form, mode, &mut report).await?;
        }

        if report.is_clean() {
            info!("audit clean: {} forms checked", report.forms_checked);
        } else {
            info!(
                "audit found {} discrepancies across {} forms ({} repairs applied)",
                report.discrepancies.len(),
                report.forms_checked,
                report.repairs.len()
            );
        }
        Ok(report)
    }

    /// No two forms may share a resolved table name. The oldest form keeps
    /// the name; the others get a fresh hash-suffixed name and their table
    /// is re-created and backfilled by the later steps.
    async fn check_duplicate_names(
        &self,
        forms: &mut [FormDefinition],
        mode: RepairMode,
        report: &mut AuditReport,
    ) -> Result<(), SchemaError> {
        for (table, mut indices) in duplicate_table_groups(forms) {
            indices.sort_by_key(|&i| forms[i].created_at);
            let kept = indices[0];
            let conflicting: Vec<String> =
                indices[1..].iter().map(|&i| forms[i].id.clone()).collect();

            warn!(
                "table {:?} is claimed by {} forms, keeping oldest ({})",
                table,
                indices.len(),
                forms[kept].id
            );
            report.discrepancies.push(Discrepancy::DuplicateTableName {
                table: table.clone(),
                kept_form: forms[kept].id.clone(),
                conflicting_forms: conflicting,
            });

            if mode == RepairMode::Repair {
                for &i in &indices[1..] {
                    let fresh = fresh_table_name(&table, &forms[i].id);
                    info!(
                        "reassigning form {} from table {:?} to {:?}",
                        forms[i].id, table, fresh
                    );
                    report.repairs.push(RepairAction::ReassignedTableName {
                        form_id: forms[i].id.clone(),
                        old_table: table.clone(),
                        new_table: fresh.clone(),
                    });
                    forms[i].table_name = Some(fresh);
                }
            }
        }
        Ok(())
    }

    async fn check_form(
        &self,
        form: &mut FormDefinition,
        mode: RepairMode,
        report: &mut AuditReport,
    ) -> Result<(), SchemaError> {
        let table_missing = match &form.table_name {
            None => true,
            Some(table) => !self.schema.table_exists(table).await?,
        };

        if table_missing {
            let table = form
                .table_name
                .clone()
                .unwrap_or_else(|| "(unresolved)".to_string());
            warn!("form {} has no live table ({})", form.id, table);
            report.discrepancies.push(Discrepancy::MissingTable {
                form_id: form.id.clone(),
                table,
            });

            if mode != RepairMode::Repair {
                return Ok(());
            }
            let mapping = self.schema.create_or_update_form_table(form).await?;
            report.repairs.push(RepairAction::CreatedTable {
                form_id: form.id.clone(),
                table: mapping.table_name.clone(),
            });
        }

        let Some(table) = form.table_name.clone() else {
            return Ok(());
        };

        let eav_ids = self.eav.submission_ids(&form.id).await?;
        let table_ids = self.table_row_ids(&table).await?;
        let eav_count = eav_ids.len() as i64;
        let table_count = table_ids.len() as i64;

        if eav_count != table_count {
            warn!(
                "form {}: EAV has {} submissions, table {:?} has {} rows",
                form.id, eav_count, table, table_count
            );
            report.discrepancies.push(Discrepancy::RowCountMismatch {
                form_id: form.id.clone(),
                table: table.clone(),
                eav_count,
                table_count,
            });
        }

        let missing: HashSet<String> = eav_ids.difference(&table_ids).cloned().collect();
        let orphans: Vec<String> = table_ids.difference(&eav_ids).cloned().collect();

        if !orphans.is_empty() {
            report.discrepancies.push(Discrepancy::OrphanRows {
                form_id: form.id.clone(),
                table: table.clone(),
                count: orphans.len() as i64,
            });
        }

        if mode != RepairMode::Repair {
            return Ok(());
        }

        if !missing.is_empty() {
            // The mapping also extends the table with any columns added
            // since the rows went missing.
            let mapping = self.schema.create_or_update_form_table(form).await?;

            let before = table_count;
            for submission in self.eav.submissions_for_form(&form.id).await? {
                if !missing.contains(&submission.id) {
                    continue;
                }
                rows::insert_main_form_row(
                    self.schema.pool(),
                    &mapping,
                    &submission.id,
                    submission.submitted_by.as_deref(),
                    &submission.values,
                )
                .await?;
            }
            let after = self.table_row_count(&table).await?;
            info!(
                "backfilled {:?} for form {}: {} -> {} rows",
                table, form.id, before, after
            );
            report.repairs.push(RepairAction::BackfilledRows {
                form_id: form.id.clone(),
                table: table.clone(),
                before,
                after,
            });
        }

        if !orphans.is_empty() {
            let before = self.table_row_count(&table).await?;
            sqlx::query(&format!(
                "DELETE FROM {} WHERE id = ANY($1)",
                quote_ident(&table)
            ))
            .bind(&orphans)
            .execute(self.schema.pool())
            .await?;
            let after = self.table_row_count(&table).await?;
            info!(
                "deleted {} orphan rows from {:?} for form {}: {} -> {} rows",
                orphans.len(),
                table,
                form.id,
                before,
                after
            );
            report.repairs.push(RepairAction::DeletedOrphans {
                form_id: form.id.clone(),
                table,
                before,
                after,
            });
        }

        Ok(())
    }

    async fn table_row_ids(&self, table: &str) -> Result<HashSet<String>, SchemaError> {
        if !ident::is_valid_identifier(table) {
            return Err(SchemaError::InvalidIdentifier(table.to_string()));
        }
        let rows = sqlx::query(&format!("SELECT id FROM {}", quote_ident(table)))
            .fetch_all(self.schema.pool())
            .await?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    async fn table_row_count(&self, table: &str) -> Result<i64, SchemaError> {
        if !ident::is_valid_identifier(table) {
            return Err(SchemaError::InvalidIdentifier(table.to_string()));
        }
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
                .fetch_one(self.schema.pool())
                .await?;
        Ok(count)
    }
}

/// Group form indices by resolved table name; only names claimed by more
/// than one form are returned.
fn duplicate_table_groups(forms: &[FormDefinition]) -> Vec<(String, Vec<usize>)> {
    let mut by_table: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, form) in forms.iter().enumerate() {
        if let Some(table) = &form.table_name {
            by_table.entry(table.clone()).or_default().push(i);
        }
    }

    let mut groups: Vec<(String, Vec<usize>)> = by_table
        .into_iter()
        .filter(|(_, indices)| indices.len() > 1)
        .collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    groups
}

/// Fresh, deterministic name for a form losing a duplicate-name conflict.
fn fresh_table_name(old_table: &str, form_id: &str) -> String {
    ident::to_identifier(
        &format!("{}_{}", old_table, ident::short_hash(form_id)),
        None,
        ident::MAX_IDENTIFIER_LEN,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn form(id: &str, table: Option<&str>, created_hour: u32) -> FormDefinition {
        FormDefinition {
            id: id.to_string(),
            title: format!("form {}", id),
            fields: vec![],
            sub_forms: vec![],
            table_name: table.map(|t| t.to_string()),
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, created_hour, 0, 0).unwrap(),
        }
    }

    // ==================== Duplicate Grouping Tests ====================

    #[test]
    fn test_duplicate_table_groups_finds_shared_names() {
        let forms = vec![
            form("form-1", Some("contact_form"), 1),
            form("form-2", Some("survey"), 2),
            form("form-3", Some("contact_form"), 3),
            form("form-4", None, 4),
        ];

        let groups = duplicate_table_groups(&forms);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "contact_form");
        assert_eq!(groups[0].1, vec![0, 2]);
    }

    #[test]
    fn test_no_duplicates_no_groups() {
        let forms = vec![
            form("form-1", Some("a"), 1),
            form("form-2", Some("b"), 2),
            form("form-3", None, 3),
        ];
        assert!(duplicate_table_groups(&forms).is_empty());
    }

    // ==================== Fresh Name Tests ====================

    #[test]
    fn test_fresh_table_name_is_valid_and_deterministic() {
        let fresh = fresh_table_name("contact_form", "form-9");

        assert!(ident::is_valid_identifier(&fresh));
        assert_ne!(fresh, "contact_form");
        assert!(fresh.starts_with("contact_form_"));
        assert_eq!(fresh, fresh_table_name("contact_form", "form-9"));
    }

    #[test]
    fn test_fresh_table_name_stays_within_length() {
        let long = "x".repeat(60);
        let fresh = fresh_table_name(&long, "form-9");
        assert!(fresh.len() <= ident::MAX_IDENTIFIER_LEN);
        assert!(ident::is_valid_identifier(&fresh));
    }

    // ==================== Report Tests ====================

    #[test]
    fn test_report_is_clean_only_without_discrepancies() {
        let mut report = AuditReport {
            forms_checked: 3,
            discrepancies: vec![],
            repairs: vec![],
        };
        assert!(report.is_clean());

        report.discrepancies.push(Discrepancy::RowCountMismatch {
            form_id: "form-1".to_string(),
            table: "contact_form".to_string(),
            eav_count: 10,
            table_count: 7,
        });
        assert!(!report.is_clean());
    }

    #[test]
    fn test_report_serializes_with_tags() {
        let report = AuditReport {
            forms_checked: 1,
            discrepancies: vec![Discrepancy::MissingTable {
                form_id: "form-1".to_string(),
                table: "contact_form".to_string(),
            }],
            repairs: vec![RepairAction::CreatedTable {
                form_id: "form-1".to_string(),
                table: "contact_form".to_string(),
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["discrepancies"][0]["type"], "missing-table");
        assert_eq!(json["repairs"][0]["action"], "created-table");
        assert_eq!(json["forms_checked"], 1);
    }
}
