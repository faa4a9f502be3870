use crate::audit::{ConsistencyAuditor, RepairMode};
use crate::config::Config;
use crate::forms::FormDefinition;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Load form definitions from the configured JSON snapshot file.
pub fn load_forms(path: &str) -> Result<Vec<FormDefinition>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read forms file {}", path))?;
    let forms: Vec<FormDefinition> =
        serde_json::from_str(&content).context("Failed to parse forms file")?;
    Ok(forms)
}

/// Initialize and start the audit scheduler.
pub async fn start_scheduler(
    config: Arc<Config>,
    auditor: Arc<ConsistencyAuditor>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Read the forms snapshot once at startup.
    let forms = Arc::new(load_forms(&config.forms_file)?);
    info!(
        "loaded {} form definitions for scheduled audits",
        forms.len()
    );

    for time in &config.audit_times {
        let cron_expr = time_to_cron(time)?;
        info!("scheduling audit for {} (cron: {})", time, cron_expr);

        let auditor_clone = Arc::clone(&auditor);
        let forms_clone = Arc::clone(&forms);

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let auditor = Arc::clone(&auditor_clone);
            let forms = Arc::clone(&forms_clone);

            Box::pin(async move {
                info!("⏰ Scheduled audit triggered");
                if let Err(e) = run_audit(&auditor, &forms).await {
                    error!("Scheduled audit failed: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;
    info!("✓ Audit scheduler started");

    Ok(scheduler)
}

/// Convert time string (HH:MM) to a cron expression in Bangkok time (UTC+7)
fn time_to_cron(time: &str) -> Result<String> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        anyhow::bail!("Invalid time format: {}. Expected HH:MM", time);
    }

    let hour: u8 = parts[0].parse()?;
    let minute: u8 = parts[1].parse()?;
    if hour > 23 || minute > 59 {
        anyhow::bail!("Invalid time: {}", time);
    }

    // Convert Bangkok time (UTC+7) to UTC.
    // For example: 03:30 Bangkok = 20:30 UTC the previous day.
    let utc_hour = (hour + 17) % 24;

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 {} {} * * *", minute, utc_hour))
}

/// Run one audit over a snapshot of the form definitions.
async fn run_audit(auditor: &ConsistencyAuditor, forms: &[FormDefinition]) -> Result<()> {
    let mut forms = forms.to_vec();
    let report = auditor.run(&mut forms, RepairMode::Repair).await?;

    info!(
        "audit report: {}",
        serde_json::to_string(&report).context("Failed to serialize audit report")?
    );
    Ok(())
}

/// Manually trigger one audit run (for operators).
pub async fn trigger_audit(config: &Config, auditor: &ConsistencyAuditor) -> Result<()> {
    let forms = load_forms(&config.forms_file)?;
    run_audit(auditor, &forms).await
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Cron Conversion Tests ====================

    #[test]
    fn test_time_to_cron_converts_bangkok_to_utc() {
        assert_eq!(time_to_cron("03:30").unwrap(), "0 30 20 * * *");
        assert_eq!(time_to_cron("07:00").unwrap(), "0 0 0 * * *");
        assert_eq!(time_to_cron("23:15").unwrap(), "0 15 16 * * *");
    }

    #[test]
    fn test_time_to_cron_rejects_bad_input() {
        assert!(time_to_cron("0330").is_err());
        assert!(time_to_cron("25:00").is_err());
        assert!(time_to_cron("12:75").is_err());
        assert!(time_to_cron("ab:cd").is_err());
    }

    // ==================== Forms File Tests ====================

    #[test]
    fn test_load_forms_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("forms.json");
        std::fs::write(
            &path,
            r#"[{
                "id": "form-1",
                "title": "แบบฟอร์มติดต่อ",
                "fields": [
                    {"id": "f-1", "label": "ชื่อ", "kind": "short-text", "position": 1}
                ],
                "created_at": "2025-06-01T00:00:00Z"
            }]"#,
        )
        .expect("write forms file");

        let forms = load_forms(path.to_str().unwrap()).expect("should load");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].id, "form-1");
        assert_eq!(forms[0].fields.len(), 1);
    }

    #[test]
    fn test_load_forms_missing_file_errors() {
        let result = load_forms("/nonexistent/forms.json");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to read forms file"));
    }

    #[test]
    fn test_load_forms_bad_json_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("forms.json");
        std::fs::write(&path, "not json").expect("write");

        let result = load_forms(path.to_str().unwrap());
        assert!(result.is_err());
    }
}
