use clap::Args;

use common::escrow::EscrowError;
use sentinel_cli::AppError;

#[derive(Args, Debug, Clone)]
pub struct Audit {
    /// Print the records as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Audit {
    type Error = AuditError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        let report = app.escrow.audit_trail(&tenant).await?;

        let mut lines = Vec::with_capacity(report.records.len() + 1);
        for record in &report.records {
            if self.json {
                lines.push(serde_json::to_string(record)?);
                continue;
            }
            let mut line = format!(
                "{} {} device={}",
                record.timestamp.to_rfc3339(),
                record.action,
                record.device_id
            );
            if let Some(user) = &record.user_id {
                line.push_str(&format!(" user={}", user));
            }
            if let (Some(count), Some(threshold)) = (record.shares_count, record.threshold) {
                line.push_str(&format!(" shares={}/{}", count, threshold));
            }
            if let Some(error) = &record.error {
                line.push_str(&format!(" error={:?}", error));
            }
            lines.push(line);
        }

        if report.records.is_empty() {
            lines.push(format!("No audit records for tenant {}", tenant));
        }
        if !report.is_clean() {
            tracing::error!("{} audit records failed verification", report.tampered);
            lines.push(format!(
                "WARNING: {} audit records failed verification and were skipped",
                report.tampered
            ));
        }
        Ok(lines.join("\n"))
    }
}
