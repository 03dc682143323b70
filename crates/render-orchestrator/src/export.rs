// export.rs
//
// Exportación best-effort del resumen de un job completado al sink de
// reporting. Nunca bloquea ni falla el camino principal: se despacha en una
// tarea aparte y los fallos sólo se loguean.
use jobstore::JobRecord;
use render_providers::{JobSummary, ReportingSink};
use std::sync::Arc;

/// Resumen exportable de un job.
pub fn summary_of(job: &JobRecord) -> JobSummary {
  JobSummary { job_id: job.id,
               kind: job.kind.clone(),
               status: job.status.clone(),
               outputs: job.outputs.clone(),
               note: job.error.clone(),
               completed_at: job.completed_at }
}

/// Despacha la exportación en segundo plano (fire-and-forget).
pub fn spawn_export(sink: Arc<dyn ReportingSink>, job: &JobRecord) {
  let summary = summary_of(job);
  tokio::spawn(async move {
    if let Err(e) = sink.export(&summary).await {
      log::warn!("export del resumen del job {} falló (ignorado): {}", summary.job_id, e);
    }
  });
}
