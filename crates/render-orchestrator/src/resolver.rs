// resolver.rs
//
// Resolución de callbacks a jobs. Tres vías, en orden de confianza:
// correlación explícita (`job_id` en la URL del callback), búsqueda por
// `active_task_ref`, y por último un escaneo acotado de jobs recientes no
// terminales buscando membresía del task en un batch fan-in (los sub-tasks
// del batch no figuran como `active_task_ref` de nadie).
use crate::errors::Result;
use jobstore::{JobRecord, JobRepository, StoreError};
use render_domain::PipelineState;
use std::sync::Arc;
use uuid::Uuid;

/// Ventana temporal del escaneo de respaldo.
pub const FALLBACK_WINDOW_HOURS: i64 = 24;
/// Cota de filas del escaneo de respaldo. Salvaguarda de costo, no de
/// corrección.
pub const FALLBACK_SCAN_CAP: i64 = 200;

pub struct JobResolver {
  repo: Arc<dyn JobRepository>,
}

impl JobResolver {
  pub fn new(repo: Arc<dyn JobRepository>) -> Self {
    JobResolver { repo }
  }

  /// Resuelve el job del callback. `Ok(None)` significa "reconocido pero
  /// huérfano": el llamador debe responder acknowledge-and-drop, nunca
  /// reintentar internamente.
  pub fn resolve(&self, explicit_job_id: Option<&Uuid>, task_id: &str) -> Result<Option<JobRecord>> {
    if let Some(job_id) = explicit_job_id {
      return match self.repo.get_job(job_id) {
               Ok(job) => Ok(Some(job)),
               Err(StoreError::NotFound(_)) => Ok(None),
               Err(e) => Err(e.into()),
             };
    }

    if let Some(job) = self.repo.find_by_active_task(task_id)? {
      return Ok(Some(job));
    }

    let recent =
      self.repo.list_recent_active(chrono::Duration::hours(FALLBACK_WINDOW_HOURS), FALLBACK_SCAN_CAP)?;
    for job in recent {
      // sólo los estados fan-in declaran membresía de batch
      if let Ok(PipelineState::FanIn(state)) = PipelineState::from_value(&job.pipeline_state) {
        if state.is_batch_member(task_id) {
          return Ok(Some(job));
        }
      }
    }
    log::info!("callback sin job resoluble para task {}", task_id);
    Ok(None)
  }
}
