// spawner.rs
//
// Jobs dependientes de realce. Cuando un job de un kind con política de
// mejora automática finaliza con éxito, se crea un job `single_call` de
// realce por cada asset de salida. Es un enriquecimiento, no un requisito:
// cualquier fallo aquí se loguea y jamás revierte ni falla al padre.
use crate::errors::Result;
use jobstore::{JobRepository, NewJob};
use render_domain::{JobKind, PipelineState, SingleStage, SingleState};
use render_providers::{with_retry, GenerationProvider, GenerationRequest, RetryPolicy};
use std::sync::Arc;
use uuid::Uuid;

pub struct FollowOnSpawner {
  repo: Arc<dyn JobRepository>,
  provider: Arc<dyn GenerationProvider>,
  webhook_url: String,
  retry: RetryPolicy,
}

impl FollowOnSpawner {
  pub fn new(repo: Arc<dyn JobRepository>,
             provider: Arc<dyn GenerationProvider>,
             webhook_url: impl Into<String>,
             retry: RetryPolicy)
             -> Self {
    FollowOnSpawner { repo, provider, webhook_url: webhook_url.into(), retry }
  }

  /// Genera los jobs de realce del padre recién completado. Devuelve
  /// cuántos se sometieron; los fallos individuales sólo se loguean.
  pub async fn spawn_enhancements(&self, parent: &jobstore::JobRecord) -> usize {
    let kind = match JobKind::parse(&parent.kind) {
      Ok(kind) => kind,
      Err(e) => {
        log::warn!("job {} con kind no reconocido, sin realce: {}", parent.id, e);
        return 0;
      }
    };
    if !kind.wants_enhancement() {
      return 0;
    }

    let mut spawned = 0;
    for output in &parent.outputs {
      match self.spawn_one(parent, output).await {
        Ok(child_id) => {
          log::info!("job de realce {} creado para salida de {}", child_id, parent.id);
          spawned += 1;
        }
        Err(e) => log::warn!("no se pudo crear el job de realce para {} ({}): {}", parent.id, output, e),
      }
    }
    spawned
  }

  async fn spawn_one(&self, parent: &jobstore::JobRecord, output: &str) -> Result<Uuid> {
    let state = SingleState { prompt: "enhance resolution".into(),
                              aspect_ratio: None,
                              target_ratio: None };
    let stage = state.initial_stage();
    // el hijo guarda la referencia a su padre en el blob de estado; las
    // claves ajenas al pipeline se toleran y sobreviven a los merges
    let mut blob = PipelineState::Single(state).to_value()?;
    if let Some(map) = blob.as_object_mut() {
      map.insert("parent_job_id".into(), serde_json::Value::String(parent.id.to_string()));
    }
    let child_id = self.repo.create_job(NewJob { kind: JobKind::SingleCall.as_str().into(),
                                                 status: "pending".into(),
                                                 stage: stage.as_str().into(),
                                                 active_task_ref: None,
                                                 pipeline_state: blob,
                                                 inputs: vec![output.to_string()] })?;

    let request = GenerationRequest { operation: "enhance".into(),
                                      prompt: None,
                                      image_urls: vec![output.to_string()],
                                      aspect_ratio: None };
    let url = format!("{}?job_id={}&stage={}", self.webhook_url, child_id, SingleStage::AwaitingTask.as_str());
    let task_id = with_retry(&self.retry, "enhance", || self.provider.submit(&request, &url)).await?;
    self.repo.set_active_task(&child_id, Some(&task_id))?;
    self.repo.set_progress_note(&child_id, "processing")?;
    Ok(child_id)
  }
}
