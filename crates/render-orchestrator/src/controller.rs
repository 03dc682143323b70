// controller.rs
//
// Máquina de estados de transición de etapas. Dado "en qué etapa está el
// job" + "qué acaba de terminar", decide y ejecuta la siguiente acción:
// someter otro task al proveedor, finalizar, o fallar. Toda decisión que
// debe tomarse exactamente una vez se apoya en el claim condicional del
// almacén (compare-and-set sobre `stage`): entre callbacks concurrentes,
// incluido el duplicado del mismo sub-task, gana exactamente uno y el resto
// sale sin efectos.
use crate::aggregator::FanInAggregator;
use crate::errors::Result;
use crate::materializer::OutputMaterializer;
use chrono::Utc;
use jobstore::{ClaimResult, InsertOutcome, JobRecord, JobRepository};
use render_domain::{
  crop_ratio_for, filter_http_urls, FanInStage, FanInState, LinearChainState, LinearStage, PipelineState,
  SingleStage, SingleState, STAGE_COMPLETED,
};
use render_providers::{with_retry, CallbackPayload, GenerationProvider, GenerationRequest, RetryPolicy, TaskStatus};
use std::sync::Arc;
use uuid::Uuid;

/// Resultado de procesar un callback contra el estado actual del job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
  /// Callback reconocido pero sin efecto (duplicado, job terminal, status
  /// no terminal, claim perdido). La razón es informativa.
  Ignored(String),
  /// Completitud de sub-task registrada; el batch aún no está completo.
  Recorded { completed: i64, total: usize },
  /// El job avanzó a la etapa indicada y hay un nuevo task en vuelo.
  Advanced { step: String },
  /// El job terminó con éxito (posiblemente degradado, ver `error`).
  Completed,
  /// El job terminó en fallo con la razón dada.
  Failed(String),
}

/// Configuración del controlador.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
  /// URL pública base del endpoint de callbacks; se le añaden `job_id` y
  /// `stage` como query para la correlación explícita.
  pub webhook_url: String,
  /// Ventana máxima de la etapa de composición antes de aplicar la
  /// finalización suave con las salidas del batch.
  pub compose_window: chrono::Duration,
  /// Política de reintentos para sumisiones al proveedor.
  pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    ControllerConfig { webhook_url: "http://localhost:8080/webhooks/generation".into(),
                       compose_window: chrono::Duration::minutes(10),
                       retry: RetryPolicy::default() }
  }
}

pub struct StageController {
  repo: Arc<dyn JobRepository>,
  provider: Arc<dyn GenerationProvider>,
  aggregator: FanInAggregator,
  materializer: OutputMaterializer,
  config: ControllerConfig,
}

impl StageController {
  pub fn new(repo: Arc<dyn JobRepository>,
             provider: Arc<dyn GenerationProvider>,
             materializer: OutputMaterializer,
             config: ControllerConfig)
             -> Self {
    let aggregator = FanInAggregator::new(repo.clone());
    StageController { repo, provider, aggregator, materializer, config }
  }

  /// Procesa un callback ya verificado y resuelto. Todos los fallos de
  /// negocio terminan en el job (`mark_failed`/nota suave); los errores que
  /// propaga este método son de infraestructura (almacén inaccesible).
  pub async fn handle(&self, job: &JobRecord, callback: &CallbackPayload) -> Result<Disposition> {
    if job.is_terminal() {
      // un job terminal es inmutable: el duplicado tardío se reconoce y nada más
      return Ok(Disposition::Ignored(format!("job {} ya terminal ({})", job.id, job.status)));
    }
    let state = PipelineState::from_value(&job.pipeline_state)?;
    match state {
      PipelineState::Single(state) => self.handle_single(job, &state, callback).await,
      PipelineState::LinearChain(state) => self.handle_linear(job, state, callback).await,
      PipelineState::FanIn(state) => self.handle_fanin(job, &state, callback).await,
    }
  }

  fn webhook_url_for(&self, job_id: &Uuid, stage: &str) -> String {
    format!("{}?job_id={}&stage={}", self.config.webhook_url, job_id, stage)
  }

  /// Sumisión con reintentos acotados. El agotamiento se reporta como
  /// `Err`; el llamador decide si eso falla el job.
  async fn submit(&self, job_id: &Uuid, stage: &str, request: &GenerationRequest)
                  -> std::result::Result<String, render_providers::ProviderError> {
    let url = self.webhook_url_for(job_id, stage);
    with_retry(&self.config.retry, &request.operation, || self.provider.submit(request, &url)).await
  }

  async fn fail_job(&self, job_id: &Uuid, reason: String) -> Result<Disposition> {
    self.repo.mark_failed(job_id, &reason)?;
    Ok(Disposition::Failed(reason))
  }

  /// Etapa activa no-batch: el callback debe corresponder al task en espera.
  fn is_foreign_task(&self, job: &JobRecord, callback: &CallbackPayload) -> bool {
    matches!(&job.active_task_ref, Some(active) if active != &callback.task_id)
  }

  // ---- pipeline de llamada única -------------------------------------

  async fn handle_single(&self, job: &JobRecord, state: &SingleState, callback: &CallbackPayload)
                         -> Result<Disposition> {
    if self.is_foreign_task(job, callback) {
      return Ok(Disposition::Ignored(format!("task {} no es el task activo del job", callback.task_id)));
    }
    if !callback.status.is_terminal() {
      self.repo.set_progress_note(&job.id, "processing")?;
      return Ok(Disposition::Ignored(format!("status no terminal: {}", callback.status.as_str())));
    }
    if let Some(reason) = terminal_failure_reason(callback) {
      return self.fail_job(&job.id, reason).await;
    }
    if callback.output_urls.is_empty() {
      return self.fail_job(&job.id, "no output produced".into()).await;
    }

    let stage = SingleStage::parse(&job.stage).map_err(crate::errors::OrchestratorError::from)?;
    // un job que quedó en `finalizing` (finalización interrumpida a mitad)
    // se retoma con el callback terminal reintentado; el claim sobre la
    // etapa observada sigue eligiendo un único ganador
    let target = match stage {
      SingleStage::AwaitingTask => SingleStage::Finalizing.as_str(),
      SingleStage::Finalizing => STAGE_COMPLETED,
    };
    if self.repo.claim_stage(&job.id, stage.as_str(), target)? == ClaimResult::Lost {
      return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
    }

    let crop = crop_ratio_for(&state.target_ratio, &state.aspect_ratio);
    self.finalize(&job.id, &callback.output_urls, crop.as_deref(), None).await
  }

  /// Finaliza el job con las URLs dadas: materializa, registra outputs y
  /// marca completado. El fallo de subida falla el job sin tocar `outputs`.
  async fn finalize(&self, job_id: &Uuid, ephemeral_urls: &[String], crop: Option<&str>, note: Option<&str>)
                    -> Result<Disposition> {
    let permanent = match self.materializer.materialize(ephemeral_urls, crop).await {
      Ok(urls) => urls,
      Err(e) => return self.fail_job(job_id, format!("permanent storage failed: {}", e)).await,
    };
    self.repo.append_outputs(job_id, &permanent)?;
    self.repo.set_active_task(job_id, None)?;
    self.repo.mark_completed(job_id, note)?;
    Ok(Disposition::Completed)
  }

  // ---- cadena lineal --------------------------------------------------

  async fn handle_linear(&self, job: &JobRecord, mut state: LinearChainState, callback: &CallbackPayload)
                         -> Result<Disposition> {
    if self.is_foreign_task(job, callback) {
      return Ok(Disposition::Ignored(format!("task {} no es el task activo del job", callback.task_id)));
    }
    if !callback.status.is_terminal() {
      self.repo.set_progress_note(&job.id, "processing_intermediate")?;
      return Ok(Disposition::Ignored(format!("status no terminal: {}", callback.status.as_str())));
    }
    if let Some(reason) = terminal_failure_reason(callback) {
      return self.fail_job(&job.id, reason).await;
    }

    let stage = LinearStage::parse(&job.stage).map_err(crate::errors::OrchestratorError::from)?;
    match stage {
      LinearStage::AwaitingStyle => {
        let Some(text) = callback.text_output.clone() else {
          return self.fail_job(&job.id, "no output produced".into()).await;
        };
        state.style_prompt = Some(text);
        self.advance_linear(job, stage, state).await
      }
      LinearStage::AwaitingEnrichment => {
        let Some(text) = callback.text_output.clone() else {
          return self.fail_job(&job.id, "no output produced".into()).await;
        };
        state.enriched_prompt = Some(text);
        self.advance_linear(job, stage, state).await
      }
      LinearStage::AwaitingEdit => {
        if callback.output_urls.is_empty() {
          return self.fail_job(&job.id, "no output produced".into()).await;
        }
        if self.repo.claim_stage(&job.id, stage.as_str(), LinearStage::Finalizing.as_str())? == ClaimResult::Lost {
          return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
        }
        let crop = crop_ratio_for(&state.target_ratio, &state.aspect_ratio);
        self.finalize(&job.id, &callback.output_urls, crop.as_deref(), None).await
      }
      LinearStage::Finalizing => {
        // finalización interrumpida: el reintento del callback de edición
        // la retoma desde cero con sus URLs
        if callback.output_urls.is_empty() {
          return self.fail_job(&job.id, "no output produced".into()).await;
        }
        if self.repo.claim_stage(&job.id, stage.as_str(), STAGE_COMPLETED)? == ClaimResult::Lost {
          return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
        }
        let crop = crop_ratio_for(&state.target_ratio, &state.aspect_ratio);
        self.finalize(&job.id, &callback.output_urls, crop.as_deref(), None).await
      }
    }
  }

  /// Avanza la cadena a su siguiente etapa: claim condicional, persistir el
  /// estado con la salida intermedia incorporada, y someter el siguiente
  /// task. Quien pierde el claim sale sin efectos.
  async fn advance_linear(&self, job: &JobRecord, current: LinearStage, state: LinearChainState)
                          -> Result<Disposition> {
    let Some(next) = current.next(state.enrichment_enabled) else {
      return Ok(Disposition::Ignored("la cadena no tiene etapa siguiente".into()));
    };
    if self.repo.claim_stage(&job.id, current.as_str(), next.as_str())? == ClaimResult::Lost {
      return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
    }
    self.repo.merge_pipeline_state(&job.id, &PipelineState::LinearChain(state.clone()).to_value()?)?;

    let request = match next {
      LinearStage::AwaitingEnrichment => {
        GenerationRequest { operation: "prompt_enrich".into(),
                            prompt: Some(state.effective_prompt()),
                            image_urls: Vec::new(),
                            aspect_ratio: None }
      }
      LinearStage::AwaitingEdit => edit_request(&state, &job.inputs),
      // next() nunca devuelve awaiting_style ni salta directo a finalizing
      other => {
        return Err(crate::errors::OrchestratorError::Validation(format!("etapa siguiente inesperada: {}",
                                                                        other.as_str())));
      }
    };

    match self.submit(&job.id, next.as_str(), &request).await {
      Ok(task_id) => {
        self.repo.set_active_task(&job.id, Some(&task_id))?;
        self.repo.set_progress_note(&job.id, "processing_intermediate")?;
        Ok(Disposition::Advanced { step: next.as_str().to_string() })
      }
      Err(e) => self.fail_job(&job.id, format!("provider submission failed: {}", e)).await,
    }
  }

  // ---- fan-in y composición -------------------------------------------

  async fn handle_fanin(&self, job: &JobRecord, state: &FanInState, callback: &CallbackPayload)
                        -> Result<Disposition> {
    let stage = FanInStage::parse(&job.stage).map_err(crate::errors::OrchestratorError::from)?;
    match stage {
      FanInStage::AwaitingBatch => self.handle_batch_member(job, state, callback).await,
      FanInStage::Composing => self.handle_composition(job, state, callback).await,
      FanInStage::Finalizing => self.recover_finalizing(job, state, callback).await,
    }
  }

  async fn handle_batch_member(&self, job: &JobRecord, state: &FanInState, callback: &CallbackPayload)
                               -> Result<Disposition> {
    if !state.is_batch_member(&callback.task_id) {
      // correlación errónea (p. ej. job_id explícito equivocado): el conteo
      // del batch sólo admite los sub-tasks declarados
      return Ok(Disposition::Ignored(format!("task {} no pertenece al batch declarado", callback.task_id)));
    }
    if !callback.status.is_terminal() {
      self.repo.set_progress_note(&job.id, "processing")?;
      return Ok(Disposition::Ignored(format!("status no terminal: {}", callback.status.as_str())));
    }
    if let Some(reason) = terminal_failure_reason(callback) {
      // un miembro del batch que falla termina el job: la composición
      // necesita el batch completo
      return self.fail_job(&job.id, format!("batch member {}: {}", callback.task_id, reason)).await;
    }
    if callback.output_urls.is_empty() {
      return self.fail_job(&job.id, "no output produced".into()).await;
    }

    // detectar el duplicado antes de materializar: así la entrega repetida
    // no sube copias huérfanas al almacén permanente; el insert único de
    // más abajo sigue siendo la autoridad frente a la carrera
    if self.repo.list_completions(&job.id)?.iter().any(|c| c.task_id == callback.task_id) {
      return Ok(Disposition::Ignored(format!("entrega duplicada del sub-task {}", callback.task_id)));
    }

    // materializar antes de registrar: el registro de completitud sólo
    // guarda URLs permanentes
    let permanent = match self.materializer.materialize(&callback.output_urls, None).await {
      Ok(urls) => urls,
      Err(e) => return self.fail_job(&job.id, format!("permanent storage failed: {}", e)).await,
    };
    if self.aggregator.record_completion(&job.id, &callback.task_id, &permanent)? == InsertOutcome::Duplicate {
      return Ok(Disposition::Ignored(format!("entrega duplicada del sub-task {}", callback.task_id)));
    }

    let completed = self.aggregator.completed_count(&job.id)?;
    let total = state.declared_total();
    if (completed as usize) < total {
      self.repo.set_progress_note(&job.id, "processing_intermediate")?;
      return Ok(Disposition::Recorded { completed, total });
    }

    // umbral alcanzado: el claim decide el único ganador entre callbacks
    // que cruzan el umbral a la vez
    if self.repo.claim_stage(&job.id, FanInStage::AwaitingBatch.as_str(), FanInStage::Composing.as_str())?
       == ClaimResult::Lost
    {
      return Ok(Disposition::Ignored("otro callback ya está componiendo".into()));
    }
    self.start_composition(job, state).await
  }

  async fn start_composition(&self, job: &JobRecord, state: &FanInState) -> Result<Disposition> {
    let batch_outputs = self.aggregator.gather_outputs(&job.id)?;
    if batch_outputs.is_empty() {
      return self.fail_job(&job.id, "no output produced".into()).await;
    }

    let mut next_state = state.clone();
    next_state.compose_deadline = Some(Utc::now() + self.config.compose_window);

    let mut image_urls = Vec::with_capacity(batch_outputs.len() + 1);
    if let Some(template) = &next_state.template_url {
      image_urls.push(template.clone());
    }
    image_urls.extend(batch_outputs);
    let request = GenerationRequest { operation: "compose".into(),
                                      prompt: Some(next_state.prompt.clone()),
                                      image_urls,
                                      aspect_ratio: next_state.aspect_ratio.clone() };

    match self.submit(&job.id, FanInStage::Composing.as_str(), &request).await {
      Ok(task_id) => {
        self.repo.merge_pipeline_state(&job.id, &PipelineState::FanIn(next_state).to_value()?)?;
        self.repo.set_active_task(&job.id, Some(&task_id))?;
        self.repo.set_progress_note(&job.id, "processing_intermediate")?;
        Ok(Disposition::Advanced { step: FanInStage::Composing.as_str().to_string() })
      }
      Err(e) => self.fail_job(&job.id, format!("provider submission failed: {}", e)).await,
    }
  }

  async fn handle_composition(&self, job: &JobRecord, state: &FanInState, callback: &CallbackPayload)
                              -> Result<Disposition> {
    // entrega tardía de un miembro del batch mientras ya se compone: su
    // completitud ya quedó registrada antes del umbral, no se reprocesa
    if state.is_batch_member(&callback.task_id)
       && job.active_task_ref.as_deref() != Some(callback.task_id.as_str())
    {
      return Ok(Disposition::Ignored(format!("entrega duplicada del sub-task {}", callback.task_id)));
    }
    if self.is_foreign_task(job, callback) {
      return Ok(Disposition::Ignored(format!("task {} no es el task activo del job", callback.task_id)));
    }

    if !callback.status.is_terminal() {
      if state.compose_deadline_passed(Utc::now()) {
        return self.soft_complete(job, "composition timed out; finalized with batch outputs".into()).await;
      }
      self.repo.set_progress_note(&job.id, "processing")?;
      return Ok(Disposition::Ignored(format!("status no terminal: {}", callback.status.as_str())));
    }

    if let Some(reason) = terminal_failure_reason(callback) {
      // el batch ya está completo: preferimos un éxito degradado con las
      // salidas del batch antes que colgar o fallar el job entero
      return self.soft_complete(job, format!("composition failed ({}); finalized with batch outputs", reason))
                 .await;
    }
    if callback.output_urls.is_empty() {
      return self.soft_complete(job, "composition produced no output; finalized with batch outputs".into())
                 .await;
    }

    if self.repo.claim_stage(&job.id, FanInStage::Composing.as_str(), FanInStage::Finalizing.as_str())?
       == ClaimResult::Lost
    {
      return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
    }
    let crop = crop_ratio_for(&state.target_ratio, &state.aspect_ratio);
    self.finalize(&job.id, &callback.output_urls, crop.as_deref(), None).await
  }

  /// Finalización suave: el job se completa con las salidas ya permanentes
  /// del batch y una nota no fatal en `error`.
  async fn soft_complete(&self, job: &JobRecord, note: String) -> Result<Disposition> {
    if self.repo.claim_stage(&job.id, FanInStage::Composing.as_str(), FanInStage::Finalizing.as_str())?
       == ClaimResult::Lost
    {
      return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
    }
    let batch_outputs = self.aggregator.gather_outputs(&job.id)?;
    self.repo.append_outputs(&job.id, &batch_outputs)?;
    self.repo.set_active_task(&job.id, None)?;
    self.repo.mark_completed(&job.id, Some(&note))?;
    log::warn!("job {} completado de forma degradada: {}", job.id, note);
    Ok(Disposition::Completed)
  }

  /// Callbacks que observan `finalizing`: una finalización interrumpida
  /// dejaría el job colgado si esto fuera siempre un no-op. El callback
  /// terminal reintentado la retoma (con sus URLs si las trae, con las
  /// salidas del batch si no); uno no terminal sólo recupera con el
  /// deadline de composición vencido. El claim sobre `finalizing` elige
  /// un único ganador.
  async fn recover_finalizing(&self, job: &JobRecord, state: &FanInState, callback: &CallbackPayload)
                              -> Result<Disposition> {
    if state.is_batch_member(&callback.task_id)
       && job.active_task_ref.as_deref() != Some(callback.task_id.as_str())
    {
      return Ok(Disposition::Ignored(format!("entrega duplicada del sub-task {}", callback.task_id)));
    }
    if self.is_foreign_task(job, callback) {
      return Ok(Disposition::Ignored(format!("task {} no es el task activo del job", callback.task_id)));
    }
    if !callback.status.is_terminal() && !state.compose_deadline_passed(Utc::now()) {
      return Ok(Disposition::Ignored("otro callback está finalizando este job".into()));
    }
    if self.repo.claim_stage(&job.id, FanInStage::Finalizing.as_str(), STAGE_COMPLETED)? == ClaimResult::Lost {
      return Ok(Disposition::Ignored("transición ya reclamada por otro callback".into()));
    }
    if callback.status == TaskStatus::Succeeded && !callback.output_urls.is_empty() {
      let crop = crop_ratio_for(&state.target_ratio, &state.aspect_ratio);
      return self.finalize(&job.id, &callback.output_urls, crop.as_deref(), None).await;
    }
    // sin salida de composición utilizable: las salidas del batch ya son
    // permanentes y bastan para completar
    let batch_outputs = self.aggregator.gather_outputs(&job.id)?;
    self.repo.append_outputs(&job.id, &batch_outputs)?;
    self.repo.set_active_task(&job.id, None)?;
    self.repo.mark_completed(&job.id, Some("composition stalled; finalized with batch outputs"))?;
    log::warn!("job {} recuperado desde la finalización interrumpida con las salidas del batch", job.id);
    Ok(Disposition::Completed)
  }
}

/// Razón de fallo terminal del task, si el status lo es.
fn terminal_failure_reason(callback: &CallbackPayload) -> Option<String> {
  match callback.status {
    TaskStatus::Failed | TaskStatus::Canceled => {
      Some(callback.failure_reason
                   .clone()
                   .unwrap_or_else(|| format!("provider task {}", callback.status.as_str())))
    }
    _ => None,
  }
}

/// Petición de edición final de la cadena lineal: el prompt efectivo más
/// las referencias válidas (candidatas declaradas + inputs del job,
/// filtradas a URLs http(s) absolutas).
fn edit_request(state: &LinearChainState, inputs: &[String]) -> GenerationRequest {
  let mut candidates = state.reference_urls.clone();
  candidates.extend(inputs.iter().cloned());
  GenerationRequest { operation: "image_edit".into(),
                      prompt: Some(state.effective_prompt()),
                      image_urls: filter_http_urls(&candidates),
                      aspect_ratio: state.aspect_ratio.clone() }
}
