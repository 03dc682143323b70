// handler.rs
//
// Manejador de callbacks de punta a punta: verificación de firma →
// normalización del payload → resolución del job → controlador de etapas →
// efectos post-completitud (realce y export). Es el único punto donde los
// errores internos se traducen a resultados HTTP; nada escapa como pánico.
use crate::controller::{Disposition, StageController};
use crate::export;
use crate::resolver::JobResolver;
use crate::signature::WebhookVerifier;
use crate::spawner::FollowOnSpawner;
use chrono::Utc;
use jobstore::JobRepository;
use render_providers::{CallbackPayload, ReportingSink};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

/// Query de la URL del callback: correlación explícita opcional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
  pub job_id: Option<Uuid>,
  pub stage: Option<String>,
}

/// Cabeceras de firma del callback, tal como llegan.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookHeaders<'a> {
  pub id: Option<&'a str>,
  pub timestamp: Option<&'a str>,
  pub signature: Option<&'a str>,
}

/// Cuerpo del acknowledgement que ve el proveedor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallbackAck {
  pub received: bool,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub step: Option<String>,
}

/// Resultado del manejo, listo para mapear a un código HTTP.
#[derive(Debug)]
pub enum CallbackOutcome {
  /// 200 con el ack estructurado.
  Ack(CallbackAck),
  /// 401: firma inválida o timestamp fuera de ventana.
  Unauthorized,
  /// 404: ningún job resuelve; el callback se reconoce y se descarta.
  NotFound,
  /// 400: payload malformado.
  BadRequest(String),
  /// 500: error interno (almacén inaccesible, etc.).
  Internal(String),
}

pub struct CallbackHandler {
  verifier: WebhookVerifier,
  resolver: JobResolver,
  controller: StageController,
  spawner: FollowOnSpawner,
  sink: Arc<dyn ReportingSink>,
  repo: Arc<dyn JobRepository>,
}

impl CallbackHandler {
  pub fn new(verifier: WebhookVerifier,
             resolver: JobResolver,
             controller: StageController,
             spawner: FollowOnSpawner,
             sink: Arc<dyn ReportingSink>,
             repo: Arc<dyn JobRepository>)
             -> Self {
    CallbackHandler { verifier, resolver, controller, spawner, sink, repo }
  }

  /// Procesa un callback entrante. El cuerpo llega como bytes ya leídos
  /// (una sola lectura del stream; la firma y el parseo usan los mismos).
  pub async fn handle(&self, headers: WebhookHeaders<'_>, query: &CallbackQuery, body: &[u8]) -> CallbackOutcome {
    if let Err(e) = self.verifier.verify(headers.id, headers.timestamp, headers.signature, body, Utc::now()) {
      log::warn!("firma de callback rechazada: {}", e);
      // mejor esfuerzo: si el cuerpo sin verificar deja recuperar un job,
      // fallarlo rápido en lugar de dejarlo colgado para siempre
      if let Some(job_id) = recover_job_id(query, body) {
        if let Err(store_err) = self.repo.mark_failed(&job_id, "signature verification failed") {
          log::warn!("no se pudo marcar fallido el job {}: {}", job_id, store_err);
        }
      }
      return CallbackOutcome::Unauthorized;
    }

    let raw: JsonValue = match serde_json::from_slice(body) {
      Ok(value) => value,
      Err(e) => return CallbackOutcome::BadRequest(format!("cuerpo no es JSON: {}", e)),
    };
    let payload = match CallbackPayload::from_value(&raw) {
      Ok(payload) => payload,
      Err(e) => return CallbackOutcome::BadRequest(e.to_string()),
    };

    let job = match self.resolver.resolve(query.job_id.as_ref(), &payload.task_id) {
      Ok(Some(job)) => job,
      Ok(None) => return CallbackOutcome::NotFound,
      Err(e) => return CallbackOutcome::Internal(e.to_string()),
    };

    let disposition = match self.controller.handle(&job, &payload).await {
      Ok(disposition) => disposition,
      Err(e) => {
        log::error!("error interno procesando callback del job {}: {}", job.id, e);
        return CallbackOutcome::Internal(e.to_string());
      }
    };

    if disposition == Disposition::Completed {
      self.after_completion(&job.id).await;
    }
    CallbackOutcome::Ack(ack_for(&disposition))
  }

  /// Efectos posteriores a la completitud: jobs de realce y export del
  /// resumen. Ambos son best-effort respecto al callback que los disparó.
  async fn after_completion(&self, job_id: &Uuid) {
    match self.repo.get_job(job_id) {
      Ok(fresh) if fresh.status == jobstore::STATUS_COMPLETED => {
        self.spawner.spawn_enhancements(&fresh).await;
        export::spawn_export(self.sink.clone(), &fresh);
      }
      Ok(_) => {}
      Err(e) => log::warn!("no se pudo releer el job {} tras completarlo: {}", job_id, e),
    }
  }
}

fn ack_for(disposition: &Disposition) -> CallbackAck {
  match disposition {
    Disposition::Ignored(_) => CallbackAck { received: true, status: "ignored".into(), step: None },
    Disposition::Recorded { completed, total } => {
      CallbackAck { received: true,
                    status: "recorded".into(),
                    step: Some(format!("{}/{}", completed, total)) }
    }
    Disposition::Advanced { step } => {
      CallbackAck { received: true, status: "processing".into(), step: Some(step.clone()) }
    }
    Disposition::Completed => CallbackAck { received: true, status: "completed".into(), step: None },
    Disposition::Failed(_) => CallbackAck { received: true, status: "failed".into(), step: None },
  }
}

/// Intenta recuperar un job id del query o del cuerpo sin verificar.
fn recover_job_id(query: &CallbackQuery, body: &[u8]) -> Option<Uuid> {
  if let Some(job_id) = query.job_id {
    return Some(job_id);
  }
  serde_json::from_slice::<JsonValue>(body).ok()
                                           .and_then(|v| v.get("job_id").and_then(|j| j.as_str()).map(String::from))
                                           .and_then(|s| Uuid::parse_str(&s).ok())
}
