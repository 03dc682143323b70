// aggregator.rs
//
// Agregación fan-in. Cada sub-task terminado se registra con un insert bajo
// la clave única `(job_id, task_id)`: la violación de unicidad ES el
// mecanismo de idempotencia frente a entregas duplicadas. El conteo es
// monótono y seguro de leer sin lock; la decisión de avanzar la etapa se
// protege aparte con el claim condicional del controlador.
use crate::errors::Result;
use jobstore::{InsertOutcome, JobRepository};
use std::sync::Arc;
use uuid::Uuid;

pub struct FanInAggregator {
  repo: Arc<dyn JobRepository>,
}

impl FanInAggregator {
  pub fn new(repo: Arc<dyn JobRepository>) -> Self {
    FanInAggregator { repo }
  }

  /// Registra la completitud de un sub-task con sus URLs permanentes.
  /// `Duplicate` significa entrega repetida: éxito sin efectos, no se
  /// reprocesa nada.
  pub fn record_completion(&self, job_id: &Uuid, task_id: &str, permanent_urls: &[String]) -> Result<InsertOutcome> {
    Ok(self.repo.insert_completion(job_id, task_id, permanent_urls)?)
  }

  /// Conteo fresco de completitudes, leído inmediatamente después de un
  /// insert limpio.
  pub fn completed_count(&self, job_id: &Uuid) -> Result<i64> {
    Ok(self.repo.count_completions(job_id)?)
  }

  /// Todas las URLs permanentes registradas por el batch. El orden es el
  /// que devuelva el almacén: la composición posterior no debe depender del
  /// orden de llegada.
  pub fn gather_outputs(&self, job_id: &Uuid) -> Result<Vec<String>> {
    let records = self.repo.list_completions(job_id)?;
    Ok(records.into_iter().flat_map(|r| r.urls).collect())
  }
}
