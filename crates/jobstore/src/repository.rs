// Archivo: repository.rs
// Propósito: definir el trait `JobRepository`. Describe el contrato que deben
// implementar las persistencias (Postgres/SQLite vía Diesel, in-memory, etc.).
//
// Todas las mutaciones son estrechas e idempotentes: insert con clave única o
// update condicional, nunca read-then-write sin guarda. Un segundo proceso
// puede estar corriendo en paralelo; no se asume ningún lock en memoria.
use crate::domain::{ClaimResult, CompletionRecord, InsertOutcome, JobRecord, NewJob};
use crate::errors::Result;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Contrato mínimo del repositorio de jobs.
pub trait JobRepository: Send + Sync {
    /// Crea un nuevo job. El repositorio genera el `job_id` y completa los
    /// campos derivados (created_at, updated_at).
    fn create_job(&self, job: NewJob) -> Result<Uuid>;

    /// Obtiene el registro completo del job. `NotFound` si no existe.
    fn get_job(&self, job_id: &Uuid) -> Result<JobRecord>;

    /// Busca el job cuyo `active_task_ref` coincide con el task del proveedor.
    fn find_by_active_task(&self, task_ref: &str) -> Result<Option<JobRecord>>;

    /// Lista jobs no terminales creados dentro de la ventana dada, acotado a
    /// `cap` filas (los más recientes primero). Usado por la resolución de
    /// respaldo; las cotas son una salvaguarda de costo, no de corrección.
    fn list_recent_active(&self, window: chrono::Duration, cap: i64) -> Result<Vec<JobRecord>>;

    /// Claim atómico de una transición de etapa: el update sólo procede si la
    /// etapa observada sigue siendo `expected_stage`. Exactamente un caller
    /// concurrente recibe `Won`; el resto debe salir sin efectos.
    fn claim_stage(&self, job_id: &Uuid, expected_stage: &str, new_stage: &str) -> Result<ClaimResult>;

    /// Fija (o limpia) el task del proveedor actualmente en espera.
    fn set_active_task(&self, job_id: &Uuid, task_ref: Option<&str>) -> Result<()>;

    /// Mezcla `patch` sobre el blob `pipeline_state` preservando las claves
    /// no mencionadas (merge superficial, nunca reemplazo completo).
    fn merge_pipeline_state(&self, job_id: &Uuid, patch: &JsonValue) -> Result<()>;

    /// Añade URLs permanentes a `outputs` (append-only).
    fn append_outputs(&self, job_id: &Uuid, urls: &[String]) -> Result<()>;

    /// Escribe el texto informal de `status` (estimación de progreso).
    /// No-op si el job ya es terminal; nunca cambia la etapa.
    fn set_progress_note(&self, job_id: &Uuid, note: &str) -> Result<()>;

    /// Marca el job como completado, con nota no-fatal opcional en `error`
    /// (completitud degradada). No-op si ya es terminal.
    fn mark_completed(&self, job_id: &Uuid, note: Option<&str>) -> Result<()>;

    /// Marca el job como fallido con la razón dada. No-op si ya es terminal.
    fn mark_failed(&self, job_id: &Uuid, reason: &str) -> Result<()>;

    /// Inserta un registro de completitud bajo la clave única
    /// `(job_id, task_id)`. Una violación de unicidad significa entrega
    /// duplicada y se reporta como `InsertOutcome::Duplicate`, nunca error.
    fn insert_completion(&self, job_id: &Uuid, task_id: &str, urls: &[String]) -> Result<InsertOutcome>;

    /// Cuenta fresca de registros de completitud del job. Monótona: el
    /// conteo es seguro de leer sin lock externo; la *decisión* de avanzar
    /// se protege con `claim_stage`.
    fn count_completions(&self, job_id: &Uuid) -> Result<i64>;

    /// Lista los registros de completitud del job. El orden es el que
    /// devuelva el almacén: el consumidor no debe depender del orden de
    /// llegada.
    fn list_completions(&self, job_id: &Uuid) -> Result<Vec<CompletionRecord>>;
}
