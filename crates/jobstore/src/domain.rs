// Archivo: domain.rs
// Propósito: tipos de registro a nivel de almacenamiento. El contenido de
// `pipeline_state` es un blob JSON opaco para este crate; el tipado por
// pipeline vive en `render-domain` y se (de)serializa en el borde.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Status informal terminal: job completado.
pub const STATUS_COMPLETED: &str = "completed";
/// Status informal terminal: job fallido.
pub const STATUS_FAILED: &str = "failed";

/// Registro completo de un job tal como lo ve el orquestador.
///
/// `stage` es la posición en la máquina de estados (objetivo del
/// compare-and-set); `status` es el texto informal visible al usuario
/// (`pending|processing|processing_intermediate|completed|failed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Topología del pipeline (`single_call`, `linear_chain`, `fanin_compose`).
    pub kind: String,
    pub status: String,
    pub stage: String,
    /// Task del proveedor actualmente en espera (etapas lineales). No se usa
    /// durante fan-in: ahí la membresía vive en los registros de completitud.
    pub active_task_ref: Option<String>,
    /// Blob opaco propiedad del controlador de etapas. Se mezcla, nunca se
    /// reemplaza (ver `JobRepository::merge_pipeline_state`).
    pub pipeline_state: JsonValue,
    /// Referencias de entrada, ordenadas y únicas por job.
    pub inputs: Vec<String>,
    /// Referencias permanentes producidas. Append-only; nunca contiene URLs
    /// efímeras del proveedor.
    pub outputs: Vec<String>,
    /// Última razón de fallo, o nota no-fatal en completitud degradada.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Un job terminal es inmutable: cualquier callback posterior debe ser
    /// un no-op.
    pub fn is_terminal(&self) -> bool {
        self.status == STATUS_COMPLETED || self.status == STATUS_FAILED
    }
}

/// Datos mínimos para crear un job (el repositorio genera id y timestamps).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: String,
    pub status: String,
    pub stage: String,
    pub active_task_ref: Option<String>,
    pub pipeline_state: JsonValue,
    pub inputs: Vec<String>,
}

/// Una fila por sub-task observado como terminado dentro de una etapa batch.
/// La clave compuesta `(job_id, task_id)` es única: es el único mecanismo de
/// idempotencia frente a entregas duplicadas durante fan-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub job_id: Uuid,
    pub task_id: String,
    /// URLs permanentes producidas por el sub-task.
    pub urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Resultado de un claim condicional de transición de etapa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// El update condicional afectó la fila: este caller ganó la transición.
    Won,
    /// La etapa observada ya no coincide: otro caller la está manejando.
    Lost,
}

/// Resultado de insertar un registro de completitud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Inserción limpia: primera vez que se observa este sub-task.
    Recorded,
    /// Violación de unicidad: entrega duplicada, tratar como no-op exitoso.
    Duplicate,
}
