// Archivo: stubs.rs
// Propósito: implementación en memoria para pruebas y wiring rápido.
//
// `InMemoryJobRepository` replica la semántica del contrato (claim
// condicional, insert único, terminales inmutables) sin durabilidad. Se usa
// en los tests del orquestador y en demos locales.
use crate::domain::{
    ClaimResult, CompletionRecord, InsertOutcome, JobRecord, NewJob, STATUS_COMPLETED, STATUS_FAILED,
};
use crate::errors::{Result, StoreError};
use crate::repository::JobRepository;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

// Minimal in-memory repository for wiring examples (not durable)
pub struct InMemoryJobRepository {
    /// Registros de jobs indexados por `job_id`.
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    /// Registros de completitud por `(job_id, task_id)` — la clave del mapa
    /// modela la restricción de unicidad.
    completions: Mutex<HashMap<(Uuid, String), CompletionRecord>>,
}

impl InMemoryJobRepository {
    /// Crea una nueva instancia del repositorio en memoria.
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()),
               completions: Mutex::new(HashMap::new()) }
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `StoreError::Storage`.
    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> std::result::Result<MutexGuard<'a, T>, StoreError> {
        m.lock().map_err(|e| StoreError::Storage(format!("mutex poisoned: {:?}", e)))
    }

    /// Inserta un registro ya construido (timestamps incluidos). Útil en
    /// pruebas que necesitan jobs con `created_at` arbitrario, por ejemplo
    /// para ejercer la ventana temporal del resolver.
    pub fn insert_record(&self, record: JobRecord) -> Result<()> {
        self.lock(&self.jobs)?.insert(record.id, record);
        Ok(())
    }

    fn mutate<F>(&self, job_id: &Uuid, f: F) -> Result<()>
        where F: FnOnce(&mut JobRecord)
    {
        let mut jobs = self.lock(&self.jobs)?;
        let job = jobs.get_mut(job_id).ok_or(StoreError::NotFound(format!("job {}", job_id)))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRepository for InMemoryJobRepository {
    /// Crea un nuevo job en memoria. Genera id y timestamps y devuelve el id.
    fn create_job(&self, job: NewJob) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = JobRecord { id,
                                 kind: job.kind,
                                 status: job.status,
                                 stage: job.stage,
                                 active_task_ref: job.active_task_ref,
                                 pipeline_state: job.pipeline_state,
                                 inputs: job.inputs,
                                 outputs: Vec::new(),
                                 error: None,
                                 created_at: now,
                                 updated_at: now,
                                 completed_at: None };
        self.lock(&self.jobs)?.insert(id, record);
        Ok(id)
    }

    /// Obtiene el registro del job. `NotFound` si no existe.
    fn get_job(&self, job_id: &Uuid) -> Result<JobRecord> {
        let jobs = self.lock(&self.jobs)?;
        jobs.get(job_id)
            .cloned()
            .ok_or(StoreError::NotFound(format!("job {}", job_id)))
    }

    fn find_by_active_task(&self, task_ref: &str) -> Result<Option<JobRecord>> {
        let jobs = self.lock(&self.jobs)?;
        Ok(jobs.values()
               .find(|j| j.active_task_ref.as_deref() == Some(task_ref))
               .cloned())
    }

    /// Lista jobs no terminales dentro de la ventana, más recientes primero,
    /// acotado a `cap`.
    fn list_recent_active(&self, window: chrono::Duration, cap: i64) -> Result<Vec<JobRecord>> {
        let cutoff = Utc::now() - window;
        let jobs = self.lock(&self.jobs)?;
        let mut recent: Vec<JobRecord> = jobs.values()
                                             .filter(|j| !j.is_terminal() && j.created_at >= cutoff)
                                             .cloned()
                                             .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(cap.max(0) as usize);
        Ok(recent)
    }

    /// Compare-and-set sobre `stage`: sólo gana el caller que observa la
    /// etapa esperada. El lock del mutex hace atómica la comparación, igual
    /// que lo haría el UPDATE condicional en la implementación relacional.
    fn claim_stage(&self, job_id: &Uuid, expected_stage: &str, new_stage: &str) -> Result<ClaimResult> {
        let mut jobs = self.lock(&self.jobs)?;
        let job = jobs.get_mut(job_id).ok_or(StoreError::NotFound(format!("job {}", job_id)))?;
        if job.stage != expected_stage {
            return Ok(ClaimResult::Lost);
        }
        job.stage = new_stage.to_string();
        job.updated_at = Utc::now();
        Ok(ClaimResult::Won)
    }

    fn set_active_task(&self, job_id: &Uuid, task_ref: Option<&str>) -> Result<()> {
        self.mutate(job_id, |job| job.active_task_ref = task_ref.map(|s| s.to_string()))
    }

    /// Merge superficial: las claves del patch sobreescriben, el resto del
    /// blob se preserva intacto.
    fn merge_pipeline_state(&self, job_id: &Uuid, patch: &serde_json::Value) -> Result<()> {
        self.mutate(job_id, |job| {
            if let (Some(base), Some(extra)) = (job.pipeline_state.as_object_mut(), patch.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            } else {
                job.pipeline_state = patch.clone();
            }
        })
    }

    fn append_outputs(&self, job_id: &Uuid, urls: &[String]) -> Result<()> {
        self.mutate(job_id, |job| job.outputs.extend(urls.iter().cloned()))
    }

    /// Nota informativa de progreso. Nunca toca la etapa y es no-op en
    /// jobs terminales.
    fn set_progress_note(&self, job_id: &Uuid, note: &str) -> Result<()> {
        self.mutate(job_id, |job| {
            if !job.is_terminal() {
                job.status = note.to_string();
            }
        })
    }

    fn mark_completed(&self, job_id: &Uuid, note: Option<&str>) -> Result<()> {
        self.mutate(job_id, |job| {
            if job.is_terminal() {
                return;
            }
            job.status = STATUS_COMPLETED.to_string();
            job.stage = STATUS_COMPLETED.to_string();
            job.active_task_ref = None;
            job.error = note.map(|s| s.to_string());
            job.completed_at = Some(Utc::now());
        })
    }

    fn mark_failed(&self, job_id: &Uuid, reason: &str) -> Result<()> {
        self.mutate(job_id, |job| {
            if job.is_terminal() {
                return;
            }
            job.status = STATUS_FAILED.to_string();
            job.stage = STATUS_FAILED.to_string();
            job.error = Some(reason.to_string());
        })
    }

    /// Insert bajo clave única `(job_id, task_id)`. El duplicado se detecta
    /// aquí igual que lo haría la restricción UNIQUE de la BD.
    fn insert_completion(&self, job_id: &Uuid, task_id: &str, urls: &[String]) -> Result<InsertOutcome> {
        let mut completions = self.lock(&self.completions)?;
        let key = (*job_id, task_id.to_string());
        if completions.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        completions.insert(key, CompletionRecord { job_id: *job_id,
                                                   task_id: task_id.to_string(),
                                                   urls: urls.to_vec(),
                                                   created_at: Utc::now() });
        Ok(InsertOutcome::Recorded)
    }

    fn count_completions(&self, job_id: &Uuid) -> Result<i64> {
        let completions = self.lock(&self.completions)?;
        Ok(completions.keys().filter(|(jid, _)| jid == job_id).count() as i64)
    }

    fn list_completions(&self, job_id: &Uuid) -> Result<Vec<CompletionRecord>> {
        let completions = self.lock(&self.completions)?;
        Ok(completions.values().filter(|c| &c.job_id == job_id).cloned().collect())
    }
}
