// stubs.rs
//
// Colaboradores en memoria para pruebas y wiring rápido. No hacen red:
// registran lo que se les pide y devuelven resultados deterministas.
use crate::{AssetStore, GenerationProvider, GenerationRequest, JobSummary, ProviderError, ReportingSink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Proveedor stub: asigna ids secuenciales (`stub-task-N`) y guarda cada
/// petición para que las pruebas inspeccionen qué se sometió.
pub struct StubGenerationProvider {
  submissions: Mutex<Vec<(GenerationRequest, String)>>,
  counter: AtomicU64,
  fail_submissions: AtomicBool,
}

impl StubGenerationProvider {
  pub fn new() -> Self {
    Self { submissions: Mutex::new(Vec::new()),
           counter: AtomicU64::new(0),
           fail_submissions: AtomicBool::new(false) }
  }

  /// Hace fallar todas las sumisiones con un error retryable.
  pub fn set_failing(&self, failing: bool) {
    self.fail_submissions.store(failing, Ordering::SeqCst);
  }

  pub fn submission_count(&self) -> usize {
    self.submissions.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn submitted(&self) -> Vec<GenerationRequest> {
    self.submissions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(req, _)| req.clone())
        .collect()
  }

  /// Último task id emitido, si hay alguno.
  pub fn last_task_id(&self) -> Option<String> {
    self.submissions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .last()
        .map(|(_, id)| id.clone())
  }
}

impl Default for StubGenerationProvider {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl GenerationProvider for StubGenerationProvider {
  async fn submit(&self, request: &GenerationRequest, _webhook_url: &str) -> Result<String, ProviderError> {
    if self.fail_submissions.load(Ordering::SeqCst) {
      return Err(ProviderError::RateLimited("stub: rechazo configurado".into()));
    }
    let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let task_id = format!("stub-task-{}", n);
    self.submissions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push((request.clone(), task_id.clone()));
    Ok(task_id)
  }
}

/// Registro de una subida realizada por el stub del almacén de assets.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
  pub source_url: String,
  pub folder: String,
  pub crop_ratio: Option<String>,
}

/// Almacén stub: convierte cada URL efímera en `perm://{folder}/{n}` y
/// registra la relación de recorte pedida. En modo fallo devuelve siempre un
/// error retryable, para ejercer el agotamiento de reintentos.
pub struct StubAssetStore {
  uploads: Mutex<Vec<RecordedUpload>>,
  counter: AtomicU64,
  failing: AtomicBool,
}

impl StubAssetStore {
  pub fn new() -> Self {
    Self { uploads: Mutex::new(Vec::new()), counter: AtomicU64::new(0), failing: AtomicBool::new(false) }
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn uploads(&self) -> Vec<RecordedUpload> {
    self.uploads.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  async fn record(&self, url: &str, folder: &str, crop_ratio: Option<&str>) -> Result<String, ProviderError> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(ProviderError::Upload("stub: almacén no disponible".into()));
    }
    let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
    self.uploads.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedUpload {
      source_url: url.to_string(),
      folder: folder.to_string(),
      crop_ratio: crop_ratio.map(|s| s.to_string()),
    });
    Ok(format!("perm://{}/{}", folder, n))
  }
}

impl Default for StubAssetStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl AssetStore for StubAssetStore {
  async fn upload_permanent(&self, url: &str, folder: &str) -> Result<String, ProviderError> {
    self.record(url, folder, None).await
  }

  async fn upload_and_crop(&self, url: &str, ratio: &str, folder: &str) -> Result<String, ProviderError> {
    self.record(url, folder, Some(ratio)).await
  }
}

/// Sink stub: cuenta exportaciones y guarda el último resumen.
pub struct CountingReportingSink {
  exported: AtomicUsize,
  last: Mutex<Option<JobSummary>>,
}

impl CountingReportingSink {
  pub fn new() -> Self {
    Self { exported: AtomicUsize::new(0), last: Mutex::new(None) }
  }

  pub fn exported_count(&self) -> usize {
    self.exported.load(Ordering::SeqCst)
  }

  pub fn last_summary(&self) -> Option<JobSummary> {
    self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl Default for CountingReportingSink {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ReportingSink for CountingReportingSink {
  async fn export(&self, summary: &JobSummary) -> Result<(), ProviderError> {
    self.exported.fetch_add(1, Ordering::SeqCst);
    *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(summary.clone());
    Ok(())
  }
}
