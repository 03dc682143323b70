//! Crate `jobstore` — tipos y traits para la persistencia de jobs
//!
//! Este crate define los tipos de registro (`JobRecord`, `CompletionRecord`),
//! el contrato de persistencia `JobRepository` y una implementación en memoria
//! útil para pruebas (`InMemoryJobRepository`). Todo el estado de coordinación
//! entre callbacks concurrentes vive en el repositorio durable; este crate no
//! contiene locks de proceso compartidos.
//!
//! Diseño resumido:
//! - Mutaciones estrechas e idempotentes: insert con clave única para los
//!   registros de completitud y update condicional (compare-and-set) sobre
//!   `stage` para las transiciones de etapa (`ClaimResult::Won|Lost`).
//! - Idempotencia: la clave compuesta `(job_id, task_id)` deduplica entregas
//!   repetidas del mismo callback (`InsertOutcome::Duplicate`).
//! - Estados terminales inmutables: `mark_completed`/`mark_failed` son no-op
//!   cuando el job ya terminó.
//!
//! Ejemplo rápido:
//! ```rust
//! use jobstore::stubs::InMemoryJobRepository;
//! let repo = InMemoryJobRepository::new();
//! ```
pub mod domain;
pub mod errors;
pub mod repository;
pub mod stubs;

pub use domain::*;
pub use errors::*;
pub use repository::*;
pub use stubs::*;
