//! Implementación Diesel del trait `JobRepository`.
//! Este archivo expone el módulo `schema` y reexporta el repositorio Diesel
//! que implementa el contrato de persistencia de jobs. La implementación
//! detallada está en `job_persistence.rs`.

mod job_persistence;
pub mod schema;

pub use job_persistence::{new_from_env, new_sqlite_for_test, DieselJobRepository};
