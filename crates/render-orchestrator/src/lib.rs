//! render-orchestrator: motor de orquestación de jobs de generación
//!
//! Reacciona a callbacks asíncronos de proveedores de generación de
//! imágenes y lleva cada job multi-etapa hasta su estado terminal:
//! verificación de firma, resolución del job, agregación fan-in
//! idempotente, transiciones de etapa con claim condicional,
//! materialización de salidas y efectos posteriores (realce, export).

pub mod aggregator;
pub mod controller;
pub mod errors;
pub mod export;
pub mod handler;
pub mod materializer;
pub mod resolver;
pub mod signature;
pub mod spawner;

pub use aggregator::FanInAggregator;
pub use controller::{ControllerConfig, Disposition, StageController};
pub use errors::OrchestratorError;
pub use handler::{CallbackAck, CallbackHandler, CallbackOutcome, CallbackQuery, WebhookHeaders};
pub use materializer::OutputMaterializer;
pub use resolver::JobResolver;
pub use signature::{SignatureError, WebhookVerifier};
pub use spawner::FollowOnSpawner;
