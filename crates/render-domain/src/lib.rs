mod errors;
mod kind;
mod stage;
mod state;
mod validation;

pub use errors::DomainError;
pub use kind::JobKind;
pub use stage::{FanInStage, LinearStage, SingleStage, STAGE_COMPLETED};
pub use state::{crop_ratio_for, FanInState, LinearChainState, PipelineState, SingleState};
pub use validation::filter_http_urls;
