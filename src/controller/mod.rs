pub mod analysis;
pub mod clock;
pub mod rollout;
pub mod traffic;

pub use analysis::reconcile_analysis_run;
pub use rollout::{reconcile, Context, ReconcileError};
