pub mod scaler;
pub mod scan_loop;
pub mod state;
pub mod view;

pub use scaler::GroupStats;
pub use scaler::NoOpReason;
pub use scaler::ScalingDecision;
pub use scan_loop::Controller;
pub use scan_loop::GroupOutcome;
pub use scan_loop::SkipReason;
pub use state::ActionKind;
pub use state::GroupPhase;
pub use state::GroupState;
pub use view::ClusterView;
pub use view::ViewError;
