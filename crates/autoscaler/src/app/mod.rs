//! Application module
//!
//! Assembly of the autoscaler from its configuration, and the lifecycle of
//! the tasks it runs.

pub mod application;
pub mod builder;
pub mod tasks;

pub use application::Application;
pub use builder::ApplicationBuilder;
