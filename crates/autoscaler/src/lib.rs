pub mod actions;
pub mod app;
pub mod config;
pub mod controller;
pub mod k8s;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod registry;
