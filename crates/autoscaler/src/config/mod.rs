pub mod cli;
pub mod daemon;
pub mod node_groups;

pub use cli::*;
pub use daemon::*;
pub use node_groups::*;
