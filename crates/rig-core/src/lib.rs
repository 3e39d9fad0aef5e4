pub mod cache;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod model;
pub mod stats;
pub mod submitter;
pub mod version;

pub use cache::*;
pub use config::*;
pub use dispatch::*;
pub use handler::*;
pub use model::*;
pub use stats::*;
pub use submitter::*;
pub use version::*;
