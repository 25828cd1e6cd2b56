pub mod dispatch;
pub mod engine;
pub mod flows;
pub mod stats;

pub use dispatch::*;
pub use engine::*;
pub use flows::*;
pub use stats::*;
