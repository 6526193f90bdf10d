pub mod filter;
pub mod parser;
pub mod transform;
pub mod types;

pub use transform::BeltTransformer;
pub use types::MotionCommand;
