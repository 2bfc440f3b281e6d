pub mod config;
pub mod errors;
pub mod measurement;
pub mod value;
pub mod variant;

pub use config::*;
pub use errors::*;
pub use measurement::*;
pub use value::*;
pub use variant::*;
