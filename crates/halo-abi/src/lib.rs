//! Halo ABI crate: contracts shared by the orchestration core and inference runtimes.

pub mod backend;
pub mod error;
pub mod metadata;
pub mod params;
pub mod token;

pub use backend::*;
pub use error::*;
pub use metadata::*;
pub use params::*;
pub use token::*;
