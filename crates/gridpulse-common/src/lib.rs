pub mod error;
pub mod header;
pub mod value;

pub use error::*;
pub use header::*;
pub use value::*;
