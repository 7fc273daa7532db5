pub mod common;
pub mod domain;

pub use common::error::{ErrorKind, MapperError, Result};
pub use domain::*;
