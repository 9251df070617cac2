pub mod calendar;
pub mod error;
pub mod models;

pub use error::{CoreError, StoreBusy};
pub use models::*;
