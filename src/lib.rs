pub mod app;
pub mod db;
pub mod error;
pub mod utils;
pub mod workbench;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::App;
pub use error::{WorkbenchError, WorkbenchResult};
