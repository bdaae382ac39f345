mod classify;
mod format;
mod script;
mod types;

pub use classify::*;
pub use format::SqlFormatter;
pub use script::*;
pub use types::*;
