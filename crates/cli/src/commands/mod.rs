pub mod config;
pub mod scan;
pub mod summarize;
pub mod util;

pub use config::*;
pub use scan::*;
pub use summarize::*;
pub use util::*;
