pub mod backends;
pub mod mapper;

pub use mapper::{MapReport, RpcMapper, ScanStats};
