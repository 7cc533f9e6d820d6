pub mod cli;
pub mod context;
pub mod error;
pub mod filter;
pub mod http_server;
pub mod metrics;
pub mod storage;
pub mod types;
#[macro_use]
pub mod util;
pub mod worker;
