#[macro_use]
pub mod run_all;
pub mod timestamp;

pub use timestamp::timestamp_now_ms;
