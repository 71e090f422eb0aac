pub mod error;
pub mod pipeline;
pub mod processing;
pub mod rate;
pub mod replay;
pub mod sink;
pub mod worker;
