//! Internet speed meter: parallel throughput and latency testing against
//! public speed test servers.

pub mod history;
pub mod settings;
pub mod speedtest;
