pub mod broker;
pub mod cli;
pub mod committer;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod sink;
pub mod stats;
pub mod warehouse;
pub mod worker;
