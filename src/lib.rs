pub mod cli;
pub mod collector;
pub mod config;
pub mod intake;
pub mod pipeline;
pub mod resolver;
pub mod response;
pub mod util;
pub mod worker;
