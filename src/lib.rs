pub mod cli;
pub mod relay;
