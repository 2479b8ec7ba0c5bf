pub mod checker;
pub mod cli;
pub mod core;
pub mod video;
