pub mod annotation;
pub mod config;
pub mod error;
pub mod event_group;
pub mod meta;


pub use annotation::*;
pub use config::*;
pub use error::*;
pub use event_group::*;
pub use meta::*;
