pub mod call;
pub mod config;

pub use self::call::*;
pub use self::config::*;
