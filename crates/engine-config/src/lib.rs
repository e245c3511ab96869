pub mod env;
pub mod error;
pub mod plan;
pub mod settings;
