pub mod logger;
pub mod settings;
