pub mod encoder;
pub mod flags;
pub mod types;
