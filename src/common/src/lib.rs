#[macro_use]
extern crate log;
extern crate config;
extern crate serde;
extern crate serde_json;
extern crate simple_error;

pub mod conn;
pub mod error;
pub mod messages;
pub mod settings;
pub mod types;

pub use error::ProtocolError;
