#[macro_use]
extern crate log;
extern crate chrono;
extern crate common;
extern crate image;
extern crate log4rs;
extern crate log_panics;
extern crate rand;
extern crate simple_error;

pub mod capture;
pub mod conn;
pub mod registry;
pub mod utils;
#[cfg(all(feature = "v4l", target_os = "linux"))]
pub mod v4l;

pub use capture::{Capture, CaptureSource, SourceFactory, TestPattern};
pub use conn::{ServerState, ShutdownHandle, StreamServer};
