#[macro_use]
extern crate log;
extern crate chrono;
extern crate common;
extern crate image;
extern crate stoppable_thread;
extern crate thiserror;

pub mod conn;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod session;
pub mod stats;
mod supervisor;
pub mod video;

pub use error::ClientError;
pub use events::{Event, Events};
pub use session::CameraClient;
pub use stats::CameraStats;
pub use video::VideoFrame;
