//! Playback core of a desktop music player whose catalogue lives on
//! Bilibili: link resolution, a loopback media proxy, an audio cache and the
//! login session.

pub mod bili;
pub mod cache;
pub mod credentials;
pub mod downloads;
pub mod error;
pub mod history;
pub mod library;
pub mod logging;
pub mod paths;
pub mod resolver;
pub mod server;
pub mod service;
pub mod settings;
pub mod theme_images;
pub mod utils;

pub use error::{Error, Result};
pub use paths::PathConfig;
pub use service::Service;
pub use settings::Settings;
