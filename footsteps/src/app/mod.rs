//! Application assembly.
//!
//! [`FootstepsContext`] is the single, explicitly constructed owner of the
//! process-wide services. Consumers receive it (or clones of its parts)
//! instead of reaching for globals.
//!
//! # Example
//!
//! ```ignore
//! use footsteps::app::{AppConfig, FootstepsContext};
//! use footsteps::config::ConfigFile;
//!
//! let config = AppConfig::from_config_file(&ConfigFile::load()?);
//! let context = FootstepsContext::new(config)?;
//! let year = context.spawn_year_crossfade(1500);
//! ```

mod config;
mod context;
mod error;

pub use config::{AppConfig, MbtilesAppConfig};
pub use context::{FootstepsContext, USER_AGENT};
pub use error::AppError;
