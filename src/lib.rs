//! Messaging and per-tab dispatch core for an accessibility-auditing browser
//! extension.
//!
//! The crate is organised around three concerns:
//!
//! - [`messaging`]: a typed envelope over cross-window `postMessage`, a
//!   per-window [`messaging::MessageHandler`] that correlates requests with
//!   replies and routes commands to subscribers, a frame communicator that
//!   adds liveness pings, deadlines and cascading disposal on top, and the
//!   debounced pointer query that forwards clicks and hovers to a frame.
//! - [`tabs`]: one isolated interpreter plus store set per browser tab, and
//!   the controller that keeps them in step with tab lifecycle events.
//! - [`commands`]: keyboard commands that toggle visualizations after the
//!   first-run, URL and scan guards pass.
//!
//! Browser APIs sit behind [`browser::BrowserAdapter`] and window messaging
//! behind [`messaging::Transport`], so everything runs on a single thread
//! without a browser attached.

pub mod browser;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod tabs;
pub mod user_config;
pub mod visualization;

pub use error::{Error, Result};
