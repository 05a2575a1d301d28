//! Utility Functions
//!
//! User-friendly error formatting for the command-line front end.
//!
//! ## Error Formatting
//!
//! The [`errors`] module turns an [`anyhow::Error`] into a message with
//! troubleshooting hints:
//!
//! ```rust
//! use lamco_display_config::utils::format_user_error;
//!
//! let error = anyhow::anyhow!("Failed to parse config file");
//! eprintln!("{}", format_user_error(&error));
//! ```
//!
//! Error categories with context-aware help:
//! - Stored layout errors → File validity, version, permissions
//! - Unsatisfiable layouts → CRTC count, modes, mirroring
//! - Config errors → Syntax validation, value ranges

pub mod errors;

pub use errors::format_user_error;
