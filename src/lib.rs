//! # lamco-display-config
//!
//! Monitor configuration policy for a Linux display server: which outputs
//! are lit, where they sit, and which CRTC drives each of them.
//!
//! # Architecture
//!
//! ```text
//! lamco-display-config
//!   ├─> Configuration Store (monitors.xml, one layout per monitor set)
//!   ├─> Layout Synthesizer (fallback layouts for unknown monitor sets)
//!   ├─> CRTC Solver (backtracking output → CRTC assignment)
//!   ├─> Monitor Manager (lid policy, confirm-or-revert transactions)
//!   └─> Display Service (event loop, control requests, confirmation timer)
//! ```
//!
//! # Data Flow
//!
//! **Hotplug:** Backend → Display Service → Store lookup / Synthesizer → Solver → Backend
//!
//! **Control:** Client → Display Service → Validation → Backend → Confirmation timer
//!
//! **Confirm:** Client → Display Service → Store → `monitors.xml`

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Daemon configuration
pub mod config;

/// Multi-monitor configuration policy
pub mod multimon;

/// Display service event loop
pub mod server;

/// Utility functions
pub mod utils;
