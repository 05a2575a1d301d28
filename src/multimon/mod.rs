//! Multi-Monitor Configuration Module
//!
//! Decides which physical outputs are lit, where they sit on the screen and
//! which scan-out engine (CRTC) drives each of them, and remembers the
//! layouts a user confirmed so the same monitors come back the same way.
//!
//! # Overview
//!
//! ```text
//!             ┌──────────────┐   lookup    ┌──────────────┐
//!  hotplug ──►│MonitorManager│────────────►│ ConfigStore  │◄── monitors.xml
//!  lid     ──►│ (lid, txn)   │             └──────────────┘
//!  control ──►│              │  no match   ┌──────────────┐
//!             │              │────────────►│LayoutSynth.  │
//!             │              │             └──────────────┘
//!             │              │  candidate  ┌──────────────┐
//!             │              │────────────►│ CRTC solver  │
//!             └──────┬───────┘             └──────────────┘
//!                    │ CRTC assignments
//!                    ▼
//!             ┌──────────────┐
//!             │DisplayBackend│
//!             └──────────────┘
//! ```
//!
//! # Identity
//!
//! A [`Configuration`] is keyed by the ordered list of connected monitors,
//! each named by connector plus EDID vendor, product and serial. The store
//! keeps at most one configuration per key; plugging the same monitors into
//! the same connectors finds it again.
//!
//! # Recovery chain
//!
//! When the hardware changes, [`MonitorManager::ensure_configuration`] tries
//! in order:
//!
//! 1. the stored configuration for the exact set of monitors
//! 2. each synthesized candidate ([`LayoutStrategy`])
//! 3. the emergency configuration: only the primary output, at its
//!    preferred mode
//!
//! Every step is checked by the solver before reaching the backend, so a
//! failing step never touches the hardware.
//!
//! # Lid
//!
//! While the lid is closed every apply goes through [`lid_reduced`], which
//! switches the built-in panel off and moves the outputs past it over.
//!
//! # Example
//!
//! ```no_run
//! use lamco_display_config::multimon::{
//!     ConfigStore, MonitorManager, MultiMonitorConfig, Resources, SimulatedBackend,
//! };
//!
//! # fn example(resources: Resources) -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = ConfigStore::new("/home/user/.config/monitors.xml");
//! store.load(&["/home/user/.config/monitors.xml", "/etc/xdg/monitors.xml"]);
//!
//! let backend = SimulatedBackend::new(resources);
//! let mut manager = MonitorManager::new(backend, store, MultiMonitorConfig::default());
//! manager.ensure_configuration()?;
//!
//! manager.handle_lid(true)?;
//! # Ok(())
//! # }
//! ```

mod assign;
mod backend;
mod configuration;
mod control;
mod layout;
mod lid;
mod manager;
mod persist;
mod resources;
mod store;

pub use assign::{assign, Assignment, AssignError, CrtcAssignment, OutputAssignment};
pub use backend::{ApplyReport, BackendError, DisplayBackend, GammaRamp, SimulatedBackend};
pub use configuration::{ConfigKey, Configuration, ConfigurationError, OutputIdentity, OutputSettings};
pub use control::{ControlError, CrtcSpec, OutputSpec, ResourcesReply};
pub use layout::{choose_primary, LayoutError, LayoutStrategy, LayoutSynthesizer, MAX_OUTPUTS_PER_MONITOR};
pub use lid::{enabled_laptop_panel, lid_reduced};
pub use manager::{MonitorEvent, MonitorManager, MultiMonitorConfig, PendingConfirmation};
pub use persist::{parse, serialize, ParseError};
pub use resources::{
    Backlight, ConnectorType, Crtc, CrtcId, Mode, ModeId, Output, OutputId, Rect, Resources, TileInfo, Transform,
    TransformSet,
};
pub use store::{ConfigStore, StoreError};

use thiserror::Error;

/// Multi-monitor result type
pub type Result<T> = std::result::Result<T, MultiMonitorError>;

/// Multi-monitor error types
#[derive(Error, Debug)]
pub enum MultiMonitorError {
    /// Layout synthesis failed
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// No CRTC assignment exists
    #[error("Assignment error: {0}")]
    Assign(#[from] AssignError),

    /// Store could not be read or written
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration was malformed
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Backend request failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Control request rejected
    #[error("Control request rejected: {0}")]
    Control(#[from] ControlError),

    /// Even the single-output fallback could not be applied
    #[error("Emergency configuration could not be applied")]
    EmergencyUnsatisfiable,
}
