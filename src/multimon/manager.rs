//! Monitor Manager
//!
//! Owns the live configuration state and every policy that changes it:
//! applying through the solver, lid handling, hotplug recovery and the
//! confirm-or-revert transaction for externally requested changes.
//!
//! The manager is synchronous and single-owner. Timing (the confirmation
//! deadline) is exposed as data; the event loop in [`crate::server`] sleeps
//! on it and calls back into [`MonitorManager::handle_confirmation_timeout`].

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::multimon::assign::{assign, CrtcAssignment, OutputAssignment};
use crate::multimon::backend::{ApplyReport, DisplayBackend};
use crate::multimon::configuration::{ConfigKey, Configuration, ConfigurationError};
use crate::multimon::layout::{LayoutError, LayoutSynthesizer};
use crate::multimon::lid::lid_reduced;
use crate::multimon::resources::Resources;
use crate::multimon::store::ConfigStore;
use crate::multimon::{MultiMonitorError, Result};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Monitor event types
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Hardware was re-read
    ResourcesChanged {
        /// New serial
        serial: u32,
    },

    /// A configuration was applied
    ConfigurationApplied {
        /// New serial
        serial: u32,
        /// Applied configuration is lid-reduced
        for_lid: bool,
    },

    /// A persistent change awaits confirmation
    ConfirmationPending {
        /// Transaction ID
        id: u64,
        /// Time left before it reverts
        timeout: Duration,
    },

    /// A pending change was kept or reverted
    ConfirmationResolved {
        /// Transaction ID
        id: u64,
        /// True if kept
        kept: bool,
    },

    /// Lid state changed
    LidChanged {
        /// Lid is closed
        closed: bool,
    },
}

/// Manager settings
#[derive(Debug, Clone)]
pub struct MultiMonitorConfig {
    /// Time a persistent change waits for confirmation
    pub confirmation_timeout: Duration,

    /// Enable extending stored configurations on hotplug
    pub allow_extend: bool,
}

impl Default for MultiMonitorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(20),
            allow_extend: true,
        }
    }
}

/// Persistent change awaiting confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfirmation {
    /// Transaction ID, passed back on timeout
    pub id: u64,

    /// Revert deadline
    pub deadline: Instant,
}

/// Monitor manager coordinates configuration state
pub struct MonitorManager<B: DisplayBackend> {
    /// Settings
    config: MultiMonitorConfig,

    /// Display hardware
    backend: B,

    /// Known-good configurations
    store: ConfigStore,

    /// Hardware snapshot of the current cycle
    resources: Resources,

    /// Bumped on every re-read and every apply
    serial: u32,

    /// Live configuration
    current: Option<Configuration>,

    /// Configuration live before the last apply
    previous: Option<Configuration>,

    /// `current` is a lid-reduced derivation
    current_is_for_lid: bool,

    /// Last reported lid state
    lid_closed: bool,

    /// Pending transaction
    pending: Option<PendingConfirmation>,

    /// Last issued transaction ID
    last_confirmation_id: u64,

    /// Observers
    events: broadcast::Sender<MonitorEvent>,
}

impl<B: DisplayBackend> MonitorManager<B> {
    /// Create a manager over `backend` with an already loaded `store`
    ///
    /// Nothing is applied until [`MonitorManager::ensure_configuration`].
    pub fn new(backend: B, store: ConfigStore, config: MultiMonitorConfig) -> Self {
        let resources = backend.resources();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        debug!(
            "Monitor manager created: {} outputs, {} CRTCs, {} modes",
            resources.outputs.len(),
            resources.crtcs.len(),
            resources.modes.len()
        );

        Self {
            config,
            backend,
            store,
            resources,
            serial: 1,
            current: None,
            previous: None,
            current_is_for_lid: false,
            lid_closed: false,
            pending: None,
            last_confirmation_id: 0,
            events,
        }
    }

    /// Subscribe to monitor events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Display backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable display backend
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Configuration store
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Mutable configuration store
    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    /// Hardware snapshot of the current cycle
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Current configuration serial
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Live configuration
    pub fn current(&self) -> Option<&Configuration> {
        self.current.as_ref()
    }

    /// Configuration live before the last apply
    pub fn previous(&self) -> Option<&Configuration> {
        self.previous.as_ref()
    }

    /// True if the live configuration is lid-reduced
    pub fn current_is_for_lid(&self) -> bool {
        self.current_is_for_lid
    }

    /// Last reported lid state
    pub fn is_lid_closed(&self) -> bool {
        self.lid_closed
    }

    /// Pending transaction, if any
    pub fn pending_confirmation(&self) -> Option<PendingConfirmation> {
        self.pending
    }

    /// Deadline of the pending transaction, if any
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    // ------------------------------------------------------------------------
    // Applying
    // ------------------------------------------------------------------------

    /// Apply `config` as is
    ///
    /// # Errors
    ///
    /// Returns [`MultiMonitorError::Assign`] if no CRTC assignment exists;
    /// nothing changes in that case.
    pub fn apply(&mut self, config: &Configuration) -> Result<ApplyReport> {
        self.apply_with(config, false)
    }

    /// Apply `config`, switching the laptop panel off while the lid is closed
    pub fn apply_respecting_lid(&mut self, config: &Configuration) -> Result<ApplyReport> {
        if self.lid_closed {
            if let Some(reduced) = lid_reduced(config, &self.resources) {
                return self.apply_with(&reduced, true);
            }
        }

        self.apply_with(config, false)
    }

    fn apply_with(&mut self, config: &Configuration, for_lid: bool) -> Result<ApplyReport> {
        let assignment = assign(config, &self.resources)?;
        let report = self.backend.apply(&assignment.crtcs, &assignment.outputs);

        if report.is_partial() {
            warn!(
                "Configuration applied partially, CRTCs left off: {:?}",
                report.failed_crtcs
            );
        }

        self.previous = self.current.replace(config.clone());
        self.current_is_for_lid = for_lid;
        self.refresh_resources();

        info!(
            "Applied configuration with {} of {} outputs enabled (serial {})",
            config.enabled_count(),
            config.len(),
            self.serial
        );
        self.emit(MonitorEvent::ConfigurationApplied {
            serial: self.serial,
            for_lid,
        });

        Ok(report)
    }

    /// Apply raw CRTC assignments and snapshot the result as current
    ///
    /// Used by the control surface, which has already validated them.
    pub(crate) fn apply_assignments(
        &mut self,
        crtcs: &[CrtcAssignment],
        outputs: &[OutputAssignment],
        persistent: bool,
    ) -> std::result::Result<ApplyReport, ConfigurationError> {
        let report = self.backend.apply(crtcs, outputs);
        if report.is_partial() {
            warn!("Requested configuration applied partially: {:?}", report.failed_crtcs);
        }

        self.refresh_resources();
        let snapshot = Configuration::from_resources(&self.resources)?;

        self.previous = self.current.replace(snapshot);
        self.current_is_for_lid = false;

        info!("Applied requested configuration (serial {}, persistent: {})", self.serial, persistent);
        self.emit(MonitorEvent::ConfigurationApplied {
            serial: self.serial,
            for_lid: false,
        });

        if persistent {
            self.begin_confirmation();
        }

        Ok(report)
    }

    /// Put back the configuration live before the last apply
    ///
    /// `previous` is consumed either way. Without one, or if it no longer
    /// applies, the recovery chain picks a configuration.
    pub fn restore_previous(&mut self) -> Result<()> {
        let Some(previous) = self.previous.take() else {
            debug!("No previous configuration, running recovery");
            return self.ensure_configuration();
        };

        match self.apply_respecting_lid(&previous) {
            Ok(_) => {
                self.previous = None;
                info!("Restored previous configuration");
                Ok(())
            }
            Err(e) => {
                warn!("Previous configuration no longer applies: {}", e);
                self.previous = None;
                self.ensure_configuration()
            }
        }
    }

    /// Make sure some configuration is live for the current hardware
    ///
    /// Tries the stored configuration, then each synthesized candidate, then
    /// the emergency single-output configuration. A configuration that
    /// enables no output is never applied while outputs exist.
    ///
    /// # Errors
    ///
    /// [`MultiMonitorError::EmergencyUnsatisfiable`] if even the emergency
    /// configuration cannot be applied.
    pub fn ensure_configuration(&mut self) -> Result<()> {
        if self.resources.outputs.is_empty() {
            info!("No monitors connected, nothing to configure");
            return Ok(());
        }

        let key = ConfigKey::from_outputs(&self.resources.outputs);
        if let Some(stored) = self.store.lookup(&key) {
            if stored.enabled_count() == 0 {
                warn!("Stored configuration enables no output, ignoring it");
            } else {
                match self.apply_respecting_lid(&stored) {
                    Ok(_) => {
                        info!("Applied stored configuration");
                        return Ok(());
                    }
                    Err(e) => warn!("Stored configuration does not apply: {}", e),
                }
            }
        }

        let resources = self.resources.clone();
        let allow_extend = self.config.allow_extend && !self.backend.has_hotplug_mode_update(&resources);
        let synthesizer = LayoutSynthesizer::new(&resources, self.backend.screen_limits()).allow_extend(allow_extend);

        let candidates = match synthesizer.candidates(&self.store) {
            Ok(candidates) => candidates,
            Err(LayoutError::NoMonitors) => return Ok(()),
            Err(e) => {
                warn!("Layout synthesis failed: {}", e);
                Vec::new()
            }
        };

        for (strategy, candidate) in candidates {
            if candidate.enabled_count() == 0 {
                debug!("{} layout enables no output, skipping it", strategy);
                continue;
            }
            match self.apply_respecting_lid(&candidate) {
                Ok(_) => {
                    info!("Applied {} layout", strategy);
                    return Ok(());
                }
                Err(e) => debug!("{} layout rejected: {}", strategy, e),
            }
        }

        let emergency = synthesizer.emergency()?;
        self.apply_respecting_lid(&emergency).map_err(|e| {
            error!("Emergency configuration could not be applied: {}", e);
            MultiMonitorError::EmergencyUnsatisfiable
        })?;

        Ok(())
    }

    // ------------------------------------------------------------------------
    // External signals
    // ------------------------------------------------------------------------

    /// Re-read hardware after a hotplug and reconfigure
    pub fn handle_hotplug(&mut self) -> Result<()> {
        info!("Monitor hotplug detected");

        if let Some(pending) = self.pending.take() {
            debug!("Dropping confirmation {} after hotplug", pending.id);
        }

        self.refresh_resources();
        self.emit(MonitorEvent::ResourcesChanged { serial: self.serial });
        self.ensure_configuration()
    }

    /// React to a lid state change
    pub fn handle_lid(&mut self, closed: bool) -> Result<()> {
        if closed == self.lid_closed {
            return Ok(());
        }

        info!("Lid {}", if closed { "closed" } else { "opened" });
        self.lid_closed = closed;
        self.emit(MonitorEvent::LidChanged { closed });

        if closed {
            let reduced = self
                .current
                .as_ref()
                .and_then(|current| lid_reduced(current, &self.resources));
            match reduced {
                Some(reduced) => self.apply_with(&reduced, true).map(|_| ()),
                None => Ok(()),
            }
        } else if self.current_is_for_lid {
            match self.previous.clone() {
                Some(previous) => match self.apply_respecting_lid(&previous) {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!("Could not restore configuration after lid open: {}", e);
                        self.ensure_configuration()
                    }
                },
                None => self.ensure_configuration(),
            }
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Confirmation transaction
    // ------------------------------------------------------------------------

    fn begin_confirmation(&mut self) {
        self.last_confirmation_id += 1;
        let id = self.last_confirmation_id;
        let timeout = self.config.confirmation_timeout;

        let superseded = self.pending.replace(PendingConfirmation {
            id,
            deadline: Instant::now() + timeout,
        });
        if let Some(old) = superseded {
            debug!("Confirmation {} superseded by {}", old.id, id);
        }

        info!("Waiting {}s for confirmation {}", timeout.as_secs(), id);
        self.emit(MonitorEvent::ConfirmationPending { id, timeout });
    }

    /// Keep or revert the pending change
    ///
    /// Keeping stores the live configuration and saves the store.
    pub fn confirm(&mut self, keep: bool) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            debug!("No configuration awaiting confirmation");
            return Ok(());
        };

        self.emit(MonitorEvent::ConfirmationResolved { id: pending.id, kept: keep });

        if !keep {
            info!("Configuration {} reverted", pending.id);
            return self.restore_previous();
        }

        info!("Configuration {} confirmed", pending.id);
        let Some(current) = self.current.clone() else {
            return Ok(());
        };

        let unchanged = self
            .store
            .lookup(current.key())
            .is_some_and(|stored| stored.full_eq(&current));
        if unchanged {
            debug!("Confirmed configuration already stored");
            return Ok(());
        }

        self.store.insert_or_replace(current);
        self.store.save();
        Ok(())
    }

    /// Revert the pending change if `id` is still pending
    pub fn handle_confirmation_timeout(&mut self, id: u64) -> Result<()> {
        match self.pending {
            Some(pending) if pending.id == id => {
                info!("Configuration {} not confirmed in time", id);
                self.confirm(false)
            }
            _ => {
                debug!("Ignoring stale confirmation timeout {}", id);
                Ok(())
            }
        }
    }

    fn refresh_resources(&mut self) {
        self.resources = self.backend.resources();
        self.serial = self.serial.wrapping_add(1);
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::backend::SimulatedBackend;
    use crate::multimon::configuration::{OutputIdentity, OutputSettings};
    use crate::multimon::resources::{Crtc, Mode, Output, Rect, TransformSet};

    fn output(id: u32, name: &str, mode: u32) -> Output {
        let mut output = Output::new(id, name);
        output.vendor = "ACME".into();
        output.product = name.into();
        output.serial = "1".into();
        output.modes = vec![mode];
        output.preferred_mode = Some(mode);
        output.possible_crtcs = vec![10, 11];
        output
    }

    fn laptop_with_hdmi() -> Resources {
        Resources {
            modes: vec![
                Mode {
                    id: 1,
                    width: 1920,
                    height: 1080,
                    refresh_rate: 60.0,
                },
                Mode {
                    id: 2,
                    width: 2560,
                    height: 1440,
                    refresh_rate: 60.0,
                },
            ],
            crtcs: [10, 11]
                .into_iter()
                .map(|id| Crtc {
                    id,
                    rect: Rect::default(),
                    current_mode: None,
                    transform: Default::default(),
                    all_transforms: TransformSet::ALL,
                    gamma_size: 256,
                })
                .collect(),
            outputs: vec![output(1, "eDP-1", 1), output(2, "HDMI-1", 2)],
        }
    }

    fn side_by_side(resources: &Resources) -> Configuration {
        Configuration::new([
            (
                OutputIdentity::of(&resources.outputs[0]),
                OutputSettings::enabled(Rect::new(0, 0, 1920, 1080), 60.0).primary(true),
            ),
            (
                OutputIdentity::of(&resources.outputs[1]),
                OutputSettings::enabled(Rect::new(1920, 0, 2560, 1440), 60.0),
            ),
        ])
        .unwrap()
    }

    fn manager(resources: Resources) -> MonitorManager<SimulatedBackend> {
        MonitorManager::new(
            SimulatedBackend::new(resources),
            ConfigStore::new("/nonexistent/monitors.xml"),
            MultiMonitorConfig::default(),
        )
    }

    fn rect_of(manager: &MonitorManager<SimulatedBackend>, index: usize) -> Option<Rect> {
        let settings = manager.current().unwrap().settings()[index];
        settings.enabled.then_some(settings.rect)
    }

    // ========================================================================
    // Apply
    // ========================================================================

    #[test]
    fn test_apply_tracks_previous_and_serial() {
        let resources = laptop_with_hdmi();
        let config = side_by_side(&resources);
        let mut manager = manager(resources);
        let serial = manager.serial();

        manager.apply(&config).unwrap();
        assert!(manager.current().unwrap().ptr_eq(&config));
        assert!(manager.previous().is_none());
        assert!(manager.serial() > serial);

        let second = config.map_settings(|_, _, s| s);
        manager.apply(&second).unwrap();
        assert!(manager.previous().unwrap().ptr_eq(&config));
        assert!(manager.backend().resources().outputs[1].crtc.is_some());
    }

    #[test]
    fn test_unsatisfiable_apply_changes_nothing() {
        let resources = laptop_with_hdmi();
        let config = side_by_side(&resources);
        let mut manager = manager(resources);
        manager.apply(&config).unwrap();
        let serial = manager.serial();

        let bogus = config.map_settings(|_, _, s| OutputSettings {
            rect: Rect::new(s.rect.x, 0, 1000, 1000),
            ..s
        });
        assert!(matches!(manager.apply(&bogus), Err(MultiMonitorError::Assign(_))));
        assert!(manager.current().unwrap().ptr_eq(&config));
        assert_eq!(manager.serial(), serial);
        assert_eq!(manager.backend().apply_count(), 1);
    }

    // ========================================================================
    // Recovery chain
    // ========================================================================

    #[test]
    fn test_ensure_uses_stored_configuration() {
        let resources = laptop_with_hdmi();
        let stored = side_by_side(&resources).map_settings(|i, _, s| {
            if i == 1 {
                OutputSettings {
                    rect: Rect::new(0, 1080, 2560, 1440),
                    ..s
                }
            } else {
                s
            }
        });
        let mut manager = manager(resources);
        manager.store_mut().insert_or_replace(stored.clone());

        manager.ensure_configuration().unwrap();
        assert!(manager.current().unwrap().full_eq(&stored));
    }

    #[test]
    fn test_ensure_synthesizes_linear_layout() {
        let mut manager = manager(laptop_with_hdmi());
        manager.ensure_configuration().unwrap();

        assert_eq!(rect_of(&manager, 0), Some(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(1920, 0, 2560, 1440)));
    }

    #[test]
    fn test_ensure_falls_back_to_emergency() {
        // One CRTC: no two-output layout can be assigned
        let mut resources = laptop_with_hdmi();
        resources.crtcs.truncate(1);
        let mut manager = manager(resources);

        manager.ensure_configuration().unwrap();
        let current = manager.current().unwrap();
        assert_eq!(current.enabled_count(), 1);
        assert!(current.settings()[0].enabled);
        assert!(current.settings()[0].is_primary);
    }

    #[test]
    fn test_emergency_failure_is_fatal() {
        let mut resources = laptop_with_hdmi();
        resources.crtcs.clear();
        let mut manager = manager(resources);

        assert!(matches!(
            manager.ensure_configuration(),
            Err(MultiMonitorError::EmergencyUnsatisfiable)
        ));
    }

    #[test]
    fn test_ensure_never_leaves_outputs_dark() {
        // The only mode is wider than the screen, so every candidate is empty
        let mut resources = laptop_with_hdmi();
        resources.outputs.truncate(1);
        let mut manager = MonitorManager::new(
            SimulatedBackend::new(resources).with_screen_limits(1280, 1024),
            ConfigStore::new("/nonexistent/monitors.xml"),
            MultiMonitorConfig::default(),
        );

        manager.ensure_configuration().unwrap();

        assert_eq!(manager.current().unwrap().enabled_count(), 1);
        assert_eq!(rect_of(&manager, 0), Some(Rect::new(0, 0, 1920, 1080)));
        assert!(manager.backend().resources().outputs[0].crtc.is_some());
    }

    #[test]
    fn test_ensure_ignores_empty_stored_configuration() {
        let resources = laptop_with_hdmi();
        let dark = side_by_side(&resources).map_settings(|_, _, _| OutputSettings::disabled());
        let mut manager = manager(resources);
        manager.store_mut().insert_or_replace(dark);

        manager.ensure_configuration().unwrap();

        assert_eq!(manager.current().unwrap().enabled_count(), 2);
        assert_eq!(rect_of(&manager, 0), Some(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(1920, 0, 2560, 1440)));
    }

    /// Panel alone stored at x=100, so extending and linear layouts differ
    fn shifted_panel_then_hdmi(hotplug_mode_update: bool) -> MonitorManager<SimulatedBackend> {
        let mut resources = laptop_with_hdmi();
        let mut hdmi = resources.outputs.pop().unwrap();
        hdmi.hotplug_mode_update = hotplug_mode_update;

        let panel_alone = Configuration::new([(
            OutputIdentity::of(&resources.outputs[0]),
            OutputSettings::enabled(Rect::new(100, 0, 1920, 1080), 60.0).primary(true),
        )])
        .unwrap();

        let mut manager = manager(resources);
        manager.store_mut().insert_or_replace(panel_alone);
        manager.ensure_configuration().unwrap();
        assert_eq!(rect_of(&manager, 0), Some(Rect::new(100, 0, 1920, 1080)));

        manager.backend_mut().resources_mut().outputs.push(hdmi);
        manager.handle_hotplug().unwrap();
        manager
    }

    #[test]
    fn test_hotplug_extends_stored_configuration() {
        let manager = shifted_panel_then_hdmi(false);

        assert_eq!(rect_of(&manager, 0), Some(Rect::new(100, 0, 1920, 1080)));
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(2020, 0, 2560, 1440)));
    }

    #[test]
    fn test_hotplug_mode_update_hint_skips_extend() {
        let manager = shifted_panel_then_hdmi(true);

        assert_eq!(rect_of(&manager, 0), Some(Rect::new(0, 0, 1920, 1080)));
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(1920, 0, 2560, 1440)));
    }

    #[test]
    fn test_hotplug_reconfigures() {
        let mut resources = laptop_with_hdmi();
        let hdmi = resources.outputs.pop().unwrap();
        let mut manager = manager(resources);
        manager.ensure_configuration().unwrap();
        assert_eq!(manager.current().unwrap().len(), 1);
        let serial = manager.serial();

        manager.backend_mut().resources_mut().outputs.push(hdmi);
        manager.handle_hotplug().unwrap();

        assert_eq!(manager.current().unwrap().len(), 2);
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(1920, 0, 2560, 1440)));
        assert!(manager.serial() > serial + 1);
    }

    // ========================================================================
    // Lid
    // ========================================================================

    #[test]
    fn test_lid_round_trip() {
        let resources = laptop_with_hdmi();
        let config = side_by_side(&resources);
        let mut manager = manager(resources);
        manager.apply(&config).unwrap();

        manager.handle_lid(true).unwrap();
        assert!(manager.current_is_for_lid());
        assert_eq!(rect_of(&manager, 0), None);
        assert_eq!(rect_of(&manager, 1), Some(Rect::new(0, 0, 2560, 1440)));
        assert!(manager.current().unwrap().settings()[1].is_primary);
        assert_eq!(manager.backend().resources().outputs[0].crtc, None);

        manager.handle_lid(false).unwrap();
        assert!(!manager.current_is_for_lid());
        assert!(manager.current().unwrap().full_eq(&config));
    }

    #[test]
    fn test_lid_closed_single_panel_noop() {
        let mut resources = laptop_with_hdmi();
        resources.outputs.truncate(1);
        let mut manager = manager(resources);
        manager.ensure_configuration().unwrap();
        let applies = manager.backend().apply_count();

        manager.handle_lid(true).unwrap();
        assert_eq!(manager.backend().apply_count(), applies);
        assert!(!manager.current_is_for_lid());
    }

    #[test]
    fn test_apply_while_lid_closed_reduces() {
        let resources = laptop_with_hdmi();
        let config = side_by_side(&resources);
        let mut manager = manager(resources);
        manager.handle_lid(true).unwrap();

        manager.apply_respecting_lid(&config).unwrap();
        assert!(manager.current_is_for_lid());
        assert_eq!(rect_of(&manager, 0), None);
    }

    // ========================================================================
    // Confirmation
    // ========================================================================

    fn assignments(resources: &Resources) -> (Vec<CrtcAssignment>, Vec<OutputAssignment>) {
        let result = assign(&side_by_side(resources), resources).unwrap();
        (result.crtcs, result.outputs)
    }

    #[tokio::test]
    async fn test_confirm_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("monitors.xml");
        let resources = laptop_with_hdmi();
        let (crtcs, outputs) = assignments(&resources);
        let mut manager = MonitorManager::new(
            SimulatedBackend::new(resources),
            ConfigStore::new(&path),
            MultiMonitorConfig::default(),
        );

        manager.apply_assignments(&crtcs, &outputs, true).unwrap();
        assert!(manager.pending_confirmation().is_some());

        manager.confirm(true).unwrap();
        assert!(manager.pending_confirmation().is_none());
        manager.store_mut().flush().await;

        let saved = ConfigStore::read_file(&path).unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].full_eq(manager.current().unwrap()));
    }

    #[test]
    fn test_deny_restores_previous() {
        let resources = laptop_with_hdmi();
        let before = side_by_side(&resources).map_settings(|i, _, s| {
            if i == 1 {
                OutputSettings::disabled()
            } else {
                s
            }
        });
        let (crtcs, outputs) = assignments(&resources);
        let mut manager = manager(resources);
        manager.apply(&before).unwrap();

        manager.apply_assignments(&crtcs, &outputs, true).unwrap();
        assert_eq!(manager.current().unwrap().enabled_count(), 2);

        manager.confirm(false).unwrap();
        assert!(manager.current().unwrap().full_eq(&before));
        assert!(manager.previous().is_none());
        assert!(manager.store().is_empty());
    }

    #[test]
    fn test_new_persistent_apply_supersedes_pending() {
        let resources = laptop_with_hdmi();
        let (crtcs, outputs) = assignments(&resources);
        let mut manager = manager(resources);

        manager.apply_assignments(&crtcs, &outputs, true).unwrap();
        let first = manager.pending_confirmation().unwrap();
        manager.apply_assignments(&crtcs, &outputs, true).unwrap();
        let second = manager.pending_confirmation().unwrap();
        assert_ne!(first.id, second.id);

        // The superseded timer firing has no effect
        let applies = manager.backend().apply_count();
        manager.handle_confirmation_timeout(first.id).unwrap();
        assert_eq!(manager.backend().apply_count(), applies);
        assert_eq!(manager.pending_confirmation(), Some(second));
    }

    #[test]
    fn test_timeout_reverts() {
        let resources = laptop_with_hdmi();
        let (crtcs, outputs) = assignments(&resources);
        let mut manager = manager(resources);
        manager.ensure_configuration().unwrap();
        let before = manager.current().unwrap().clone();

        let no_hdmi: Vec<CrtcAssignment> = crtcs.into_iter().filter(|c| !c.outputs.contains(&2)).collect();
        manager.apply_assignments(&no_hdmi, &outputs, true).unwrap();
        assert_eq!(manager.current().unwrap().enabled_count(), 1);

        let id = manager.pending_confirmation().unwrap().id;
        manager.handle_confirmation_timeout(id).unwrap();
        assert!(manager.current().unwrap().full_eq(&before));
        assert!(manager.pending_confirmation().is_none());
    }

    #[test]
    fn test_events_broadcast() {
        let resources = laptop_with_hdmi();
        let config = side_by_side(&resources);
        let mut manager = manager(resources);
        let mut events = manager.subscribe();

        manager.apply(&config).unwrap();
        manager.handle_lid(true).unwrap();

        assert!(matches!(
            events.try_recv(),
            Ok(MonitorEvent::ConfigurationApplied { for_lid: false, .. })
        ));
        assert_eq!(events.try_recv(), Ok(MonitorEvent::LidChanged { closed: true }));
    }
}
