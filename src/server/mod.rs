//! Display Service
//!
//! Event loop owning the [`MonitorManager`]. Every state change runs to
//! completion on this task, one event at a time:
//!
//! ```text
//! ServiceHandle ──mpsc──► DisplayService ──► MonitorManager ──► DisplayBackend
//!   (hotplug, lid,            │
//!    control requests)        └─ sleep_until(pending confirmation deadline)
//! ```
//!
//! Control requests carry a `oneshot` reply channel. The only timer is the
//! deadline of the pending confirmation; it is rebuilt on every loop turn,
//! so a confirmed, denied or superseded transaction never fires.
//!
//! # Example
//!
//! ```no_run
//! use lamco_display_config::multimon::{
//!     ConfigStore, MonitorManager, MultiMonitorConfig, Resources, SimulatedBackend,
//! };
//! use lamco_display_config::server::DisplayService;
//!
//! # async fn example(resources: Resources) -> anyhow::Result<()> {
//! let mut manager = MonitorManager::new(
//!     SimulatedBackend::new(resources),
//!     ConfigStore::new("/tmp/monitors.xml"),
//!     MultiMonitorConfig::default(),
//! );
//! manager.ensure_configuration()?;
//!
//! let (service, handle) = DisplayService::new(manager);
//! let task = tokio::spawn(service.run());
//!
//! handle.set_lid(true).await?;
//! handle.shutdown().await?;
//! task.await??;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::multimon::{
    ApplyReport, Configuration, ControlError, CrtcSpec, DisplayBackend, GammaRamp, MonitorEvent, MonitorManager,
    MultiMonitorError, OutputSpec, ResourcesReply,
};

/// Capacity of the request channel
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The service task is gone
    #[error("Display service is not running")]
    Closed,

    /// Control request rejected
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Configuration change failed
    #[error(transparent)]
    Manager(#[from] MultiMonitorError),
}

/// Service result type
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Event delivered to the service
#[derive(Debug)]
pub enum ServiceEvent {
    /// Outputs were connected or disconnected
    Hotplug,

    /// Lid opened (`false`) or closed (`true`)
    LidChanged(bool),

    /// Read resources and serial
    GetResources(oneshot::Sender<ResourcesReply>),

    /// Read the live configuration
    GetCurrent(oneshot::Sender<Option<Configuration>>),

    /// Apply an explicit CRTC setup
    ApplyConfiguration {
        /// Serial the request was built against
        serial: u32,
        /// Requires confirmation
        persistent: bool,
        /// CRTC setup
        crtcs: Vec<CrtcSpec>,
        /// Output flags
        outputs: Vec<OutputSpec>,
        /// Reply
        reply: oneshot::Sender<std::result::Result<ApplyReport, ControlError>>,
    },

    /// Keep or revert the pending change
    Confirm {
        /// Keep it
        keep: bool,
        /// Reply
        reply: oneshot::Sender<std::result::Result<(), MultiMonitorError>>,
    },

    /// Change an output's backlight
    ChangeBacklight {
        /// Serial the request was built against
        serial: u32,
        /// Output index
        output: usize,
        /// New value, 0..=100
        value: i32,
        /// Reply
        reply: oneshot::Sender<std::result::Result<i32, ControlError>>,
    },

    /// Read a CRTC's gamma ramps
    GetCrtcGamma {
        /// Serial the request was built against
        serial: u32,
        /// CRTC index
        crtc: usize,
        /// Reply
        reply: oneshot::Sender<std::result::Result<GammaRamp, ControlError>>,
    },

    /// Replace a CRTC's gamma ramps
    SetCrtcGamma {
        /// Serial the request was built against
        serial: u32,
        /// CRTC index
        crtc: usize,
        /// New ramps
        gamma: GammaRamp,
        /// Reply
        reply: oneshot::Sender<std::result::Result<(), ControlError>>,
    },

    /// Stop the service
    Shutdown,
}

/// Event loop owning the monitor manager
pub struct DisplayService<B: DisplayBackend> {
    manager: MonitorManager<B>,
    receiver: mpsc::Receiver<ServiceEvent>,
}

impl<B: DisplayBackend> DisplayService<B> {
    /// Create a service and the handle used to talk to it
    pub fn new(manager: MonitorManager<B>) -> (Self, ServiceHandle) {
        let (sender, receiver) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        (Self { manager, receiver }, ServiceHandle { sender })
    }

    /// Subscribe to monitor events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.manager.subscribe()
    }

    /// Run until shut down or every handle is dropped
    ///
    /// # Returns
    ///
    /// The manager, so callers can flush its store or inspect final state
    ///
    /// # Errors
    ///
    /// Only [`MultiMonitorError::EmergencyUnsatisfiable`] stops the loop;
    /// every other failure is logged and the loop goes on.
    pub async fn run(mut self) -> Result<MonitorManager<B>> {
        info!("Display service started (serial {})", self.manager.serial());

        loop {
            let pending = self.manager.pending_confirmation();
            let timeout = async move {
                match pending {
                    Some(pending) => {
                        tokio::time::sleep_until(pending.deadline).await;
                        pending.id
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(ServiceEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event)?,
                },
                id = timeout => {
                    let result = self.manager.handle_confirmation_timeout(id);
                    self.check(result)?;
                }
            }
        }

        info!("Display service stopped");
        self.manager.store_mut().flush().await;
        Ok(self.manager)
    }

    fn handle(&mut self, event: ServiceEvent) -> Result<()> {
        debug!("Handling {:?}", event);

        match event {
            ServiceEvent::Hotplug => {
                let result = self.manager.handle_hotplug();
                self.check(result)?;
            }
            ServiceEvent::LidChanged(closed) => {
                let result = self.manager.handle_lid(closed);
                self.check(result)?;
            }
            ServiceEvent::GetResources(reply) => {
                let _ = reply.send(self.manager.get_resources());
            }
            ServiceEvent::GetCurrent(reply) => {
                let _ = reply.send(self.manager.current().cloned());
            }
            ServiceEvent::ApplyConfiguration {
                serial,
                persistent,
                crtcs,
                outputs,
                reply,
            } => {
                let result = self.manager.apply_configuration(serial, persistent, &crtcs, &outputs);
                if let Err(e) = &result {
                    warn!("Rejected configuration request: {}", e);
                }
                let _ = reply.send(result);
            }
            ServiceEvent::Confirm { keep, reply } => {
                let result = self.manager.confirm_configuration(keep);
                if matches!(result, Err(MultiMonitorError::EmergencyUnsatisfiable)) {
                    let _ = reply.send(Err(MultiMonitorError::EmergencyUnsatisfiable));
                    return Err(MultiMonitorError::EmergencyUnsatisfiable.into());
                }
                let _ = reply.send(result);
            }
            ServiceEvent::ChangeBacklight {
                serial,
                output,
                value,
                reply,
            } => {
                let _ = reply.send(self.manager.change_backlight(serial, output, value));
            }
            ServiceEvent::GetCrtcGamma { serial, crtc, reply } => {
                let _ = reply.send(self.manager.get_crtc_gamma(serial, crtc));
            }
            ServiceEvent::SetCrtcGamma {
                serial,
                crtc,
                gamma,
                reply,
            } => {
                let _ = reply.send(self.manager.set_crtc_gamma(serial, crtc, gamma));
            }
            ServiceEvent::Shutdown => {}
        }

        Ok(())
    }

    /// Log a failed state change, stopping only on an unrecoverable one
    fn check(&self, result: crate::multimon::Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(MultiMonitorError::EmergencyUnsatisfiable) => {
                error!("No output can be configured, stopping display service");
                Err(MultiMonitorError::EmergencyUnsatisfiable.into())
            }
            Err(e) => {
                warn!("Configuration change failed: {}", e);
                Ok(())
            }
        }
    }
}

/// Cloneable client of a [`DisplayService`]
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    sender: mpsc::Sender<ServiceEvent>,
}

impl ServiceHandle {
    async fn send(&self, event: ServiceEvent) -> Result<()> {
        self.sender.send(event).await.map_err(|_| ServiceError::Closed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ServiceEvent) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| ServiceError::Closed)
    }

    /// Report a hotplug
    pub async fn hotplug(&self) -> Result<()> {
        self.send(ServiceEvent::Hotplug).await
    }

    /// Report the lid state
    pub async fn set_lid(&self, closed: bool) -> Result<()> {
        self.send(ServiceEvent::LidChanged(closed)).await
    }

    /// Read resources and serial
    pub async fn get_resources(&self) -> Result<ResourcesReply> {
        self.request(ServiceEvent::GetResources).await
    }

    /// Read the live configuration
    pub async fn current_configuration(&self) -> Result<Option<Configuration>> {
        self.request(ServiceEvent::GetCurrent).await
    }

    /// Apply an explicit CRTC setup
    pub async fn apply_configuration(
        &self,
        serial: u32,
        persistent: bool,
        crtcs: Vec<CrtcSpec>,
        outputs: Vec<OutputSpec>,
    ) -> Result<ApplyReport> {
        let result = self
            .request(|reply| ServiceEvent::ApplyConfiguration {
                serial,
                persistent,
                crtcs,
                outputs,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Keep or revert the pending change
    pub async fn confirm(&self, keep: bool) -> Result<()> {
        let result = self.request(|reply| ServiceEvent::Confirm { keep, reply }).await?;
        Ok(result?)
    }

    /// Change an output's backlight
    pub async fn change_backlight(&self, serial: u32, output: usize, value: i32) -> Result<i32> {
        let result = self
            .request(|reply| ServiceEvent::ChangeBacklight {
                serial,
                output,
                value,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Read a CRTC's gamma ramps
    pub async fn crtc_gamma(&self, serial: u32, crtc: usize) -> Result<GammaRamp> {
        let result = self
            .request(|reply| ServiceEvent::GetCrtcGamma { serial, crtc, reply })
            .await?;
        Ok(result?)
    }

    /// Replace a CRTC's gamma ramps
    pub async fn set_crtc_gamma(&self, serial: u32, crtc: usize, gamma: GammaRamp) -> Result<()> {
        let result = self
            .request(|reply| ServiceEvent::SetCrtcGamma {
                serial,
                crtc,
                gamma,
                reply,
            })
            .await?;
        Ok(result?)
    }

    /// Stop the service
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ServiceEvent::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::{
        ConfigStore, Crtc, Mode, MultiMonitorConfig, Output, Rect, Resources, SimulatedBackend, TransformSet,
    };
    use std::time::Duration;

    fn resources() -> Resources {
        let output = |id: u32, name: &str| {
            let mut output = Output::new(id, name);
            output.vendor = "ACME".into();
            output.product = name.into();
            output.serial = "1".into();
            output.modes = vec![1];
            output.preferred_mode = Some(1);
            output.possible_crtcs = vec![10, 11];
            output
        };

        Resources {
            modes: vec![Mode {
                id: 1,
                width: 1920,
                height: 1080,
                refresh_rate: 60.0,
            }],
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
            outputs: vec![output(1, "eDP-1"), output(2, "DP-1")],
        }
    }

    type Task = tokio::task::JoinHandle<Result<MonitorManager<SimulatedBackend>>>;

    fn start(dir: &tempfile::TempDir) -> (Task, ServiceHandle) {
        let mut manager = MonitorManager::new(
            SimulatedBackend::new(resources()),
            ConfigStore::new(dir.path().join("monitors.xml")),
            MultiMonitorConfig::default(),
        );
        manager.ensure_configuration().unwrap();

        let (service, handle) = DisplayService::new(manager);
        (tokio::spawn(service.run()), handle)
    }

    fn only_panel() -> Vec<CrtcSpec> {
        vec![CrtcSpec {
            crtc: 0,
            mode: Some(0),
            x: 0,
            y: 0,
            transform: 0,
            outputs: vec![0],
        }]
    }

    #[tokio::test]
    async fn test_lid_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let (task, handle) = start(&dir);

        handle.set_lid(true).await.unwrap();
        let current = handle.current_configuration().await.unwrap().unwrap();
        assert!(!current.settings()[0].enabled);
        assert_eq!(current.settings()[1].rect, Rect::new(0, 0, 1920, 1080));

        handle.shutdown().await.unwrap();
        let manager = task.await.unwrap().unwrap();
        assert!(manager.current_is_for_lid());
    }

    #[tokio::test]
    async fn test_stale_serial_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (task, handle) = start(&dir);
        let serial = handle.get_resources().await.unwrap().serial;

        let result = handle.apply_configuration(serial + 7, false, only_panel(), vec![]).await;
        assert!(matches!(result, Err(ServiceError::Control(ControlError::StaleSerial { .. }))));

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_change_reverts_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (task, handle) = start(&dir);
        let before = handle.current_configuration().await.unwrap().unwrap();
        let serial = handle.get_resources().await.unwrap().serial;

        handle.apply_configuration(serial, true, only_panel(), vec![]).await.unwrap();
        let changed = handle.current_configuration().await.unwrap().unwrap();
        assert_eq!(changed.enabled_count(), 1);

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(handle.current_configuration().await.unwrap().unwrap().enabled_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let reverted = handle.current_configuration().await.unwrap().unwrap();
        assert!(reverted.full_eq(&before));

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_change_survives_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (task, handle) = start(&dir);
        let serial = handle.get_resources().await.unwrap().serial;

        handle.apply_configuration(serial, true, only_panel(), vec![]).await.unwrap();
        handle.confirm(true).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.current_configuration().await.unwrap().unwrap().enabled_count(), 1);

        handle.shutdown().await.unwrap();
        let manager = task.await.unwrap().unwrap();
        assert_eq!(manager.store().len(), 1);
        assert!(dir.path().join("monitors.xml").exists());
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (task, handle) = start(&dir);
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(matches!(handle.hotplug().await, Err(ServiceError::Closed)));
    }
}
