//! Control Surface
//!
//! Serial-guarded operations for external configuration tools. Every request
//! echoes the serial it read resources under; a mismatch is rejected before
//! anything is validated or touched. Requests address CRTCs, modes and
//! outputs by index into the [`ResourcesReply`] lists.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::multimon::assign::{CrtcAssignment, OutputAssignment};
use crate::multimon::backend::{ApplyReport, BackendError, DisplayBackend, GammaRamp};
use crate::multimon::configuration::ConfigurationError;
use crate::multimon::manager::MonitorManager;
use crate::multimon::resources::{Crtc, Mode, Output, OutputId, Transform};

/// Control request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Request was made against an outdated resource snapshot
    #[error("Stale configuration serial {got}, current is {expected}")]
    StaleSerial {
        /// Current serial
        expected: u32,
        /// Serial in the request
        got: u32,
    },

    /// CRTC index out of range
    #[error("Invalid CRTC index {0}")]
    InvalidCrtc(usize),

    /// CRTC listed twice
    #[error("CRTC {0} listed more than once")]
    DuplicateCrtc(usize),

    /// Mode index out of range
    #[error("Invalid mode index {0}")]
    InvalidMode(usize),

    /// Output index out of range
    #[error("Invalid output index {0}")]
    InvalidOutput(usize),

    /// Transform number out of range
    #[error("Invalid transform {0}")]
    InvalidTransform(u32),

    /// CRTC cannot perform the transform
    #[error("CRTC {crtc} does not support transform {transform:?}")]
    UnsupportedTransform {
        /// CRTC index
        crtc: usize,
        /// Requested transform
        transform: Transform,
    },

    /// Mode set on a CRTC without outputs
    #[error("Mode specified for CRTC {0} without outputs")]
    ModeWithoutOutputs(usize),

    /// Outputs listed on a CRTC being turned off
    #[error("Outputs specified for CRTC {0} without a mode")]
    OutputsWithoutMode(usize),

    /// CRTC area outside the screen limits
    #[error("CRTC {0} does not fit the screen")]
    OutOfBounds(usize),

    /// Output cannot be driven by the CRTC
    #[error("Output {output} cannot be driven by CRTC {crtc}")]
    CrtcNotPossible {
        /// CRTC index
        crtc: usize,
        /// Output name
        output: String,
    },

    /// Output does not support the mode
    #[error("Output {output} does not support mode {mode}")]
    UnsupportedMode {
        /// Mode index
        mode: usize,
        /// Output name
        output: String,
    },

    /// Output assigned to more than one CRTC
    #[error("Output {0} assigned more than once")]
    OutputAssignedTwice(String),

    /// Outputs on one CRTC cannot clone each other
    #[error("Outputs {0} and {1} cannot be cloned")]
    NotCloneable(String, String),

    /// Request would switch every output off
    #[error("Refusing to disable every output")]
    AllOutputsDisabled,

    /// Backlight value out of range
    #[error("Invalid backlight value {0}, expected 0..=100")]
    InvalidBacklight(i32),

    /// Gamma ramp size does not match the CRTC
    #[error("Gamma ramp has {got:?} entries, CRTC expects {expected}")]
    InvalidGammaSize {
        /// CRTC ramp size
        expected: usize,
        /// Request ramp size, `None` if the channels disagree
        got: Option<usize>,
    },

    /// Applied state could not be read back
    #[error("Applied state is inconsistent: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Backend refused the request
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Reply to [`MonitorManager::get_resources`]
#[derive(Debug, Clone, Serialize)]
pub struct ResourcesReply {
    /// Serial to echo back
    pub serial: u32,
    /// CRTCs
    pub crtcs: Vec<Crtc>,
    /// Outputs
    pub outputs: Vec<Output>,
    /// Modes
    pub modes: Vec<Mode>,
    /// Maximum screen width
    pub max_width: i32,
    /// Maximum screen height
    pub max_height: i32,
}

/// Requested state of one CRTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrtcSpec {
    /// CRTC index
    pub crtc: usize,
    /// Mode index, `None` turns the CRTC off
    pub mode: Option<usize>,
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Transform number, 0..=7
    #[serde(default)]
    pub transform: u32,
    /// Output indices
    #[serde(default)]
    pub outputs: Vec<usize>,
}

/// Requested flags of one output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Output index
    pub output: usize,
    /// Primary output
    #[serde(default)]
    pub is_primary: bool,
    /// Presentation mode
    #[serde(default)]
    pub is_presentation: bool,
    /// Underscanning
    #[serde(default)]
    pub is_underscanning: bool,
}

impl<B: DisplayBackend> MonitorManager<B> {
    fn check_serial(&self, serial: u32) -> Result<(), ControlError> {
        if serial != self.serial() {
            debug!("Rejecting request with stale serial {}", serial);
            return Err(ControlError::StaleSerial {
                expected: self.serial(),
                got: serial,
            });
        }
        Ok(())
    }

    /// Current hardware snapshot with the serial to echo back
    pub fn get_resources(&self) -> ResourcesReply {
        let resources = self.resources();
        let (max_width, max_height) = self.backend().screen_limits();

        ResourcesReply {
            serial: self.serial(),
            crtcs: resources.crtcs.clone(),
            outputs: resources.outputs.clone(),
            modes: resources.modes.clone(),
            max_width,
            max_height,
        }
    }

    /// Validate and apply an explicit CRTC setup
    ///
    /// Every index and every (CRTC, mode, output) combination is checked
    /// before the backend is called. A `persistent` change must be confirmed
    /// with [`MonitorManager::confirm`] before the deadline or it reverts.
    pub fn apply_configuration(
        &mut self,
        serial: u32,
        persistent: bool,
        crtcs: &[CrtcSpec],
        outputs: &[OutputSpec],
    ) -> Result<ApplyReport, ControlError> {
        self.check_serial(serial)?;

        let crtc_assignments = self.validate_crtcs(crtcs)?;
        let output_assignments = self.validate_outputs(outputs)?;

        info!(
            "Applying requested configuration: {} CRTCs, persistent: {}",
            crtc_assignments.len(),
            persistent
        );

        Ok(self.apply_assignments(&crtc_assignments, &output_assignments, persistent)?)
    }

    fn validate_crtcs(&self, specs: &[CrtcSpec]) -> Result<Vec<CrtcAssignment>, ControlError> {
        let resources = self.resources();
        let (max_width, max_height) = self.backend().screen_limits();

        let mut seen_crtcs = Vec::new();
        let mut seen_outputs: Vec<OutputId> = Vec::new();
        let mut assignments = Vec::new();

        for spec in specs {
            let crtc = resources.crtcs.get(spec.crtc).ok_or(ControlError::InvalidCrtc(spec.crtc))?;
            if seen_crtcs.contains(&spec.crtc) {
                return Err(ControlError::DuplicateCrtc(spec.crtc));
            }
            seen_crtcs.push(spec.crtc);

            let Some(mode_index) = spec.mode else {
                if !spec.outputs.is_empty() {
                    return Err(ControlError::OutputsWithoutMode(spec.crtc));
                }
                continue;
            };
            let mode = resources.modes.get(mode_index).ok_or(ControlError::InvalidMode(mode_index))?;
            if spec.outputs.is_empty() {
                return Err(ControlError::ModeWithoutOutputs(spec.crtc));
            }

            let transform = Transform::from_index(spec.transform).ok_or(ControlError::InvalidTransform(spec.transform))?;
            if !crtc.all_transforms.contains(transform) {
                return Err(ControlError::UnsupportedTransform {
                    crtc: spec.crtc,
                    transform,
                });
            }

            let (width, height) = transform.apply_to_size(mode.width, mode.height);
            let past = |origin: i32, extent: i32, limit: i32| origin.checked_add(extent).map_or(true, |end| end > limit);
            if spec.x < 0 || spec.y < 0 || past(spec.x, width, max_width) || past(spec.y, height, max_height) {
                return Err(ControlError::OutOfBounds(spec.crtc));
            }

            let mut driven: Vec<&Output> = Vec::with_capacity(spec.outputs.len());
            for &index in &spec.outputs {
                let output = resources.outputs.get(index).ok_or(ControlError::InvalidOutput(index))?;

                if !output.can_use_crtc(crtc.id) {
                    return Err(ControlError::CrtcNotPossible {
                        crtc: spec.crtc,
                        output: output.name.clone(),
                    });
                }
                if !output.modes.contains(&mode.id) {
                    return Err(ControlError::UnsupportedMode {
                        mode: mode_index,
                        output: output.name.clone(),
                    });
                }
                if seen_outputs.contains(&output.id) {
                    return Err(ControlError::OutputAssignedTwice(output.name.clone()));
                }
                if let Some(other) = driven.iter().find(|other| !other.can_clone_with(output)) {
                    return Err(ControlError::NotCloneable(other.name.clone(), output.name.clone()));
                }

                seen_outputs.push(output.id);
                driven.push(output);
            }

            assignments.push(CrtcAssignment {
                crtc: crtc.id,
                mode: mode.id,
                x: spec.x,
                y: spec.y,
                transform,
                outputs: driven.iter().map(|o| o.id).collect(),
            });
        }

        if assignments.is_empty() {
            return Err(ControlError::AllOutputsDisabled);
        }

        Ok(assignments)
    }

    fn validate_outputs(&self, specs: &[OutputSpec]) -> Result<Vec<OutputAssignment>, ControlError> {
        let outputs = &self.resources().outputs;

        for spec in specs {
            if spec.output >= outputs.len() {
                return Err(ControlError::InvalidOutput(spec.output));
            }
        }

        Ok(outputs
            .iter()
            .enumerate()
            .map(|(index, output)| {
                let spec = specs.iter().find(|s| s.output == index);
                OutputAssignment {
                    output: output.id,
                    is_primary: spec.is_some_and(|s| s.is_primary),
                    is_presentation: spec.is_some_and(|s| s.is_presentation),
                    is_underscanning: spec.is_some_and(|s| s.is_underscanning),
                }
            })
            .collect())
    }

    /// Keep or revert the pending persistent change
    pub fn confirm_configuration(&mut self, keep: bool) -> crate::multimon::Result<()> {
        self.confirm(keep)
    }

    /// Set an output's backlight, returning the value in effect
    pub fn change_backlight(&mut self, serial: u32, output: usize, value: i32) -> Result<i32, ControlError> {
        self.check_serial(serial)?;

        if !(0..=100).contains(&value) {
            return Err(ControlError::InvalidBacklight(value));
        }
        let id = self
            .resources()
            .outputs
            .get(output)
            .map(|o| o.id)
            .ok_or(ControlError::InvalidOutput(output))?;

        let applied = self.backend_mut().set_backlight(id, value)?;
        if let Some(backlight) = self.resources_mut().outputs[output].backlight.as_mut() {
            backlight.value = applied;
        }

        debug!("Backlight of output {} set to {}", id, applied);
        Ok(applied)
    }

    /// Gamma ramps of a CRTC
    pub fn get_crtc_gamma(&self, serial: u32, crtc: usize) -> Result<GammaRamp, ControlError> {
        self.check_serial(serial)?;

        let id = self
            .resources()
            .crtcs
            .get(crtc)
            .map(|c| c.id)
            .ok_or(ControlError::InvalidCrtc(crtc))?;
        Ok(self.backend().crtc_gamma(id)?)
    }

    /// Replace the gamma ramps of a CRTC
    pub fn set_crtc_gamma(&mut self, serial: u32, crtc: usize, gamma: GammaRamp) -> Result<(), ControlError> {
        self.check_serial(serial)?;

        let target = self.resources().crtcs.get(crtc).ok_or(ControlError::InvalidCrtc(crtc))?;
        if gamma.size() != Some(target.gamma_size) {
            return Err(ControlError::InvalidGammaSize {
                expected: target.gamma_size,
                got: gamma.size(),
            });
        }

        let id = target.id;
        self.backend_mut().set_crtc_gamma(id, gamma)?;
        Ok(())
    }
}
