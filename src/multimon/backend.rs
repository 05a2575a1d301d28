//! Display Backend Contract
//!
//! The backend enumerates hardware and performs modesets. This crate only
//! consumes its [`Resources`] snapshot and hands it finished assignments.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::multimon::assign::{CrtcAssignment, OutputAssignment};
use crate::multimon::resources::{CrtcId, OutputId, Rect, Resources};

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Output has no backlight
    #[error("Output {0} has no backlight control")]
    NoBacklight(OutputId),

    /// Unknown output
    #[error("Unknown output {0}")]
    UnknownOutput(OutputId),

    /// Unknown CRTC
    #[error("Unknown CRTC {0}")]
    UnknownCrtc(CrtcId),

    /// Hardware rejected the request
    #[error("Backend request failed: {0}")]
    Failed(String),
}

/// Result of a modeset
///
/// CRTCs listed in `failed_crtcs` were left disabled; the rest of the
/// assignment was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// CRTCs the hardware refused
    pub failed_crtcs: Vec<CrtcId>,
}

impl ApplyReport {
    /// True if some CRTCs failed
    pub fn is_partial(&self) -> bool {
        !self.failed_crtcs.is_empty()
    }
}

/// Gamma lookup tables of one CRTC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GammaRamp {
    /// Red channel
    pub red: Vec<u16>,
    /// Green channel
    pub green: Vec<u16>,
    /// Blue channel
    pub blue: Vec<u16>,
}

impl GammaRamp {
    /// Identity ramp with `size` entries per channel
    pub fn linear(size: usize) -> Self {
        let step = |i: usize| -> u16 {
            if size <= 1 {
                0
            } else {
                ((i * u16::MAX as usize) / (size - 1)) as u16
            }
        };
        let channel: Vec<u16> = (0..size).map(step).collect();
        Self {
            red: channel.clone(),
            green: channel.clone(),
            blue: channel,
        }
    }

    /// Entries per channel, if all channels agree
    pub fn size(&self) -> Option<usize> {
        (self.red.len() == self.green.len() && self.green.len() == self.blue.len())
            .then_some(self.red.len())
    }
}

/// Display hardware access
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBackend {
    /// Current hardware snapshot
    fn resources(&self) -> Resources;

    /// Apply a complete assignment
    ///
    /// CRTCs not listed are turned off. Applied atomically from the caller's
    /// point of view; individual CRTC failures are reported, not raised.
    fn apply(&mut self, crtcs: &[CrtcAssignment], outputs: &[OutputAssignment]) -> ApplyReport;

    /// Maximum screen size `(width, height)`
    fn screen_limits(&self) -> (i32, i32);

    /// True if any output's preferred mode may change dynamically
    fn has_hotplug_mode_update(&self, resources: &Resources) -> bool {
        resources.has_hotplug_mode_update()
    }

    /// Set an output's backlight, 0..=100, returning the value in effect
    fn set_backlight(&mut self, output: OutputId, value: i32) -> Result<i32, BackendError>;

    /// Gamma ramps of a CRTC
    fn crtc_gamma(&self, crtc: CrtcId) -> Result<GammaRamp, BackendError>;

    /// Replace the gamma ramps of a CRTC
    fn set_crtc_gamma(&mut self, crtc: CrtcId, gamma: GammaRamp) -> Result<(), BackendError>;
}

/// In-memory backend driven by a [`Resources`] description
///
/// Applying an assignment rewrites its CRTC and output tables the way real
/// hardware would report them afterwards.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    resources: Resources,
    max_width: i32,
    max_height: i32,
    failing_crtcs: HashSet<CrtcId>,
    gamma: HashMap<CrtcId, GammaRamp>,
    apply_count: usize,
}

impl SimulatedBackend {
    /// Default screen size limit
    pub const DEFAULT_MAX_SIZE: i32 = 8192;

    /// Create a backend exposing `resources`
    pub fn new(resources: Resources) -> Self {
        let gamma = resources
            .crtcs
            .iter()
            .map(|crtc| (crtc.id, GammaRamp::linear(crtc.gamma_size)))
            .collect();

        Self {
            resources,
            max_width: Self::DEFAULT_MAX_SIZE,
            max_height: Self::DEFAULT_MAX_SIZE,
            failing_crtcs: HashSet::new(),
            gamma,
            apply_count: 0,
        }
    }

    /// Override the screen size limit
    pub fn with_screen_limits(mut self, max_width: i32, max_height: i32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    /// Make future modesets on `crtc` fail
    pub fn fail_crtc(&mut self, crtc: CrtcId) {
        self.failing_crtcs.insert(crtc);
    }

    /// Replace the hardware description, as a hotplug would
    pub fn replace_resources(&mut self, resources: Resources) {
        self.resources = resources;
    }

    /// Mutable access to the hardware description
    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Number of modesets performed
    pub fn apply_count(&self) -> usize {
        self.apply_count
    }
}

impl DisplayBackend for SimulatedBackend {
    fn resources(&self) -> Resources {
        self.resources.clone()
    }

    fn apply(&mut self, crtcs: &[CrtcAssignment], outputs: &[OutputAssignment]) -> ApplyReport {
        self.apply_count += 1;
        let mut report = ApplyReport::default();

        for crtc in &mut self.resources.crtcs {
            crtc.rect = Rect::default();
            crtc.current_mode = None;
            crtc.transform = Default::default();
        }
        for output in &mut self.resources.outputs {
            output.crtc = None;
            output.is_primary = false;
            output.is_presentation = false;
            output.is_underscanning = false;
        }

        for assignment in crtcs {
            if self.failing_crtcs.contains(&assignment.crtc) {
                warn!("Simulated modeset failure on CRTC {}", assignment.crtc);
                report.failed_crtcs.push(assignment.crtc);
                continue;
            }

            let Some(mode) = self.resources.mode(assignment.mode).copied() else {
                report.failed_crtcs.push(assignment.crtc);
                continue;
            };
            let Some(crtc) = self.resources.crtcs.iter_mut().find(|c| c.id == assignment.crtc) else {
                report.failed_crtcs.push(assignment.crtc);
                continue;
            };

            let (width, height) = assignment.transform.apply_to_size(mode.width, mode.height);
            crtc.rect = Rect::new(assignment.x, assignment.y, width, height);
            crtc.current_mode = Some(mode.id);
            crtc.transform = assignment.transform;

            for output in self
                .resources
                .outputs
                .iter_mut()
                .filter(|o| assignment.outputs.contains(&o.id))
            {
                output.crtc = Some(assignment.crtc);
            }
        }

        for info in outputs {
            if let Some(output) = self.resources.outputs.iter_mut().find(|o| o.id == info.output) {
                if output.crtc.is_some() {
                    output.is_primary = info.is_primary;
                    output.is_presentation = info.is_presentation;
                    output.is_underscanning = info.is_underscanning;
                }
            }
        }

        debug!("Simulated modeset #{} on {} CRTCs", self.apply_count, crtcs.len());
        report
    }

    fn screen_limits(&self) -> (i32, i32) {
        (self.max_width, self.max_height)
    }

    fn set_backlight(&mut self, output: OutputId, value: i32) -> Result<i32, BackendError> {
        let output = self
            .resources
            .outputs
            .iter_mut()
            .find(|o| o.id == output)
            .ok_or(BackendError::UnknownOutput(output))?;
        let backlight = output.backlight.as_mut().ok_or(BackendError::NoBacklight(output.id))?;

        // Quantize to the hardware range and report the normalized value back
        let range = (backlight.max - backlight.min).max(1);
        let raw = backlight.min + (value.clamp(0, 100) * range + 50) / 100;
        backlight.value = ((raw - backlight.min) * 100 + range / 2) / range;
        Ok(backlight.value)
    }

    fn crtc_gamma(&self, crtc: CrtcId) -> Result<GammaRamp, BackendError> {
        self.gamma.get(&crtc).cloned().ok_or(BackendError::UnknownCrtc(crtc))
    }

    fn set_crtc_gamma(&mut self, crtc: CrtcId, gamma: GammaRamp) -> Result<(), BackendError> {
        let slot = self.gamma.get_mut(&crtc).ok_or(BackendError::UnknownCrtc(crtc))?;
        *slot = gamma;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::resources::{Backlight, Crtc, Mode, Output, Transform, TransformSet};

    fn resources() -> Resources {
        let mut output = Output::new(1, "DP-1");
        output.modes = vec![10];
        output.possible_crtcs = vec![100];
        output.backlight = Some(Backlight {
            min: 0,
            max: 7,
            value: 100,
        });

        Resources {
            modes: vec![Mode {
                id: 10,
                width: 1920,
                height: 1080,
                refresh_rate: 60.0,
            }],
            crtcs: vec![Crtc {
                id: 100,
                rect: Rect::default(),
                current_mode: None,
                transform: Transform::Normal,
                all_transforms: TransformSet::ALL,
                gamma_size: 4,
            }],
            outputs: vec![output],
        }
    }

    fn assignment() -> CrtcAssignment {
        CrtcAssignment {
            crtc: 100,
            mode: 10,
            x: 0,
            y: 0,
            transform: Transform::Rotate90,
            outputs: vec![1],
        }
    }

    #[test]
    fn test_apply_updates_hardware_state() {
        let mut backend = SimulatedBackend::new(resources());
        let report = backend.apply(
            &[assignment()],
            &[OutputAssignment {
                output: 1,
                is_primary: true,
                is_presentation: false,
                is_underscanning: false,
            }],
        );

        assert!(!report.is_partial());
        let res = backend.resources();
        assert_eq!(res.crtcs[0].rect, Rect::new(0, 0, 1080, 1920));
        assert_eq!(res.outputs[0].crtc, Some(100));
        assert!(res.outputs[0].is_primary);
    }

    #[test]
    fn test_failing_crtc_left_disabled() {
        let mut backend = SimulatedBackend::new(resources());
        backend.fail_crtc(100);
        let report = backend.apply(&[assignment()], &[]);

        assert_eq!(report.failed_crtcs, vec![100]);
        assert_eq!(backend.resources().crtcs[0].current_mode, None);
        assert_eq!(backend.resources().outputs[0].crtc, None);
    }

    #[test]
    fn test_backlight_quantized() {
        let mut backend = SimulatedBackend::new(resources());
        // 50% of 0..7 lands on step 4, which reads back as 57%
        assert_eq!(backend.set_backlight(1, 50), Ok(57));
        assert_eq!(backend.set_backlight(1, 100), Ok(100));
        assert_eq!(backend.set_backlight(2, 10), Err(BackendError::UnknownOutput(2)));
    }

    #[test]
    fn test_gamma_roundtrip() {
        let mut backend = SimulatedBackend::new(resources());
        let ramp = backend.crtc_gamma(100).unwrap();
        assert_eq!(ramp, GammaRamp::linear(4));
        assert_eq!(ramp.red, vec![0, 21845, 43690, 65535]);

        let new = GammaRamp {
            red: vec![1; 4],
            green: vec![2; 4],
            blue: vec![3; 4],
        };
        backend.set_crtc_gamma(100, new.clone()).unwrap();
        assert_eq!(backend.crtc_gamma(100).unwrap(), new);
        assert!(backend.crtc_gamma(5).is_err());
    }
}
