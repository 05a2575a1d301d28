//! CRTC Assignment Solver
//!
//! Maps every enabled output of a [`Configuration`] onto a concrete
//! `(CRTC, mode, position, transform)` tuple by backtracking search.
//!
//! For each output index the search walks every CRTC, first accepting only
//! modes whose refresh rate matches the request exactly, then any refresh
//! rate. A CRTC already used in the current branch may take another output
//! only as a clone: same mode, position and transform, and every output on
//! it must list the newcomer as a possible clone (and vice versa).

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::multimon::configuration::{Configuration, OutputSettings};
use crate::multimon::resources::{Crtc, CrtcId, Mode, ModeId, Output, OutputId, Resources, Transform};

/// Solver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssignError {
    /// No CRTC assignment satisfies the configuration
    #[error("No CRTC assignment satisfies the configuration")]
    Unsatisfiable,

    /// Configuration names an output the hardware does not have
    #[error("Output {0} is not present")]
    UnknownOutput(String),
}

/// One CRTC driving one output, or several in clone mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrtcAssignment {
    /// CRTC
    pub crtc: CrtcId,
    /// Mode
    pub mode: ModeId,
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Transform
    pub transform: Transform,
    /// Driven outputs
    pub outputs: Vec<OutputId>,
}

/// Per-output flags handed to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputAssignment {
    /// Output
    pub output: OutputId,
    /// Primary output
    pub is_primary: bool,
    /// Presentation mode
    pub is_presentation: bool,
    /// Underscanning
    pub is_underscanning: bool,
}

/// Complete solver result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assignment {
    /// Non-empty CRTC assignments
    pub crtcs: Vec<CrtcAssignment>,
    /// Flags for every output of the configuration
    pub outputs: Vec<OutputAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshPass {
    Exact,
    Any,
}

struct Search<'a> {
    resources: &'a Resources,
    requests: Vec<(&'a Output, OutputSettings)>,
    assigned: Vec<CrtcAssignment>,
    steps: usize,
}

impl<'a> Search<'a> {
    fn solve(&mut self, index: usize) -> bool {
        self.steps += 1;

        let Some(&(output, settings)) = self.requests.get(index) else {
            return true;
        };

        if !settings.enabled {
            return self.solve(index + 1);
        }

        let resources = self.resources;
        for crtc in &resources.crtcs {
            for pass in [RefreshPass::Exact, RefreshPass::Any] {
                for mode in &resources.modes {
                    if !mode_matches(mode, &settings, pass) {
                        continue;
                    }

                    if !self.try_assign(crtc, mode, output, &settings) {
                        continue;
                    }

                    if self.solve(index + 1) {
                        return true;
                    }

                    self.unassign(crtc.id, output.id);
                }
            }
        }

        false
    }

    fn try_assign(&mut self, crtc: &Crtc, mode: &Mode, output: &Output, settings: &OutputSettings) -> bool {
        if !output.can_use_crtc(crtc.id) || !crtc.all_transforms.contains(settings.transform) {
            return false;
        }

        let (x, y) = (settings.rect.x, settings.rect.y);

        match self.assigned.iter_mut().find(|a| a.crtc == crtc.id) {
            Some(existing) => {
                if existing.mode != mode.id
                    || existing.x != x
                    || existing.y != y
                    || existing.transform != settings.transform
                {
                    return false;
                }

                let resources = self.resources;
                let cloneable = existing.outputs.iter().all(|id| {
                    resources
                        .output(*id)
                        .is_some_and(|other| other.can_clone_with(output))
                });
                if !cloneable {
                    return false;
                }

                existing.outputs.push(output.id);
            }
            None => self.assigned.push(CrtcAssignment {
                crtc: crtc.id,
                mode: mode.id,
                x,
                y,
                transform: settings.transform,
                outputs: vec![output.id],
            }),
        }

        true
    }

    fn unassign(&mut self, crtc: CrtcId, output: OutputId) {
        if let Some(pos) = self.assigned.iter().position(|a| a.crtc == crtc) {
            self.assigned[pos].outputs.retain(|id| *id != output);
            if self.assigned[pos].outputs.is_empty() {
                self.assigned.remove(pos);
            }
        }
    }
}

fn mode_matches(mode: &Mode, settings: &OutputSettings, pass: RefreshPass) -> bool {
    if pass == RefreshPass::Exact && mode.refresh_rate.to_bits() != settings.refresh_rate.to_bits() {
        return false;
    }

    let (width, height) = settings.transform.apply_to_size(mode.width, mode.height);
    width == settings.rect.width && height == settings.rect.height
}

/// Find a CRTC assignment for `config` on `resources`
///
/// # Errors
///
/// [`AssignError::UnknownOutput`] if the configuration names an output that is
/// not present, [`AssignError::Unsatisfiable`] if the search is exhausted.
pub fn assign(config: &Configuration, resources: &Resources) -> Result<Assignment, AssignError> {
    let requests = config
        .iter()
        .map(|(identity, settings)| {
            resources
                .outputs
                .iter()
                .find(|output| identity.matches(output))
                .map(|output| (output, *settings))
                .ok_or_else(|| AssignError::UnknownOutput(identity.connector.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut search = Search {
        resources,
        requests,
        assigned: Vec::new(),
        steps: 0,
    };

    if !search.solve(0) {
        debug!("CRTC search exhausted after {} steps", search.steps);
        return Err(AssignError::Unsatisfiable);
    }

    debug!(
        "CRTC search found {} assignments in {} steps",
        search.assigned.len(),
        search.steps
    );

    let outputs = search
        .requests
        .iter()
        .map(|(output, settings)| OutputAssignment {
            output: output.id,
            is_primary: settings.is_primary,
            is_presentation: settings.is_presentation,
            is_underscanning: settings.is_underscanning,
        })
        .collect();

    Ok(Assignment {
        crtcs: search.assigned,
        outputs,
    })
}
