//! Layout Synthesis Engine
//!
//! Produces candidate configurations for hardware the store has no exact
//! match for. Strategies run in priority order:
//!
//! 1. [`LayoutStrategy::Single`] - one output at its preferred mode
//! 2. [`LayoutStrategy::Suggested`] - firmware-suggested positions
//! 3. [`LayoutStrategy::ExtendStored`] - a stored layout minus one output,
//!    with the new output appended
//! 4. [`LayoutStrategy::Linear`] - primary first, then tile groups, then the
//!    rest, left to right
//!
//! Every candidate goes through the same clamp: outputs reaching past the
//! screen limits are disabled.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::multimon::configuration::{ConfigKey, Configuration, ConfigurationError, OutputIdentity, OutputSettings};
use crate::multimon::resources::{Mode, Output, Rect, Resources};
use crate::multimon::store::ConfigStore;

/// Maximum number of outputs forming one tiled monitor
pub const MAX_OUTPUTS_PER_MONITOR: usize = 4;

/// Layout error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// No outputs connected
    #[error("No monitors connected")]
    NoMonitors,

    /// Output has no usable preferred mode
    #[error("Output {0} has no preferred mode")]
    NoPreferredMode(String),

    /// Synthesized configuration was malformed
    #[error("Invalid synthesized configuration: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Layout strategy, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutStrategy {
    /// Exactly one output
    Single,

    /// Firmware-suggested positions
    Suggested,

    /// Extend a stored configuration by one output
    ExtendStored,

    /// Left-to-right placement with tile reconstruction
    Linear,
}

impl std::fmt::Display for LayoutStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LayoutStrategy::Single => "single",
            LayoutStrategy::Suggested => "suggested",
            LayoutStrategy::ExtendStored => "extend-stored",
            LayoutStrategy::Linear => "linear",
        };
        f.write_str(name)
    }
}

/// Choose the primary output
///
/// Prefers an output the backend already flags primary, then the first
/// laptop panel, then the largest preferred mode (first one on ties).
pub fn choose_primary(resources: &Resources) -> Option<&Output> {
    let outputs = &resources.outputs;

    if let Some(output) = outputs.iter().find(|o| o.is_primary) {
        return Some(output);
    }

    if let Some(output) = outputs.iter().find(|o| o.is_laptop_panel()) {
        return Some(output);
    }

    let area = |output: &Output| {
        resources
            .preferred_mode(output)
            .map(|mode| i64::from(mode.width) * i64::from(mode.height))
            .unwrap_or(0)
    };

    outputs.iter().fold(None, |best: Option<&Output>, output| match best {
        Some(current) if area(current) >= area(output) => Some(current),
        _ => Some(output),
    })
}

/// Layout synthesizer
///
/// Borrows one hardware snapshot; build a new synthesizer per cycle.
pub struct LayoutSynthesizer<'a> {
    /// Hardware snapshot
    resources: &'a Resources,

    /// Maximum screen width
    max_width: i32,

    /// Maximum screen height
    max_height: i32,

    /// Enables [`LayoutStrategy::ExtendStored`]
    allow_extend: bool,
}

impl<'a> LayoutSynthesizer<'a> {
    /// Create a synthesizer for `resources` within `(max_width, max_height)`
    pub fn new(resources: &'a Resources, (max_width, max_height): (i32, i32)) -> Self {
        Self {
            resources,
            max_width,
            max_height,
            allow_extend: false,
        }
    }

    /// Enable or disable extending stored configurations
    ///
    /// Callers pass `false` when the backend reports unstable preferred modes.
    pub fn allow_extend(mut self, allow_extend: bool) -> Self {
        self.allow_extend = allow_extend;
        self
    }

    /// All applicable candidates in priority order
    ///
    /// Strategies that do not apply are skipped; a single output yields only
    /// the [`LayoutStrategy::Single`] candidate.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::NoMonitors`] if no output is connected.
    pub fn candidates(&self, store: &ConfigStore) -> Result<Vec<(LayoutStrategy, Configuration)>, LayoutError> {
        if self.resources.outputs.is_empty() {
            return Err(LayoutError::NoMonitors);
        }

        if self.resources.outputs.len() == 1 {
            let single = self.single()?;
            return Ok(vec![(LayoutStrategy::Single, self.clamp(&single))]);
        }

        let mut candidates = Vec::new();

        if let Some(config) = self.suggested()? {
            candidates.push((LayoutStrategy::Suggested, self.clamp(&config)));
        }

        if self.allow_extend {
            if let Some(config) = self.extend_stored(store)? {
                candidates.push((LayoutStrategy::ExtendStored, self.clamp(&config)));
            }
        }

        let linear = self.linear()?;
        candidates.push((LayoutStrategy::Linear, self.clamp(&linear)));

        debug!(
            "Synthesized {} layout candidates: {:?}",
            candidates.len(),
            candidates.iter().map(|(s, _)| s.to_string()).collect::<Vec<_>>()
        );

        Ok(candidates)
    }

    /// Highest-priority candidate
    pub fn synthesize(&self, store: &ConfigStore) -> Result<Configuration, LayoutError> {
        self.candidates(store)?
            .into_iter()
            .next()
            .map(|(_, config)| config)
            .ok_or(LayoutError::NoMonitors)
    }

    /// Only the primary output, at its preferred mode at the origin
    ///
    /// The last resort when no candidate can be assigned CRTCs.
    pub fn emergency(&self) -> Result<Configuration, LayoutError> {
        let primary = choose_primary(self.resources).ok_or(LayoutError::NoMonitors)?;
        let mode = self.preferred_mode(primary)?;

        warn!("Falling back to {} alone at {}x{}", primary.name, mode.width, mode.height);

        self.build(|output| {
            if output.id == primary.id {
                at_mode(mode, 0, 0).primary(true)
            } else {
                OutputSettings::disabled()
            }
        })
    }

    fn single(&self) -> Result<Configuration, LayoutError> {
        let output = self.resources.outputs.first().ok_or(LayoutError::NoMonitors)?;
        let mode = self.preferred_mode(output)?;
        self.build(|_| at_mode(mode, 0, 0).primary(true))
    }

    fn suggested(&self) -> Result<Option<Configuration>, LayoutError> {
        let mut placed = Vec::with_capacity(self.resources.outputs.len());

        for output in &self.resources.outputs {
            let Some((x, y)) = output.suggested_position else {
                return Ok(None);
            };
            if x < 0 || y < 0 {
                return Ok(None);
            }
            let Some(mode) = self.resources.preferred_mode(output) else {
                return Ok(None);
            };

            let rect = Rect::new(x, y, mode.width, mode.height);
            if placed.iter().any(|(_, other): &(u32, Rect)| other.overlaps(&rect)) {
                debug!("Ignoring suggested positions: {} overlaps another output", output.name);
                return Ok(None);
            }
            placed.push((output.id, rect));
        }

        let primary = choose_primary(self.resources).map(|o| o.id);

        self.build(|output| {
            let mode = self.resources.preferred_mode(output);
            let rect = placed.iter().find(|(id, _)| *id == output.id).map(|(_, rect)| *rect);
            match (mode, rect) {
                (Some(mode), Some(rect)) => {
                    OutputSettings::enabled(rect, mode.refresh_rate).primary(Some(output.id) == primary)
                }
                _ => OutputSettings::disabled(),
            }
        })
        .map(Some)
    }

    fn extend_stored(&self, store: &ConfigStore) -> Result<Option<Configuration>, LayoutError> {
        let key = ConfigKey::from_outputs(&self.resources.outputs);

        for (index, new_output) in self.resources.outputs.iter().enumerate() {
            let Some(stored) = store.lookup(&key.without(index)) else {
                continue;
            };

            debug!("Extending stored configuration with {}", new_output.name);

            let enabled: Vec<Rect> = stored.settings().iter().filter(|s| s.enabled).map(|s| s.rect).collect();
            let new_settings = match self.resources.preferred_mode(new_output) {
                Some(mode) => self.extension_slot(&enabled, mode),
                None => OutputSettings::disabled(),
            };

            return self
                .build(|output| {
                    if output.id == new_output.id {
                        new_settings
                    } else {
                        stored
                            .settings_for(&OutputIdentity::of(output))
                            .copied()
                            .unwrap_or_else(OutputSettings::disabled)
                    }
                })
                .map(Some);
        }

        Ok(None)
    }

    fn extension_slot(&self, enabled: &[Rect], mode: &Mode) -> OutputSettings {
        let bounds = bounding_box(enabled);

        if bounds.right() + mode.width <= self.max_width {
            at_mode(mode, bounds.right(), bounds.y)
        } else if bounds.bottom() + mode.height <= self.max_height {
            at_mode(mode, bounds.x, bounds.bottom())
        } else {
            debug!("No room to extend with a {}x{} output", mode.width, mode.height);
            OutputSettings::disabled()
        }
    }

    fn linear(&self) -> Result<Configuration, LayoutError> {
        let outputs = &self.resources.outputs;
        let primary = choose_primary(self.resources).ok_or(LayoutError::NoMonitors)?;

        let mut placed: Vec<Option<Rect>> = vec![None; outputs.len()];
        let mut done: HashSet<u32> = HashSet::new();
        let mut groups: HashSet<u32> = HashSet::new();
        let mut x = 0;

        let width = match primary.tile_info {
            Some(tile) => {
                groups.insert(tile.group_id);
                self.place_tile_group(tile.group_id, x, &mut placed, &mut done)
            }
            None => self.place_untiled(primary, x, &mut placed, &mut done),
        };
        x += width;

        for output in outputs {
            let Some(tile) = output.tile_info else {
                continue;
            };
            if groups.insert(tile.group_id) {
                let width = self.place_tile_group(tile.group_id, x, &mut placed, &mut done);
                x += width;
            }
        }

        for output in outputs {
            if !done.contains(&output.id) {
                let width = self.place_untiled(output, x, &mut placed, &mut done);
                x += width;
            }
        }

        let mut slots = placed.into_iter();
        self.build(|output| {
            let rect = slots.next().flatten();
            match (rect, self.resources.preferred_mode(output)) {
                (Some(rect), Some(mode)) => {
                    OutputSettings::enabled(rect, mode.refresh_rate).primary(output.id == primary.id)
                }
                _ => OutputSettings::disabled(),
            }
        })
    }

    /// Place one output at `x`, returning the width consumed
    fn place_untiled(&self, output: &Output, x: i32, placed: &mut [Option<Rect>], done: &mut HashSet<u32>) -> i32 {
        done.insert(output.id);

        let Some(mode) = self.resources.preferred_mode(output) else {
            warn!("Output {} has no preferred mode, leaving it off", output.name);
            return 0;
        };

        if let Some(index) = self.index_of(output) {
            placed[index] = Some(Rect::new(x, 0, mode.width, mode.height));
        }
        mode.width
    }

    /// Reconstruct one tiled monitor at `x`, returning the width consumed
    ///
    /// Members past [`MAX_OUTPUTS_PER_MONITOR`] are not claimed and end up
    /// placed as ordinary outputs.
    fn place_tile_group(
        &self,
        group_id: u32,
        x: i32,
        placed: &mut [Option<Rect>],
        done: &mut HashSet<u32>,
    ) -> i32 {
        let mut members: Vec<&Output> = Vec::new();
        for output in &self.resources.outputs {
            if output.tile_info.map(|t| t.group_id) != Some(group_id) {
                continue;
            }
            if members.len() >= MAX_OUTPUTS_PER_MONITOR {
                warn!(
                    "Tile group {} has more than {} outputs, treating {} as untiled",
                    group_id, MAX_OUTPUTS_PER_MONITOR, output.name
                );
                continue;
            }
            members.push(output);
        }

        let Some(first) = members.first().and_then(|o| o.tile_info) else {
            return 0;
        };

        let mut group_width = 0;
        let mut slots: HashSet<(u32, u32)> = HashSet::new();

        // Offsets come from the grid location so a missing tile leaves a gap
        for member in &members {
            let Some(tile) = member.tile_info else {
                continue;
            };
            if tile.loc_h_tile >= first.max_h_tiles || tile.loc_v_tile >= first.max_v_tiles {
                continue;
            }
            if !slots.insert((tile.loc_h_tile, tile.loc_v_tile)) {
                continue;
            }

            done.insert(member.id);

            let tile_x = (tile.loc_h_tile * tile.tile_w) as i32;
            let tile_y = (tile.loc_v_tile * tile.tile_h) as i32;
            if let (Some(mode), Some(index)) = (self.resources.preferred_mode(member), self.index_of(member)) {
                placed[index] = Some(Rect::new(x + tile_x, tile_y, mode.width, mode.height));
            }

            group_width = group_width.max(tile_x + tile.tile_w as i32);
        }

        // Members outside the advertised grid or sharing a slot
        for member in &members {
            if !done.contains(&member.id) {
                warn!("Tile location of {} is outside its group grid or taken", member.name);
            }
        }

        debug!("Placed tile group {} ({} outputs) at x={}", group_id, members.len(), x);
        group_width
    }

    fn index_of(&self, output: &Output) -> Option<usize> {
        self.resources.outputs.iter().position(|o| o.id == output.id)
    }

    fn preferred_mode(&self, output: &Output) -> Result<&'a Mode, LayoutError> {
        self.resources
            .preferred_mode(output)
            .ok_or_else(|| LayoutError::NoPreferredMode(output.name.clone()))
    }

    /// Build a configuration over every output in enumeration order
    fn build(&self, mut settings: impl FnMut(&Output) -> OutputSettings) -> Result<Configuration, LayoutError> {
        let entries = self
            .resources
            .outputs
            .iter()
            .map(|output| (OutputIdentity::of(output), settings(output)));
        Ok(Configuration::new(entries)?)
    }

    /// Disable outputs reaching past the screen limits
    fn clamp(&self, config: &Configuration) -> Configuration {
        config.map_settings(|_, identity, settings| {
            if settings.enabled
                && (settings.rect.right() > self.max_width || settings.rect.bottom() > self.max_height)
            {
                debug!("Disabling {}: beyond {}x{}", identity.connector, self.max_width, self.max_height);
                OutputSettings::disabled()
            } else {
                settings
            }
        })
    }
}

fn at_mode(mode: &Mode, x: i32, y: i32) -> OutputSettings {
    OutputSettings::enabled(Rect::new(x, y, mode.width, mode.height), mode.refresh_rate)
}

fn bounding_box(rects: &[Rect]) -> Rect {
    if rects.is_empty() {
        return Rect::default();
    }

    let min_x = rects.iter().map(|r| r.x).min().unwrap_or(0);
    let min_y = rects.iter().map(|r| r.y).min().unwrap_or(0);
    let max_x = rects.iter().map(Rect::right).max().unwrap_or(0);
    let max_y = rects.iter().map(Rect::bottom).max().unwrap_or(0);

    Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
}
