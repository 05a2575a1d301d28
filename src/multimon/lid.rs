//! Lid-reduced configurations
//!
//! With the lid closed the built-in panel is switched off and the outputs
//! that sat past its far edge slide over to close the gap.

use tracing::debug;

use crate::multimon::configuration::{Configuration, OutputSettings};
use crate::multimon::resources::{Rect, Resources};

/// Index and rectangle of the first enabled laptop panel in `config`
pub fn enabled_laptop_panel(config: &Configuration, resources: &Resources) -> Option<(usize, Rect)> {
    config.iter().enumerate().find_map(|(index, (identity, settings))| {
        let is_panel = resources
            .outputs
            .iter()
            .any(|output| identity.matches(output) && output.is_laptop_panel());
        (settings.enabled && is_panel).then_some((index, settings.rect))
    })
}

/// Derive the configuration to use while the lid is closed
///
/// Returns `None` when `config` lights no laptop panel or nothing besides
/// it, in which case `config` is used unchanged.
pub fn lid_reduced(config: &Configuration, resources: &Resources) -> Option<Configuration> {
    if config.enabled_count() <= 1 {
        return None;
    }

    let (panel_index, panel) = enabled_laptop_panel(config, resources)?;

    let reduced = config.map_settings(|index, _, settings| {
        if index == panel_index {
            return OutputSettings::disabled();
        }
        if !settings.enabled {
            return settings;
        }

        let mut rect = settings.rect;
        if rect.x >= panel.right() {
            rect.x -= panel.width;
        }
        if rect.y >= panel.bottom() {
            rect.y -= panel.height;
        }
        OutputSettings { rect, ..settings }
    });

    if reduced.settings().iter().any(|s| s.is_primary) {
        debug!("Derived lid-closed configuration without {}", config.identities()[panel_index].connector);
        return Some(reduced);
    }

    let first_enabled = reduced.settings().iter().position(|s| s.enabled);
    Some(reduced.map_settings(|index, _, settings| {
        if Some(index) == first_enabled {
            settings.primary(true)
        } else {
            settings
        }
    }))
}
