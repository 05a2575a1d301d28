//! Configuration Value Type
//!
//! A [`Configuration`] is an immutable, shared, identity-keyed record of
//! per-output settings. Two configurations are *identity-equal* when they name
//! the same outputs in the same order, and *full-equal* when in addition every
//! output's settings match.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::multimon::resources::{Output, Rect, Resources, Transform};

/// Configuration construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The same output appears twice
    #[error("Output {0} appears more than once in a configuration")]
    DuplicateOutput(String),
}

/// Names a physical output across sessions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OutputIdentity {
    /// Connector name
    pub connector: String,
    /// EDID vendor
    pub vendor: String,
    /// EDID product
    pub product: String,
    /// EDID serial
    pub serial: String,
}

impl OutputIdentity {
    /// Create an identity
    pub fn new(
        connector: impl Into<String>,
        vendor: impl Into<String>,
        product: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            connector: connector.into(),
            vendor: vendor.into(),
            product: product.into(),
            serial: serial.into(),
        }
    }

    /// Identity of a hardware output
    pub fn of(output: &Output) -> Self {
        Self::new(&output.name, &output.vendor, &output.product, &output.serial)
    }

    /// True if vendor, product and serial are all known
    ///
    /// Outputs without a complete identity are never persisted.
    pub fn is_complete(&self) -> bool {
        !self.vendor.is_empty() && !self.product.is_empty() && !self.serial.is_empty()
    }

    /// True if this identity names `output`
    pub fn matches(&self, output: &Output) -> bool {
        self.connector == output.name
            && self.vendor == output.vendor
            && self.product == output.product
            && self.serial == output.serial
    }
}

/// Per-output settings
///
/// Equality compares the refresh rate bit-for-bit so that settings can be
/// used as hash keys and compared for "nothing changed".
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutputSettings {
    /// Output is lit
    pub enabled: bool,
    /// Area in screen coordinates (transformed size)
    pub rect: Rect,
    /// Requested refresh rate in Hz
    pub refresh_rate: f32,
    /// Requested transform
    pub transform: Transform,
    /// Primary output
    pub is_primary: bool,
    /// Presentation mode
    pub is_presentation: bool,
    /// Underscanning
    pub is_underscanning: bool,
}

impl OutputSettings {
    /// Canonical settings of a disabled output
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled output at `rect` with the normal transform
    pub fn enabled(rect: Rect, refresh_rate: f32) -> Self {
        Self {
            enabled: true,
            rect,
            refresh_rate,
            ..Self::default()
        }
    }

    /// Same settings, marked primary or not
    pub fn primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }
}

impl PartialEq for OutputSettings {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.rect == other.rect
            && self.refresh_rate.to_bits() == other.refresh_rate.to_bits()
            && self.transform == other.transform
            && self.is_primary == other.is_primary
            && self.is_presentation == other.is_presentation
            && self.is_underscanning == other.is_underscanning
    }
}

impl Eq for OutputSettings {}

impl Hash for OutputSettings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        self.rect.hash(state);
        self.refresh_rate.to_bits().hash(state);
        self.transform.hash(state);
        self.is_primary.hash(state);
        self.is_presentation.hash(state);
        self.is_underscanning.hash(state);
    }
}

/// Order-preserving identity key of a configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigKey(Vec<OutputIdentity>);

impl ConfigKey {
    /// Key from identities in enumeration order
    pub fn new(identities: Vec<OutputIdentity>) -> Self {
        Self(identities)
    }

    /// Key for the outputs currently present, in enumeration order
    pub fn from_outputs(outputs: &[Output]) -> Self {
        Self(outputs.iter().map(OutputIdentity::of).collect())
    }

    /// Identities in order
    pub fn identities(&self) -> &[OutputIdentity] {
        &self.0
    }

    /// Same key with the identity at `index` removed
    pub fn without(&self, index: usize) -> Self {
        let mut identities = self.0.clone();
        if index < identities.len() {
            identities.remove(index);
        }
        Self(identities)
    }
}

#[derive(Debug)]
struct Inner {
    key: ConfigKey,
    settings: Vec<OutputSettings>,
}

/// Immutable shared configuration handle
///
/// Cloning a `Configuration` clones the handle, never the contents. Every
/// derived configuration is a fresh value.
#[derive(Debug, Clone)]
pub struct Configuration(Arc<Inner>);

impl Configuration {
    /// Build a configuration from `(identity, settings)` pairs in order
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateOutput`] if an identity repeats.
    pub fn new(
        entries: impl IntoIterator<Item = (OutputIdentity, OutputSettings)>,
    ) -> Result<Self, ConfigurationError> {
        let (identities, settings): (Vec<_>, Vec<_>) = entries.into_iter().unzip();

        for (idx, identity) in identities.iter().enumerate() {
            if identities[..idx].contains(identity) {
                return Err(ConfigurationError::DuplicateOutput(identity.connector.clone()));
            }
        }

        Ok(Self(Arc::new(Inner {
            key: ConfigKey(identities),
            settings,
        })))
    }

    /// Snapshot the live hardware state
    ///
    /// An output is enabled when a CRTC with an active mode drives it.
    pub fn from_resources(resources: &Resources) -> Result<Self, ConfigurationError> {
        let entries = resources.outputs.iter().map(|output| {
            let active = output
                .crtc
                .and_then(|id| resources.crtc(id))
                .and_then(|crtc| crtc.current_mode.and_then(|id| resources.mode(id)).map(|mode| (crtc, mode)));

            let settings = match active {
                Some((crtc, mode)) => {
                    let (width, height) = crtc.transform.apply_to_size(mode.width, mode.height);
                    OutputSettings {
                        enabled: true,
                        rect: Rect::new(crtc.rect.x, crtc.rect.y, width, height),
                        refresh_rate: mode.refresh_rate,
                        transform: crtc.transform,
                        is_primary: output.is_primary,
                        is_presentation: output.is_presentation,
                        is_underscanning: output.is_underscanning,
                    }
                }
                None => OutputSettings::disabled(),
            };

            (OutputIdentity::of(output), settings)
        });

        Self::new(entries)
    }

    /// Identity key
    pub fn key(&self) -> &ConfigKey {
        &self.0.key
    }

    /// Identities in order
    pub fn identities(&self) -> &[OutputIdentity] {
        &self.0.key.0
    }

    /// Settings in order
    pub fn settings(&self) -> &[OutputSettings] {
        &self.0.settings
    }

    /// Iterate `(identity, settings)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&OutputIdentity, &OutputSettings)> {
        self.identities().iter().zip(self.settings())
    }

    /// Number of outputs
    pub fn len(&self) -> usize {
        self.0.settings.len()
    }

    /// True if the configuration names no outputs
    pub fn is_empty(&self) -> bool {
        self.0.settings.is_empty()
    }

    /// Settings of one output
    pub fn settings_for(&self, identity: &OutputIdentity) -> Option<&OutputSettings> {
        self.iter().find(|(id, _)| *id == identity).map(|(_, settings)| settings)
    }

    /// Number of enabled outputs
    pub fn enabled_count(&self) -> usize {
        self.settings().iter().filter(|s| s.enabled).count()
    }

    /// Same ordered identities, settings ignored
    pub fn identity_eq(&self, other: &Configuration) -> bool {
        self.key() == other.key()
    }

    /// Identity-equal and every output's settings equal
    pub fn full_eq(&self, other: &Configuration) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.identity_eq(other) && self.settings() == other.settings())
    }

    /// True if both handles share the same value
    pub fn ptr_eq(&self, other: &Configuration) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Derive a fresh configuration with rewritten settings
    pub fn map_settings(&self, mut f: impl FnMut(usize, &OutputIdentity, OutputSettings) -> OutputSettings) -> Self {
        let settings = self
            .iter()
            .enumerate()
            .map(|(idx, (identity, settings))| f(idx, identity, *settings))
            .collect();

        Self(Arc::new(Inner {
            key: self.0.key.clone(),
            settings,
        }))
    }
}

impl Serialize for Configuration {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            output: &'a OutputIdentity,
            settings: &'a OutputSettings,
        }

        serializer.collect_seq(
            self.iter()
                .map(|(output, settings)| Entry { output, settings }),
        )
    }
}
