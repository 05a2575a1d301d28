//! Resource Snapshot
//!
//! Read-only view of the display hardware (modes, CRTCs, outputs) as reported
//! by the display backend for one configuration cycle.

use serde::{Deserialize, Serialize};

/// Backend identifier of a mode
pub type ModeId = u32;

/// Backend identifier of a CRTC
pub type CrtcId = u32;

/// Backend identifier of an output
pub type OutputId = u32;

/// Connector name prefixes that identify a built-in laptop panel
const LAPTOP_PANEL_PREFIXES: [&str; 5] = ["LVDS", "lvds", "LCD", "DSI", "eDP"];

/// Rectangle in screen coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// True if width or height is zero
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True if the two rectangles share any area
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Output transform: rotation optionally combined with a horizontal flip
///
/// The discriminants follow the usual 0..7 wire numbering, flipped variants
/// being the rotation plus four.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// No rotation
    #[default]
    Normal = 0,
    /// 90° counter-clockwise
    Rotate90 = 1,
    /// 180°
    Rotate180 = 2,
    /// 270° counter-clockwise
    Rotate270 = 3,
    /// Horizontal flip
    Flipped = 4,
    /// Flip, then 90°
    Flipped90 = 5,
    /// Flip, then 180°
    Flipped180 = 6,
    /// Flip, then 270°
    Flipped270 = 7,
}

impl Transform {
    /// All transforms in wire order
    pub const ALL: [Transform; 8] = [
        Transform::Normal,
        Transform::Rotate90,
        Transform::Rotate180,
        Transform::Rotate270,
        Transform::Flipped,
        Transform::Flipped90,
        Transform::Flipped180,
        Transform::Flipped270,
    ];

    /// Transform from its wire index
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Wire index of the transform
    pub fn index(self) -> u32 {
        self as u32
    }

    /// True for 90° and 270° rotations, with or without flip
    pub fn is_rotated(self) -> bool {
        matches!(
            self,
            Transform::Rotate90 | Transform::Rotate270 | Transform::Flipped90 | Transform::Flipped270
        )
    }

    /// True for the flipped variants
    pub fn is_flipped(self) -> bool {
        self.index() >= 4
    }

    /// Compose a rotation with an optional horizontal flip
    pub fn with_flip(self, flipped: bool) -> Self {
        let rotation = self.index() % 4;
        let index = if flipped { rotation + 4 } else { rotation };
        Self::ALL[index as usize]
    }

    /// Width/height of a mode once this transform is applied
    pub fn apply_to_size(self, width: i32, height: i32) -> (i32, i32) {
        if self.is_rotated() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

/// Bitmask of transforms a CRTC can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformSet(u8);

impl TransformSet {
    /// Only [`Transform::Normal`]
    pub const NORMAL_ONLY: TransformSet = TransformSet(1);

    /// Every transform
    pub const ALL: TransformSet = TransformSet(0xff);

    /// Build from raw bits
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub fn bits(self) -> u8 {
        self.0
    }

    /// True if the set contains `transform`
    pub fn contains(self, transform: Transform) -> bool {
        self.0 & (1 << transform.index()) != 0
    }

    /// Add `transform` to the set
    pub fn with(self, transform: Transform) -> Self {
        Self(self.0 | (1 << transform.index()))
    }
}

impl Default for TransformSet {
    fn default() -> Self {
        Self::NORMAL_ONLY
    }
}

/// Video timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// Backend mode ID
    pub id: ModeId,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Refresh rate in Hz
    pub refresh_rate: f32,
}

/// Scan-out engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crtc {
    /// Backend CRTC ID
    pub id: CrtcId,
    /// Currently active area (empty when off)
    #[serde(default)]
    pub rect: Rect,
    /// Currently active mode
    #[serde(default)]
    pub current_mode: Option<ModeId>,
    /// Currently active transform
    #[serde(default)]
    pub transform: Transform,
    /// Transforms this CRTC can perform
    #[serde(default)]
    pub all_transforms: TransformSet,
    /// Number of entries in each gamma ramp
    #[serde(default = "default_gamma_size")]
    pub gamma_size: usize,
}

fn default_gamma_size() -> usize {
    256
}

/// Position of one output inside a tiled monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileInfo {
    /// Tile group shared by all outputs of one physical monitor
    pub group_id: u32,
    /// Number of tile columns
    pub max_h_tiles: u32,
    /// Number of tile rows
    pub max_v_tiles: u32,
    /// Column of this tile
    pub loc_h_tile: u32,
    /// Row of this tile
    pub loc_v_tile: u32,
    /// Tile width in pixels
    pub tile_w: u32,
    /// Tile height in pixels
    pub tile_h: u32,
}

/// Backlight range and value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backlight {
    /// Hardware minimum
    pub min: i32,
    /// Hardware maximum
    pub max: i32,
    /// Current value, normalized to 0..=100
    pub value: i32,
}

/// Physical connector type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    /// Not reported
    #[default]
    Unknown,
    /// VGA
    Vga,
    /// DVI
    Dvi,
    /// LVDS laptop panel
    Lvds,
    /// DisplayPort
    DisplayPort,
    /// HDMI
    Hdmi,
    /// Embedded DisplayPort laptop panel
    Edp,
    /// MIPI DSI panel
    Dsi,
    /// Virtual output
    Virtual,
}

/// Physical connector plus the monitor attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Backend output ID
    pub id: OutputId,
    /// Connector name, e.g. `eDP-1`
    pub name: String,
    /// EDID vendor, empty when unknown
    #[serde(default)]
    pub vendor: String,
    /// EDID product, empty when unknown
    #[serde(default)]
    pub product: String,
    /// EDID serial, empty when unknown
    #[serde(default)]
    pub serial: String,
    /// Connector type
    #[serde(default)]
    pub connector_type: ConnectorType,
    /// Supported modes
    pub modes: Vec<ModeId>,
    /// Preferred mode
    pub preferred_mode: Option<ModeId>,
    /// CRTCs able to drive this output
    pub possible_crtcs: Vec<CrtcId>,
    /// Outputs this one can be cloned with
    #[serde(default)]
    pub possible_clones: Vec<OutputId>,
    /// CRTC currently driving this output
    #[serde(default)]
    pub crtc: Option<CrtcId>,
    /// Backend considers this output primary
    #[serde(default)]
    pub is_primary: bool,
    /// Presentation mode flag
    #[serde(default)]
    pub is_presentation: bool,
    /// Underscan flag
    #[serde(default)]
    pub is_underscanning: bool,
    /// Firmware-suggested position
    #[serde(default)]
    pub suggested_position: Option<(i32, i32)>,
    /// Tile placement when part of a tiled monitor
    #[serde(default)]
    pub tile_info: Option<TileInfo>,
    /// Backlight control, if any
    #[serde(default)]
    pub backlight: Option<Backlight>,
    /// Preferred mode may change dynamically (e.g. guest resize)
    #[serde(default)]
    pub hotplug_mode_update: bool,
}

impl Output {
    /// Create an output with no modes, CRTCs or monitor identity
    pub fn new(id: OutputId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            vendor: String::new(),
            product: String::new(),
            serial: String::new(),
            connector_type: ConnectorType::Unknown,
            modes: Vec::new(),
            preferred_mode: None,
            possible_crtcs: Vec::new(),
            possible_clones: Vec::new(),
            crtc: None,
            is_primary: false,
            is_presentation: false,
            is_underscanning: false,
            suggested_position: None,
            tile_info: None,
            backlight: None,
            hotplug_mode_update: false,
        }
    }

    /// True for built-in laptop panels
    pub fn is_laptop_panel(&self) -> bool {
        match self.connector_type {
            ConnectorType::Lvds | ConnectorType::Edp | ConnectorType::Dsi => true,
            ConnectorType::Unknown => LAPTOP_PANEL_PREFIXES
                .iter()
                .any(|prefix| self.name.starts_with(prefix)),
            _ => false,
        }
    }

    /// True if the monitor reported vendor, product and serial
    pub fn has_identity(&self) -> bool {
        !self.vendor.is_empty() && !self.product.is_empty() && !self.serial.is_empty()
    }

    /// True if `crtc` can drive this output
    pub fn can_use_crtc(&self, crtc: CrtcId) -> bool {
        self.possible_crtcs.contains(&crtc)
    }

    /// True if the two outputs list each other as possible clones
    pub fn can_clone_with(&self, other: &Output) -> bool {
        self.possible_clones.contains(&other.id) && other.possible_clones.contains(&self.id)
    }
}

/// Hardware snapshot for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// All modes known to the system
    pub modes: Vec<Mode>,
    /// All CRTCs
    pub crtcs: Vec<Crtc>,
    /// All outputs in enumeration order
    pub outputs: Vec<Output>,
}

impl Resources {
    /// Look up a mode by ID
    pub fn mode(&self, id: ModeId) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.id == id)
    }

    /// Look up a CRTC by ID
    pub fn crtc(&self, id: CrtcId) -> Option<&Crtc> {
        self.crtcs.iter().find(|crtc| crtc.id == id)
    }

    /// Look up an output by ID
    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|output| output.id == id)
    }

    /// Preferred mode of an output
    pub fn preferred_mode(&self, output: &Output) -> Option<&Mode> {
        output.preferred_mode.and_then(|id| self.mode(id))
    }

    /// True if any output reports a dynamically changing preferred mode
    pub fn has_hotplug_mode_update(&self) -> bool {
        self.outputs.iter().any(|output| output.hotplug_mode_update)
    }
}
