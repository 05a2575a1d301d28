//! Persisted Monitor Configuration Format
//!
//! Reads and writes the versioned `monitors.xml` document:
//!
//! ```text
//! <monitors version="1">
//!   <configuration>
//!     <clone>no</clone>
//!     <output name="eDP-1">
//!       <vendor>AUO</vendor>
//!       <product>0x213d</product>
//!       <serial>0x00000000</serial>
//!       <width>1920</width>
//!       <height>1080</height>
//!       <rate>60</rate>
//!       <x>0</x>
//!       <y>0</y>
//!       <rotation>normal</rotation>
//!       <reflect_x>no</reflect_x>
//!       <reflect_y>no</reflect_y>
//!       <primary>yes</primary>
//!       <presentation>no</presentation>
//!       <underscanning>no</underscanning>
//!     </output>
//!   </configuration>
//! </monitors>
//! ```
//!
//! Unknown children of `configuration` and `output` are skipped with their
//! whole subtree. Outputs lacking vendor, product or serial are dropped.

use std::fmt::Write;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use crate::multimon::configuration::{
    Configuration, ConfigurationError, OutputIdentity, OutputSettings,
};
use crate::multimon::resources::{Rect, Transform};

/// Only supported document version
pub const FORMAT_VERSION: &str = "1";

/// Largest coordinate or size accepted in the file
const MAX_COORDINATE: i32 = 32767;

/// Persisted file parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Malformed XML
    #[error("Malformed XML: {0}")]
    Xml(String),

    /// Root element has no version attribute
    #[error("Missing version attribute on <monitors>")]
    MissingVersion,

    /// Root element has an unsupported version
    #[error("Unsupported monitors.xml version: {0}")]
    UnsupportedVersion(String),

    /// Element not allowed at this position
    #[error("Unexpected element <{0}>")]
    UnexpectedElement(String),

    /// Text not allowed at this position
    #[error("Unexpected text: {0:?}")]
    UnexpectedText(String),

    /// Required attribute missing
    #[error("Missing attribute {attribute:?} on <{element}>")]
    MissingAttribute {
        /// Element name
        element: &'static str,
        /// Attribute name
        attribute: &'static str,
    },

    /// Invalid integer or float
    #[error("Invalid number {value:?} for <{field}>")]
    InvalidNumber {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
    },

    /// Invalid yes/no token
    #[error("Invalid boolean {value:?} for <{field}>")]
    InvalidBool {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
    },

    /// Invalid rotation token
    #[error("Invalid rotation {0:?}")]
    InvalidRotation(String),

    /// Vertical reflection requested
    #[error("Y reflection is not supported")]
    ReflectYUnsupported,

    /// Output listed twice within one configuration
    #[error("Output {0} appears twice in one configuration")]
    DuplicateOutput(String),

    /// Document ended inside an element
    #[error("Unexpected end of document")]
    UnexpectedEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Vendor,
    Product,
    Serial,
    Width,
    Height,
    Rate,
    X,
    Y,
    Rotation,
    ReflectX,
    ReflectY,
    Primary,
    Presentation,
    Underscanning,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        Some(match tag {
            b"vendor" => Field::Vendor,
            b"product" => Field::Product,
            b"serial" => Field::Serial,
            b"width" => Field::Width,
            b"height" => Field::Height,
            b"rate" => Field::Rate,
            b"x" => Field::X,
            b"y" => Field::Y,
            b"rotation" => Field::Rotation,
            b"reflect_x" => Field::ReflectX,
            b"reflect_y" => Field::ReflectY,
            b"primary" => Field::Primary,
            b"presentation" => Field::Presentation,
            b"underscanning" => Field::Underscanning,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Field::Vendor => "vendor",
            Field::Product => "product",
            Field::Serial => "serial",
            Field::Width => "width",
            Field::Height => "height",
            Field::Rate => "rate",
            Field::X => "x",
            Field::Y => "y",
            Field::Rotation => "rotation",
            Field::ReflectX => "reflect_x",
            Field::ReflectY => "reflect_y",
            Field::Primary => "primary",
            Field::Presentation => "presentation",
            Field::Underscanning => "underscanning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Monitors,
    Configuration,
    Clone,
    Output,
    OutputField(Field),
    Done,
}

/// Output being assembled from its child elements
#[derive(Debug, Default)]
struct PendingOutput {
    name: String,
    vendor: Option<String>,
    product: Option<String>,
    serial: Option<String>,
    width: i32,
    height: i32,
    x: i32,
    y: i32,
    rate: f32,
    rotation: Transform,
    reflect_x: bool,
    primary: bool,
    presentation: bool,
    underscanning: bool,
}

impl PendingOutput {
    fn finish(self) -> Option<(OutputIdentity, OutputSettings)> {
        let (Some(vendor), Some(product), Some(serial)) = (self.vendor, self.product, self.serial) else {
            debug!("Dropping output {} without vendor/product/serial", self.name);
            return None;
        };

        let identity = OutputIdentity::new(self.name, vendor, product, serial);
        if !identity.is_complete() {
            debug!("Dropping output {} with empty identity", identity.connector);
            return None;
        }

        let settings = if self.width == 0 || self.height == 0 {
            OutputSettings::disabled()
        } else {
            OutputSettings {
                enabled: true,
                rect: Rect::new(self.x, self.y, self.width, self.height),
                refresh_rate: self.rate,
                transform: self.rotation.with_flip(self.reflect_x),
                is_primary: self.primary,
                is_presentation: self.presentation,
                is_underscanning: self.underscanning,
            }
        };

        Some((identity, settings))
    }
}

struct Parser {
    state: State,
    unknown_depth: usize,
    text: String,
    outputs: Vec<(OutputIdentity, OutputSettings)>,
    output: Option<PendingOutput>,
    configurations: Vec<Configuration>,
}

impl Parser {
    fn new() -> Self {
        Self {
            state: State::Initial,
            unknown_depth: 0,
            text: String::new(),
            outputs: Vec::new(),
            output: None,
            configurations: Vec::new(),
        }
    }

    fn start(&mut self, element: &BytesStart<'_>) -> Result<(), ParseError> {
        if self.unknown_depth > 0 {
            self.unknown_depth += 1;
            return Ok(());
        }

        let tag = element.name();
        let tag = tag.as_ref();

        self.state = match (self.state, tag) {
            (State::Initial, b"monitors") => {
                let version = attribute(element, b"version")?.ok_or(ParseError::MissingVersion)?;
                if version != FORMAT_VERSION {
                    return Err(ParseError::UnsupportedVersion(version));
                }
                State::Monitors
            }
            (State::Monitors, b"configuration") => {
                self.outputs.clear();
                State::Configuration
            }
            (State::Configuration, b"clone") => State::Clone,
            (State::Configuration, b"output") => {
                let name = attribute(element, b"name")?.ok_or(ParseError::MissingAttribute {
                    element: "output",
                    attribute: "name",
                })?;
                self.output = Some(PendingOutput {
                    name,
                    ..PendingOutput::default()
                });
                State::Output
            }
            (State::Output, tag) => match Field::from_tag(tag) {
                Some(field) => {
                    self.text.clear();
                    State::OutputField(field)
                }
                None => {
                    self.unknown_depth = 1;
                    State::Output
                }
            },
            (State::Configuration, _) => {
                self.unknown_depth = 1;
                State::Configuration
            }
            _ => {
                return Err(ParseError::UnexpectedElement(
                    String::from_utf8_lossy(tag).into_owned(),
                ))
            }
        };

        Ok(())
    }

    fn end(&mut self) -> Result<(), ParseError> {
        if self.unknown_depth > 0 {
            self.unknown_depth -= 1;
            return Ok(());
        }

        self.state = match self.state {
            State::Monitors => State::Done,
            State::Configuration => {
                let outputs = std::mem::take(&mut self.outputs);
                if outputs.is_empty() {
                    debug!("Skipping configuration without identifiable outputs");
                } else {
                    let config = Configuration::new(outputs).map_err(|e| match e {
                        ConfigurationError::DuplicateOutput(name) => ParseError::DuplicateOutput(name),
                    })?;
                    self.configurations.push(config);
                }
                State::Monitors
            }
            State::Clone => {
                // Accepted for compatibility, not interpreted
                parse_bool("clone", &std::mem::take(&mut self.text))?;
                State::Configuration
            }
            State::Output => {
                if let Some(entry) = self.output.take().and_then(PendingOutput::finish) {
                    self.outputs.push(entry);
                }
                State::Configuration
            }
            State::OutputField(field) => {
                let text = std::mem::take(&mut self.text);
                if let Some(output) = self.output.as_mut() {
                    apply_field(output, field, text.trim())?;
                }
                State::Output
            }
            State::Initial | State::Done => return Err(ParseError::UnexpectedEof),
        };

        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), ParseError> {
        if self.unknown_depth > 0 {
            return Ok(());
        }

        match self.state {
            State::OutputField(_) | State::Clone => {
                self.text.push_str(text);
                Ok(())
            }
            _ if text.trim().is_empty() => Ok(()),
            _ => Err(ParseError::UnexpectedText(text.to_string())),
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| ParseError::Xml(e.to_string()))?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(|e| ParseError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ParseError> {
    match value.trim() {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(ParseError::InvalidBool {
            field,
            value: other.to_string(),
        }),
    }
}

fn parse_coordinate(field: &'static str, value: &str) -> Result<i32, ParseError> {
    value
        .parse::<i32>()
        .ok()
        .filter(|v| (0..=MAX_COORDINATE).contains(v))
        .ok_or_else(|| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn parse_rotation(value: &str) -> Result<Transform, ParseError> {
    match value {
        "normal" => Ok(Transform::Normal),
        "left" => Ok(Transform::Rotate90),
        "upside_down" => Ok(Transform::Rotate180),
        "right" => Ok(Transform::Rotate270),
        other => Err(ParseError::InvalidRotation(other.to_string())),
    }
}

fn rotation_name(transform: Transform) -> &'static str {
    match transform.with_flip(false) {
        Transform::Rotate90 => "left",
        Transform::Rotate180 => "upside_down",
        Transform::Rotate270 => "right",
        _ => "normal",
    }
}

fn apply_field(output: &mut PendingOutput, field: Field, value: &str) -> Result<(), ParseError> {
    let name = field.name();
    match field {
        Field::Vendor => output.vendor = Some(value.to_string()),
        Field::Product => output.product = Some(value.to_string()),
        Field::Serial => output.serial = Some(value.to_string()),
        Field::Width => output.width = parse_coordinate(name, value)?,
        Field::Height => output.height = parse_coordinate(name, value)?,
        Field::X => output.x = parse_coordinate(name, value)?,
        Field::Y => output.y = parse_coordinate(name, value)?,
        Field::Rate => {
            output.rate = value
                .parse::<f32>()
                .ok()
                .filter(|rate| rate.is_finite())
                .ok_or_else(|| ParseError::InvalidNumber {
                    field: name,
                    value: value.to_string(),
                })?
        }
        Field::Rotation => output.rotation = parse_rotation(value)?,
        Field::ReflectX => output.reflect_x = parse_bool(name, value)?,
        Field::ReflectY => {
            if parse_bool(name, value)? {
                return Err(ParseError::ReflectYUnsupported);
            }
        }
        Field::Primary => output.primary = parse_bool(name, value)?,
        Field::Presentation => output.presentation = parse_bool(name, value)?,
        Field::Underscanning => output.underscanning = parse_bool(name, value)?,
    }
    Ok(())
}

/// Parse a persisted document into its configurations, in document order
///
/// # Errors
///
/// Any malformed content fails the whole document.
pub fn parse(xml: &str) -> Result<Vec<Configuration>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut parser = Parser::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => parser.start(e)?,
            Ok(Event::Empty(ref e)) => {
                parser.start(e)?;
                parser.end()?;
            }
            Ok(Event::End(_)) => parser.end()?,
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| ParseError::Xml(e.to_string()))?;
                parser.text(&text)?;
            }
            Ok(Event::CData(ref e)) => {
                let text = String::from_utf8_lossy(&e[..]).into_owned();
                parser.text(&text)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if parser.state != State::Done {
        return Err(ParseError::UnexpectedEof);
    }

    Ok(parser.configurations)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Serialize configurations into a persisted document
///
/// Outputs without a complete identity are left out; disabled outputs are
/// written with their identity only.
pub fn serialize<'a>(configurations: impl IntoIterator<Item = &'a Configuration>) -> String {
    let mut out = String::new();
    writeln!(out, "<monitors version=\"{}\">", FORMAT_VERSION).ok();

    for config in configurations {
        writeln!(out, "  <configuration>").ok();
        writeln!(out, "    <clone>no</clone>").ok();

        for (identity, settings) in config.iter() {
            if !identity.is_complete() {
                continue;
            }

            writeln!(out, "    <output name=\"{}\">", escape(identity.connector.as_str())).ok();
            writeln!(out, "      <vendor>{}</vendor>", escape(identity.vendor.as_str())).ok();
            writeln!(out, "      <product>{}</product>", escape(identity.product.as_str())).ok();
            writeln!(out, "      <serial>{}</serial>", escape(identity.serial.as_str())).ok();

            if settings.enabled {
                let rect = settings.rect;
                writeln!(out, "      <width>{}</width>", rect.width).ok();
                writeln!(out, "      <height>{}</height>", rect.height).ok();
                writeln!(out, "      <rate>{}</rate>", settings.refresh_rate).ok();
                writeln!(out, "      <x>{}</x>", rect.x).ok();
                writeln!(out, "      <y>{}</y>", rect.y).ok();
                writeln!(out, "      <rotation>{}</rotation>", rotation_name(settings.transform)).ok();
                writeln!(out, "      <reflect_x>{}</reflect_x>", yes_no(settings.transform.is_flipped())).ok();
                writeln!(out, "      <reflect_y>no</reflect_y>").ok();
                writeln!(out, "      <primary>{}</primary>", yes_no(settings.is_primary)).ok();
                writeln!(out, "      <presentation>{}</presentation>", yes_no(settings.is_presentation)).ok();
                writeln!(out, "      <underscanning>{}</underscanning>", yes_no(settings.is_underscanning)).ok();
            }

            writeln!(out, "    </output>").ok();
        }

        writeln!(out, "  </configuration>").ok();
    }

    writeln!(out, "</monitors>").ok();
    out
}
