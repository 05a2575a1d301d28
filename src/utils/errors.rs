//! User-Friendly Error Formatting
//!
//! Provides user-friendly error messages with troubleshooting hints
//! for common error scenarios.

use std::fmt::Write;

use crate::multimon::{AssignError, MultiMonitorError, ParseError, StoreError};

/// Format error for user consumption
///
/// Takes technical error and produces user-friendly message with
/// troubleshooting steps and context.
pub fn format_user_error(error: &anyhow::Error) -> String {
    let mut output = String::new();

    writeln!(&mut output).ok();
    writeln!(&mut output, "╔════════════════════════════════════════════════════════════╗").ok();
    writeln!(&mut output, "║                     ERROR                                  ║").ok();
    writeln!(&mut output, "╚════════════════════════════════════════════════════════════╝").ok();
    writeln!(&mut output).ok();

    match classify(error) {
        ErrorKind::StoredFile => format_stored_file_error(&mut output),
        ErrorKind::Unsatisfiable => format_unsatisfiable_error(&mut output),
        ErrorKind::Config => format_config_error(&mut output),
        ErrorKind::Other => format_generic_error(&mut output, &error.to_string()),
    }

    writeln!(&mut output).ok();
    writeln!(&mut output, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━").ok();
    writeln!(&mut output, "Technical Details:").ok();
    writeln!(&mut output).ok();
    writeln!(&mut output, "{:#}", error).ok();
    writeln!(&mut output).ok();

    writeln!(&mut output, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━").ok();
    writeln!(&mut output, "Need Help?").ok();
    writeln!(&mut output, "  - Run with --verbose for detailed logs: lamco-display-config -vv").ok();
    writeln!(&mut output, "  - Set RUST_LOG=lamco_display_config=trace for solver traces").ok();
    writeln!(&mut output, "╚════════════════════════════════════════════════════════════╝").ok();

    output
}

#[derive(Debug, PartialEq, Eq)]
enum ErrorKind {
    StoredFile,
    Unsatisfiable,
    Config,
    Other,
}

fn classify(error: &anyhow::Error) -> ErrorKind {
    for cause in error.chain() {
        if cause.is::<ParseError>() || cause.is::<StoreError>() {
            return ErrorKind::StoredFile;
        }
        if cause.is::<AssignError>() {
            return ErrorKind::Unsatisfiable;
        }
        if let Some(e) = cause.downcast_ref::<MultiMonitorError>() {
            return match e {
                MultiMonitorError::Store(_) => ErrorKind::StoredFile,
                MultiMonitorError::Assign(_) | MultiMonitorError::EmergencyUnsatisfiable => ErrorKind::Unsatisfiable,
                _ => ErrorKind::Other,
            };
        }
        if cause.is::<toml::de::Error>() {
            return ErrorKind::Config;
        }
    }

    if error.to_string().contains("config") {
        ErrorKind::Config
    } else {
        ErrorKind::Other
    }
}

fn format_stored_file_error(output: &mut String) {
    writeln!(output, "Stored Monitor Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "The saved monitor layout file could not be read.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. The file was edited by hand and is no longer valid XML").ok();
    writeln!(output, "     → Check it with: lamco-display-config check ~/.config/monitors.xml").ok();
    writeln!(output, "     → Move it aside; it is rewritten on the next confirmed change").ok();
    writeln!(output).ok();
    writeln!(output, "  2. The file was written by an incompatible version").ok();
    writeln!(output, "     → Only <monitors version=\"1\"> is understood").ok();
    writeln!(output).ok();
    writeln!(output, "  3. The directory is not writable").ok();
    writeln!(output, "     → Check permissions of the user config directory").ok();
}

fn format_unsatisfiable_error(output: &mut String) {
    writeln!(output, "Monitor Layout Cannot Be Driven").ok();
    writeln!(output).ok();
    writeln!(output, "No assignment of display engines (CRTCs) fits the requested layout.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. More monitors than the graphics card can drive at once").ok();
    writeln!(output, "     → Disable one monitor or mirror two of them").ok();
    writeln!(output).ok();
    writeln!(output, "  2. A mode or rotation the hardware does not offer").ok();
    writeln!(output, "     → Pick a resolution listed for that monitor").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Mirrored monitors that cannot share a CRTC").ok();
    writeln!(output, "     → Give each monitor its own position instead").ok();
}

fn format_config_error(output: &mut String) {
    writeln!(output, "Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Problem with configuration file.").ok();
    writeln!(output).ok();
    writeln!(output, "Common Causes:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Configuration file not found").ok();
    writeln!(output, "     → Or specify: lamco-display-config -c /path/to/config.toml").ok();
    writeln!(output).ok();
    writeln!(output, "  2. Invalid TOML syntax").ok();
    writeln!(output, "     → Check for typos, missing quotes, etc.").ok();
    writeln!(output).ok();
    writeln!(output, "  3. Value out of range").ok();
    writeln!(output, "     → confirmation_timeout_secs must be between 1 and 600").ok();
}

fn format_generic_error(output: &mut String, error: &str) {
    writeln!(output, "Display Configuration Error").ok();
    writeln!(output).ok();
    writeln!(output, "Error: {}", error).ok();
    writeln!(output).ok();
    writeln!(output, "Troubleshooting:").ok();
    writeln!(output).ok();
    writeln!(output, "  1. Check the resources file describes every connected output").ok();
    writeln!(output, "  2. Run again with -vv to see each layout the solver tried").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_format_user_error() {
        let error = anyhow::anyhow!("Something went sideways");
        let formatted = format_user_error(&error);
        assert!(formatted.contains("ERROR"));
        assert!(formatted.contains("Something went sideways"));
    }

    #[test]
    fn test_parse_error_formatting() {
        let error = anyhow::Error::new(ParseError::UnsupportedVersion("2".into()))
            .context("Failed to read ~/.config/monitors.xml");
        assert_eq!(classify(&error), ErrorKind::StoredFile);
        assert!(format_user_error(&error).contains("Stored Monitor Configuration"));
    }

    #[test]
    fn test_unsatisfiable_formatting() {
        let result: Result<(), MultiMonitorError> = Err(MultiMonitorError::EmergencyUnsatisfiable);
        let error = result.context("Failed to configure monitors").unwrap_err();
        assert_eq!(classify(&error), ErrorKind::Unsatisfiable);
        assert!(format_user_error(&error).contains("CRTCs"));
    }

    #[test]
    fn test_config_error_formatting() {
        let error = anyhow::anyhow!("Failed to parse config file");
        assert_eq!(classify(&error), ErrorKind::Config);
    }
}
