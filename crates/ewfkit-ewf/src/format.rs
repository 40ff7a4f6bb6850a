//! Format family detection
//!
//! After open, the handle classifies the image from the shape of its header
//! sections and signatures. The decision tree mirrors the historical tool
//! behaviours: the `xheader` section wins outright, `header2` is probed by
//! its leading marker codepoint, and a lone `header` is classified by its
//! separator style and column layout.

use ewfkit_core::{Error, EwfFormat, Result};

/// Everything detection needs, collected during the section walk
#[derive(Debug, Default)]
pub struct FormatProbe {
    /// Segment files carry the `EVF2` signature
    pub v2_signature: bool,
    /// Segment files carry the logical evidence signature
    pub logical: bool,
    /// The volume section had the EWF-S01 layout
    pub smart_volume: bool,
    pub has_xheader: bool,
    /// Decoded `header2` text, byte order mark stripped
    pub header2_text: Option<String>,
    /// Decoded `header` text with original separators
    pub header_text: Option<String>,
    /// `acquiry_software_version` from the parsed values, for the
    /// EnCase2/EnCase3 split
    pub acquiry_software_version: Option<String>,
}

/// Classify an opened image
pub fn detect_format(probe: &FormatProbe) -> Result<EwfFormat> {
    if probe.logical {
        return Ok(EwfFormat::Lvf);
    }
    if probe.v2_signature {
        return Ok(EwfFormat::Ex01);
    }
    if probe.has_xheader {
        return Ok(EwfFormat::Ewfx);
    }
    if let Some(header2) = &probe.header2_text {
        let marker = header2.chars().next().unwrap_or('\0');
        return match marker {
            '3' => {
                if header2.contains("\tmd\t") {
                    Ok(EwfFormat::Encase6)
                } else {
                    Ok(EwfFormat::Encase5)
                }
            }
            '1' => Ok(EwfFormat::Encase4),
            other => Err(Error::invalid_format(
                "header2 section",
                format!("unsupported marker codepoint {:?}", other),
            )),
        };
    }
    if let Some(header) = &probe.header_text {
        if header.contains("\r\n") {
            // EnCase family: the column row ends in `r` at a fixed offset
            if header.as_bytes().get(25) == Some(&b'r') {
                return Ok(EwfFormat::Encase1);
            }
            if header.as_bytes().get(31) == Some(&b'r') {
                let version3 = probe
                    .acquiry_software_version
                    .as_deref()
                    .map(|v| v.starts_with('3'))
                    .unwrap_or(false);
                return Ok(if version3 {
                    EwfFormat::Encase3
                } else {
                    EwfFormat::Encase2
                });
            }
            return Err(Error::invalid_format(
                "header section",
                "unrecognised CRLF header layout",
            ));
        }
        // LF separators: linen writes the header2-style '3' marker into a
        // plain header section; FTK and SMART-era tools write '1'
        if header.starts_with('3') {
            return Ok(if header.contains("\tmd\t") {
                EwfFormat::Linen6
            } else {
                EwfFormat::Linen5
            });
        }
        if probe.smart_volume {
            return Ok(EwfFormat::Ewf);
        }
        return Ok(EwfFormat::Ftk);
    }
    if probe.smart_volume {
        return Ok(EwfFormat::Smart);
    }
    Err(Error::invalid_format(
        "image",
        "no header sections to classify",
    ))
}
