//! Header value store and codecs
//!
//! Case metadata lives in `header`, `header2`, and `xheader` sections as
//! zlib-compressed text. Seven tab-delimited layouts exist historically,
//! plus an XML form; dates appear in three encodings. Values are UTF-8
//! in memory; codepage conversion (windows-1252 for `header`, UTF-16LE for
//! `header2`) happens at the section boundary only.

use std::io::{Cursor, Read, Write};

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use encoding_rs::{UTF_16LE, WINDOWS_1252};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use ewfkit_core::{CompressionLevel, Error, Result};

/// Upper bound on an inflated header body; headers are tiny in practice
const MAX_HEADER_BODY: usize = 16 << 20;

/// Number of well-known header value slots
pub const STANDARD_VALUE_COUNT: usize = 16;

/// Fixed `srce` block appended by the type 5/6/7 layouts
const HEADER_STRING_SRCE: &str =
    "srce\n0\t1\np\tn\tid\tev\ttb\tlo\tpo\tah\tgu\taq\n0\t0\n\t\t\t\t\t-1\t-1\t\t\t\n\n";
/// Fixed `sub` block appended by the type 5/6/7 layouts
const HEADER_STRING_SUB: &str = "sub\n0\t1\np\tn\tid\tnu\tco\tgu\n0\t0\n\t\t\t\t1\t\n\n";

/// Well-known header values with their historical stable indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HeaderValueId {
    CaseNumber = 0,
    Description = 1,
    ExaminerName = 2,
    EvidenceNumber = 3,
    Notes = 4,
    AcquiryDate = 5,
    SystemDate = 6,
    AcquiryOperatingSystem = 7,
    AcquirySoftwareVersion = 8,
    Password = 9,
    CompressionType = 10,
    Model = 11,
    SerialNumber = 12,
    ProcessIdentifier = 13,
    UnknownDc = 14,
    Extents = 15,
}

impl HeaderValueId {
    pub const ALL: [HeaderValueId; STANDARD_VALUE_COUNT] = [
        Self::CaseNumber,
        Self::Description,
        Self::ExaminerName,
        Self::EvidenceNumber,
        Self::Notes,
        Self::AcquiryDate,
        Self::SystemDate,
        Self::AcquiryOperatingSystem,
        Self::AcquirySoftwareVersion,
        Self::Password,
        Self::CompressionType,
        Self::Model,
        Self::SerialNumber,
        Self::ProcessIdentifier,
        Self::UnknownDc,
        Self::Extents,
    ];

    /// The long key, used by xheader tags and the public API
    pub fn key(&self) -> &'static str {
        match self {
            Self::CaseNumber => "case_number",
            Self::Description => "description",
            Self::ExaminerName => "examiner_name",
            Self::EvidenceNumber => "evidence_number",
            Self::Notes => "notes",
            Self::AcquiryDate => "acquiry_date",
            Self::SystemDate => "system_date",
            Self::AcquiryOperatingSystem => "acquiry_operating_system",
            Self::AcquirySoftwareVersion => "acquiry_software_version",
            Self::Password => "password",
            Self::CompressionType => "compression_type",
            Self::Model => "model",
            Self::SerialNumber => "serial_number",
            Self::ProcessIdentifier => "process_identifier",
            Self::UnknownDc => "unknown_dc",
            Self::Extents => "extents",
        }
    }

    /// Resolve a long key or a tab-delimited column identifier
    pub fn from_key(key: &str) -> Option<Self> {
        let id = match key {
            "case_number" | "c" => Self::CaseNumber,
            "description" | "a" => Self::Description,
            "examiner_name" | "e" => Self::ExaminerName,
            "evidence_number" | "n" => Self::EvidenceNumber,
            "notes" | "t" => Self::Notes,
            "acquiry_date" | "m" => Self::AcquiryDate,
            "system_date" | "u" => Self::SystemDate,
            "acquiry_operating_system" | "ov" => Self::AcquiryOperatingSystem,
            "acquiry_software_version" | "av" => Self::AcquirySoftwareVersion,
            "password" | "p" => Self::Password,
            "compression_type" | "r" => Self::CompressionType,
            "model" | "md" => Self::Model,
            "serial_number" | "sn" => Self::SerialNumber,
            "process_identifier" | "pid" => Self::ProcessIdentifier,
            "unknown_dc" | "dc" => Self::UnknownDc,
            "extents" | "ext" => Self::Extents,
            _ => return None,
        };
        Some(id)
    }

    fn is_date(&self) -> bool {
        matches!(self, Self::AcquiryDate | Self::SystemDate)
    }
}

/// The tab-delimited layout of a header string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStringType {
    /// `c n a e t m u p r`, LF (EWF) or CRLF (EnCase1)
    Type1 { crlf: bool },
    /// adds `av`/`ov`, LF (FTK) or CRLF (EnCase2/3)
    Type2 { crlf: bool },
    /// drops the `r` column (EnCase4/5/6 header), CRLF
    Type3,
    /// `a c n e t av ov m u p`, header2 of EnCase4, epoch dates
    Type4,
    /// type4 plus `dc` and the srce/sub trailers (EnCase5 header2)
    Type5,
    /// type5 plus `md`/`sn` (EnCase6 header2)
    Type6,
    /// type4 plus srce/sub trailers (linen5)
    Type7,
}

impl HeaderStringType {
    fn separator(&self) -> &'static str {
        match self {
            Self::Type1 { crlf: true } | Self::Type2 { crlf: true } | Self::Type3 => "\r\n",
            _ => "\n",
        }
    }

    /// Dates in header2-family strings are epoch seconds
    fn epoch_dates(&self) -> bool {
        matches!(self, Self::Type4 | Self::Type5 | Self::Type6 | Self::Type7)
    }

    fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Type1 { .. } => &["c", "n", "a", "e", "t", "m", "u", "p", "r"],
            Self::Type2 { .. } => &["c", "n", "a", "e", "t", "av", "ov", "m", "u", "p", "r"],
            Self::Type3 => &["c", "n", "a", "e", "t", "av", "ov", "m", "u", "p"],
            Self::Type4 | Self::Type7 => &["a", "c", "n", "e", "t", "av", "ov", "m", "u", "p"],
            Self::Type5 => &["a", "c", "n", "e", "t", "av", "ov", "m", "u", "p", "dc"],
            Self::Type6 => {
                &["a", "c", "n", "e", "t", "md", "sn", "av", "ov", "m", "u", "p", "dc"]
            }
        }
    }

    fn head_marker(&self) -> &'static str {
        match self {
            Self::Type5 | Self::Type6 | Self::Type7 => "3",
            _ => "1",
        }
    }

    fn has_trailers(&self) -> bool {
        matches!(self, Self::Type5 | Self::Type6 | Self::Type7)
    }

    /// The password column encodes an unset password as "0" in the header
    /// family, and as empty in the header2 family
    fn password_default(&self) -> &'static str {
        match self {
            Self::Type1 { .. } | Self::Type2 { .. } | Self::Type3 => "0",
            _ => "",
        }
    }
}

/// Ordered header value table
#[derive(Debug, Clone, Default)]
pub struct HeaderValues {
    values: [Option<String>; STANDARD_VALUE_COUNT],
    /// Keys outside the standard set, preserved in file order
    extra: Vec<(String, String)>,
}

impl HeaderValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: HeaderValueId, value: impl Into<String>) {
        self.values[id as usize] = Some(value.into());
    }

    pub fn get(&self, id: HeaderValueId) -> Option<&str> {
        self.values[id as usize].as_deref()
    }

    pub fn set_by_key(&mut self, key: &str, value: impl Into<String>) {
        match HeaderValueId::from_key(key) {
            Some(id) => self.set(id, value),
            None => {
                let value = value.into();
                if let Some(slot) = self.extra.iter_mut().find(|(k, _)| k == key) {
                    slot.1 = value;
                } else {
                    self.extra.push((key.to_string(), value));
                }
            }
        }
    }

    pub fn get_by_key(&self, key: &str) -> Option<&str> {
        match HeaderValueId::from_key(key) {
            Some(id) => self.get(id),
            None => self
                .extra
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|v| v.is_none()) && self.extra.is_empty()
    }

    /// Overlay `other` onto self; used for the xheader > header2 > header
    /// precedence by applying the lowest-precedence source first.
    pub fn merge_from(&mut self, other: &HeaderValues) {
        for id in HeaderValueId::ALL {
            if let Some(value) = other.get(id) {
                self.set(id, value);
            }
        }
        for (key, value) in &other.extra {
            self.set_by_key(key, value.clone());
        }
    }

    /// Generate a tab-delimited header string
    pub fn generate(
        &self,
        string_type: HeaderStringType,
        compression: CompressionLevel,
        timestamp: i64,
    ) -> String {
        let sep = string_type.separator();
        let mut out = String::new();
        out.push_str(string_type.head_marker());
        out.push_str(sep);
        out.push_str("main");
        out.push_str(sep);
        out.push_str(&string_type.columns().join("\t"));
        out.push_str(sep);

        let mut fields = Vec::with_capacity(string_type.columns().len());
        for column in string_type.columns() {
            let id = HeaderValueId::from_key(column).unwrap();
            let value = match self.get(id) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => match id {
                    HeaderValueId::AcquiryDate | HeaderValueId::SystemDate => {
                        if string_type.epoch_dates() {
                            generate_date_header2(timestamp)
                        } else {
                            generate_date_header(timestamp)
                        }
                    }
                    HeaderValueId::Password => string_type.password_default().to_string(),
                    HeaderValueId::CompressionType => compression.header_value().to_string(),
                    _ => String::new(),
                },
            };
            // Dates supplied by the caller are canonical; re-encode for the
            // header2 family.
            let value = if id.is_date() && string_type.epoch_dates() && self.get(id).is_some() {
                parse_date_value(&value)
                    .map(|ts| ts.to_string())
                    .unwrap_or(value)
            } else {
                value
            };
            fields.push(value);
        }
        out.push_str(&fields.join("\t"));
        out.push_str(sep);
        out.push_str(sep);
        if string_type.has_trailers() {
            out.push_str(HEADER_STRING_SRCE);
            out.push_str(HEADER_STRING_SUB);
        }
        out
    }

    /// Parse any of the tab-delimited layouts.
    ///
    /// Date columns are converted to the canonical `YYYY M D H M S` local
    /// form regardless of their on-disk encoding.
    pub fn parse(text: &str) -> Result<Self> {
        let normalised = text.replace("\r\n", "\n");
        let lines: Vec<&str> = normalised.split('\n').collect();
        let main_index = lines
            .iter()
            .position(|line| *line == "main")
            .ok_or_else(|| Error::invalid_format("header section", "missing main block"))?;
        if lines.len() < main_index + 3 {
            return Err(Error::invalid_format(
                "header section",
                "truncated main block",
            ));
        }
        let identifiers: Vec<&str> = lines[main_index + 1].split('\t').collect();
        let values: Vec<&str> = lines[main_index + 2].split('\t').collect();

        let mut table = Self::new();
        for (identifier, value) in identifiers.iter().zip(values.iter()) {
            if value.is_empty() {
                continue;
            }
            match HeaderValueId::from_key(identifier) {
                Some(id) if id.is_date() => {
                    let canonical = parse_date_value(value)
                        .map(generate_date_header_from_epoch)
                        .unwrap_or_else(|| value.to_string());
                    table.set(id, canonical);
                }
                Some(HeaderValueId::Password) if *value == "0" => {
                    // "0" marks an unset password
                }
                Some(id) => table.set(id, *value),
                None => table.extra.push((identifier.to_string(), value.to_string())),
            }
        }
        Ok(table)
    }

    /// Generate the xheader XML form
    pub fn generate_xml(&self, timestamp: i64) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
        for id in HeaderValueId::ALL {
            // The writer recognises process_identifier but never emits it
            if id == HeaderValueId::ProcessIdentifier {
                continue;
            }
            let value = match self.get(id) {
                Some(value) if !value.is_empty() => value.to_string(),
                None if id.is_date() => generate_date_xheader(timestamp),
                _ => continue,
            };
            let value = if id.is_date() {
                parse_date_value(&value)
                    .map(generate_date_xheader)
                    .unwrap_or(value)
            } else {
                value
            };
            out.push_str(&format!("\t<{0}>{1}</{0}>\n", id.key(), xml_escape(&value)));
        }
        for (key, value) in &self.extra {
            out.push_str(&format!("\t<{0}>{1}</{0}>\n", key, xml_escape(value)));
        }
        out.push_str("</xheader>\n\n");
        out
    }

    /// Parse the xheader XML form
    pub fn parse_xml(text: &str) -> Result<Self> {
        let mut table = Self::new();
        for (key, value) in parse_simple_xml(text, "xheader")? {
            match HeaderValueId::from_key(&key) {
                Some(id) if id.is_date() => {
                    let canonical = parse_date_value(&value)
                        .map(generate_date_header_from_epoch)
                        .unwrap_or(value);
                    table.set(id, canonical);
                }
                Some(id) => table.set(id, value),
                None => table.extra.push((key, value)),
            }
        }
        Ok(table)
    }
}

/// Generate the `header` date form: `YYYY M D H M S` in local time
pub fn generate_date_header(timestamp: i64) -> String {
    generate_date_header_from_epoch(timestamp)
}

fn generate_date_header_from_epoch(timestamp: i64) -> String {
    let time = local_time(timestamp);
    format!(
        "{:4} {} {} {} {} {}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Generate the `header2` date form: decimal epoch seconds
pub fn generate_date_header2(timestamp: i64) -> String {
    timestamp.to_string()
}

/// Generate the `xheader` date form: ctime style with a UTC offset
pub fn generate_date_xheader(timestamp: i64) -> String {
    let time = local_time(timestamp);
    time.format("%a %b %e %H:%M:%S %Y %z").to_string()
}

fn local_time(timestamp: i64) -> DateTime<Local> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(|| Local.timestamp_opt(0, 0).single().unwrap())
}

/// Parse any of the three date encodings into epoch seconds
pub fn parse_date_value(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    // header2: seconds since epoch
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse::<i64>().ok();
    }
    // header: YYYY M D H M S
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() == 6 && fields.iter().all(|f| f.chars().all(|c| c.is_ascii_digit())) {
        let numbers: Vec<u32> = fields.iter().filter_map(|f| f.parse().ok()).collect();
        if numbers.len() == 6 {
            return Local
                .with_ymd_and_hms(
                    numbers[0] as i32,
                    numbers[1],
                    numbers[2],
                    numbers[3],
                    numbers[4],
                    numbers[5],
                )
                .single()
                .map(|t| t.timestamp());
        }
    }
    // xheader: Day Mon DD HH:MM:SS YYYY +HHMM, optionally with a trailing
    // timezone name in parentheses
    let without_name = match trimmed.find('(') {
        Some(index) => trimmed[..index].trim_end(),
        None => trimmed,
    };
    if let Ok(time) = DateTime::parse_from_str(without_name, "%a %b %e %H:%M:%S %Y %z") {
        return Some(time.timestamp());
    }
    None
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parse a flat `<root><key>value</key>…</root>` document
pub fn parse_simple_xml(text: &str, root: &str) -> Result<Vec<(String, String)>> {
    let open_root = format!("<{}>", root);
    let close_root = format!("</{}>", root);
    let start = text
        .find(&open_root)
        .ok_or_else(|| Error::invalid_format("xml section", format!("missing <{}>", root)))?
        + open_root.len();
    let end = text
        .find(&close_root)
        .ok_or_else(|| Error::invalid_format("xml section", format!("missing </{}>", root)))?;
    let mut pairs = Vec::new();
    let mut rest = &text[start..end];
    while let Some(open) = rest.find('<') {
        let Some(open_end) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + open_end];
        if tag.starts_with('/') || tag.is_empty() {
            rest = &rest[open + open_end + 1..];
            continue;
        }
        let close = format!("</{}>", tag);
        let value_start = open + open_end + 1;
        let Some(close_at) = rest[value_start..].find(&close) else {
            return Err(Error::invalid_format(
                "xml section",
                format!("unterminated <{}>", tag),
            ));
        };
        let value = &rest[value_start..value_start + close_at];
        pairs.push((tag.to_string(), xml_unescape(value.trim())));
        rest = &rest[value_start + close_at + close.len()..];
    }
    Ok(pairs)
}

/// Inflate and codepage-decode a `header` section body
pub fn decode_header_body(bytes: &[u8]) -> Result<String> {
    let inflated = inflate_body(bytes)?;
    let (text, _, _) = WINDOWS_1252.decode(&inflated);
    Ok(text.into_owned())
}

/// Codepage-encode and deflate a `header` section body
pub fn encode_header_body(text: &str) -> Result<Vec<u8>> {
    let (encoded, _, _) = WINDOWS_1252.encode(text);
    deflate_body(&encoded)
}

/// Inflate and decode a UTF-16LE `header2` section body
pub fn decode_header2_body(bytes: &[u8]) -> Result<String> {
    let inflated = inflate_body(bytes)?;
    let (text, _, had_errors) = UTF_16LE.decode(&inflated);
    if had_errors {
        return Err(Error::invalid_format("header2 section", "invalid UTF-16"));
    }
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Encode to UTF-16LE with a byte order mark and deflate
pub fn encode_header2_body(text: &str) -> Result<Vec<u8>> {
    let mut encoded = vec![0xff, 0xfe];
    for unit in text.encode_utf16() {
        encoded.extend_from_slice(&unit.to_le_bytes());
    }
    deflate_body(&encoded)
}

/// Inflate a UTF-8 `xheader`/`xhash` section body
pub fn decode_utf8_body(bytes: &[u8]) -> Result<String> {
    let inflated = inflate_body(bytes)?;
    String::from_utf8(inflated)
        .map_err(|_| Error::invalid_format("xheader section", "invalid UTF-8"))
}

/// Deflate a UTF-8 `xheader`/`xhash` section body
pub fn encode_utf8_body(text: &str) -> Result<Vec<u8>> {
    deflate_body(text.as_bytes())
}

fn inflate_body(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(Cursor::new(bytes));
    let mut inflated = Vec::new();
    decoder
        .by_ref()
        .take(MAX_HEADER_BODY as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| Error::invalid_format("header section", format!("inflate: {}", e)))?;
    if inflated.len() > MAX_HEADER_BODY {
        return Err(Error::invalid_format(
            "header section",
            "inflated body exceeds limit",
        ));
    }
    Ok(inflated)
}

fn deflate_body(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::invalid_format("header section", format!("deflate: {}", e)))
}
