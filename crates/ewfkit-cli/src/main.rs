//! ewfkit CLI - inspect, verify, export, and acquire EWF images
//!
//! Exit codes: 0 success, 1 format error, 2 I/O error, 3 verification
//! failure, 64 usage error.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use md5::{Digest, Md5};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ewfkit_core::{AccessMode, CompressionLevel, Error, EwfFormat};
use ewfkit_ewf::handle::{Handle, OpenOptions, WriterOptions};
use ewfkit_ewf::hash_values::HashValueId;
use ewfkit_ewf::header_values::HeaderValueId;
use ewfkit_ewf::segment::parse_first_segment_path;

const EXIT_OK: i32 = 0;
const EXIT_FORMAT: i32 = 1;
const EXIT_IO: i32 = 2;
const EXIT_VERIFY: i32 = 3;
const EXIT_USAGE: i32 = 64;

#[derive(Parser)]
#[command(name = "ewfkit", version, about = "Expert Witness Format toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressionArg {
    None,
    Fast,
    Best,
}

impl From<CompressionArg> for CompressionLevel {
    fn from(value: CompressionArg) -> Self {
        match value {
            CompressionArg::None => CompressionLevel::None,
            CompressionArg::Fast => CompressionLevel::Fast,
            CompressionArg::Best => CompressionLevel::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Ewf,
    Smart,
    Ftk,
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Linen5,
    Linen6,
    Ewfx,
    Ex01,
}

impl From<FormatArg> for EwfFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Ewf => EwfFormat::Ewf,
            FormatArg::Smart => EwfFormat::Smart,
            FormatArg::Ftk => EwfFormat::Ftk,
            FormatArg::Encase1 => EwfFormat::Encase1,
            FormatArg::Encase2 => EwfFormat::Encase2,
            FormatArg::Encase3 => EwfFormat::Encase3,
            FormatArg::Encase4 => EwfFormat::Encase4,
            FormatArg::Encase5 => EwfFormat::Encase5,
            FormatArg::Encase6 => EwfFormat::Encase6,
            FormatArg::Linen5 => EwfFormat::Linen5,
            FormatArg::Linen6 => EwfFormat::Linen6,
            FormatArg::Ewfx => EwfFormat::Ewfx,
            FormatArg::Ex01 => EwfFormat::Ex01,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Display image metadata
    Info {
        /// First segment file (.E01 / .S01 / .Ex01)
        image: PathBuf,
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Read the full image and check it against the stored hashes
    Verify {
        image: PathBuf,
    },
    /// Export the media data to a raw file
    Export {
        image: PathBuf,
        output: PathBuf,
    },
    /// Create an image from a raw source
    Acquire {
        source: PathBuf,
        /// First output segment file
        output: PathBuf,
        #[arg(long, value_enum, default_value = "none")]
        compression: CompressionArg,
        #[arg(long, value_enum, default_value = "encase6")]
        format: FormatArg,
        /// Segment size budget in bytes
        #[arg(long)]
        segment_size: Option<u64>,
        #[arg(long)]
        case_number: Option<String>,
        #[arg(long)]
        examiner_name: Option<String>,
        #[arg(long)]
        evidence_number: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Serialize)]
struct ImageReport {
    format: String,
    media_type: String,
    media_size: u64,
    bytes_per_sector: u64,
    sectors_per_chunk: u64,
    chunk_size: u64,
    number_of_sectors: u64,
    segment_files: usize,
    case_number: Option<String>,
    description: Option<String>,
    examiner_name: Option<String>,
    evidence_number: Option<String>,
    notes: Option<String>,
    acquiry_date: Option<String>,
    acquiry_software_version: Option<String>,
    md5: Option<String>,
    sha1: Option<String>,
    acquiry_errors: usize,
    sessions: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            let code = match error.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
            process::exit(code);
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("ewfkit: {}", error);
            exit_code_for(&error)
        }
    };
    process::exit(code);
}

fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Io { .. } => EXIT_IO,
        _ => EXIT_FORMAT,
    }
}

fn run(cli: Cli) -> Result<i32, Error> {
    match cli.command {
        Command::Info { image, json } => cmd_info(&image, json),
        Command::Verify { image } => cmd_verify(&image),
        Command::Export { image, output } => cmd_export(&image, &output),
        Command::Acquire {
            source,
            output,
            compression,
            format,
            segment_size,
            case_number,
            examiner_name,
            evidence_number,
            description,
            notes,
        } => cmd_acquire(
            &source,
            &output,
            compression.into(),
            format.into(),
            segment_size,
            case_number,
            examiner_name,
            evidence_number,
            description,
            notes,
        ),
    }
}

/// Collect the segment family starting at the given first segment
fn segment_family(first: &Path) -> Result<Vec<PathBuf>, Error> {
    let (base, schema) = parse_first_segment_path(first)?;
    let mut paths = vec![first.to_path_buf()];
    for number in 2..=schema.max_segments() {
        let path = schema.segment_path(&base, number)?;
        if !path.is_file() {
            break;
        }
        paths.push(path);
    }
    Ok(paths)
}

fn open_for_read(first: &Path) -> Result<Handle, Error> {
    let paths = segment_family(first)?;
    tracing::debug!(segments = paths.len(), "opening {}", first.display());
    let mut handle = Handle::init(OpenOptions::default());
    handle.open(&paths)?;
    Ok(handle)
}

fn cmd_info(image: &Path, json: bool) -> Result<i32, Error> {
    let handle = open_for_read(image)?;
    let media = handle.media();
    let header = |id| handle.get_header_value(id).map(str::to_string);

    let report = ImageReport {
        format: handle
            .format()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        media_type: media.media_type.to_string(),
        media_size: handle.media_size(),
        bytes_per_sector: media.bytes_per_sector as u64,
        sectors_per_chunk: media.sectors_per_chunk as u64,
        chunk_size: handle.chunk_size() as u64,
        number_of_sectors: media.number_of_sectors,
        segment_files: handle.segment_paths().len(),
        case_number: header(HeaderValueId::CaseNumber),
        description: header(HeaderValueId::Description),
        examiner_name: header(HeaderValueId::ExaminerName),
        evidence_number: header(HeaderValueId::EvidenceNumber),
        notes: header(HeaderValueId::Notes),
        acquiry_date: header(HeaderValueId::AcquiryDate),
        acquiry_software_version: header(HeaderValueId::AcquirySoftwareVersion),
        md5: handle.get_hash_value(HashValueId::Md5).map(str::to_string),
        sha1: handle.get_hash_value(HashValueId::Sha1).map(str::to_string),
        acquiry_errors: handle.num_acquiry_errors(),
        sessions: handle.num_sessions(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| Error::invalid_argument(e.to_string()))?
        );
        return Ok(EXIT_OK);
    }

    println!("=== Image Information ===");
    println!("Path:              {}", image.display());
    println!("Format:            {}", report.format);
    println!("Media type:        {}", report.media_type);
    println!(
        "Media size:        {} bytes ({:.2} MiB)",
        report.media_size,
        report.media_size as f64 / 1_048_576.0
    );
    println!("Bytes per sector:  {}", report.bytes_per_sector);
    println!("Sectors per chunk: {}", report.sectors_per_chunk);
    println!("Chunk size:        {}", report.chunk_size);
    println!("Segment files:     {}", report.segment_files);
    println!();
    println!("=== Case Metadata ===");
    for (label, value) in [
        ("Case number", &report.case_number),
        ("Description", &report.description),
        ("Examiner", &report.examiner_name),
        ("Evidence number", &report.evidence_number),
        ("Notes", &report.notes),
        ("Acquiry date", &report.acquiry_date),
        ("Software version", &report.acquiry_software_version),
    ] {
        if let Some(value) = value {
            println!("{:<18} {}", format!("{}:", label), value);
        }
    }
    println!();
    println!("=== Digests ===");
    if let Some(md5) = &report.md5 {
        println!("MD5:  {}", md5);
    }
    if let Some(sha1) = &report.sha1 {
        println!("SHA1: {}", sha1);
    }
    if report.acquiry_errors > 0 {
        println!();
        println!("Acquiry errors:    {}", report.acquiry_errors);
    }
    if report.sessions > 0 {
        println!("Sessions:          {}", report.sessions);
    }
    Ok(EXIT_OK)
}

fn cmd_verify(image: &Path) -> Result<i32, Error> {
    let mut handle = open_for_read(image)?;
    let media_size = handle.media_size();
    let stored_md5 = handle.get_hash_value(HashValueId::Md5).map(str::to_string);

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1 << 20];
    let mut offset = 0u64;
    while offset < media_size {
        let want = buffer.len().min((media_size - offset) as usize);
        let read = handle.read_at(offset, &mut buffer[..want])?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        offset += read as u64;
    }
    let computed = hex::encode(hasher.finalize());

    let checksum_errors = handle.num_checksum_errors();
    println!("Read:        {} bytes", offset);
    println!("Computed MD5: {}", computed);
    match &stored_md5 {
        Some(stored) => println!("Stored MD5:   {}", stored),
        None => println!("Stored MD5:   (not present)"),
    }
    println!("Checksum errors: {}", checksum_errors);
    for index in 0..checksum_errors {
        if let Some(range) = handle.get_checksum_error(index) {
            println!(
                "  sectors {}..{}",
                range.first_sector,
                range.first_sector + range.number_of_sectors
            );
        }
    }

    let hash_ok = stored_md5
        .as_deref()
        .map(|s| s == computed.as_str())
        .unwrap_or(true);
    if checksum_errors == 0 && hash_ok {
        println!("Verification: OK");
        Ok(EXIT_OK)
    } else {
        println!("Verification: FAILED");
        Ok(EXIT_VERIFY)
    }
}

fn cmd_export(image: &Path, output: &Path) -> Result<i32, Error> {
    let mut handle = open_for_read(image)?;
    let media_size = handle.media_size();
    let mut out = std::fs::File::create(output)
        .map_err(|e| Error::io(ewfkit_core::IoOp::Open, output, e))?;

    let mut buffer = vec![0u8; 1 << 20];
    let mut offset = 0u64;
    while offset < media_size {
        let want = buffer.len().min((media_size - offset) as usize);
        let read = handle.read_at(offset, &mut buffer[..want])?;
        if read == 0 {
            break;
        }
        out.write_all(&buffer[..read])
            .map_err(|e| Error::io(ewfkit_core::IoOp::Write, output, e))?;
        offset += read as u64;
    }
    println!("Exported {} bytes to {}", offset, output.display());
    Ok(EXIT_OK)
}

#[allow(clippy::too_many_arguments)]
fn cmd_acquire(
    source: &Path,
    output: &Path,
    compression: CompressionLevel,
    format: EwfFormat,
    segment_size: Option<u64>,
    case_number: Option<String>,
    examiner_name: Option<String>,
    evidence_number: Option<String>,
    description: Option<String>,
    notes: Option<String>,
) -> Result<i32, Error> {
    let mut input = std::fs::File::open(source)
        .map_err(|e| Error::io(ewfkit_core::IoOp::Open, source, e))?;

    let mut writer = WriterOptions {
        format,
        compression,
        ..Default::default()
    };
    if let Some(size) = segment_size {
        writer.segment_size = size;
    }
    let mut handle = Handle::init(OpenOptions {
        access: AccessMode::WRITE,
        writer,
        ..Default::default()
    });
    if let Some(value) = case_number {
        handle.set_header_value(HeaderValueId::CaseNumber, value);
    }
    if let Some(value) = examiner_name {
        handle.set_header_value(HeaderValueId::ExaminerName, value);
    }
    if let Some(value) = evidence_number {
        handle.set_header_value(HeaderValueId::EvidenceNumber, value);
    }
    if let Some(value) = description {
        handle.set_header_value(HeaderValueId::Description, value);
    }
    if let Some(value) = notes {
        handle.set_header_value(HeaderValueId::Notes, value);
    }
    handle.open(&[output.to_path_buf()])?;

    let mut buffer = vec![0u8; 1 << 20];
    let mut total = 0u64;
    loop {
        let read = input
            .read(&mut buffer)
            .map_err(|e| Error::io(ewfkit_core::IoOp::Read, source, e))?;
        if read == 0 {
            break;
        }
        handle.write(&buffer[..read])?;
        total += read as u64;
    }
    handle.close()?;

    println!("Acquired {} bytes into {}", total, output.display());
    if let Some(md5) = handle.get_hash_value(HashValueId::Md5) {
        println!("MD5:  {}", md5);
    }
    if let Some(sha1) = handle.get_hash_value(HashValueId::Sha1) {
        println!("SHA1: {}", sha1);
    }
    Ok(EXIT_OK)
}

