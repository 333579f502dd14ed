//
// cli.rs
// dcmsort
//
// Defines the CLI surface with Clap and drives the scan/sort/send pipeline.
//

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::config::{AppConfig, DEFAULT_CONFIG_FILE};
use crate::report::{self, RunSummary};
use crate::scan::{EntryKind, SourceEntry};
use crate::{archive, scan, send, sort, transcode};

#[derive(Parser, Debug)]
#[command(name = "dcmsort")]
#[command(about = "Sort loose DICOM files into a patient/study/series tree or forward them to a PACS node", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory scanned for DICOM files and archives
    #[arg(short, long)]
    pub source: PathBuf,

    /// Copy DICOM files into a sorted tree under this directory
    #[arg(short, long, conflicts_with = "send")]
    pub destination: Option<PathBuf>,

    /// Send DICOM files to the configured node with this alias
    #[arg(long)]
    pub send: Option<String>,

    /// Expand archives found in the source before processing
    #[arg(short, long)]
    pub unzip: bool,

    /// Rewrite processed files as RLE Lossless
    #[arg(short, long, conflicts_with = "decompress")]
    pub compress: bool,

    /// Rewrite processed files as Explicit VR Little Endian
    #[arg(long)]
    pub decompress: bool,

    /// Configuration file with nodes, AE titles, and toolkit paths
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Answer yes to the copy confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Delete an existing destination tree before copying
    #[arg(long)]
    pub replace: bool,

    /// Skip the source size accounting during the scan
    #[arg(long)]
    pub no_size: bool,

    /// Print the run summary as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Log debug detail to the console
    #[arg(short, long)]
    pub verbose: bool,
}

/// Run the whole pipeline: scan, unpack, copy, transcode, send. Returns the
/// summary for rendering; only setup problems surface as errors.
pub fn run(cli: &Cli) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let source = cli.source.canonicalize().with_context(|| {
        format!(
            "Source directory {:?} does not exist or is not readable",
            cli.source
        )
    })?;
    if !source.is_dir() {
        bail!("Source {:?} is not a directory", source);
    }
    if cli.destination.is_none() && cli.send.is_none() && !cli.compress && !cli.decompress {
        bail!("Nothing to do: pass --destination, --send, --compress, or --decompress");
    }

    // A dead transport must stop the run before anything is scanned.
    let send_target = match &cli.send {
        Some(alias) => {
            let app_config = AppConfig::load(&cli.config)?;
            let node = app_config.node(alias)?.clone();
            let sender = send::make_sender(&app_config)?;
            sender
                .preflight(&node)
                .with_context(|| format!("Transport check for {} failed", node))?;
            info!("Transport {} ready for {}", sender.name(), node);
            Some((sender, node))
        }
        None => None,
    };

    // A destination nested inside the source must not feed back into the scan.
    let exclude = cli.destination.as_ref().and_then(|d| d.canonicalize().ok());
    if exclude.as_deref() == Some(source.as_path()) {
        bail!("Destination {:?} is the source directory itself", source);
    }

    let entries = scan::scan_tree(&source, None, !cli.no_size, exclude.as_deref(), &mut summary);
    info!(
        "Found {} DICOM files, {} archives, {} other files",
        summary.dicom_files, summary.archives_found, summary.non_dicom_skipped
    );

    let (archives, loose): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|entry| matches!(entry.kind, EntryKind::Archive(_)));

    let workspace = if cli.unzip && !archives.is_empty() {
        Some(archive::unpack_all(&archives, &mut summary)?)
    } else {
        if !archives.is_empty() {
            info!(
                "{} archives found; pass --unzip to expand them",
                archives.len()
            );
        }
        None
    };

    let mut dicom_entries: Vec<&SourceEntry> = loose
        .iter()
        .filter(|entry| entry.kind == EntryKind::Dicom)
        .collect();
    if let Some(workspace) = &workspace {
        dicom_entries.extend(
            workspace
                .entries
                .iter()
                .filter(|entry| entry.kind == EntryKind::Dicom),
        );
    }

    if let Some(destination) = &cli.destination {
        if dicom_entries.is_empty() {
            info!("No DICOM files to sort");
        } else {
            if !cli.yes && !confirm_copy(&summary)? {
                println!("Copy aborted.");
                return Ok(summary);
            }
            prepare_destination(destination, cli.replace)?;
            sort::copy_sorted(&dicom_entries, destination, &mut summary);
        }
    }

    if cli.compress || cli.decompress {
        // With a destination the rewrite covers the sorted tree; without one
        // it covers the source and any extracted working set in place.
        let mut roots: Vec<&Path> = Vec::new();
        match &cli.destination {
            Some(destination) if destination.is_dir() => roots.push(destination),
            Some(_) => {}
            None => {
                roots.push(&source);
                if let Some(workspace) = &workspace {
                    roots.push(workspace.path());
                }
            }
        }
        for root in roots {
            if cli.compress {
                transcode::compress_tree(root, &mut summary);
            } else {
                transcode::decompress_tree(root, &mut summary);
            }
        }
    }

    if let Some((sender, node)) = &send_target {
        send::send_all(sender.as_ref(), node, &dicom_entries, &mut summary);
    }

    Ok(summary)
}

fn prepare_destination(destination: &Path, replace: bool) -> Result<()> {
    if replace && destination.is_dir() {
        warn!("Replacing existing destination {:?}", destination);
        fs::remove_dir_all(destination)
            .with_context(|| format!("Failed to clear destination {:?}", destination))?;
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create destination {:?}", destination))?;
    Ok(())
}

fn confirm_copy(summary: &RunSummary) -> Result<bool> {
    match summary.dicom_bytes {
        Some(bytes) => println!(
            "About to copy {} DICOM files ({}).",
            summary.dicom_files,
            report::human_bytes(bytes)
        ),
        None => println!("About to copy {} DICOM files.", summary.dicom_files),
    }
    print!("Proceed? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
