//
// send.rs
// dcmsort
//
// The transport seam: a Sender capability, the dcmsend subprocess
// implementation, and the per-file send pass.
//

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, PacsNode, TransportKind};
use crate::progress;
use crate::report::RunSummary;
use crate::scan::SourceEntry;
use crate::scu::NativeScu;

#[derive(Debug, Error)]
pub enum SendError {
    /// The transport process could not be started at all.
    #[error("failed to run {command:?}: {source}")]
    Launch {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The utility ran but refused the file.
    #[error("{utility} exited with {status}: {detail}")]
    Rejected {
        utility: &'static str,
        status: String,
        detail: String,
    },
    /// Native transport errors, association and DIMSE alike.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Transport capability: deliver one file to one node. Implementations may
/// shell out or speak the protocol natively; the sorting pipeline does not
/// care which.
pub trait Sender {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Setup-stage validation. A failure here aborts the run before any file
    /// is processed.
    fn preflight(&self, node: &PacsNode) -> Result<(), SendError> {
        let _ = node;
        Ok(())
    }

    fn send(&self, file: &Path, node: &PacsNode) -> Result<(), SendError>;
}

/// Sender backed by DCMTK's dcmsend utility, one invocation per file.
#[derive(Debug)]
pub struct DcmsendSender {
    binary: PathBuf,
    calling_ae: String,
}

impl DcmsendSender {
    /// Fails when the utility is not where the configuration says, so send
    /// mode dies before any transfer is attempted.
    pub fn new(bin_dir: &Path, calling_ae: &str) -> Result<Self> {
        let binary = bin_dir.join(format!("dcmsend{}", std::env::consts::EXE_SUFFIX));
        if !binary.is_file() {
            bail!(
                "dcmsend not found at {:?}; check the [toolkit] bin_dir setting",
                binary
            );
        }
        Ok(DcmsendSender {
            binary,
            calling_ae: calling_ae.to_string(),
        })
    }

    fn command_args(&self, file: &Path, node: &PacsNode) -> Vec<OsString> {
        vec![
            node.host.clone().into(),
            node.port.to_string().into(),
            file.as_os_str().to_os_string(),
            "-aec".into(),
            node.ae_title.clone().into(),
            "-aet".into(),
            self.calling_ae.clone().into(),
        ]
    }
}

impl Sender for DcmsendSender {
    fn name(&self) -> &'static str {
        "dcmsend"
    }

    fn send(&self, file: &Path, node: &PacsNode) -> Result<(), SendError> {
        let output = Command::new(&self.binary)
            .args(self.command_args(file, node))
            .output()
            .map_err(|source| SendError::Launch {
                command: self.binary.clone(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SendError::Rejected {
                utility: "dcmsend",
                status: output.status.to_string(),
                detail: if stderr.is_empty() {
                    "no diagnostic output".to_string()
                } else {
                    stderr
                },
            });
        }
        debug!("dcmsend accepted {:?}", file);
        Ok(())
    }
}

/// Build the transport selected in the configuration, checking its
/// prerequisites up front.
pub fn make_sender(app_config: &AppConfig) -> Result<Box<dyn Sender>> {
    match app_config.transport.kind {
        TransportKind::Dcmsend => {
            let toolkit = app_config
                .toolkit
                .as_ref()
                .context("Send mode needs a [toolkit] bin_dir in the configuration")?;
            let sender = DcmsendSender::new(&toolkit.bin_dir, &app_config.local.ae_title)?;
            Ok(Box::new(sender))
        }
        TransportKind::Native => Ok(Box::new(NativeScu::new(&app_config.local.ae_title))),
    }
}

/// Send every classified DICOM entry, one at a time. Rejections are per-file
/// failures; the loop keeps going.
pub fn send_all(
    sender: &dyn Sender,
    node: &PacsNode,
    files: &[&SourceEntry],
    summary: &mut RunSummary,
) {
    info!("Sending {} files to {} via {}", files.len(), node, sender.name());
    let bar = progress::file_bar(files.len() as u64, "Sending");
    for entry in files {
        match sender.send(&entry.path, node) {
            Ok(()) => {
                summary.sent += 1;
                debug!("Sent {:?}", entry.path);
            }
            Err(err) => {
                warn!("Failed to send {:?}: {}", entry.path, err);
                summary.record_failure(&entry.path, err);
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
}
