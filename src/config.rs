//
// config.rs
// dcmsort
//
// Loads the TOML configuration: toolkit location, local AE title, transport choice, and PACS nodes.
//

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "dcmsort.toml";
const DEFAULT_AE_TITLE: &str = "DCMSORT";

/// Process-lifetime configuration, loaded once before any file is touched.
///
/// ```toml
/// [toolkit]
/// bin_dir = "/opt/dcmtk/bin"
///
/// [local]
/// ae_title = "DCMSORT"
///
/// [transport]
/// kind = "dcmsend"        # or "native"
///
/// [nodes.main-pacs]
/// ae_title = "ORTHANC"
/// host = "10.0.0.5"
/// port = 4242
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub toolkit: Option<ToolkitConfig>,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub nodes: HashMap<String, PacsNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolkitConfig {
    /// Directory holding the DCMTK binaries, dcmsend in particular.
    pub bin_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// AE title this tool announces itself as.
    #[serde(default = "default_ae_title")]
    pub ae_title: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            ae_title: default_ae_title(),
        }
    }
}

fn default_ae_title() -> String {
    DEFAULT_AE_TITLE.to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Dcmsend,
    Native,
}

/// One remote DICOM node, addressed by alias on the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct PacsNode {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
}

impl PacsNode {
    /// `host:port` form for the association layer.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PacsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.ae_title, self.host, self.port)
    }
}

impl AppConfig {
    /// Load and deserialize the configuration file. Callers decide whether a
    /// missing file matters; in send mode it is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;
        settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {:?}", path))
    }

    /// Resolve a node alias, listing the known aliases when the lookup fails.
    pub fn node(&self, alias: &str) -> Result<&PacsNode> {
        if let Some(node) = self.nodes.get(alias) {
            return Ok(node);
        }
        let mut known: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        known.sort_unstable();
        if known.is_empty() {
            bail!("Unknown PACS node {:?}: the configuration defines no [nodes.*] entries", alias);
        }
        bail!(
            "Unknown PACS node {:?}: known aliases are {}",
            alias,
            known.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .expect("build config")
            .try_deserialize()
            .expect("deserialize config")
    }

    #[test]
    fn full_configuration_parses() {
        let cfg = parse(
            r#"
            [toolkit]
            bin_dir = "/opt/dcmtk/bin"

            [local]
            ae_title = "WORKSTATION"

            [transport]
            kind = "native"

            [nodes.main-pacs]
            ae_title = "ORTHANC"
            host = "10.0.0.5"
            port = 4242
            "#,
        );

        assert_eq!(
            cfg.toolkit.as_ref().map(|t| t.bin_dir.clone()),
            Some(PathBuf::from("/opt/dcmtk/bin"))
        );
        assert_eq!(cfg.local.ae_title, "WORKSTATION");
        assert_eq!(cfg.transport.kind, TransportKind::Native);

        let node = cfg.node("main-pacs").expect("node");
        assert_eq!(node.ae_title, "ORTHANC");
        assert_eq!(node.socket_addr(), "10.0.0.5:4242");
        assert_eq!(node.to_string(), "ORTHANC@10.0.0.5:4242");
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let cfg = parse("");
        assert!(cfg.toolkit.is_none());
        assert_eq!(cfg.local.ae_title, "DCMSORT");
        assert_eq!(cfg.transport.kind, TransportKind::Dcmsend);
        assert!(cfg.nodes.is_empty());
    }

    #[test]
    fn unknown_alias_lists_known_ones() {
        let cfg = parse(
            r#"
            [nodes.alpha]
            ae_title = "A"
            host = "h"
            port = 1

            [nodes.beta]
            ae_title = "B"
            host = "h"
            port = 2
            "#,
        );
        let err = cfg.node("gamma").unwrap_err().to_string();
        assert!(err.contains("gamma"));
        assert!(err.contains("alpha, beta"));
    }
}
