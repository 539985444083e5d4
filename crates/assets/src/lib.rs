use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use timeline::TimelineDocument;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a track item's declared source lives and how the renderer may
/// reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "camelCase")]
pub enum AssetClass {
    /// Path rooted at a known upload prefix. Must be copied into the render
    /// working directory before bundling; the offline renderer only serves
    /// files from its own static root.
    LocalUpload { rel_path: PathBuf },
    /// Absolute http(s) URL, or a storage-relative path rewritten against
    /// the configured base. Fetched by the renderer at render time.
    Remote { url: String },
    /// `data:` URI, used as-is.
    Inline,
    /// `blob:` URLs and anything else with no meaning outside the browser
    /// session that produced it. The owning item is skipped, not fatal.
    Unsupported { reason: String },
}

/// Source-URI resolution settings supplied by the hosting application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetConfig {
    /// URL path prefixes that map onto `upload_root` on disk.
    pub upload_prefixes: Vec<String>,
    /// Filesystem root the upload prefixes resolve under.
    pub upload_root: PathBuf,
    /// Base URL for storage-service-relative paths, if configured.
    pub storage_base_url: Option<String>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            upload_prefixes: vec!["/uploads/".into(), "/api/uploads/".into()],
            upload_root: PathBuf::from("uploads"),
            storage_base_url: None,
        }
    }
}

/// Classify a declared source string. Pure function of the string and the
/// config: same input, same class, independent of call order.
pub fn classify(src: &str, config: &AssetConfig) -> AssetClass {
    if src.starts_with("data:") {
        return AssetClass::Inline;
    }
    if src.starts_with("blob:") {
        return AssetClass::Unsupported {
            reason: "blob URLs only exist inside the creating browser session".into(),
        };
    }
    if src.starts_with("http://") || src.starts_with("https://") {
        return AssetClass::Remote { url: src.to_string() };
    }
    for prefix in &config.upload_prefixes {
        if let Some(rest) = src.strip_prefix(prefix.as_str()) {
            let decoded = percent_decode_str(rest).decode_utf8_lossy().into_owned();
            return AssetClass::LocalUpload { rel_path: PathBuf::from(decoded) };
        }
    }
    if let Some(base) = &config.storage_base_url {
        if !src.starts_with('/') && !src.is_empty() {
            return AssetClass::Remote {
                url: format!("{}/{}", base.trim_end_matches('/'), src),
            };
        }
    }
    AssetClass::Unsupported {
        reason: format!("unrecognized source: {src}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAsset {
    pub src: String,
    pub reason: String,
}

/// Result of one staging pass over a document.
#[derive(Debug, Clone, Default)]
pub struct StagedAssets {
    /// Source string → absolute path inside the staging root.
    pub staged: HashMap<String, PathBuf>,
    /// Source string → resolved remote URL.
    pub remote: HashMap<String, String>,
    pub skipped: Vec<SkippedAsset>,
}

impl StagedAssets {
    /// Local filesystem path for a source, if staging produced one.
    pub fn local_path(&self, src: &str) -> Option<&Path> {
        self.staged.get(src).map(PathBuf::as_path)
    }

    pub fn is_skipped(&self, src: &str) -> bool {
        self.skipped.iter().any(|s| s.src == src)
    }
}

/// Scan every item's `details.src` (and `metadata.previewUrl` when present)
/// once, copy each local upload exactly once into `staging_root` preserving
/// relative path structure, and record remote/skip outcomes.
///
/// Copy failures are non-fatal: the asset is logged, excluded from the
/// staged set, and the owning item is later skipped by the backend.
pub fn stage_assets(
    doc: &TimelineDocument,
    config: &AssetConfig,
    staging_root: &Path,
) -> Result<StagedAssets, AssetError> {
    fs::create_dir_all(staging_root)?;

    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = StagedAssets::default();

    let sources = doc.items_in_order().flat_map(|item| {
        item.details
            .src
            .as_deref()
            .into_iter()
            .chain(item.metadata.preview_url.as_deref())
    });

    for src in sources {
        if !seen.insert(src) {
            continue;
        }
        match classify(src, config) {
            AssetClass::LocalUpload { rel_path } => {
                let origin = config.upload_root.join(&rel_path);
                // Mirror the public path under the staging root so the src
                // string reconstructs unchanged inside the bundle.
                let dest = staging_root.join(src.trim_start_matches('/'));
                match copy_one(&origin, &dest) {
                    Ok(()) => {
                        debug!(src, dest = %dest.display(), "staged asset");
                        out.staged.insert(src.to_string(), dest);
                    }
                    Err(e) => {
                        warn!(src, error = %e, "failed to stage asset, item will be skipped");
                        out.skipped.push(SkippedAsset {
                            src: src.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            AssetClass::Remote { url } => {
                out.remote.insert(src.to_string(), url);
            }
            AssetClass::Inline => {
                // data: URIs need no resolution
            }
            AssetClass::Unsupported { reason } => {
                warn!(src, reason, "unresolvable asset, item will be skipped");
                out.skipped.push(SkippedAsset {
                    src: src.to_string(),
                    reason,
                });
            }
        }
    }

    Ok(out)
}

fn copy_one(origin: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(origin, dest)?;
    Ok(())
}
