use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use assets::StagedAssets;
use timeline::{total_frames, TimelineDocument};

use crate::ComposerError;

/// On-disk self-contained description of one composition render: the
/// scrubbed document plus a map from every declared source to how the
/// renderer reaches it (a workdir-relative path or an absolute URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub composition: TimelineDocument,
    /// src string -> bundle-relative path or absolute URL.
    pub assets: BTreeMap<String, String>,
    pub total_frames: i64,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: BundleManifest,
}

/// Serialize the document into `workdir/bundle`. Assets staged by the
/// resolver live under the workdir; the manifest references them by
/// workdir-relative path so source URIs reconstruct unchanged.
/// Session-only metadata (names, preview URLs) is stripped.
pub fn write_bundle(
    doc: &TimelineDocument,
    staged: &StagedAssets,
    workdir: &Path,
) -> Result<Bundle, ComposerError> {
    let root = workdir.join("bundle");
    fs::create_dir_all(&root)?;

    let mut composition = doc.clone();
    for item in composition.track_items_map.values_mut() {
        item.metadata = Default::default();
    }

    let mut asset_map = BTreeMap::new();
    for (src, path) in &staged.staged {
        let rel = path
            .strip_prefix(workdir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());
        asset_map.insert(src.clone(), rel);
    }
    for (src, url) in &staged.remote {
        asset_map.insert(src.clone(), url.clone());
    }

    let manifest = BundleManifest {
        total_frames: total_frames(doc.duration, doc.fps),
        fps: doc.fps,
        composition,
        assets: asset_map,
    };

    let manifest_path = root.join("bundle.json");
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)?;

    Ok(Bundle {
        root,
        manifest_path,
        manifest,
    })
}
