use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use clap::ValueEnum;
use log::{debug, info};
use serde_json::Value;

use crate::error::ManifestError;

pub const DEFAULT_PACKAGE: &str = "com.google.android.youtube";

/// How the newest compatible version is picked from the manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum VersionOrder {
    /// Plain string order; matches the tags published so far.
    #[default]
    Lexical,
    /// Numeric comparison of dot-separated components.
    Semantic,
}

impl VersionOrder {
    fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            VersionOrder::Lexical => a.cmp(b),
            VersionOrder::Semantic => compare_numeric(a, b).then_with(|| a.cmp(b)),
        }
    }
}

/// Read the manifest at `path` and pick the version to build for `package`.
pub async fn select_target_version(
    path: &Path,
    package: &str,
    order: VersionOrder,
) -> Result<String, ManifestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ManifestError::Io(format!("{}: {e}", path.display())))?;
    let manifest: Value =
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::Parse(e.to_string()))?;
    let versions = compatible_versions(&manifest, package);
    debug!(
        "catalog: {} compatible version(s) for {package}: {:?}",
        versions.len(),
        versions
    );
    let selected = pick_version(&versions, order).ok_or_else(|| ManifestError::NotFound {
        package: package.to_owned(),
    })?;
    info!("catalog: selected {package} {selected} ({order:?} order)");
    Ok(selected)
}

/// Collect every version listed for `package`. Malformed records are skipped.
pub fn compatible_versions(manifest: &Value, package: &str) -> BTreeSet<String> {
    let mut versions = BTreeSet::new();
    let Some(patches) = manifest.as_array() else {
        return versions;
    };
    for patch in patches {
        let Some(packages) = patch.get("compatiblePackages").and_then(Value::as_array) else {
            continue;
        };
        for entry in packages {
            if entry.get("name").and_then(Value::as_str) != Some(package) {
                continue;
            }
            let Some(listed) = entry.get("versions").and_then(Value::as_array) else {
                continue;
            };
            versions.extend(
                listed
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned),
            );
        }
    }
    versions
}

pub fn pick_version(versions: &BTreeSet<String>, order: VersionOrder) -> Option<String> {
    versions
        .iter()
        .max_by(|a, b| order.compare(a, b))
        .cloned()
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let parts_a = numeric_parts(a);
    let parts_b = numeric_parts(b);
    let len = parts_a.len().max(parts_b.len());
    for i in 0..len {
        let left = parts_a.get(i).copied().unwrap_or(0);
        let right = parts_b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn numeric_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse::<u64>()
                .unwrap_or(0)
        })
        .collect()
}
