//! DLC catalog: package descriptors and kind classification.
//!
//! The catalog is a JSON file keyed by package id:
//!
//! ```json
//! {
//!   "EP01": {"name": "Get to Work", "urls": ["https://..."], "size": 1234},
//!   "GP05": {"name": "...", "urls": ["https://...part1.bin", "https://...part2.zip"]}
//! }
//! ```
//!
//! A package with more than one URL is a multi-volume archive bundle.
//! The catalog is read-only and loaded once per session.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One installable content unit, as supplied by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDescriptor {
    #[serde(skip)]
    pub dlc_id: String,
    pub name: String,
    /// Ordered source URLs. More than one means a multi-part bundle.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Expected installed size in bytes, when the catalog knows it.
    #[serde(default)]
    pub size: Option<u64>,
}

impl PackageDescriptor {
    pub fn is_multi_part(&self) -> bool {
        self.urls.len() > 1
    }
}

/// The full catalog, ordered by package id for stable listing.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: BTreeMap<String, PackageDescriptor>,
}

impl Catalog {
    /// Load the catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        let raw: BTreeMap<String, PackageDescriptor> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse catalog: {}", path.display()))?;

        let packages = raw
            .into_iter()
            .map(|(id, mut desc)| {
                desc.dlc_id = id.clone();
                (id, desc)
            })
            .collect();

        Ok(Self { packages })
    }

    pub fn get(&self, dlc_id: &str) -> Option<&PackageDescriptor> {
        self.packages.get(dlc_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageDescriptor> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Package kind, derived from the id prefix/number scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Expansion,
    GamePack,
    StuffPack,
    Kit,
    Unknown,
}

impl PackageKind {
    pub fn label(&self) -> &'static str {
        match self {
            PackageKind::Expansion => "Expansion",
            PackageKind::GamePack => "Game Pack",
            PackageKind::StuffPack => "Stuff Pack",
            PackageKind::Kit => "Kit",
            PackageKind::Unknown => "Other",
        }
    }
}

/// Classify a package by its id.
///
/// `EP*` expansions, `GP*` game packs, `FP*` kits; `SP` ids split on
/// their number: below 20 are stuff packs, 20 and above were re-badged
/// as kits.
pub fn classify(dlc_id: &str) -> PackageKind {
    let id = dlc_id.to_ascii_uppercase();

    if id.starts_with("EP") {
        return PackageKind::Expansion;
    }
    if id.starts_with("GP") {
        return PackageKind::GamePack;
    }
    if id.starts_with("FP") {
        return PackageKind::Kit;
    }
    if let Some(rest) = id.strip_prefix("SP") {
        if let Ok(num) = rest.parse::<u32>() {
            return if num < 20 {
                PackageKind::StuffPack
            } else {
                PackageKind::Kit
            };
        }
    }

    PackageKind::Unknown
}
