//! Model label → waste category lookup.
//!
//! The table is configuration data loaded once at startup (TOML). Adding a
//! label is adding an entry; no code changes. Resolution is total: a label
//! that is not in the table resolves to `WasteCategory::Unknown` with the
//! default disposal message.
//!
//! `disposal_info` is pre-formatted text with `<br>` line-break markers. The
//! presentation layer renders it verbatim, without re-escaping. This is an
//! external contract and a known trust boundary: table contents are trusted
//! configuration, not user input, and are not sanitised here.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const BUILTIN_TABLE: &str = include_str!("../assets/categories.toml");

/// Line-break marker used in `disposal_info`.
pub const LINE_BREAK: &str = "<br>";

pub const UNKNOWN_DISPOSAL: &str = "Dispose responsibly in appropriate bin.";

/// Centimetres per native pixel used for the area estimate.
pub const PX_TO_CM: f64 = 0.1;
/// Assumed object depth for the weight estimate.
const DEPTH_CM: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WasteCategory {
    #[serde(alias = "Dry Waste")]
    Dry,
    #[serde(alias = "Wet Waste")]
    Wet,
    #[serde(alias = "Hazardous Waste")]
    Hazardous,
    #[serde(alias = "Electronic Waste")]
    Electronic,
    #[serde(alias = "Construction Waste")]
    Construction,
    #[serde(alias = "Biomedical Waste")]
    Biomedical,
    Unknown,
}

impl WasteCategory {
    pub const ALL: [WasteCategory; 7] = [
        WasteCategory::Dry,
        WasteCategory::Wet,
        WasteCategory::Hazardous,
        WasteCategory::Electronic,
        WasteCategory::Construction,
        WasteCategory::Biomedical,
        WasteCategory::Unknown,
    ];

    /// Name shown to users and sent in responses.
    pub fn display_name(self) -> &'static str {
        match self {
            WasteCategory::Dry => "Dry Waste",
            WasteCategory::Wet => "Wet Waste",
            WasteCategory::Hazardous => "Hazardous Waste",
            WasteCategory::Electronic => "Electronic Waste",
            WasteCategory::Construction => "Construction Waste",
            WasteCategory::Biomedical => "Biomedical Waste",
            WasteCategory::Unknown => "Unknown",
        }
    }

    /// Short lower-case key used in the category table.
    pub fn key(self) -> &'static str {
        match self {
            WasteCategory::Dry => "dry",
            WasteCategory::Wet => "wet",
            WasteCategory::Hazardous => "hazardous",
            WasteCategory::Electronic => "electronic",
            WasteCategory::Construction => "construction",
            WasteCategory::Biomedical => "biomedical",
            WasteCategory::Unknown => "unknown",
        }
    }

    /// Annotation colour (RGB).
    pub fn color(self) -> [u8; 3] {
        match self {
            WasteCategory::Dry => [0, 255, 0],
            WasteCategory::Wet => [255, 255, 0],
            WasteCategory::Hazardous => [255, 0, 0],
            WasteCategory::Electronic => [255, 0, 255],
            WasteCategory::Construction => [0, 255, 255],
            WasteCategory::Biomedical => [128, 0, 128],
            WasteCategory::Unknown => [255, 255, 255],
        }
    }

    pub fn color_hex(self) -> String {
        let [r, g, b] = self.color();
        format!("#{:02X}{:02X}{:02X}", r, g, b)
    }

    fn density_kg_per_cm3(self) -> f64 {
        match self {
            WasteCategory::Hazardous => 0.002,
            WasteCategory::Electronic => 0.003,
            WasteCategory::Construction => 0.004,
            WasteCategory::Biomedical => 0.0015,
            _ => 0.001,
        }
    }

    fn max_weight_kg(self) -> f64 {
        match self {
            WasteCategory::Wet => 0.8,
            WasteCategory::Hazardous => 2.0,
            WasteCategory::Electronic => 1.5,
            WasteCategory::Construction => 5.0,
            WasteCategory::Biomedical => 0.5,
            _ => 1.0,
        }
    }

    /// Hazardous and construction items get no weight estimate.
    pub fn reports_weight(self) -> bool {
        !matches!(self, WasteCategory::Hazardous | WasteCategory::Construction)
    }

    /// Tentative weight from the visible area, capped per category.
    pub fn estimate_weight_kg(self, area_cm2: f64) -> f64 {
        let volume_cm3 = area_cm2.max(0.0) * DEPTH_CM;
        (self.density_kg_per_cm3() * volume_cm3).min(self.max_weight_kg())
    }
}

impl std::str::FromStr for WasteCategory {
    type Err = anyhow::Error;

    /// Accepts the short key (`dry`) or the display name (`Dry Waste`).
    fn from_str(value: &str) -> Result<Self> {
        let key = value.trim();
        WasteCategory::ALL
            .into_iter()
            .find(|category| {
                key.eq_ignore_ascii_case(category.display_name())
                    || key.eq_ignore_ascii_case(category.key())
            })
            .ok_or_else(|| anyhow!("unknown waste category '{}'", value))
    }
}

impl std::fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Box area in native pixels → estimated area in cm².
pub fn area_cm2(area_px: f64) -> f64 {
    area_px * PX_TO_CM * PX_TO_CM
}

/// Domain vocabulary attached to one model label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryRecord {
    pub category: WasteCategory,
    pub object_name: String,
    pub disposal_info: String,
}

#[derive(Debug, Deserialize, Default)]
struct CategoryTableFile {
    #[serde(default)]
    categories: HashMap<String, CategoryDefaultsFile>,
    #[serde(default)]
    labels: HashMap<String, LabelEntryFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CategoryDefaultsFile {
    disposal: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LabelEntryFile {
    category: WasteCategory,
    object: Option<String>,
    disposal: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
struct LabelEntry {
    category: WasteCategory,
    object: Option<String>,
    disposal_info: Option<String>,
}

/// Static label → category table.
#[derive(Clone, Debug)]
pub struct CategoryTable {
    labels: HashMap<String, LabelEntry>,
    defaults: HashMap<WasteCategory, String>,
}

impl CategoryTable {
    /// The table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLE).context("builtin category table is invalid")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read category table {}: {}", path.display(), e))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid category table {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: CategoryTableFile = toml::from_str(raw)?;

        let mut defaults = HashMap::new();
        for (name, cfg) in file.categories {
            let category: WasteCategory = name.parse()?;
            if let Some(lines) = cfg.disposal {
                defaults.insert(category, join_lines(&lines)?);
            }
        }

        let mut labels = HashMap::with_capacity(file.labels.len());
        for (label, entry) in file.labels {
            let key = normalize_label(&label);
            if key.is_empty() {
                return Err(anyhow!("empty label key in category table"));
            }
            let disposal_info = match entry.disposal {
                Some(lines) => Some(join_lines(&lines)?),
                None => None,
            };
            let parsed = LabelEntry {
                category: entry.category,
                object: entry.object,
                disposal_info,
            };
            if labels.insert(key.clone(), parsed).is_some() {
                return Err(anyhow!(
                    "label '{}' collides with another entry after normalisation ('{}')",
                    label,
                    key
                ));
            }
        }

        Ok(Self { labels, defaults })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Default disposal text for a category.
    pub fn default_disposal(&self, category: WasteCategory) -> String {
        self.defaults
            .get(&category)
            .cloned()
            .unwrap_or_else(|| builtin_default_disposal(category).to_string())
    }

    /// Resolve a model label. Never fails.
    pub fn resolve(&self, label: &str) -> CategoryRecord {
        match self.labels.get(&normalize_label(label)) {
            Some(entry) => CategoryRecord {
                category: entry.category,
                object_name: entry.object.clone().unwrap_or_else(|| label.to_string()),
                disposal_info: entry
                    .disposal_info
                    .clone()
                    .unwrap_or_else(|| self.default_disposal(entry.category)),
            },
            None => {
                log::warn!("unmapped model label '{}', using Unknown category", label);
                CategoryRecord {
                    category: WasteCategory::Unknown,
                    object_name: label.to_string(),
                    disposal_info: self.default_disposal(WasteCategory::Unknown),
                }
            }
        }
    }

    /// Sorted `(label, record)` pairs, for listing.
    pub fn entries(&self) -> Vec<(String, CategoryRecord)> {
        let mut keys: Vec<&String> = self.labels.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| (key.clone(), self.resolve(key)))
            .collect()
    }
}

fn builtin_default_disposal(category: WasteCategory) -> &'static str {
    match category {
        WasteCategory::Dry => "Recycle or compost if biodegradable.<br>Place in dry waste bin.",
        WasteCategory::Wet => "Compost at home or in municipal composting facility.",
        WasteCategory::Hazardous => {
            "Take to designated hazardous waste collection center.<br>Do not throw in regular trash."
        }
        WasteCategory::Electronic => {
            "Return to e-waste recycling center.<br>Never dispose in landfill."
        }
        WasteCategory::Construction => {
            "Hire a licensed waste removal service.<br>Do not dump illegally."
        }
        WasteCategory::Biomedical => {
            "Dispose only through medical waste services.<br>Never discard in household bins."
        }
        WasteCategory::Unknown => UNKNOWN_DISPOSAL,
    }
}

fn join_lines(lines: &[String]) -> Result<String> {
    if lines.is_empty() {
        return Err(anyhow!("disposal text must have at least one line"));
    }
    let trimmed: Vec<&str> = lines.iter().map(|line| line.trim()).collect();
    Ok(trimmed.join(LINE_BREAK))
}

/// Lower-case, spaces and dashes to `_`.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
