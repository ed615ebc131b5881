//! The 13 land-cover / crop classes, their labels and legend colors.
//!
//! Class ids are the raster values written by the classifier. The id →
//! palette-index mapping and the palette itself are stable across sessions so
//! the same class always renders with the same color.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LandClass {
    Structure,
    EarlyGrain,
    LateGrain,
    SummerCrop,
    Forest,
    Water,
    Stubble,
    Orchard,
    Grass,
    Cotton,
    Beet,
    Corn,
    Sunflower,
}

impl LandClass {
    pub const ALL: [LandClass; 13] = [
        LandClass::Structure,
        LandClass::EarlyGrain,
        LandClass::LateGrain,
        LandClass::SummerCrop,
        LandClass::Forest,
        LandClass::Water,
        LandClass::Stubble,
        LandClass::Orchard,
        LandClass::Grass,
        LandClass::Cotton,
        LandClass::Beet,
        LandClass::Corn,
        LandClass::Sunflower,
    ];

    /// Raster value written by the classifier.
    pub fn id(self) -> u8 {
        match self {
            LandClass::Structure => 0,
            LandClass::EarlyGrain => 1,
            LandClass::LateGrain => 2,
            LandClass::SummerCrop => 3,
            LandClass::Forest => 4,
            LandClass::Water => 5,
            LandClass::Stubble => 6,
            LandClass::Orchard => 7,
            LandClass::Grass => 8,
            LandClass::Cotton => 30,
            LandClass::Beet => 31,
            LandClass::Corn => 32,
            LandClass::Sunflower => 33,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.id() == id)
    }

    /// Parse a histogram key such as `"30"` or `"4.0"`.
    pub fn from_key(key: &str) -> Option<Self> {
        let value: f64 = key.trim().parse().ok()?;
        if value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
            return None;
        }
        Self::from_id(value as u8)
    }

    /// Position in [`PALETTE`].
    pub fn palette_index(self) -> u8 {
        match self.id() {
            30 => 9,
            31 => 10,
            32 => 11,
            33 => 12,
            id => id,
        }
    }

    pub fn color(self) -> &'static str {
        PALETTE[self.palette_index() as usize]
    }

    /// Human label. Id 1 reads "Winter Grain" when barley and wheat could not
    /// be separated (no June transition imagery).
    pub fn label(self, has_transition: bool) -> &'static str {
        match self {
            LandClass::Structure => "Road / Structure / Rocky",
            LandClass::EarlyGrain if has_transition => "Barley / Lentil (Early)",
            LandClass::EarlyGrain => "Winter Grain",
            LandClass::LateGrain => "Wheat (Late Grain)",
            LandClass::SummerCrop => "Summer Crop (Undefined)",
            LandClass::Forest => "Tall Trees",
            LandClass::Water => "Water",
            LandClass::Stubble => "Stubble / Plowed Soil",
            LandClass::Orchard => "Orchard / Shrub / Nursery",
            LandClass::Grass => "Grass / Green Area",
            LandClass::Cotton => "Cotton",
            LandClass::Beet => "Winter Vegetables (Sugar Beet, Carrot)",
            LandClass::Corn => "Corn",
            LandClass::Sunflower => "Sunflower",
        }
    }
}

impl fmt::Display for LandClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Legend palette, indexed by [`LandClass::palette_index`].
pub const PALETTE: [&str; 13] = [
    "#BDBDBD", "#FFD54F", "#FF9800", "#CDDC39", "#1B5E20", "#2196F3", "#795548", "#827717",
    "#76FF03", "#F48FB1", "#9C27B0", "#FFEB3B", "#FFA726",
];

/// Label for a raw histogram key, falling back to `"Class {key}"`.
pub fn label_for_key(key: &str, has_transition: bool) -> String {
    LandClass::from_key(key)
        .map(|c| c.label(has_transition).to_string())
        .unwrap_or_else(|| format!("Class {}", key))
}

/// Reverse lookup used by the legend: label → color, or gray when unknown.
pub fn color_for_label(label: &str) -> &'static str {
    LandClass::ALL
        .iter()
        .find(|c| c.label(true) == label || c.label(false) == label)
        .map(|c| c.color())
        .unwrap_or("#808080")
}
