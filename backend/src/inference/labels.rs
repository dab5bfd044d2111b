//! Crop and disease label tables.
//!
//! Class indices follow the output order of each crop's classifier head.

use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CropKind {
    Pepper,
    Tomato,
    Cucumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disease {
    PepperNormal,
    PepperMildMottleVirus,
    PepperBacterialSpot,
}

const PEPPER_CLASSES: &[Disease] = &[
    Disease::PepperBacterialSpot,
    Disease::PepperMildMottleVirus,
    Disease::PepperNormal,
];

impl CropKind {
    /// Diseases ordered by classifier output index. Empty when no model exists for the crop.
    pub fn diseases(self) -> &'static [Disease] {
        match self {
            CropKind::Pepper => PEPPER_CLASSES,
            CropKind::Tomato | CropKind::Cucumber => &[],
        }
    }

    pub fn disease_at(self, class_index: usize) -> Option<Disease> {
        self.diseases().get(class_index).copied()
    }
}

impl Disease {
    pub fn native_label(self) -> &'static str {
        match self {
            Disease::PepperNormal => "normal_0",
            Disease::PepperMildMottleVirus => "PMMoV_3",
            Disease::PepperBacterialSpot => "BacterialSpot_4",
        }
    }

    /// Label shown to users of the mobile app.
    pub fn display_label(self) -> &'static str {
        match self {
            Disease::PepperNormal => "정상",
            Disease::PepperMildMottleVirus => "고추마일드모틀바이러스",
            Disease::PepperBacterialSpot => "고추점무늬병",
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, Disease::PepperNormal)
    }

    pub fn from_display_label(label: &str) -> Option<Disease> {
        PEPPER_CLASSES.iter().copied().find(|d| d.display_label() == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn pepper_classes_follow_model_output_order() {
        assert_eq!(CropKind::Pepper.disease_at(0), Some(Disease::PepperBacterialSpot));
        assert_eq!(CropKind::Pepper.disease_at(1), Some(Disease::PepperMildMottleVirus));
        assert_eq!(CropKind::Pepper.disease_at(2), Some(Disease::PepperNormal));
        assert_eq!(CropKind::Pepper.disease_at(3), None);
    }

    #[test]
    fn crop_names_are_lowercase() {
        assert_eq!(CropKind::from_str("pepper").unwrap(), CropKind::Pepper);
        assert_eq!(CropKind::Cucumber.to_string(), "cucumber");
        assert!(CropKind::from_str("banana").is_err());
        assert_eq!(CropKind::iter().count(), 3);
    }

    #[test]
    fn crops_without_models_have_no_classes() {
        assert!(CropKind::Tomato.diseases().is_empty());
        assert_eq!(CropKind::Tomato.disease_at(0), None);
    }

    #[test]
    fn display_labels_resolve_back() {
        assert_eq!(Disease::from_display_label("정상"), Some(Disease::PepperNormal));
        assert!(Disease::PepperNormal.is_healthy());
        assert!(!Disease::PepperBacterialSpot.is_healthy());
        assert_eq!(Disease::from_display_label("unknown"), None);
    }
}
