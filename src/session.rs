//! Screening session data: screening types, patient details and the
//! per-flow session carried between screens.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::camera::CameraSelector;
use crate::imaging::Frame;

/// Minimum accepted patient name length, after trimming.
pub const MIN_NAME_LEN: usize = 3;

/// Accepted patient age range, in years.
pub const AGE_RANGE: std::ops::RangeInclusive<u32> = 1..=150;

/// Which physical camera a screening type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    /// Dedicated fundus camera
    Retina,
    /// General-purpose camera for nails and faces
    Default,
}

/// Camera indices for each [`CameraRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelectors {
    pub default: CameraSelector,
    pub retina: CameraSelector,
}

impl Default for CameraSelectors {
    fn default() -> Self {
        Self {
            default: CameraSelector::new(0),
            retina: CameraSelector::new(1),
        }
    }
}

impl CameraSelectors {
    /// Camera to open for a screening type.
    pub fn for_type(&self, screening_type: ScreeningType) -> CameraSelector {
        match screening_type.camera_role() {
            CameraRole::Retina => self.retina,
            CameraRole::Default => self.default,
        }
    }
}

/// Kind of screening the kiosk can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreeningType {
    DiabeticRetinopathy,
    Anemia,
    Malnutrition,
}

impl ScreeningType {
    pub const ALL: [ScreeningType; 3] = [
        ScreeningType::DiabeticRetinopathy,
        ScreeningType::Anemia,
        ScreeningType::Malnutrition,
    ];

    /// Path segment of the analysis endpoint (`/api/{slug}`).
    pub fn slug(&self) -> &'static str {
        match self {
            ScreeningType::DiabeticRetinopathy => "diabetic_retinopathy",
            ScreeningType::Anemia => "anemia",
            ScreeningType::Malnutrition => "malnutrisi",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ScreeningType::DiabeticRetinopathy => "Diabetic Retinopathy",
            ScreeningType::Anemia => "Anemia",
            ScreeningType::Malnutrition => "Malnutrition",
        }
    }

    /// Positioning hint shown on the capture screen.
    pub fn guide(&self) -> &'static str {
        match self {
            ScreeningType::DiabeticRetinopathy => {
                "Make sure the retina is clearly visible and the lighting is sufficient."
            }
            ScreeningType::Anemia => "Focus on the fingernails. Keep the lighting even.",
            ScreeningType::Malnutrition => {
                "Focus on the subject's face, especially the cheeks and chin."
            }
        }
    }

    pub fn camera_role(&self) -> CameraRole {
        match self {
            ScreeningType::DiabeticRetinopathy => CameraRole::Retina,
            _ => CameraRole::Default,
        }
    }
}

impl fmt::Display for ScreeningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

impl FromStr for ScreeningType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "diabetic_retinopathy" | "retinopathy" | "dr" => Ok(ScreeningType::DiabeticRetinopathy),
            "anemia" => Ok(ScreeningType::Anemia),
            "malnutrition" | "malnutrisi" => Ok(ScreeningType::Malnutrition),
            other => Err(format!(
                "Unknown screening type '{}'. Expected one of: diabetic-retinopathy, anemia, malnutrition",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = PatientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            "" => Err(PatientError::MissingGender),
            other => Err(PatientError::InvalidGender(other.to_string())),
        }
    }
}

/// Why patient details were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatientError {
    #[error("Patient name must not be empty")]
    EmptyName,

    #[error("Patient name must be at least 3 characters")]
    NameTooShort,

    #[error("Age must be between 1 and 150, got {0}")]
    AgeOutOfRange(u32),

    #[error("Please choose a gender")]
    MissingGender,

    #[error("Unknown gender '{0}', expected male or female")]
    InvalidGender(String),
}

/// Validated patient details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Patient {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
}

impl Patient {
    /// Validate and build patient details. The name is trimmed.
    pub fn new(name: &str, age: u32, gender: Gender) -> Result<Self, PatientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PatientError::EmptyName);
        }
        if name.chars().count() < MIN_NAME_LEN {
            return Err(PatientError::NameTooShort);
        }
        if !AGE_RANGE.contains(&age) {
            return Err(PatientError::AgeOutOfRange(age));
        }
        Ok(Self {
            name: name.to_string(),
            age,
            gender,
        })
    }
}

/// State of one screening flow, from type selection to result.
#[derive(Debug, Clone)]
pub struct ScreeningSession {
    pub screening_type: ScreeningType,
    pub patient: Option<Patient>,
    pub captured_image: Option<Frame>,
}

impl ScreeningSession {
    pub fn new(screening_type: ScreeningType) -> Self {
        Self {
            screening_type,
            patient: None,
            captured_image: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugs_match_api_paths() {
        assert_eq!(ScreeningType::DiabeticRetinopathy.slug(), "diabetic_retinopathy");
        assert_eq!(ScreeningType::Anemia.slug(), "anemia");
        assert_eq!(ScreeningType::Malnutrition.slug(), "malnutrisi");
    }

    #[test]
    fn test_screening_type_parse() {
        assert_eq!(
            "diabetic-retinopathy".parse::<ScreeningType>().unwrap(),
            ScreeningType::DiabeticRetinopathy
        );
        assert_eq!("malnutrisi".parse::<ScreeningType>().unwrap(), ScreeningType::Malnutrition);
        assert_eq!("Anemia".parse::<ScreeningType>().unwrap(), ScreeningType::Anemia);
        assert!("cataract".parse::<ScreeningType>().is_err());
    }

    #[test]
    fn test_only_retinopathy_uses_retina_camera() {
        assert_eq!(ScreeningType::DiabeticRetinopathy.camera_role(), CameraRole::Retina);
        assert_eq!(ScreeningType::Anemia.camera_role(), CameraRole::Default);
        assert_eq!(ScreeningType::Malnutrition.camera_role(), CameraRole::Default);

        let selectors = CameraSelectors::default();
        assert_eq!(
            selectors.for_type(ScreeningType::DiabeticRetinopathy),
            CameraSelector::new(1)
        );
        assert_eq!(selectors.for_type(ScreeningType::Anemia), CameraSelector::new(0));
    }

    #[test]
    fn test_patient_valid() {
        let p = Patient::new("  Siti Aminah ", 42, Gender::Female).unwrap();
        assert_eq!(p.name, "Siti Aminah");
        assert_eq!(p.age, 42);
    }

    #[test]
    fn test_patient_rejects_bad_input() {
        assert_eq!(Patient::new("   ", 30, Gender::Male), Err(PatientError::EmptyName));
        assert_eq!(Patient::new("Al", 30, Gender::Male), Err(PatientError::NameTooShort));
        assert_eq!(
            Patient::new("Budi", 0, Gender::Male),
            Err(PatientError::AgeOutOfRange(0))
        );
        assert_eq!(
            Patient::new("Budi", 151, Gender::Male),
            Err(PatientError::AgeOutOfRange(151))
        );
    }

    #[test]
    fn test_gender_parse() {
        assert_eq!("Male".parse::<Gender>(), Ok(Gender::Male));
        assert_eq!("f".parse::<Gender>(), Ok(Gender::Female));
        assert_eq!("".parse::<Gender>(), Err(PatientError::MissingGender));
        assert!(matches!("x".parse::<Gender>(), Err(PatientError::InvalidGender(_))));
    }
}
