//! Analysis response parsing and the user-facing screening result.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Class id the model uses for "no abnormality".
pub const NORMAL_CLASS: i64 = 0;

/// Class id assumed when a detection carries none.
pub const MISSING_CLASS: i64 = -1;

/// Raw JSON returned by the analysis endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    /// `null` and a missing field both mean no detections
    #[serde(default, deserialize_with = "null_as_default")]
    pub detections: Vec<Detection>,
    /// Patient fields echoed back by the server
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: PatientEcho,
    /// Human-readable diagnosis for non-normal classes
    #[serde(default)]
    pub category: Option<String>,
    /// Server path of the annotated image, relative to `/api/`
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
    #[serde(default = "missing_class", deserialize_with = "deserialize_class")]
    pub class: i64,
    #[serde(default, deserialize_with = "deserialize_confidence")]
    pub conf: f64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn missing_class() -> i64 {
    MISSING_CLASS
}

/// The model sometimes reports numbers as floats or strings.
fn lenient_number(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("expected a number, got '{}'", s)),
        other => Err(format!("expected a number, got {}", other)),
    }
}

fn deserialize_class<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = lenient_number(&value).map_err(serde::de::Error::custom)?;
    Ok(number.map(|n| n.trunc() as i64).unwrap_or(MISSING_CLASS))
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = lenient_number(&value).map_err(serde::de::Error::custom)?;
    Ok(number.unwrap_or(0.0))
}

/// Patient fields as echoed by the server; any JSON scalar is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientEcho {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub age: Option<Value>,
    #[serde(default)]
    pub gender: Option<Value>,
}

fn display_field(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl PatientEcho {
    /// One-line summary, with `N/A` for anything the server left out.
    pub fn summary_line(&self) -> String {
        format!(
            "Name: {} | Age: {} | Gender: {}",
            display_field(&self.name),
            display_field(&self.age),
            display_field(&self.gender)
        )
    }
}

/// Outcome category of a screening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    Normal,
    /// Non-normal finding, labelled by the server's category
    Detected(String),
    /// The model returned no detections at all
    DetectionFailed,
}

impl ResultStatus {
    pub fn label(&self) -> &str {
        match self {
            ResultStatus::Normal => "Normal",
            ResultStatus::Detected(category) => category,
            ResultStatus::DetectionFailed => "Detection failed",
        }
    }
}

/// Severity used to colour the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Warning,
    Critical,
    Neutral,
}

impl Tone {
    fn for_status(status: &ResultStatus) -> Self {
        match status {
            ResultStatus::Normal => Tone::Normal,
            ResultStatus::DetectionFailed => Tone::Neutral,
            ResultStatus::Detected(category) => match category.to_lowercase().as_str() {
                "anemia" => Tone::Warning,
                "malnutrisi" | "malnutrition" | "diabetic retinopathy" => Tone::Critical,
                _ => Tone::Neutral,
            },
        }
    }
}

/// What the result screen shows for one completed analysis.
#[derive(Debug, Clone)]
pub struct ScreeningResult {
    pub status: ResultStatus,
    pub summary: String,
    /// Confidence of the first detection, in percent
    pub confidence: f64,
    pub patient_line: String,
    pub tone: Tone,
    pub generated_at: DateTime<Local>,
    /// Server path of the annotated image, if any
    pub image_path: Option<String>,
}

impl ScreeningResult {
    pub fn from_response(response: &AnalysisResponse) -> Self {
        Self::from_response_at(response, Local::now())
    }

    pub fn from_response_at(response: &AnalysisResponse, generated_at: DateTime<Local>) -> Self {
        let (status, confidence) = match response.detections.first() {
            None => (ResultStatus::DetectionFailed, 0.0),
            Some(first) if first.class == NORMAL_CLASS => (ResultStatus::Normal, first.conf * 100.0),
            Some(first) => {
                let category = response
                    .category
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "Detected".to_string());
                (ResultStatus::Detected(category), first.conf * 100.0)
            }
        };

        let summary = match &status {
            ResultStatus::Normal => "Normal result, no abnormality found.".to_string(),
            ResultStatus::Detected(category) => format!("{} detected in the image.", category),
            ResultStatus::DetectionFailed => {
                "The model could not detect anything in this image.".to_string()
            }
        };

        Self {
            tone: Tone::for_status(&status),
            status,
            summary,
            confidence,
            patient_line: response.user.summary_line(),
            generated_at,
            image_path: response.image_path.clone().filter(|p| !p.is_empty()),
        }
    }

    pub fn label(&self) -> &str {
        self.status.label()
    }

    pub fn confidence_text(&self) -> String {
        format!("AI confidence: {:.2}%", self.confidence)
    }

    pub fn generated_text(&self) -> String {
        format!("Generated on {}", self.generated_at.format("%d %b %Y, %H:%M"))
    }
}
