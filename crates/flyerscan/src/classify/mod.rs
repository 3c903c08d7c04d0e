//! Image classification: one flyer image in, zero or one candidate out.

pub mod vision;

pub use vision::VisionClassifier;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ClassifyError;
use crate::model::{
    CandidateFields, Classification, DjFields, ShowFields, VendorFields, VenueFields,
};

/// A vision model (or anything else) that reads one image.
///
/// `Ok(None)` means "not an event flyer" and is the normal answer for most
/// images. [`ClassifyError::Unavailable`] is the only retryable error.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Option<Classification>, ClassifyError>;
}

/// Instruction sent with every image.
pub const INSTRUCTIONS: &str = r#"You extract event-schedule data from a single image posted on an events page.
Decide whether the image is a flyer or poster advertising a vendor, a DJ, a venue or a show (an event at a venue).
Respond with one JSON object and nothing else:
{
  "relevant": true | false,
  "kind": "vendor" | "dj" | "venue" | "show",
  "fields": { ... },
  "confidence": number between 0 and 1
}
Field sets by kind:
- vendor: name, category, city, state, socialHandle
- dj: name, genre, socialHandle
- venue: name, address, city, state
- show: title, venueName, host, vendor, day, startTime, endTime, city, state
Use null for anything not printed on the image. Do not guess.
If the image is not an event flyer, respond {"relevant": false}."#;

#[derive(Debug, Deserialize)]
struct ModelAnswer {
    relevant: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    fields: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Strips a ```json fence if the model wrapped its answer in one.
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn typed<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ClassifyError> {
    serde_json::from_value(value).map_err(|e| ClassifyError::Unparseable(e.to_string()))
}

/// Turns the model's JSON answer into a classification.
pub fn parse_answer(text: &str) -> Result<Option<Classification>, ClassifyError> {
    let answer: ModelAnswer = serde_json::from_str(unfence(text))
        .map_err(|e| ClassifyError::Unparseable(format!("not a JSON answer: {}", e)))?;

    if !answer.relevant {
        return Ok(None);
    }

    let kind = answer
        .kind
        .ok_or_else(|| ClassifyError::Unparseable("relevant answer without kind".to_string()))?;
    let fields = answer.fields.unwrap_or(serde_json::Value::Null);
    if !fields.is_object() {
        return Err(ClassifyError::Unparseable(
            "relevant answer without fields".to_string(),
        ));
    }

    let fields = match kind.to_ascii_lowercase().as_str() {
        "vendor" => CandidateFields::Vendor(typed::<VendorFields>(fields)?),
        "dj" => CandidateFields::Dj(typed::<DjFields>(fields)?),
        "venue" => CandidateFields::Venue(typed::<VenueFields>(fields)?),
        "show" => CandidateFields::Show(typed::<ShowFields>(fields)?),
        other => {
            return Err(ClassifyError::Unparseable(format!(
                "unknown kind '{}'",
                other
            )))
        }
    };

    Ok(Some(Classification::new(
        fields,
        answer.confidence.unwrap_or(0.5),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CandidateKind;

    #[test]
    fn test_not_relevant() {
        assert!(parse_answer(r#"{"relevant": false}"#).unwrap().is_none());
    }

    #[test]
    fn test_show_answer() {
        let text = r#"```json
        {
            "relevant": true,
            "kind": "show",
            "fields": {"venueName": "The Roxy", "host": "DJ Nova", "day": "Friday", "startTime": "9pm", "city": null},
            "confidence": 0.87
        }
        ```"#;

        let classification = parse_answer(text).unwrap().unwrap();
        assert_eq!(classification.fields.kind(), CandidateKind::Show);
        assert!((classification.confidence - 0.87).abs() < f32::EPSILON);
        match classification.fields {
            CandidateFields::Show(show) => {
                assert_eq!(show.venue_name, "The Roxy");
                assert_eq!(show.host.as_deref(), Some("DJ Nova"));
                assert!(show.city.is_none());
            }
            other => panic!("unexpected fields: {:?}", other),
        }
    }

    #[test]
    fn test_confidence_is_clamped() {
        let c = parse_answer(r#"{"relevant": true, "kind": "dj", "fields": {"name": "Nova"}, "confidence": 7}"#)
            .unwrap()
            .unwrap();
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_unparseable_answers() {
        for text in [
            "Sure! Here is the data you asked for.",
            r#"{"relevant": true}"#,
            r#"{"relevant": true, "kind": "party", "fields": {"name": "x"}}"#,
            r#"{"relevant": true, "kind": "venue", "fields": {"address": "no name"}}"#,
        ] {
            assert!(
                matches!(parse_answer(text), Err(ClassifyError::Unparseable(_))),
                "expected unparseable for {}",
                text
            );
        }
    }
}
