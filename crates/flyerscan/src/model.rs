//! Core data model shared by the harvester, classifier, aggregator and
//! review queue.

use serde::{Deserialize, Serialize};

/// One image discovered on the source page.
///
/// Produced once by the harvester and consumed read-only by the
/// classification workers. `ordinal` is the discovery order on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub ordinal: usize,
}

impl ImageRef {
    pub fn new(url: impl Into<String>, ordinal: usize) -> Self {
        Self {
            url: url.into(),
            ordinal,
        }
    }
}

/// Kind of entity a candidate describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Vendor,
    Dj,
    Venue,
    Show,
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::Vendor => write!(f, "vendor"),
            CandidateKind::Dj => write!(f, "dj"),
            CandidateKind::Venue => write!(f, "venue"),
            CandidateKind::Show => write!(f, "show"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DjFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A recurring or one-off event printed on a flyer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub venue_name: String,
    /// DJ or host running the night.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Weekday ("friday") or calendar date, as printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Typed payload of a candidate. The variant determines the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum CandidateFields {
    Vendor(VendorFields),
    Dj(DjFields),
    Venue(VenueFields),
    Show(ShowFields),
}

impl CandidateFields {
    pub fn kind(&self) -> CandidateKind {
        match self {
            CandidateFields::Vendor(_) => CandidateKind::Vendor,
            CandidateFields::Dj(_) => CandidateKind::Dj,
            CandidateFields::Venue(_) => CandidateKind::Venue,
            CandidateFields::Show(_) => CandidateKind::Show,
        }
    }
}

/// Clamps a model-reported confidence into `[0, 1]`. NaN becomes 0.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// What the classifier reports for one relevant image, before it is bound
/// to the image it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub fields: CandidateFields,
    pub confidence: f32,
}

impl Classification {
    pub fn new(fields: CandidateFields, confidence: f32) -> Self {
        Self {
            fields,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Binds this classification to the image it was produced from.
    pub fn into_candidate(self, source_image: &ImageRef) -> ExtractionCandidate {
        ExtractionCandidate {
            fields: self.fields,
            confidence: self.confidence,
            source_image: source_image.clone(),
        }
    }
}

/// An unconfirmed, confidence-scored record extracted from exactly one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionCandidate {
    #[serde(flatten)]
    pub fields: CandidateFields,
    pub confidence: f32,
    pub source_image: ImageRef,
}

impl ExtractionCandidate {
    pub fn new(fields: CandidateFields, confidence: f32, source_image: ImageRef) -> Self {
        Self {
            fields,
            confidence: clamp_confidence(confidence),
            source_image,
        }
    }

    pub fn kind(&self) -> CandidateKind {
        self.fields.kind()
    }
}

/// A deduplicated dataset element with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merged<T> {
    #[serde(flatten)]
    pub fields: T,
    pub confidence: f32,
    /// Sorted, unique URLs of the images that contributed to this record.
    pub sources: Vec<String>,
    /// True when the record was derived from show candidates only.
    #[serde(default)]
    pub synthesized: bool,
}

/// The consolidated result of one job, ready for review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDataset {
    #[serde(default)]
    pub vendors: Vec<Merged<VendorFields>>,
    #[serde(default)]
    pub djs: Vec<Merged<DjFields>>,
    #[serde(default)]
    pub venues: Vec<Merged<VenueFields>>,
    #[serde(default)]
    pub shows: Vec<Merged<ShowFields>>,
}

impl AggregatedDataset {
    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
            && self.djs.is_empty()
            && self.venues.is_empty()
            && self.shows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vendors.len() + self.djs.len() + self.venues.len() + self.shows.len()
    }

    /// Every image URL referenced by any record.
    pub fn source_urls(&self) -> std::collections::BTreeSet<&str> {
        self.vendors
            .iter()
            .flat_map(|r| r.sources.iter())
            .chain(self.djs.iter().flat_map(|r| r.sources.iter()))
            .chain(self.venues.iter().flat_map(|r| r.sources.iter()))
            .chain(self.shows.iter().flat_map(|r| r.sources.iter()))
            .map(String::as_str)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_candidate_serializes_kind_tag() {
        let candidate = ExtractionCandidate::new(
            CandidateFields::Venue(VenueFields {
                name: "The Roxy".to_string(),
                ..Default::default()
            }),
            0.9,
            ImageRef::new("https://cdn.example/a.jpg", 0),
        );

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["kind"], "venue");
        assert_eq!(json["fields"]["name"], "The Roxy");
        assert_eq!(json["sourceImage"]["ordinal"], 0);
        assert_eq!(candidate.kind(), CandidateKind::Venue);
    }

    #[test]
    fn test_classification_binds_source_image() {
        let image = ImageRef::new("https://cdn.example/b.jpg", 3);
        let candidate = Classification::new(
            CandidateFields::Dj(DjFields {
                name: "DJ Nova".to_string(),
                ..Default::default()
            }),
            2.0,
        )
        .into_candidate(&image);

        assert_eq!(candidate.source_image, image);
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn test_dataset_source_urls() {
        let mut dataset = AggregatedDataset::default();
        assert!(dataset.is_empty());

        dataset.venues.push(Merged {
            fields: VenueFields {
                name: "Roxy".to_string(),
                ..Default::default()
            },
            confidence: 0.5,
            sources: vec!["u1".to_string(), "u2".to_string()],
            synthesized: false,
        });
        dataset.djs.push(Merged {
            fields: DjFields {
                name: "Nova".to_string(),
                ..Default::default()
            },
            confidence: 0.5,
            sources: vec!["u2".to_string()],
            synthesized: true,
        });

        assert_eq!(dataset.len(), 2);
        let urls: Vec<&str> = dataset.source_urls().into_iter().collect();
        assert_eq!(urls, vec!["u1", "u2"]);
    }
}
