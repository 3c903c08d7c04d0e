//! Deduplicates and merges extraction candidates into one dataset.
//!
//! Candidates are grouped per kind by a normalized identity key. Within a
//! group the highest-confidence candidate wins and lower-ranked candidates
//! only fill fields it left empty. Ranking is a total order over
//! (confidence, field content, source), so the output does not depend on the
//! order the workers finished in.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::model::{
    AggregatedDataset, CandidateFields, DjFields, ExtractionCandidate, Merged, ShowFields,
    VendorFields, VenueFields,
};

/// Lowercases, turns every non-alphanumeric run into one space and trims.
pub fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

fn norm_opt(value: &Option<String>) -> String {
    value.as_deref().map(normalize).unwrap_or_default()
}

fn tidy(slot: &mut Option<String>) {
    if let Some(v) = slot {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            *slot = None;
        } else if trimmed.len() != v.len() {
            *slot = Some(trimmed.to_string());
        }
    }
}

fn fill(slot: &mut Option<String>, other: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(other);
    }
}

/// A record kind the aggregator knows how to key and merge.
trait Record: Clone + Serialize {
    fn name(&self) -> &str;

    /// Normalized fields that tell apart records sharing a name. Empty
    /// strings stand for unknown values.
    fn qualifiers(&self) -> Vec<String>;

    /// Trims text fields and turns blanks into `None`.
    fn tidy(&mut self);

    /// Copies fields that are empty here from `other`.
    fn absorb(&mut self, other: &Self);

    /// Normalized identity key, or `None` when the record has no usable name.
    fn identity(&self) -> Option<String> {
        let name = normalize(self.name());
        if name.is_empty() {
            return None;
        }
        let mut parts = vec![name];
        parts.extend(self.qualifiers());
        Some(parts.join("|"))
    }

    /// Same name and no qualifier known on both sides that disagrees.
    fn compatible(&self, other: &Self) -> bool {
        normalize(self.name()) == normalize(other.name())
            && self
                .qualifiers()
                .iter()
                .zip(other.qualifiers())
                .all(|(a, b)| a.is_empty() || b.is_empty() || *a == b)
    }
}

impl Record for VendorFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualifiers(&self) -> Vec<String> {
        vec![norm_opt(&self.city), norm_opt(&self.state)]
    }

    fn tidy(&mut self) {
        self.name = self.name.trim().to_string();
        tidy(&mut self.category);
        tidy(&mut self.city);
        tidy(&mut self.state);
        tidy(&mut self.social_handle);
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.category, &other.category);
        fill(&mut self.city, &other.city);
        fill(&mut self.state, &other.state);
        fill(&mut self.social_handle, &other.social_handle);
    }
}

impl Record for DjFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualifiers(&self) -> Vec<String> {
        Vec::new()
    }

    fn tidy(&mut self) {
        self.name = self.name.trim().to_string();
        tidy(&mut self.genre);
        tidy(&mut self.social_handle);
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.genre, &other.genre);
        fill(&mut self.social_handle, &other.social_handle);
    }
}

impl Record for VenueFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn qualifiers(&self) -> Vec<String> {
        vec![norm_opt(&self.city), norm_opt(&self.state)]
    }

    fn tidy(&mut self) {
        self.name = self.name.trim().to_string();
        tidy(&mut self.address);
        tidy(&mut self.city);
        tidy(&mut self.state);
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.address, &other.address);
        fill(&mut self.city, &other.city);
        fill(&mut self.state, &other.state);
    }
}

impl Record for ShowFields {
    fn name(&self) -> &str {
        &self.venue_name
    }

    fn qualifiers(&self) -> Vec<String> {
        vec![
            norm_opt(&self.city),
            norm_opt(&self.state),
            norm_opt(&self.day),
            norm_opt(&self.start_time),
            norm_opt(&self.host),
        ]
    }

    fn tidy(&mut self) {
        self.venue_name = self.venue_name.trim().to_string();
        tidy(&mut self.title);
        tidy(&mut self.host);
        tidy(&mut self.vendor);
        tidy(&mut self.day);
        tidy(&mut self.start_time);
        tidy(&mut self.end_time);
        tidy(&mut self.city);
        tidy(&mut self.state);
    }

    fn absorb(&mut self, other: &Self) {
        fill(&mut self.title, &other.title);
        fill(&mut self.vendor, &other.vendor);
        fill(&mut self.end_time, &other.end_time);
    }
}

struct Contribution<T> {
    fields: T,
    confidence: f32,
    sources: Vec<String>,
}

fn merge_by<T, K>(items: Vec<Contribution<T>>, key: K, synthesized: bool) -> Vec<Merged<T>>
where
    T: Record,
    K: Fn(&T) -> Option<String>,
{
    let mut groups: BTreeMap<String, Vec<Contribution<T>>> = BTreeMap::new();
    for item in items {
        match key(&item.fields) {
            Some(k) => groups.entry(k).or_default().push(item),
            None => log::debug!("Dropping candidate without a usable name"),
        }
    }

    groups
        .into_values()
        .filter_map(|group| merge_group(group, synthesized))
        .collect()
}

fn merge_group<T: Record>(group: Vec<Contribution<T>>, synthesized: bool) -> Option<Merged<T>> {
    let mut ranked: Vec<(String, Contribution<T>)> = group
        .into_iter()
        .map(|c| (serde_json::to_string(&c.fields).unwrap_or_default(), c))
        .collect();
    ranked.sort_by(|(a_json, a), (b_json, b)| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a_json.cmp(b_json))
            .then_with(|| a.sources.cmp(&b.sources))
    });

    let mut iter = ranked.into_iter().map(|(_, c)| c);
    let best = iter.next()?;
    let confidence = best.confidence;
    let mut fields = best.fields;
    let mut sources: BTreeSet<String> = best.sources.into_iter().collect();

    for other in iter {
        fields.absorb(&other.fields);
        sources.extend(other.sources);
    }

    Some(Merged {
        fields,
        confidence,
        sources: sources.into_iter().collect(),
        synthesized,
    })
}

fn contribution<T: Record>(mut fields: T, candidate: &ExtractionCandidate) -> Contribution<T> {
    fields.tidy();
    Contribution {
        fields,
        confidence: candidate.confidence,
        sources: vec![candidate.source_image.url.clone()],
    }
}

fn add_sources(sources: &mut Vec<String>, extra: &[String]) {
    sources.extend_from_slice(extra);
    sources.sort();
    sources.dedup();
}

/// Builds a record for every entity a show mentions that no explicit record
/// covers. When exactly one explicit record is compatible with the mention,
/// it takes the show's sources instead. A mention compatible with several
/// records is ambiguous and adds nothing.
fn synthesize<T, F>(
    shows: &[Merged<ShowFields>],
    explicit: &mut [Merged<T>],
    build: F,
) -> Vec<Merged<T>>
where
    T: Record,
    F: Fn(&ShowFields) -> Option<T>,
{
    let mut derived = Vec::new();
    for show in shows {
        let Some(mut fields) = build(&show.fields) else {
            continue;
        };
        fields.tidy();
        if fields.identity().is_none() {
            continue;
        }

        let covering: Vec<usize> = explicit
            .iter()
            .enumerate()
            .filter(|(_, record)| record.fields.compatible(&fields))
            .map(|(i, _)| i)
            .collect();

        match covering.as_slice() {
            [] => derived.push(Contribution {
                fields,
                confidence: show.confidence,
                sources: show.sources.clone(),
            }),
            [only] => add_sources(&mut explicit[*only].sources, &show.sources),
            _ => log::debug!(
                "Show mention '{}' fits {} records, leaving them unchanged",
                fields.name(),
                covering.len()
            ),
        }
    }

    merge_by(derived, Record::identity, true)
}

/// Merges candidates into a deduplicated dataset. Pure and order-independent.
pub fn aggregate(candidates: &[ExtractionCandidate]) -> AggregatedDataset {
    let mut vendors = Vec::new();
    let mut djs = Vec::new();
    let mut venues = Vec::new();
    let mut shows = Vec::new();

    for candidate in candidates {
        match &candidate.fields {
            CandidateFields::Vendor(f) => vendors.push(contribution(f.clone(), candidate)),
            CandidateFields::Dj(f) => djs.push(contribution(f.clone(), candidate)),
            CandidateFields::Venue(f) => venues.push(contribution(f.clone(), candidate)),
            CandidateFields::Show(f) => shows.push(contribution(f.clone(), candidate)),
        }
    }

    let shows = merge_by(shows, Record::identity, false);
    let mut venues = merge_by(venues, Record::identity, false);
    let mut vendors = merge_by(vendors, Record::identity, false);
    let mut djs = merge_by(djs, Record::identity, false);

    let extra_venues = synthesize(&shows, &mut venues, |s| {
        Some(VenueFields {
            name: s.venue_name.clone(),
            address: None,
            city: s.city.clone(),
            state: s.state.clone(),
        })
    });
    let extra_vendors = synthesize(&shows, &mut vendors, |s| {
        s.vendor.as_ref().map(|name| VendorFields {
            name: name.clone(),
            city: s.city.clone(),
            state: s.state.clone(),
            ..Default::default()
        })
    });
    let extra_djs = synthesize(&shows, &mut djs, |s| {
        s.host.as_ref().map(|name| DjFields {
            name: name.clone(),
            ..Default::default()
        })
    });

    venues.extend(extra_venues);
    vendors.extend(extra_vendors);
    djs.extend(extra_djs);

    AggregatedDataset {
        vendors,
        djs,
        venues,
        shows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageRef;

    fn show(
        venue: &str,
        day: &str,
        host: Option<&str>,
        conf: f32,
        url: &str,
    ) -> ExtractionCandidate {
        ExtractionCandidate::new(
            CandidateFields::Show(ShowFields {
                venue_name: venue.to_string(),
                day: Some(day.to_string()),
                start_time: Some("9pm".to_string()),
                host: host.map(str::to_string),
                ..Default::default()
            }),
            conf,
            ImageRef::new(url, 0),
        )
    }

    fn show_in(venue: &str, city: &str, state: &str, url: &str) -> ExtractionCandidate {
        ExtractionCandidate::new(
            CandidateFields::Show(ShowFields {
                venue_name: venue.to_string(),
                day: Some("Friday".to_string()),
                start_time: Some("9pm".to_string()),
                city: Some(city.to_string()),
                state: Some(state.to_string()),
                ..Default::default()
            }),
            0.8,
            ImageRef::new(url, 0),
        )
    }

    fn venue(
        name: &str,
        city: Option<&str>,
        address: Option<&str>,
        conf: f32,
        url: &str,
    ) -> ExtractionCandidate {
        ExtractionCandidate::new(
            CandidateFields::Venue(VenueFields {
                name: name.to_string(),
                city: city.map(str::to_string),
                address: address.map(str::to_string),
                state: None,
            }),
            conf,
            ImageRef::new(url, 0),
        )
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  The ROXY -- Theatre!! "), "the roxy theatre");
        assert_eq!(normalize("Café_Ñu"), "café ñu");
        assert_eq!(normalize("***"), "");
    }

    #[test]
    fn test_same_key_candidates_merge() {
        let candidates = vec![
            venue("The Roxy", Some("Los Angeles"), None, 0.6, "u1"),
            venue("the roxy", Some("los angeles"), Some("9009 Sunset Blvd"), 0.9, "u2"),
        ];

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.venues.len(), 1);
        let merged = &dataset.venues[0];
        assert_eq!(merged.fields.name, "the roxy");
        assert_eq!(merged.fields.address.as_deref(), Some("9009 Sunset Blvd"));
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(merged.sources, vec!["u1", "u2"]);
        assert!(!merged.synthesized);
    }

    #[test]
    fn test_lower_confidence_only_fills_gaps() {
        let candidates = vec![
            venue("Roxy", Some("LA"), Some("Sunset Blvd"), 0.9, "u1"),
            venue("Roxy", Some("LA"), Some("Wrong Street"), 0.3, "u2"),
        ];
        let dataset = aggregate(&candidates);
        assert_eq!(dataset.venues[0].fields.address.as_deref(), Some("Sunset Blvd"));
    }

    #[test]
    fn test_aggregate_is_permutation_invariant() {
        let candidates = vec![
            show("Roxy", "Friday", Some("DJ Nova"), 0.8, "u1"),
            show("roxy", "friday", Some("dj nova"), 0.8, "u2"),
            show("Echo", "Saturday", None, 0.5, "u3"),
            venue("Roxy", None, Some("Sunset"), 0.7, "u4"),
            venue("ROXY", None, Some("Other"), 0.7, "u5"),
            ExtractionCandidate::new(
                CandidateFields::Vendor(VendorFields {
                    name: "Taco Truck".to_string(),
                    ..Default::default()
                }),
                0.4,
                ImageRef::new("u6", 5),
            ),
        ];

        let expected = aggregate(&candidates);

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(aggregate(&reversed), expected);

        for shift in 1..candidates.len() {
            let mut rotated = candidates.clone();
            rotated.rotate_left(shift);
            assert_eq!(aggregate(&rotated), expected);
        }

        let mut swapped = candidates.clone();
        swapped.swap(0, 1);
        swapped.swap(3, 4);
        assert_eq!(aggregate(&swapped), expected);
    }

    #[test]
    fn test_shows_synthesize_missing_venues() {
        let candidates: Vec<_> = (0..6)
            .map(|i| {
                show(
                    &format!("Venue {}", i),
                    "Friday",
                    None,
                    0.8,
                    &format!("u{}", i),
                )
            })
            .collect();

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.shows.len(), 6);
        assert_eq!(dataset.venues.len(), 6);
        assert!(dataset.venues.iter().all(|v| v.synthesized));
    }

    #[test]
    fn test_explicit_venue_prevents_synthesis() {
        let candidates = vec![
            show("The Roxy", "Friday", Some("DJ Nova"), 0.8, "u1"),
            venue("the roxy", Some("LA"), None, 0.9, "u2"),
        ];

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.venues.len(), 1);
        assert!(!dataset.venues[0].synthesized);
        // The explicit venue picks up the show's provenance.
        assert_eq!(dataset.venues[0].sources, vec!["u1", "u2"]);
        assert_eq!(dataset.djs.len(), 1);
        assert!(dataset.djs[0].synthesized);
        assert_eq!(dataset.djs[0].sources, vec!["u1"]);
    }

    #[test]
    fn test_same_venue_name_in_two_cities_stays_apart() {
        let candidates = vec![
            show_in("The Depot", "Austin", "TX", "u1"),
            show_in("The Depot", "Denver", "CO", "u2"),
            show_in("the depot", "austin", "tx", "u3"),
        ];

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.shows.len(), 2);
        let venues: Vec<_> = dataset
            .venues
            .iter()
            .map(|v| (v.fields.city.as_deref(), v.sources.clone(), v.synthesized))
            .collect();
        assert_eq!(
            venues,
            vec![
                (Some("Austin"), vec!["u1".to_string(), "u3".to_string()], true),
                (Some("Denver"), vec!["u2".to_string()], true),
            ]
        );
    }

    #[test]
    fn test_explicit_venue_elsewhere_does_not_hide_show_venue() {
        let candidates = vec![
            venue("The Depot", Some("Austin"), None, 0.9, "u0"),
            show_in("The Depot", "Denver", "CO", "u1"),
            show_in("The Depot", "Austin", "TX", "u2"),
        ];

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.venues.len(), 2);

        let austin = &dataset.venues[0];
        assert_eq!(austin.fields.city.as_deref(), Some("Austin"));
        assert!(!austin.synthesized);
        assert_eq!(austin.sources, vec!["u0", "u2"]);

        let denver = &dataset.venues[1];
        assert_eq!(denver.fields.city.as_deref(), Some("Denver"));
        assert_eq!(denver.fields.state.as_deref(), Some("CO"));
        assert!(denver.synthesized);
        assert_eq!(denver.sources, vec!["u1"]);
    }

    #[test]
    fn test_ambiguous_show_venue_adds_nothing() {
        let candidates = vec![
            venue("The Depot", Some("Austin"), None, 0.9, "u0"),
            venue("The Depot", Some("Denver"), None, 0.9, "u1"),
            show("The Depot", "Friday", None, 0.8, "u2"),
        ];

        let dataset = aggregate(&candidates);
        assert_eq!(dataset.venues.len(), 2);
        assert!(dataset.venues.iter().all(|v| !v.synthesized));
        assert_eq!(dataset.venues[0].sources, vec!["u0"]);
        assert_eq!(dataset.venues[1].sources, vec!["u1"]);
    }

    #[test]
    fn test_candidates_without_name_dropped() {
        let candidates = vec![
            venue("  ", None, None, 0.9, "u1"),
            show("", "Friday", None, 0.9, "u2"),
        ];
        assert!(aggregate(&candidates).is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[]).is_empty());
    }
}
