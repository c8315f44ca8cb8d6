//! Turns polymorphic retrieval attribution into deduplicated [`Citation`]s.
//!
//! A reference contributes a citation only when one of its location variants carries a
//! non-empty address. References without one are dropped without an error.

use knowbot_core::domain::citation::{Citation, CitationList, SourceType};

use crate::transport::{Attribution, ReferenceLocation, RetrievedReference};

pub const FALLBACK_TITLE: &str = "Source document";
const EXCERPT_CHARS: usize = 50;

pub fn normalize_attribution(attribution: &Attribution) -> Vec<Citation> {
    let mut batch = CitationList::new();
    for reference in attribution.citations.iter().flat_map(|part| part.retrieved_references.iter()) {
        if let Some(citation) = normalize_reference(reference) {
            batch.insert(citation);
        }
    }
    batch.into_vec()
}

pub fn normalize_reference(reference: &RetrievedReference) -> Option<Citation> {
    let Some((uri, source_type)) = reference.location.as_ref().and_then(resolve_location) else {
        tracing::debug!(
            event_name = "agent.citations.reference_dropped",
            "retrieved reference has no resolvable location"
        );
        return None;
    };

    Some(Citation {
        uri,
        title: resolve_title(reference),
        source_type,
        raw_attribution_part: serde_json::to_value(reference).ok(),
    })
}

fn resolve_location(location: &ReferenceLocation) -> Option<(String, SourceType)> {
    let candidates = [
        (location.s3_location.as_ref().and_then(|l| l.uri.as_deref()), SourceType::S3),
        (location.web_location.as_ref().and_then(|l| l.url.as_deref()), SourceType::Web),
        (
            location.confluence_location.as_ref().and_then(|l| l.url.as_deref()),
            SourceType::Confluence,
        ),
        (
            location.salesforce_location.as_ref().and_then(|l| l.url.as_deref()),
            SourceType::Salesforce,
        ),
        (
            location.share_point_location.as_ref().and_then(|l| l.url.as_deref()),
            SourceType::Sharepoint,
        ),
        (
            location.kendra_document_location.as_ref().and_then(|l| l.uri.as_deref()),
            SourceType::Kendra,
        ),
        (location.uri.as_deref().or(location.url.as_deref()), SourceType::Unknown),
    ];

    candidates.into_iter().find_map(|(address, source_type)| {
        address.map(str::trim).filter(|address| !address.is_empty()).map(|address| (address.to_owned(), source_type))
    })
}

fn resolve_title(reference: &RetrievedReference) -> String {
    let metadata_title = reference
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("title"))
        .and_then(|title| title.as_str())
        .map(str::trim)
        .filter(|title| !title.is_empty());
    if let Some(title) = metadata_title {
        return title.to_owned();
    }

    let excerpt = reference
        .content
        .as_ref()
        .and_then(|content| content.text.as_deref())
        .filter(|text| !text.trim().is_empty());
    match excerpt {
        Some(text) => format!("{}...", text.chars().take(EXCERPT_CHARS).collect::<String>()),
        None => FALLBACK_TITLE.to_owned(),
    }
}
