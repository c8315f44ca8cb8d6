use serde::{Deserialize, Serialize};

/// Repository a cited document was retrieved from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    S3,
    Web,
    Confluence,
    Salesforce,
    Sharepoint,
    Kendra,
    Unknown,
}

impl SourceType {
    pub fn glyph(self) -> &'static str {
        match self {
            Self::S3 => "📄",
            Self::Web => "🌐",
            Self::Confluence => "📝",
            Self::Salesforce => "⚡",
            Self::Sharepoint => "📊",
            Self::Kendra => "🔍",
            Self::Unknown => "📋",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Web => "web",
            Self::Confluence => "confluence",
            Self::Salesforce => "salesforce",
            Self::Sharepoint => "sharepoint",
            Self::Kendra => "kendra",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_attribution_part: Option<serde_json::Value>,
}

impl Citation {
    pub fn new(uri: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self { uri: uri.into(), title: title.into(), source_type, raw_attribution_part: None }
    }

    /// Loose identity: a shared uri or a shared title marks a duplicate.
    pub fn duplicates(&self, other: &Citation) -> bool {
        self.uri == other.uri || self.title == other.title
    }
}

/// Citations collected over one response. Entries are only ever appended.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationList {
    items: Vec<Citation>,
}

impl CitationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the citation was already represented.
    pub fn insert(&mut self, citation: Citation) -> bool {
        if self.items.iter().any(|existing| existing.duplicates(&citation)) {
            return false;
        }
        self.items.push(citation);
        true
    }

    pub fn extend<I>(&mut self, citations: I) -> usize
    where
        I: IntoIterator<Item = Citation>,
    {
        citations.into_iter().filter(|citation| self.insert(citation.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Citation> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Citation> {
        self.items
    }

    pub fn format_sources(&self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }

        let lines = self
            .items
            .iter()
            .enumerate()
            .map(|(index, citation)| {
                format!(
                    "{}. {} <{}|{}>",
                    index + 1,
                    citation.source_type.glyph(),
                    citation.uri,
                    citation.title
                )
            })
            .collect::<Vec<_>>();

        Some(format!("{SOURCES_HEADER}\n{}", lines.join("\n")))
    }

    /// Appends the Sources section to `text`, or returns `text` untouched when empty.
    pub fn append_sources_to(&self, text: &str) -> String {
        match self.format_sources() {
            Some(sources) => format!("{text}\n\n{sources}"),
            None => text.to_owned(),
        }
    }
}

impl From<Vec<Citation>> for CitationList {
    fn from(citations: Vec<Citation>) -> Self {
        let mut list = Self::new();
        list.extend(citations);
        list
    }
}

pub const SOURCES_HEADER: &str = "📚 *Sources:*";

#[cfg(test)]
mod tests {
    use super::{Citation, CitationList, SourceType, SOURCES_HEADER};

    #[test]
    fn insert_is_idempotent_for_repeated_citations() {
        let mut list = CitationList::new();
        let citation = Citation::new("s3://bucket/a.pdf", "Runbook", SourceType::S3);

        assert!(list.insert(citation.clone()));
        assert!(!list.insert(citation.clone()));
        assert!(!list.insert(citation));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn shared_title_counts_as_duplicate_even_with_different_uri() {
        let mut list = CitationList::new();
        list.insert(Citation::new("https://a.example", "Source document", SourceType::Web));
        let inserted =
            list.insert(Citation::new("https://b.example", "Source document", SourceType::Web));

        assert!(!inserted);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn shared_uri_counts_as_duplicate_even_with_different_title() {
        let mut list = CitationList::new();
        list.insert(Citation::new("https://a.example", "First", SourceType::Web));

        assert_eq!(
            list.extend(vec![
                Citation::new("https://a.example", "Second", SourceType::Web),
                Citation::new("https://c.example", "Third", SourceType::Web),
            ]),
            1
        );
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn sources_section_lists_citations_in_insertion_order_with_glyphs() {
        let list = CitationList::from(vec![
            Citation::new("http://a", "A", SourceType::Web),
            Citation::new("http://b", "B", SourceType::S3),
        ]);

        let sources = list.format_sources().expect("sources section");
        let lines = sources.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], SOURCES_HEADER);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1. 🌐 <http://a|A>");
        assert_eq!(lines[2], "2. 📄 <http://b|B>");
    }

    #[test]
    fn empty_list_leaves_text_unchanged() {
        let list = CitationList::new();
        assert!(list.format_sources().is_none());
        assert_eq!(list.append_sources_to("answer"), "answer");
    }

    #[test]
    fn every_source_type_has_a_distinct_glyph() {
        let all = [
            SourceType::S3,
            SourceType::Web,
            SourceType::Confluence,
            SourceType::Salesforce,
            SourceType::Sharepoint,
            SourceType::Kendra,
            SourceType::Unknown,
        ];
        let mut glyphs = all.iter().map(|source| source.glyph()).collect::<Vec<_>>();
        glyphs.sort_unstable();
        glyphs.dedup();
        assert_eq!(glyphs.len(), all.len());
        assert_eq!(SourceType::Unknown.glyph(), "📋");
    }
}
