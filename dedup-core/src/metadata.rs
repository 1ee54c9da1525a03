//! The three external collaborators the match predicate and candidate
//! generator consult, plus one concrete implementation of each used by the
//! in-process store and the test suite. Production deployments are
//! expected to supply their own `RecordFactory` (one per source format),
//! `FormatMapper` (per-catalog format equivalence table) and `StringUtility`
//! (locale-aware normalization); the engine only depends on the trait seams.

use async_trait::async_trait;

use crate::error::MetadataError;

/// A derived, read-only projection over a Record's raw payload.
///
/// Different source formats implement this same capability set; the
/// `RecordFactory` is the dispatch site that picks the right
/// implementation for a given `format` tag.
pub trait MetadataView: Send + Sync {
    /// `normalized = true` asks the view to apply its own format-specific
    /// cleanup (e.g. stripping a subtitle or statement of responsibility)
    /// before returning the title; it does not by itself apply the
    /// engine-wide case-fold/diacritic/whitespace normalization the match
    /// predicate layers on top via the `StringUtility` collaborator.
    fn title(&self, normalized: bool) -> Option<String>;
    fn full_title(&self) -> Option<String>;
    fn isbns(&self) -> Vec<String>;
    fn unique_ids(&self) -> Vec<String>;
    fn issns(&self) -> Vec<String>;
    fn format(&self) -> &str;
    fn publication_year(&self) -> Option<i32>;
    fn page_count(&self) -> Option<u32>;
    fn series_issn(&self) -> Option<String>;
    fn series_numbering(&self) -> Option<String>;
    fn main_author(&self) -> Option<String>;
}

/// `createRecord(format, raw, oai_id, source_id) -> MetadataView`.
#[async_trait]
pub trait RecordFactory: Send + Sync {
    async fn create_record(
        &self,
        format: &str,
        raw: &str,
        oai_id: &str,
        source_id: &str,
    ) -> Result<Box<dyn MetadataView>, MetadataError>;
}

/// String normalization, title-key derivation, fuzzy author comparison and
/// id collation, all stable across calls. The engine itself performs
/// Levenshtein distance directly for its title and author gates; only
/// normalization and author-match heuristics are delegated here.
pub trait StringUtility: Send + Sync {
    fn normalize(&self, s: &str) -> String;
    fn create_title_key(&self, title: &str) -> String;
    fn author_match(&self, a: &str, b: &str) -> bool;
    fn create_id_sort_key(&self, id: &str) -> String;
}

/// `mapFormat(source_id, format) -> canonical_format`, used only by the
/// match predicate's format-veto rule.
pub trait FormatMapper: Send + Sync {
    fn map_format(&self, source_id: &str, format: &str) -> String;
}

/// A minimal `key: value` per-line payload format used by the in-process
/// store and by tests. Real deployments plug in one `RecordFactory` per
/// MARC/Dublin-Core/ONIX/etc. dialect; this stands in for "some format"
/// without pulling in a bibliographic parsing dependency the engine does
/// not otherwise need.
pub struct FlatRecordFactory;

struct FlatMetadataView {
    format: String,
    fields: Vec<(String, String)>,
}

impl FlatMetadataView {
    fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn field_list(&self, key: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl MetadataView for FlatMetadataView {
    fn title(&self, normalized: bool) -> Option<String> {
        let title = self.field("title")?.to_string();
        if normalized {
            Some(title.trim().to_string())
        } else {
            Some(title)
        }
    }

    fn full_title(&self) -> Option<String> {
        self.field("title").map(str::to_string)
    }

    fn isbns(&self) -> Vec<String> {
        self.field_list("isbn")
    }

    fn unique_ids(&self) -> Vec<String> {
        self.field_list("id")
    }

    fn issns(&self) -> Vec<String> {
        self.field_list("issn")
    }

    fn format(&self) -> &str {
        &self.format
    }

    fn publication_year(&self) -> Option<i32> {
        self.field("year").and_then(|y| y.parse().ok())
    }

    fn page_count(&self) -> Option<u32> {
        self.field("pages").and_then(|p| p.parse().ok())
    }

    fn series_issn(&self) -> Option<String> {
        self.field("series_issn").map(str::to_string)
    }

    fn series_numbering(&self) -> Option<String> {
        self.field("series_numbering").map(str::to_string)
    }

    fn main_author(&self) -> Option<String> {
        self.field("author").map(str::to_string)
    }
}

#[async_trait]
impl RecordFactory for FlatRecordFactory {
    async fn create_record(
        &self,
        format: &str,
        raw: &str,
        _oai_id: &str,
        _source_id: &str,
    ) -> Result<Box<dyn MetadataView>, MetadataError> {
        let mut fields = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(MetadataError::Parse(format!("malformed field: {line}")));
            };
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }

        Ok(Box::new(FlatMetadataView {
            format: format.to_string(),
            fields,
        }))
    }
}

/// Case-fold, diacritic-strip and whitespace/punctuation-collapse
/// normalization, plus Jaro-Winkler-based author tolerance. Grounded in
/// the same family of heuristics a citation deduplicator uses for
/// near-identical bibliographic strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStringUtility;

/// Common Latin-diacritic folding table; covers the accented characters
/// that show up in transliterated author names and titles without pulling
/// in a full Unicode decomposition dependency.
const DIACRITIC_FOLDS: &[(char, char)] = &[
    ('á', 'a'), ('à', 'a'), ('â', 'a'), ('ä', 'a'), ('ã', 'a'), ('å', 'a'),
    ('é', 'e'), ('è', 'e'), ('ê', 'e'), ('ë', 'e'),
    ('í', 'i'), ('ì', 'i'), ('î', 'i'), ('ï', 'i'),
    ('ó', 'o'), ('ò', 'o'), ('ô', 'o'), ('ö', 'o'), ('õ', 'o'), ('ø', 'o'),
    ('ú', 'u'), ('ù', 'u'), ('û', 'u'), ('ü', 'u'),
    ('ý', 'y'), ('ÿ', 'y'),
    ('ñ', 'n'), ('ç', 'c'), ('ß', 's'),
];

fn fold_diacritic(c: char) -> char {
    DIACRITIC_FOLDS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
        .unwrap_or(c)
}

impl StringUtility for DefaultStringUtility {
    fn normalize(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut last_was_space = true; // collapse leading whitespace too
        for c in s.chars() {
            let c = fold_diacritic(c.to_ascii_lowercase());
            if c.is_alphanumeric() {
                out.push(c);
                last_was_space = false;
            } else if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        }
        out.trim_end().to_string()
    }

    fn create_title_key(&self, title: &str) -> String {
        self.normalize(title).replace(' ', "")
    }

    fn author_match(&self, a: &str, b: &str) -> bool {
        let a = self.normalize(a);
        let b = self.normalize(b);
        if a.is_empty() || b.is_empty() {
            return a == b;
        }
        // Surname + initials tolerance: accept either a close whole-string
        // match, or a match on the leading (surname) token with the
        // remaining tokens reduced to initials.
        if strsim::jaro_winkler(&a, &b) >= 0.92 {
            return true;
        }
        let (Some(a_first), Some(b_first)) = (a.split(' ').next(), b.split(' ').next()) else {
            return false;
        };
        if a_first != b_first {
            return false;
        }
        let a_initials: Vec<char> = a.split(' ').skip(1).filter_map(|w| w.chars().next()).collect();
        let b_initials: Vec<char> = b.split(' ').skip(1).filter_map(|w| w.chars().next()).collect();
        !a_initials.is_empty() && !b_initials.is_empty() && a_initials[0] == b_initials[0]
    }

    fn create_id_sort_key(&self, id: &str) -> String {
        self.normalize(id)
    }
}

/// A format mapper with no cross-format equivalences configured: any two
/// differing raw format tags are considered genuinely different targets.
/// Production deployments supply the real per-source equivalence table.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFormatMapper;

impl FormatMapper for IdentityFormatMapper {
    fn map_format(&self, _source_id: &str, format: &str) -> String {
        format.to_string()
    }
}
