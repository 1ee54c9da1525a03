//! The match predicate: a fixed, short-circuiting rule ladder
//! deciding whether two metadata views describe the same work.

use crate::metadata::{FormatMapper, MetadataView, StringUtility};
use crate::model::Record;

const TITLE_TRUNCATE: usize = 255;
const TITLE_RATIO_VETO: u32 = 10;
const AUTHOR_RATIO_VETO: u32 = 20;
const PAGE_COUNT_TOLERANCE: u32 = 10;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn intersects(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.contains(x))
}

/// Integer percentage `100 * d / len`. The title and author gates use
/// integer character lengths, not fractional ratios.
fn ratio_percent(distance: usize, len: usize) -> u32 {
    if len == 0 {
        return 0;
    }
    ((distance * 100) / len) as u32
}

/// `match(R, Rᵐ, C, Cᵐ) -> bool`. Pure aside from delegating format
/// equivalence to `format_mapper` and author tolerance to `strings`.
pub fn is_match(
    r: &Record,
    r_meta: &dyn MetadataView,
    c: &Record,
    c_meta: &dyn MetadataView,
    strings: &dyn StringUtility,
    format_mapper: &dyn FormatMapper,
) -> bool {
    // Rule 1: shared ISBN.
    if intersects(&r_meta.isbns(), &c_meta.isbns()) {
        return true;
    }

    // Rule 2: shared unique id.
    if intersects(&r_meta.unique_ids(), &c_meta.unique_ids()) {
        return true;
    }

    // Rule 3: ISSN veto.
    let r_issns = r_meta.issns();
    let c_issns = c_meta.issns();
    if !r_issns.is_empty() && !c_issns.is_empty() && !intersects(&r_issns, &c_issns) {
        return false;
    }

    // Rule 4: format veto.
    if r_meta.format() != c_meta.format() {
        let mapped_r = format_mapper.map_format(&r.source_id, r_meta.format());
        let mapped_c = format_mapper.map_format(&c.source_id, c_meta.format());
        if mapped_r != mapped_c {
            return false;
        }
    }

    // Rule 5: year veto.
    if let (Some(yr), Some(yc)) = (r_meta.publication_year(), c_meta.publication_year()) {
        if yr != yc {
            return false;
        }
    }

    // Rule 6: page-count veto.
    if let (Some(pr), Some(pc)) = (r_meta.page_count(), c_meta.page_count()) {
        let diff = pr.abs_diff(pc);
        if diff > PAGE_COUNT_TOLERANCE {
            return false;
        }
    }

    // Rule 7: series veto.
    if r_meta.series_issn() != c_meta.series_issn() {
        return false;
    }
    if r_meta.series_numbering() != c_meta.series_numbering() {
        return false;
    }

    // Rule 8: title gate.
    let t_r = r_meta.title(true).map(|t| strings.normalize(&t)).unwrap_or_default();
    let t_c = c_meta.title(true).map(|t| strings.normalize(&t)).unwrap_or_default();
    let t_r = truncate_chars(&t_r, TITLE_TRUNCATE);
    let t_c = truncate_chars(&t_c, TITLE_TRUNCATE);
    if t_r.is_empty() || t_c.is_empty() {
        return false;
    }
    let title_distance = strsim::levenshtein(&t_r, &t_c);
    if ratio_percent(title_distance, t_r.chars().count()) >= TITLE_RATIO_VETO {
        return false;
    }

    // Rule 9: author gate.
    let a_r = r_meta.main_author().map(|a| strings.normalize(&a)).unwrap_or_default();
    let a_c = c_meta.main_author().map(|a| strings.normalize(&a)).unwrap_or_default();
    match (a_r.is_empty(), a_c.is_empty()) {
        (true, true) => {}
        (true, false) | (false, true) => return false,
        (false, false) => {
            if !strings.author_match(&a_r, &a_c) {
                let a_r_t = truncate_chars(&a_r, TITLE_TRUNCATE);
                let a_c_t = truncate_chars(&a_c, TITLE_TRUNCATE);
                let author_distance = strsim::levenshtein(&a_r_t, &a_c_t);
                if ratio_percent(author_distance, a_r_t.chars().count()) > AUTHOR_RATIO_VETO {
                    return false;
                }
            }
        }
    }

    // Rule 10: otherwise, match.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DefaultStringUtility, IdentityFormatMapper};
    use chrono::Utc;

    struct StubView {
        title: Option<&'static str>,
        isbns: Vec<&'static str>,
        unique_ids: Vec<&'static str>,
        issns: Vec<&'static str>,
        format: &'static str,
        year: Option<i32>,
        pages: Option<u32>,
        series_issn: Option<&'static str>,
        series_numbering: Option<&'static str>,
        author: Option<&'static str>,
    }

    impl Default for StubView {
        fn default() -> Self {
            Self {
                title: None,
                isbns: vec![],
                unique_ids: vec![],
                issns: vec![],
                format: "flat",
                year: None,
                pages: None,
                series_issn: None,
                series_numbering: None,
                author: None,
            }
        }
    }

    impl MetadataView for StubView {
        fn title(&self, _normalized: bool) -> Option<String> {
            self.title.map(str::to_string)
        }
        fn full_title(&self) -> Option<String> {
            self.title.map(str::to_string)
        }
        fn isbns(&self) -> Vec<String> {
            self.isbns.iter().map(|s| s.to_string()).collect()
        }
        fn unique_ids(&self) -> Vec<String> {
            self.unique_ids.iter().map(|s| s.to_string()).collect()
        }
        fn issns(&self) -> Vec<String> {
            self.issns.iter().map(|s| s.to_string()).collect()
        }
        fn format(&self) -> &str {
            self.format
        }
        fn publication_year(&self) -> Option<i32> {
            self.year
        }
        fn page_count(&self) -> Option<u32> {
            self.pages
        }
        fn series_issn(&self) -> Option<String> {
            self.series_issn.map(str::to_string)
        }
        fn series_numbering(&self) -> Option<String> {
            self.series_numbering.map(str::to_string)
        }
        fn main_author(&self) -> Option<String> {
            self.author.map(str::to_string)
        }
    }

    fn record(source: &str) -> Record {
        Record {
            id: format!("id-{source}"),
            source_id: source.to_string(),
            format: "flat".to_string(),
            oai_id: String::new(),
            deleted: false,
            raw: String::new(),
            title_keys: vec![],
            isbn_keys: vec![],
            id_keys: vec![],
            host_record_id: None,
            linking_id: None,
            dedup_id: None,
            update_needed: false,
            updated: Utc::now(),
        }
    }

    fn check(r_meta: StubView, c_meta: StubView) -> bool {
        let strings = DefaultStringUtility;
        let mapper = IdentityFormatMapper;
        is_match(&record("A"), &r_meta, &record("B"), &c_meta, &strings, &mapper)
    }

    #[test]
    fn shared_isbn_matches_even_with_conflicting_later_rules() {
        let r = StubView {
            isbns: vec!["9780001"],
            year: Some(1999),
            ..Default::default()
        };
        let c = StubView {
            isbns: vec!["9780001"],
            year: Some(2005), // would veto on rule 5 if reached
            ..Default::default()
        };
        assert!(check(r, c));
    }

    #[test]
    fn shared_unique_id_matches_before_issn_veto_is_consulted() {
        let r = StubView {
            unique_ids: vec!["nbn-1"],
            issns: vec!["1111-1111"],
            ..Default::default()
        };
        let c = StubView {
            unique_ids: vec!["nbn-1"],
            issns: vec!["2222-2222"], // disjoint, would veto on rule 3
            ..Default::default()
        };
        assert!(check(r, c));
    }

    #[test]
    fn disjoint_issns_veto() {
        let r = StubView {
            issns: vec!["1111-1111"],
            title: Some("gamma"),
            ..Default::default()
        };
        let c = StubView {
            issns: vec!["2222-2222"],
            title: Some("gamma"),
            ..Default::default()
        };
        assert!(!check(r, c));
    }

    #[test]
    fn page_count_diff_of_ten_is_compatible_eleven_vetoes() {
        let subject = || StubView {
            pages: Some(100),
            title: Some("same title"),
            ..Default::default()
        };
        let ten = StubView {
            pages: Some(110),
            title: Some("same title"),
            ..Default::default()
        };
        let eleven = StubView {
            pages: Some(111),
            title: Some("same title"),
            ..Default::default()
        };
        assert!(check(subject(), ten));
        assert!(!check(subject(), eleven));
    }

    #[test]
    fn title_near_match_with_author_tolerance_matches() {
        let r = StubView {
            title: Some("The Art of Computer Programming"),
            author: Some("Knuth D."),
            year: Some(1968),
            ..Default::default()
        };
        let c = StubView {
            title: Some("The Art of Computer Programing"),
            author: Some("Knuth, Donald"),
            year: Some(1968),
            ..Default::default()
        };
        assert!(check(r, c));
    }

    #[test]
    fn title_ratio_boundary() {
        // "aaaaaaaaaa" (10 chars) vs one substitution -> distance 1, ratio 10 -> veto.
        let ten_chars = StubView {
            title: Some("aaaaaaaaaa"),
            ..Default::default()
        };
        let one_off = StubView {
            title: Some("aaaaaaaaab"),
            ..Default::default()
        };
        assert!(!check(ten_chars, one_off));
    }

    #[test]
    fn empty_title_never_matches() {
        let r = StubView::default();
        let c = StubView {
            title: Some("anything"),
            ..Default::default()
        };
        assert!(!check(r, c));
    }

    #[test]
    fn one_sided_author_vetoes() {
        let r = StubView {
            title: Some("same title"),
            author: Some("Someone"),
            ..Default::default()
        };
        let c = StubView {
            title: Some("same title"),
            ..Default::default()
        };
        assert!(!check(r, c));
    }
}
