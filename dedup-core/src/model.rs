use chrono::{DateTime, Utc};

/// A bibliographic unit harvested from one source catalog.
///
/// `title_keys`, `isbn_keys` and `id_keys` are insertion-ordered candidate
/// indexes derived from the record's metadata; the candidate generator
/// iterates them in the order stored here (see `dedup-core::candidate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub source_id: String,
    pub format: String,
    pub oai_id: String,
    pub deleted: bool,
    /// Opaque serialized metadata payload, parsed on demand by a `RecordFactory`.
    pub raw: String,
    pub title_keys: Vec<String>,
    pub isbn_keys: Vec<String>,
    pub id_keys: Vec<String>,
    /// Non-empty iff this record is a component part of a host record
    /// named `host_record_id`, local to `source_id`.
    pub host_record_id: Option<String>,
    /// Local identifier component parts use to refer to this record as host.
    pub linking_id: Option<String>,
    pub dedup_id: Option<String>,
    pub update_needed: bool,
    pub updated: DateTime<Utc>,
}

impl Record {
    pub fn is_component_part(&self) -> bool {
        self.host_record_id.is_some()
    }

    pub fn shares_isbn_key(&self, other: &Record) -> bool {
        self.isbn_keys.iter().any(|k| other.isbn_keys.contains(k))
    }

    pub fn shares_id_key(&self, other: &Record) -> bool {
        self.id_keys.iter().any(|k| other.id_keys.contains(k))
    }

    /// Push `key` onto `field` if not already present, preserving insertion order.
    fn push_unique(field: &mut Vec<String>, key: String) {
        if !field.contains(&key) {
            field.push(key);
        }
    }

    pub fn add_title_key(&mut self, key: String) {
        Self::push_unique(&mut self.title_keys, key);
    }

    pub fn add_isbn_key(&mut self, key: String) {
        Self::push_unique(&mut self.isbn_keys, key);
    }

    pub fn add_id_key(&mut self, key: String) {
        Self::push_unique(&mut self.id_keys, key);
    }
}

/// A persistent equivalence class of Record ids believed to describe the
/// same work. Live groups always hold at least two members (invariant 1);
/// a group that would shrink below that is tombstoned rather than kept as
/// a singleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupGroup {
    pub id: String,
    /// Insertion-ordered membership. A `Vec` rather than a `HashSet`
    /// because replay after a `leave` happens in insertion order.
    pub ids: Vec<String>,
    pub deleted: bool,
    pub changed: DateTime<Utc>,
}

impl DedupGroup {
    pub fn new(id: String, first: String, second: String, changed: DateTime<Utc>) -> Self {
        Self {
            id,
            ids: vec![first, second],
            deleted: false,
            changed,
        }
    }

    pub fn add_member(&mut self, id: String) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn remove_member(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|existing| existing != id);
        self.ids.len() != before
    }
}

/// A candidate-index category, examined by the generator in this declared
/// priority order: ISBN, then other unique id, then title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateIndex {
    Isbn,
    Id,
    Title,
}

impl CandidateIndex {
    pub const PRIORITY_ORDER: [CandidateIndex; 3] =
        [CandidateIndex::Isbn, CandidateIndex::Id, CandidateIndex::Title];
}
