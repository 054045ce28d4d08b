//! Caption records and the sorted caption list.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Length of the window given to a manually added caption.
pub const DEFAULT_CAPTION_SECS: f64 = 3.0;

/// Placeholder text of a manually added caption.
pub const NEW_CAPTION_TEXT: &str = "New caption";

/// A single timed caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionRecord {
    /// Opaque identifier, stable across edits.
    pub id: String,

    /// Start of the active interval (seconds, inclusive).
    pub start_time: f64,

    /// End of the active interval (seconds, inclusive).
    pub end_time: f64,

    /// Caption text. `\n` marks a hard line break.
    pub text: String,
}

impl CaptionRecord {
    pub fn new(
        id: impl Into<String>,
        start_time: f64,
        end_time: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_time,
            text: text.into(),
        }
    }

    /// Whether the caption is visible at `time_secs`. Both ends are inclusive;
    /// an inverted range is never active.
    pub fn is_active_at(&self, time_secs: f64) -> bool {
        self.start_time <= time_secs && time_secs <= self.end_time
    }

    /// Text split on hard line breaks, in top-to-bottom order.
    pub fn lines(&self) -> std::str::Split<'_, char> {
        self.text.split('\n')
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Partial update applied to a caption by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionPatch {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub text: Option<String>,
}

impl CaptionPatch {
    pub fn start_time(mut self, secs: f64) -> Self {
        self.start_time = Some(secs);
        self
    }

    pub fn end_time(mut self, secs: f64) -> Self {
        self.end_time = Some(secs);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn apply(self, record: &mut CaptionRecord) {
        if let Some(start) = self.start_time {
            record.start_time = start;
        }
        if let Some(end) = self.end_time {
            record.end_time = end;
        }
        if let Some(text) = self.text {
            record.text = text;
        }
    }
}

/// Captions ordered by ascending start time.
///
/// Every mutator restores the ordering before returning; readers never sort.
/// Records sharing a start time keep their relative insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CaptionRecord>", into = "Vec<CaptionRecord>")]
pub struct CaptionList {
    records: Vec<CaptionRecord>,
}

impl CaptionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from arbitrary records, sorting them.
    pub fn from_records(records: Vec<CaptionRecord>) -> Self {
        let mut list = Self { records };
        list.sort();
        list
    }

    pub fn records(&self) -> &[CaptionRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaptionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CaptionRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Captions visible at `time_secs`, in list order.
    pub fn active_at(&self, time_secs: f64) -> impl Iterator<Item = &CaptionRecord> + '_ {
        self.records.iter().filter(move |r| r.is_active_at(time_secs))
    }

    /// Add a caption covering `[playhead, playhead + 3s]` with placeholder
    /// text and a freshly generated id. Returns the new id.
    pub fn add_at(&mut self, playhead_secs: f64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert(CaptionRecord::new(
            id.clone(),
            playhead_secs,
            playhead_secs + DEFAULT_CAPTION_SECS,
            NEW_CAPTION_TEXT,
        ));
        id
    }

    pub fn insert(&mut self, record: CaptionRecord) {
        self.records.push(record);
        self.sort();
    }

    /// Apply `patch` to the caption with `id`.
    pub fn update(&mut self, id: &str, patch: CaptionPatch) -> Result<(), ModelError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| ModelError::UnknownCaption { id: id.to_string() })?;
        patch.apply(record);
        self.sort();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<CaptionRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    /// Replace every caption (bulk import). Never merges.
    pub fn replace_all(&mut self, records: Vec<CaptionRecord>) {
        self.records = records;
        self.sort();
    }

    pub fn is_sorted(&self) -> bool {
        self.records
            .windows(2)
            .all(|pair| pair[0].start_time.total_cmp(&pair[1].start_time).is_le())
    }

    fn sort(&mut self) {
        self.records.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }
}

impl From<Vec<CaptionRecord>> for CaptionList {
    fn from(records: Vec<CaptionRecord>) -> Self {
        Self::from_records(records)
    }
}

impl From<CaptionList> for Vec<CaptionRecord> {
    fn from(list: CaptionList) -> Self {
        list.records
    }
}

impl<'a> IntoIterator for &'a CaptionList {
    type Item = &'a CaptionRecord;
    type IntoIter = std::slice::Iter<'a, CaptionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
