use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::LexiconError;
use crate::models::{FieldValue, LexiconDocument, LexiconEntry, LexiconMetadata};
use crate::validation::{Finding, FindingKind, Validator};

/// In-memory lexicon keyed by entry id. Iteration is in id order.
pub struct Lexicon {
    metadata: LexiconMetadata,
    entries: BTreeMap<String, LexiconEntry>,
    // Records that could not be keyed by id (blank or repeated), kept for
    // validation and written back by `save`
    conflicts: Vec<LexiconEntry>,
    validator: Validator,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexiconStatistics {
    pub total_entries: usize,
    pub total_senses: usize,
    pub average_senses_per_entry: f64,
    pub pos_distribution: BTreeMap<String, usize>,
    pub dialect_distribution: BTreeMap<String, usize>,
    pub entries_with_ipa: usize,
    pub entries_with_examples: usize,
    pub entries_with_etymology: usize,
}

/// Lexicon-wide validation summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub critical_findings: usize,
    pub advisory_findings: usize,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    /// Percentage of entries without any finding; 0 for an empty lexicon.
    pub fn validity_rate(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            self.valid_entries as f64 / self.total_entries as f64 * 100.0
        }
    }

    pub fn has_critical(&self) -> bool {
        self.critical_findings > 0
    }

    /// Plain-text report grouped by entry.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = vec![
            rule.clone(),
            "RAKHINE LEXICON VALIDATION REPORT".to_string(),
            rule.clone(),
            format!("Total entries: {}", self.total_entries),
            format!("Valid entries: {}", self.valid_entries),
            format!("Invalid entries: {}", self.total_entries - self.valid_entries),
            format!("Validity rate: {:.1}%", self.validity_rate()),
            format!(
                "Findings: {} critical, {} advisory",
                self.critical_findings, self.advisory_findings
            ),
        ];

        let mut by_entry: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in &self.findings {
            by_entry.entry(finding.entry_id.as_str()).or_default().push(finding);
        }
        if !by_entry.is_empty() {
            out.push(String::new());
            out.push(rule.clone());
            out.push("INVALID ENTRIES DETAIL".to_string());
            out.push(rule);
            for (entry_id, findings) in by_entry {
                out.push(format!("\nEntry {}:", entry_id));
                for finding in findings {
                    out.push(format!("  - [{}] {}", finding.severity, finding.message));
                }
            }
        }
        out.join("\n")
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexicon {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Lexicon {
            metadata: LexiconMetadata::new(clock.timestamp()),
            entries: BTreeMap::new(),
            conflicts: Vec::new(),
            validator: Validator::default(),
            clock,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Builds a store from a canonical document. The first record of an id
    /// is stored; later repeats and records without an id are kept aside as
    /// [`Lexicon::conflicts`].
    pub fn from_document(document: LexiconDocument, clock: Arc<dyn Clock>) -> Self {
        let mut lexicon = Self::with_clock(clock);
        lexicon.metadata = document.metadata;
        for entry in document.lexicon {
            if entry.id.trim().is_empty() {
                warn!("Entry without id in document");
                lexicon.conflicts.push(entry);
            } else if lexicon.entries.contains_key(&entry.id) {
                warn!(entry_id = %entry.id, "Duplicate entry id in document");
                lexicon.conflicts.push(entry);
            } else {
                lexicon.entries.insert(entry.id.clone(), entry);
            }
        }
        lexicon
    }

    pub fn to_document(&self) -> LexiconDocument {
        LexiconDocument {
            metadata: self.metadata.clone(),
            lexicon: self
                .entries
                .values()
                .chain(&self.conflicts)
                .cloned()
                .collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LexiconError> {
        Self::load_with_clock(path, Arc::new(SystemClock))
    }

    pub fn load_with_clock(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LexiconError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let value: serde_json::Value = serde_json::from_reader(reader)?;
        let document = LexiconDocument::from_value(value)?;
        info!(path = %path.display(), entries = document.lexicon.len(), "Loaded lexicon");
        Ok(Self::from_document(document, clock))
    }

    /// Writes the canonical document. The file is replaced atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LexiconError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, &self.to_document())?;
            writer.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;

        info!(
            path = %path.display(),
            entries = self.entries.len(),
            conflicts = self.conflicts.len(),
            "Saved lexicon"
        );
        Ok(())
    }

    pub fn metadata(&self) -> &LexiconMetadata {
        &self.metadata
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LexiconEntry> {
        self.entries.values()
    }

    /// Loaded records that share an id with an earlier record or have none.
    pub fn conflicts(&self) -> &[LexiconEntry] {
        &self.conflicts
    }

    pub fn get(&self, id: &str) -> Option<&LexiconEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn touch(&mut self) {
        self.metadata.modified = self.clock.timestamp();
    }

    pub fn add(&mut self, entry: LexiconEntry) -> Result<(), LexiconError> {
        if self.entries.contains_key(&entry.id) {
            return Err(LexiconError::DuplicateId(entry.id));
        }
        debug!(entry_id = %entry.id, "Adding entry");
        self.entries.insert(entry.id.clone(), entry);
        self.touch();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<LexiconEntry, LexiconError> {
        let entry = self
            .entries
            .remove(id)
            .ok_or_else(|| LexiconError::NotFound(id.to_string()))?;
        debug!(entry_id = %id, "Removed entry");
        self.touch();
        Ok(entry)
    }

    /// Smallest `rki_NNNN` id above every numeric id in the store.
    pub fn next_id(&self) -> String {
        let next = self
            .entries
            .keys()
            .filter_map(|id| id.strip_prefix("rki_")?.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1);
        format!("rki_{:04}", next)
    }

    /// Matches `query` against a named field. String fields match on the
    /// whole value, sequence fields (synonyms, sense glosses, ...) on any
    /// element. Non-exact matching is a case-insensitive substring test.
    pub fn search(&self, query: &str, field: &str, exact: bool) -> Vec<&LexiconEntry> {
        let needle = query.to_lowercase();
        let matches = |value: &str| {
            if exact {
                value == query
            } else {
                value.to_lowercase().contains(&needle)
            }
        };

        self.entries
            .values()
            .filter(|entry| match entry.field(field) {
                Some(FieldValue::Text(value)) => !value.is_empty() && matches(value),
                Some(FieldValue::List(values)) => values.into_iter().any(|v| matches(v)),
                None => false,
            })
            .collect()
    }

    pub fn search_by_pos(&self, pos: &str) -> Vec<&LexiconEntry> {
        let pos = pos.trim();
        self.entries
            .values()
            .filter(|entry| entry.pos.trim().eq_ignore_ascii_case(pos))
            .collect()
    }

    pub fn search_by_dialect(&self, dialect: &str) -> Vec<&LexiconEntry> {
        let needle = dialect.to_lowercase();
        self.entries
            .values()
            .filter(|entry| {
                entry.senses.iter().any(|sense| {
                    sense
                        .dialect
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                })
            })
            .collect()
    }

    pub fn statistics(&self) -> LexiconStatistics {
        let total_entries = self.entries.len();
        let mut total_senses = 0;
        let mut pos_distribution = BTreeMap::new();
        let mut dialect_distribution = BTreeMap::new();

        for entry in self.entries.values() {
            *pos_distribution.entry(entry.pos.clone()).or_insert(0) += 1;
            total_senses += entry.senses.len();
            for dialect in entry.senses.iter().filter_map(|s| s.dialect.as_ref()) {
                *dialect_distribution.entry(dialect.clone()).or_insert(0) += 1;
            }
        }

        let has_text = |value: &Option<String>| value.as_deref().is_some_and(|s| !s.is_empty());
        LexiconStatistics {
            total_entries,
            total_senses,
            average_senses_per_entry: if total_entries > 0 {
                total_senses as f64 / total_entries as f64
            } else {
                0.0
            },
            pos_distribution,
            dialect_distribution,
            entries_with_ipa: self.entries.values().filter(|e| has_text(&e.ipa)).count(),
            entries_with_examples: self
                .entries
                .values()
                .filter(|e| e.senses.iter().any(|s| has_text(&s.example)))
                .count(),
            entries_with_etymology: self
                .entries
                .values()
                .filter(|e| e.etymology.is_some())
                .count(),
        }
    }

    fn validate_entries(&self) -> impl Iterator<Item = Vec<Finding>> + '_ {
        let stored = self
            .entries
            .values()
            .map(|entry| self.validator.validate(entry).findings);
        let conflicting = self.conflicts.iter().map(|entry| {
            let mut findings = self.validator.validate(entry).findings;
            if !entry.id.trim().is_empty() {
                findings.push(Finding::new(
                    &entry.id,
                    "id",
                    FindingKind::DuplicateId(entry.id.clone()),
                ));
            }
            findings
        });
        stored.chain(conflicting)
    }

    /// Runs the validator over every record, conflicts included, and
    /// flattens the findings.
    pub fn validate_all(&self) -> Vec<Finding> {
        self.validate_entries().flatten().collect()
    }

    pub fn validation_report(&self) -> ValidationReport {
        let mut valid_entries = 0;
        let mut findings = Vec::new();
        for entry_findings in self.validate_entries() {
            if entry_findings.is_empty() {
                valid_entries += 1;
            }
            findings.extend(entry_findings);
        }
        let critical_findings = findings.iter().filter(|f| f.is_critical()).count();
        ValidationReport {
            total_entries: self.entries.len() + self.conflicts.len(),
            valid_entries,
            critical_findings,
            advisory_findings: findings.len() - critical_findings,
            findings,
        }
    }
}
