//! Rule-driven validation of lexicon records.
//!
//! Rules run over a key-value view of a record (a raw collaborator map or a
//! serialized [`LexiconEntry`]) so fields can be added without touching the
//! rules. Every rule runs; findings are returned as data and never raised.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::{LexiconEntry, PartOfSpeech};

static ENTRY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rki_[0-9]{4,}$").expect("valid entry id pattern"));

// IPA letters, suprasegmentals, diacritics and the toned vowels of Rakhine
const IPA_CHARS: &str = concat!(
    "abcdefghijklmnopqrstuvwxyz",
    "ɑæɐβɓʙçɕɖðɗəɘɛɜɝɞɟʄɡɠɢɣɤɥɦɧħɨɪʝɭɬɫɮʟɱɯɰɲŋɳɴøɵɸθœɶʘɺɻɽɾʀʁɹʃʂʈʊʋⱱʌʍʏʑʐʒʔʡʕʢǀǁǂǃ",
    "ˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘",
    "\u{0329}\u{0325}\u{0324}\u{032A}\u{032C}\u{0330}\u{033A}\u{033C}\u{033B}\u{0339}\u{031C}\u{031F}\u{0320}\u{030A}\u{0308}\u{033D}\u{031A}",
    "ăĕĭŏŭ",
    "àèìòùáéíóúâêîôû",
    "ǎěǐǒǔ",
    "äëïöü",
    "ãẽĩõũ",
    "ȧėȯ",
    "ḁḙḭṵ",
);

const IPA_PUNCTUATION: &str = " .;,-";

pub fn is_valid_id(id: &str) -> bool {
    ENTRY_ID.is_match(id)
}

/// Myanmar block, Myanmar Extended-A, whitespace. The Myanmar comma and full
/// stop (U+104A, U+104B) sit inside the main block.
pub fn is_myanmar_char(c: char) -> bool {
    matches!(c, '\u{1000}'..='\u{109F}' | '\u{AA60}'..='\u{AA7F}') || c.is_whitespace()
}

fn is_ipa_char(c: char) -> bool {
    IPA_CHARS.contains(c)
        || IPA_PUNCTUATION.contains(c)
        || matches!(c, '\u{0300}'..='\u{036F}')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Should block downstream publication
    Critical,
    /// Informational only
    Advisory,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => f.write_str("critical"),
            Severity::Advisory => f.write_str("advisory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FindingKind {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid Myanmar script: {value} (character '{ch}', U+{codepoint:04X})")]
    InvalidScript {
        value: String,
        ch: char,
        codepoint: u32,
    },

    #[error("Invalid IPA: {0} - IPA must be enclosed in /slashes/ or [brackets]")]
    InvalidIpaDelimiters(String),

    #[error("Invalid IPA: character '{ch}' (U+{codepoint:04X}) not in valid IPA set")]
    InvalidIpa { ch: char, codepoint: u32 },

    #[error("Invalid POS: {0}")]
    InvalidPos(String),

    #[error("Entry has no senses")]
    NoSenses,

    #[error("Sense {0} missing English gloss")]
    SenseMissingGloss(usize),

    #[error("Duplicate entry ID: {0}")]
    DuplicateId(String),
}

impl FindingKind {
    pub fn severity(&self) -> Severity {
        match self {
            FindingKind::MissingField(_)
            | FindingKind::NoSenses
            | FindingKind::SenseMissingGloss(_)
            | FindingKind::DuplicateId(_)
            | FindingKind::InvalidScript { .. } => Severity::Critical,
            FindingKind::InvalidId(_)
            | FindingKind::InvalidIpaDelimiters(_)
            | FindingKind::InvalidIpa { .. }
            | FindingKind::InvalidPos(_) => Severity::Advisory,
        }
    }
}

/// One validation result: `{entry_id, field, severity, message}` plus the
/// structured kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub entry_id: String,
    pub field: String,
    pub severity: Severity,
    pub message: String,
    pub kind: FindingKind,
}

impl Finding {
    pub(crate) fn new(entry_id: &str, field: impl Into<String>, kind: FindingKind) -> Self {
        Finding {
            entry_id: entry_id.to_string(),
            field: field.into(),
            severity: kind.severity(),
            message: kind.to_string(),
            kind,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    pub fn critical(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_critical())
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_critical())
    }

    pub fn has_critical(&self) -> bool {
        self.critical().next().is_some()
    }

    pub fn messages(&self) -> Vec<String> {
        self.findings.iter().map(|f| f.message.clone()).collect()
    }
}

/// Read-only view of a record's fields.
pub struct RecordView<'a> {
    record: &'a Map<String, Value>,
}

impl<'a> RecordView<'a> {
    pub fn new(record: &'a Map<String, Value>) -> Self {
        RecordView { record }
    }

    /// Non-blank string value of `field`. A field absent at top level is
    /// looked up on the primary (first) sense.
    pub fn text(&self, field: &str) -> Option<&'a str> {
        let value = match self.record.get(field) {
            Some(value) => value,
            None => self.senses()?.first()?.get(field)?,
        };
        value.as_str().filter(|s| !s.trim().is_empty())
    }

    pub fn senses(&self) -> Option<&'a Vec<Value>> {
        self.record.get("senses")?.as_array()
    }

    pub fn entry_id(&self) -> &'a str {
        self.text("id").unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Field must be present and non-blank
    Required(&'static str),
    /// `rki_` followed by at least four digits
    IdFormat(&'static str),
    /// Myanmar-script characters only
    MyanmarScript(&'static str),
    /// Delimited IPA transcription; skipped when absent
    Ipa(&'static str),
    /// Member of the closed part-of-speech set
    PartOfSpeech(&'static str),
    /// Non-empty sense list, each sense with an English gloss
    Senses,
}

impl Rule {
    fn check(&self, view: &RecordView<'_>, findings: &mut Vec<Finding>) {
        let id = view.entry_id();
        match *self {
            Rule::Required(field) => {
                if view.text(field).is_none() {
                    findings.push(Finding::new(
                        id,
                        field,
                        FindingKind::MissingField(field.to_string()),
                    ));
                }
            }
            Rule::IdFormat(field) => {
                if let Some(value) = view.text(field) {
                    if !is_valid_id(value) {
                        findings.push(Finding::new(
                            id,
                            field,
                            FindingKind::InvalidId(value.to_string()),
                        ));
                    }
                }
            }
            Rule::MyanmarScript(field) => {
                let Some(value) = view.text(field) else { return };
                if let Some(ch) = value.chars().find(|c| !is_myanmar_char(*c)) {
                    findings.push(Finding::new(
                        id,
                        field,
                        FindingKind::InvalidScript {
                            value: value.to_string(),
                            ch,
                            codepoint: ch as u32,
                        },
                    ));
                }
            }
            Rule::Ipa(field) => {
                let Some(value) = view.text(field) else { return };
                if let Some(kind) = check_ipa(value) {
                    findings.push(Finding::new(id, field, kind));
                }
            }
            Rule::PartOfSpeech(field) => {
                if let Some(value) = view.text(field) {
                    if PartOfSpeech::parse(value).is_none() {
                        findings.push(Finding::new(
                            id,
                            field,
                            FindingKind::InvalidPos(value.to_string()),
                        ));
                    }
                }
            }
            Rule::Senses => {
                // Only records carrying a `senses` key; flat records are covered by Required
                let Some(senses) = view.senses() else { return };
                // A blank primary gloss already reported as MissingField is not counted twice
                let gloss_reported = findings.iter().any(
                    |f| matches!(&f.kind, FindingKind::MissingField(name) if name == "gloss_en"),
                );
                if senses.is_empty() && !gloss_reported {
                    findings.push(Finding::new(id, "senses", FindingKind::NoSenses));
                }
                for (index, sense) in senses.iter().enumerate() {
                    if index == 0 && gloss_reported {
                        continue;
                    }
                    let has_gloss = sense
                        .get("gloss_en")
                        .and_then(Value::as_str)
                        .is_some_and(|s| !s.trim().is_empty());
                    if !has_gloss {
                        findings.push(Finding::new(
                            id,
                            format!("sense_{index}_gloss_en"),
                            FindingKind::SenseMissingGloss(index),
                        ));
                    }
                }
            }
        }
    }
}

/// Returns the first IPA problem of a non-empty transcription, if any.
pub fn check_ipa(ipa: &str) -> Option<FindingKind> {
    let mut chars = ipa.chars();
    let delimited = match (chars.next(), chars.next_back()) {
        (Some('/'), Some('/')) | (Some('['), Some(']')) => true,
        _ => false,
    };
    if !delimited {
        return Some(FindingKind::InvalidIpaDelimiters(ipa.to_string()));
    }
    chars.find(|c| !is_ipa_char(*c)).map(|ch| FindingKind::InvalidIpa {
        ch,
        codepoint: ch as u32,
    })
}

#[derive(Debug, Clone)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Default for Validator {
    fn default() -> Self {
        Validator {
            rules: vec![
                Rule::Required("id"),
                Rule::Required("rakhine"),
                Rule::Required("romanization"),
                Rule::Required("pos"),
                Rule::Required("gloss_en"),
                Rule::IdFormat("id"),
                Rule::MyanmarScript("rakhine"),
                Rule::Ipa("ipa"),
                Rule::PartOfSpeech("pos"),
                Rule::Senses,
            ],
        }
    }
}

impl Validator {
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Validator { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn validate_record(&self, record: &Map<String, Value>) -> ValidationResult {
        let view = RecordView::new(record);
        let mut findings = Vec::new();
        for rule in &self.rules {
            rule.check(&view, &mut findings);
        }
        ValidationResult {
            is_valid: findings.is_empty(),
            findings,
        }
    }

    pub fn validate(&self, entry: &LexiconEntry) -> ValidationResult {
        self.validate_record(&entry.to_record())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::Sense;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn valid_entry() -> LexiconEntry {
        let mut entry = LexiconEntry::new("rki_0001", "လမ်", "lam", "noun", &SystemClock)
            .with_sense(Sense::new("road"));
        entry.ipa = Some("/lăm/".to_string());
        entry
    }

    fn kinds(result: &ValidationResult) -> Vec<FindingKind> {
        result.findings.iter().map(|f| f.kind.clone()).collect()
    }

    #[test]
    fn valid_entry_has_no_findings() {
        let result = Validator::default().validate(&valid_entry());
        assert!(result.is_valid, "{:?}", result.findings);
        assert!(!result.has_critical());
    }

    #[test]
    fn valid_flat_record_passes() {
        let result = Validator::default().validate_record(&record(json!({
            "id": "rki_0001",
            "rakhine": "လမ်",
            "romanization": "lam",
            "pos": "noun",
            "gloss_en": "road",
            "ipa": "/lăm/",
            "example": "လမ်ဒေါ့ရေ။"
        })));
        assert!(result.is_valid, "{:?}", result.findings);
    }

    #[test]
    fn each_missing_field_reported_once() {
        let result = Validator::default()
            .validate_record(&record(json!({ "id": "rki_0001", "rakhine": "လမ်" })));

        let missing: Vec<_> = result
            .findings
            .iter()
            .filter_map(|f| match &f.kind {
                FindingKind::MissingField(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(missing, vec!["romanization", "pos", "gloss_en"]);
        assert!(!result.is_valid);
        assert!(result.has_critical());
        assert!(result.findings[0].message.starts_with("Missing required field"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut entry = valid_entry();
        entry.romanization = "   ".to_string();
        let result = Validator::default().validate(&entry);
        assert_eq!(kinds(&result), vec![FindingKind::MissingField("romanization".into())]);
    }

    #[test]
    fn malformed_id_is_reported() {
        for id in ["rki_001", "RKI_0001", "rki_00a1", "xyz_0001"] {
            let mut entry = valid_entry();
            entry.id = id.to_string();
            let result = Validator::default().validate(&entry);
            assert_eq!(kinds(&result), vec![FindingKind::InvalidId(id.to_string())]);
            assert_eq!(result.findings[0].entry_id, id);
        }
        assert!(is_valid_id("rki_12345"));
    }

    #[test]
    fn latin_headword_fails_script_check() {
        let mut entry = valid_entry();
        entry.rakhine = "invalid123".to_string();
        let result = Validator::default().validate(&entry);

        assert_eq!(result.findings.len(), 1);
        let finding = &result.findings[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(
            finding.kind,
            FindingKind::InvalidScript {
                value: "invalid123".into(),
                ch: 'i',
                codepoint: 0x69
            }
        );
        assert!(finding.message.contains("Invalid Myanmar script"));
    }

    #[test]
    fn myanmar_punctuation_and_spaces_allowed() {
        let mut entry = valid_entry();
        entry.rakhine = "လမ်ဒေါ့ရေ၊ ရေ။".to_string();
        assert!(Validator::default().validate(&entry).is_valid);
    }

    #[test]
    fn undelimited_ipa_is_advisory() {
        let mut entry = valid_entry();
        entry.ipa = Some("lam".to_string());
        let result = Validator::default().validate(&entry);

        assert_eq!(kinds(&result), vec![FindingKind::InvalidIpaDelimiters("lam".into())]);
        assert!(!result.is_valid);
        assert!(!result.has_critical());
        assert_eq!(result.advisory().count(), 1);
    }

    #[test]
    fn ipa_checks() {
        assert_eq!(check_ipa("/lăm/"), None);
        assert_eq!(check_ipa("[la\u{0306}m]"), None);
        assert_eq!(check_ipa("/ŋa.ˈbɛ/"), None);
        assert_eq!(check_ipa("//"), None);
        assert_eq!(
            check_ipa("/lam]"),
            Some(FindingKind::InvalidIpaDelimiters("/lam]".into()))
        );
        assert_eq!(
            check_ipa("/"),
            Some(FindingKind::InvalidIpaDelimiters("/".into()))
        );
        assert_eq!(
            check_ipa("/la9m/"),
            Some(FindingKind::InvalidIpa { ch: '9', codepoint: 0x39 })
        );
        assert!(
            FindingKind::InvalidIpa { ch: 'Q', codepoint: 0x51 }
                .to_string()
                .contains("U+0051")
        );
    }

    #[test]
    fn empty_ipa_is_skipped() {
        let mut entry = valid_entry();
        entry.ipa = Some(String::new());
        assert!(Validator::default().validate(&entry).is_valid);
    }

    #[test]
    fn pos_checked_case_insensitively() {
        let mut entry = valid_entry();
        entry.pos = "Classifier".to_string();
        assert!(Validator::default().validate(&entry).is_valid);

        entry.pos = "invalid_pos".to_string();
        let result = Validator::default().validate(&entry);
        assert_eq!(kinds(&result), vec![FindingKind::InvalidPos("invalid_pos".into())]);
    }

    #[test]
    fn entry_without_senses_is_flagged_once() {
        let entry = LexiconEntry::new("rki_0001", "လမ်", "lam", "noun", &SystemClock);
        let result = Validator::default().validate(&entry);
        assert_eq!(kinds(&result), vec![FindingKind::MissingField("gloss_en".into())]);

        let result = Validator::default().validate_record(&record(json!({
            "id": "rki_0001",
            "rakhine": "လမ်",
            "romanization": "lam",
            "pos": "noun",
            "gloss_en": "road",
            "senses": []
        })));
        assert_eq!(kinds(&result), vec![FindingKind::NoSenses]);
    }

    #[test]
    fn blank_primary_gloss_counted_once() {
        let entry = LexiconEntry::new("rki_0001", "လမ်", "lam", "noun", &SystemClock)
            .with_sense(Sense::new("  "))
            .with_sense(Sense::default());
        let result = Validator::default().validate(&entry);
        assert_eq!(
            kinds(&result),
            vec![
                FindingKind::MissingField("gloss_en".into()),
                FindingKind::SenseMissingGloss(1)
            ]
        );
        assert_eq!(result.critical().count(), 2);

        // Without Required("gloss_en") the sense rule reports it
        let validator = Validator::with_rules(vec![Rule::Senses]);
        assert_eq!(
            kinds(&validator.validate(&entry)),
            vec![FindingKind::SenseMissingGloss(0), FindingKind::SenseMissingGloss(1)]
        );
    }

    #[test]
    fn each_glossless_sense_reported_with_index() {
        let entry = valid_entry()
            .with_sense(Sense::default())
            .with_sense(Sense::new("track"))
            .with_sense(Sense::default());
        let result = Validator::default().validate(&entry);

        assert_eq!(
            kinds(&result),
            vec![
                FindingKind::SenseMissingGloss(1),
                FindingKind::SenseMissingGloss(3)
            ]
        );
        assert_eq!(result.findings[0].field, "sense_1_gloss_en");
    }

    #[test]
    fn all_rules_run_without_short_circuit() {
        let result = Validator::default().validate_record(&record(json!({
            "id": "bad",
            "rakhine": "abc",
            "romanization": "",
            "pos": "thing",
            "ipa": "xyz",
            "senses": []
        })));
        assert_eq!(
            kinds(&result),
            vec![
                FindingKind::MissingField("romanization".into()),
                FindingKind::MissingField("gloss_en".into()),
                FindingKind::InvalidId("bad".into()),
                FindingKind::InvalidScript {
                    value: "abc".into(),
                    ch: 'a',
                    codepoint: 0x61
                },
                FindingKind::InvalidIpaDelimiters("xyz".into()),
                FindingKind::InvalidPos("thing".into()),
            ]
        );
    }

    #[test]
    fn custom_rule_list() {
        let validator = Validator::with_rules(vec![Rule::Required("tone")]);
        let result = validator.validate(&valid_entry());
        assert_eq!(kinds(&result), vec![FindingKind::MissingField("tone".into())]);
        assert_eq!(validator.rules().len(), 1);
    }

    #[test]
    fn findings_serialize_flat() {
        let mut entry = valid_entry();
        entry.pos = "thing".to_string();
        let result = Validator::default().validate(&entry);
        let value = serde_json::to_value(&result.findings[0]).unwrap();
        assert_eq!(value["entry_id"], "rki_0001");
        assert_eq!(value["field"], "pos");
        assert_eq!(value["severity"], "advisory");
        assert_eq!(value["message"], "Invalid POS: thing");
        assert_eq!(value["kind"]["type"], "invalid_pos");
    }
}
