use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::clock::Clock;

// 词性闭集；条目本身只保存字符串，是否合法由校验引擎判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Pronoun,
    Particle,
    Classifier,
    Interjection,
    Conjunction,
    Numeral,
    Preposition,
    Postposition,
    Auxiliary,
}

impl PartOfSpeech {
    pub const ALL: [PartOfSpeech; 13] = [
        PartOfSpeech::Noun,
        PartOfSpeech::Verb,
        PartOfSpeech::Adjective,
        PartOfSpeech::Adverb,
        PartOfSpeech::Pronoun,
        PartOfSpeech::Particle,
        PartOfSpeech::Classifier,
        PartOfSpeech::Interjection,
        PartOfSpeech::Conjunction,
        PartOfSpeech::Numeral,
        PartOfSpeech::Preposition,
        PartOfSpeech::Postposition,
        PartOfSpeech::Auxiliary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PartOfSpeech::Noun => "noun",
            PartOfSpeech::Verb => "verb",
            PartOfSpeech::Adjective => "adjective",
            PartOfSpeech::Adverb => "adverb",
            PartOfSpeech::Pronoun => "pronoun",
            PartOfSpeech::Particle => "particle",
            PartOfSpeech::Classifier => "classifier",
            PartOfSpeech::Interjection => "interjection",
            PartOfSpeech::Conjunction => "conjunction",
            PartOfSpeech::Numeral => "numeral",
            PartOfSpeech::Preposition => "preposition",
            PartOfSpeech::Postposition => "postposition",
            PartOfSpeech::Auxiliary => "auxiliary",
        }
    }

    // 大小写不敏感，忽略首尾空白
    pub fn parse(value: &str) -> Option<PartOfSpeech> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|pos| pos.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for PartOfSpeech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// 扁平原始记录中属于唯一义项的键
pub const SENSE_FIELDS: [&str; 8] = [
    "gloss_en",
    "gloss_my",
    "definition_en",
    "definition_my",
    "example",
    "example_translation",
    "dialect",
    "domain",
];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sense {
    #[serde(deserialize_with = "null_as_empty")]
    pub gloss_en: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gloss_my: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_en: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_my: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    // 语义领域，如 anatomy、agriculture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Sense {
    pub fn new(gloss_en: impl Into<String>) -> Self {
        Sense {
            gloss_en: gloss_en.into(),
            ..Default::default()
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "gloss_en" => Some(self.gloss_en.as_str()),
            "gloss_my" => self.gloss_my.as_deref(),
            "definition_en" => self.definition_en.as_deref(),
            "definition_my" => self.definition_my.as_deref(),
            "example" => self.example.as_deref(),
            "example_translation" => self.example_translation.as_deref(),
            "dialect" => self.dialect.as_deref(),
            "domain" => self.domain.as_deref(),
            _ => self.extra.get(name).and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Etymology {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    pub cognates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// 搜索时看到的字段值：单个字符串或序列
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    List(Vec<&'a str>),
}

fn optional_text(value: &Option<String>) -> Option<FieldValue<'_>> {
    value.as_deref().map(FieldValue::Text)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconEntry {
    #[serde(deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub rakhine: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub romanization: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub pos: String,
    pub senses: Vec<Sense>,

    // 音系信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syllable_structure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,

    // 形态信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflection: Option<String>,

    pub synonyms: Vec<String>,
    pub antonyms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etymology: Option<Etymology>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub created: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub modified: String,

    // 未解释的键，原样回写
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LexiconEntry {
    pub fn new(
        id: impl Into<String>,
        rakhine: impl Into<String>,
        romanization: impl Into<String>,
        pos: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.timestamp();
        LexiconEntry {
            id: id.into(),
            rakhine: rakhine.into(),
            romanization: romanization.into(),
            pos: pos.into(),
            created: now.clone(),
            modified: now,
            ..Default::default()
        }
    }

    pub fn with_sense(mut self, sense: Sense) -> Self {
        self.senses.push(sense);
        self
    }

    pub fn add_sense(&mut self, sense: Sense, clock: &dyn Clock) {
        self.senses.push(sense);
        self.modified = clock.timestamp();
    }

    pub fn primary_sense(&self) -> Option<&Sense> {
        self.senses.first()
    }

    // 从原始键值记录构建条目
    // 扁平记录（gloss_en 等义项键在顶层、没有 senses 键）转为单义项条目
    pub fn from_record(mut record: Map<String, Value>) -> serde_json::Result<Self> {
        if !record.contains_key("senses") {
            let mut sense = Map::new();
            for key in SENSE_FIELDS {
                if let Some(value) = record.remove(key) {
                    sense.insert(key.to_string(), value);
                }
            }
            let senses = if sense.is_empty() {
                Vec::new()
            } else {
                vec![Value::Object(sense)]
            };
            record.insert("senses".to_string(), Value::Array(senses));
        }
        serde_json::from_value(Value::Object(record))
    }

    // 条目的规范键值视图
    pub fn to_record(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    // 按名称查字段；义项和词源字段跨所有义项收集，未知名称落到 extra
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Text(&self.id)),
            "rakhine" => Some(FieldValue::Text(&self.rakhine)),
            "romanization" => Some(FieldValue::Text(&self.romanization)),
            "pos" => Some(FieldValue::Text(&self.pos)),
            "created" => Some(FieldValue::Text(&self.created)),
            "modified" => Some(FieldValue::Text(&self.modified)),
            "ipa" => optional_text(&self.ipa),
            "syllable_structure" => optional_text(&self.syllable_structure),
            "tone" => optional_text(&self.tone),
            "root" => optional_text(&self.root),
            "derivation" => optional_text(&self.derivation),
            "inflection" => optional_text(&self.inflection),
            "notes" => optional_text(&self.notes),
            "source" => optional_text(&self.source),
            "synonyms" => Some(FieldValue::List(
                self.synonyms.iter().map(String::as_str).collect(),
            )),
            "antonyms" => Some(FieldValue::List(
                self.antonyms.iter().map(String::as_str).collect(),
            )),
            "cognates" => self
                .etymology
                .as_ref()
                .map(|e| FieldValue::List(e.cognates.iter().map(String::as_str).collect())),
            name if SENSE_FIELDS.contains(&name) => Some(FieldValue::List(
                self.senses.iter().filter_map(|s| s.field(name)).collect(),
            )),
            _ => match self.extra.get(name)? {
                Value::String(s) => Some(FieldValue::Text(s)),
                Value::Array(items) => Some(FieldValue::List(
                    items.iter().filter_map(Value::as_str).collect(),
                )),
                _ => None,
            },
        }
    }
}

// 词典文档级元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconMetadata {
    pub language: String,
    pub iso_code: String,
    pub script: String,
    pub version: String,
    pub created: String,
    pub modified: String,
    pub sources: Vec<String>,
    pub description: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl LexiconMetadata {
    pub fn new(now: String) -> Self {
        LexiconMetadata {
            language: "Rakhine".to_string(),
            iso_code: "rki".to_string(),
            script: "Myanmar".to_string(),
            version: "1.0.0".to_string(),
            created: now.clone(),
            modified: now,
            sources: Vec::new(),
            description: "Digital lexicon for the Rakhine language".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl Default for LexiconMetadata {
    fn default() -> Self {
        LexiconMetadata::new(String::new())
    }
}

// 规范序列化格式：{ "metadata": {...}, "lexicon": [...] }
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconDocument {
    pub metadata: LexiconMetadata,
    pub lexicon: Vec<LexiconEntry>,
}

impl LexiconDocument {
    // 解析文档，条目可以仍是扁平原始记录
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let mut root = match value {
            Value::Object(root) => root,
            other => return serde_json::from_value(other),
        };
        let metadata = match root.remove("metadata") {
            Some(metadata) => serde_json::from_value(metadata)?,
            None => LexiconMetadata::default(),
        };
        let lexicon = match root.remove("lexicon") {
            Some(Value::Array(records)) => records
                .into_iter()
                .map(|record| match record {
                    Value::Object(map) => LexiconEntry::from_record(map),
                    other => serde_json::from_value(other),
                })
                .collect::<serde_json::Result<Vec<_>>>()?,
            Some(other) => serde_json::from_value(other)?,
            None => Vec::new(),
        };
        Ok(LexiconDocument { metadata, lexicon })
    }
}

// 说话人；每次导入音频时整行覆盖写入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub speaker_id: String,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub dialect: Option<String>,
    pub native_speaker: bool,
    pub location: Option<String>,
    pub other_languages: Vec<String>,
    pub notes: Option<String>,
}

impl Speaker {
    pub fn from_metadata(metadata: &ImportMetadata) -> Option<Speaker> {
        let speaker_id = metadata.speaker_id.clone().filter(|s| !s.is_empty())?;
        Some(Speaker {
            speaker_id,
            gender: metadata
                .speaker_gender
                .clone()
                .or_else(|| metadata.gender.clone()),
            age: metadata.speaker_age,
            dialect: metadata.dialect.clone(),
            native_speaker: metadata.native_speaker.unwrap_or(true),
            location: metadata.recording_location.clone(),
            other_languages: metadata.other_languages.clone(),
            notes: metadata.speaker_notes.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AudioRecord {
    pub id: i64,
    pub content_hash: String,
    pub filename: String,
    pub filepath: String,
    // 弱引用 LexiconEntry::id，词条可以不存在
    pub entry_id: Option<String>,
    pub speaker_id: Option<String>,
    pub dialect: Option<String>,
    pub gender: Option<String>,
    pub duration: Option<f64>,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub format: Option<String>,
    pub filesize: Option<i64>,
    pub recording_date: Option<String>,
    pub quality_score: f64,
}

// 查询结果：音频行 + 说话人 + 词条字段
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct AudioQueryRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audio: AudioRecord,
    pub speaker_age: Option<i64>,
    pub speaker_location: Option<String>,
    pub rakhine: Option<String>,
    pub romanization: Option<String>,
    pub gloss_en: Option<String>,
}

// 单次音频导入附带的元数据，所有键都可省略
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportMetadata {
    // 来源文件名，仅用于元数据文件的索引
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub entry_id: Option<String>,
    pub speaker_id: Option<String>,
    pub dialect: Option<String>,
    pub gender: Option<String>,
    pub speaker_gender: Option<String>,
    pub speaker_age: Option<i64>,
    pub native_speaker: Option<bool>,
    pub recording_date: Option<String>,
    pub quality_score: Option<f64>,
    pub recording_location: Option<String>,
    pub other_languages: Vec<String>,
    pub speaker_notes: Option<String>,
}
