use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, ImportConfig};
use crate::error::AudioError;
use crate::lexicon::Lexicon;
use crate::media::{self, FilenameFields};
use crate::models::*;

const AUDIO_COLUMNS: &str = "af.id, af.content_hash, af.filename, af.filepath, af.entry_id, \
     af.speaker_id, af.dialect, af.gender, af.duration, af.sample_rate, af.channels, \
     af.format, af.filesize, af.recording_date, af.quality_score";

// 音频文件、说话人与词条的关联库（SQLite）
// 写操作经同一把锁串行：哈希查重插入与说话人写入在同一事务内提交
// 读操作直接走连接池
pub struct AudioLinkStore {
    pool: SqlitePool,
    import: ImportConfig,
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFailure {
    IoError,
    UnsupportedFormat,
    Database,
    Other,
}

impl From<&AudioError> for ImportFailure {
    fn from(error: &AudioError) -> Self {
        match error {
            AudioError::Io { .. } => ImportFailure::IoError,
            AudioError::UnsupportedFormat { .. } => ImportFailure::UnsupportedFormat,
            AudioError::Database(_) => ImportFailure::Database,
            _ => ImportFailure::Other,
        }
    }
}

// 目录导入中单个文件的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file_id: Option<i64>,
    pub entry_linked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ImportFailure>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub imported: usize,
    pub linked: usize,
    pub files: Vec<FileOutcome>,
}

impl BatchReport {
    fn from_outcomes(files: Vec<FileOutcome>) -> Self {
        BatchReport {
            attempted: files.len(),
            imported: files.iter().filter(|f| f.success).count(),
            linked: files.iter().filter(|f| f.entry_linked).count(),
            files,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.success)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), AudioError> {
        let file = File::create(path).map_err(|e| AudioError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(|e| AudioError::io(path, e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioStatistics {
    pub total_audio_files: i64,
    pub entries_with_audio: i64,
    pub files_by_dialect: BTreeMap<String, i64>,
    pub files_by_speaker: BTreeMap<String, i64>,
    pub total_duration_hours: f64,
}

// 音频关联与词典之间的一致性检查结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    // entry_id 在词典中不存在的音频
    pub dangling: Vec<AudioRecord>,
    // 没有任何音频的词条
    pub entries_without_audio: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct SpeakerRow {
    speaker_id: String,
    gender: Option<String>,
    age: Option<i64>,
    dialect: Option<String>,
    native_speaker: bool,
    location: Option<String>,
    other_languages: Option<String>,
    notes: Option<String>,
}

impl TryFrom<SpeakerRow> for Speaker {
    type Error = AudioError;

    fn try_from(row: SpeakerRow) -> Result<Self, Self::Error> {
        let other_languages = match row.other_languages.as_deref() {
            Some(json) if !json.is_empty() => serde_json::from_str(json)?,
            _ => Vec::new(),
        };
        Ok(Speaker {
            speaker_id: row.speaker_id,
            gender: row.gender,
            age: row.age,
            dialect: row.dialect,
            native_speaker: row.native_speaker,
            location: row.location,
            other_languages,
            notes: row.notes,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl AudioLinkStore {
    pub async fn new(config: &Config) -> Result<Self, AudioError> {
        Self::open(&config.database.db_file, config.import.clone()).await
    }

    pub async fn open(db_path: impl AsRef<Path>, import: ImportConfig) -> Result<Self, AudioError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::io(parent, e))?;
        }
        info!(path = %db_path.display(), "Connecting audio database");

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, import).await
    }

    // 单连接的私有内存数据库
    pub async fn in_memory(import: ImportConfig) -> Result<Self, AudioError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool, import).await
    }

    async fn from_pool(pool: SqlitePool, import: ImportConfig) -> Result<Self, AudioError> {
        let store = AudioLinkStore {
            pool,
            import,
            write_lock: Mutex::new(()),
        };
        store.initialize_tables().await?;
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<(), AudioError> {
        // entry_id / speaker_id 是弱引用，不加外键
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audio_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_hash TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                filepath TEXT NOT NULL,
                entry_id TEXT,
                speaker_id TEXT,
                dialect TEXT,
                gender TEXT,
                duration REAL,
                sample_rate INTEGER,
                channels INTEGER,
                format TEXT,
                filesize INTEGER,
                recording_date TEXT,
                quality_score REAL NOT NULL DEFAULT 1.0,
                created_at DATETIME DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audio_files_entry ON audio_files (entry_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audio_files_dialect ON audio_files (dialect)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audio_features (
                audio_file_id INTEGER NOT NULL REFERENCES audio_files (id) ON DELETE CASCADE,
                feature_name TEXT NOT NULL,
                feature_value REAL NOT NULL,
                PRIMARY KEY (audio_file_id, feature_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS speakers (
                speaker_id TEXT PRIMARY KEY,
                gender TEXT,
                age INTEGER,
                dialect TEXT,
                native_speaker BOOLEAN NOT NULL DEFAULT 1,
                location TEXT,
                other_languages TEXT NOT NULL DEFAULT '[]',
                notes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // 词条镜像，仅供查询时关联词头和释义
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lexicon (
                id TEXT PRIMARY KEY,
                rakhine TEXT NOT NULL,
                romanization TEXT NOT NULL,
                pos TEXT NOT NULL,
                gloss_en TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn import_config(&self) -> &ImportConfig {
        &self.import
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<i64>, AudioError> {
        let id = sqlx::query_scalar("SELECT id FROM audio_files WHERE content_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    // 导入单个文件；相同内容始终对应同一条记录
    // 重复导入直接返回已有 id
    pub async fn import_file(
        &self,
        path: impl AsRef<Path>,
        metadata: &ImportMetadata,
    ) -> Result<i64, AudioError> {
        let path = path.as_ref();
        let hash = media::content_hash(path).await?;

        if let Some(id) = self.find_by_hash(&hash).await? {
            info!(path = %path.display(), audio_id = id, "File already in database");
            return Ok(id);
        }

        // 文件读取在锁外完成
        let facts = media::probe(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO audio_files (
                content_hash, filename, filepath, entry_id, speaker_id, dialect, gender,
                duration, sample_rate, channels, format, filesize, recording_date, quality_score
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&hash)
        .bind(&filename)
        .bind(path.display().to_string())
        .bind(non_empty(&metadata.entry_id))
        .bind(non_empty(&metadata.speaker_id))
        .bind(non_empty(&metadata.dialect))
        .bind(non_empty(&metadata.gender))
        .bind(facts.duration)
        .bind(facts.sample_rate.map(i64::from))
        .bind(facts.channels.map(i64::from))
        .bind(&facts.format)
        .bind(facts.filesize as i64)
        .bind(non_empty(&metadata.recording_date))
        .bind(metadata.quality_score.unwrap_or(1.0))
        .execute(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM audio_files WHERE content_hash = ?")
            .bind(&hash)
            .fetch_one(&mut *tx)
            .await?;

        if inserted.rows_affected() > 0 {
            if let Some(speaker) = Speaker::from_metadata(metadata) {
                upsert_speaker(&mut tx, &speaker).await?;
            }
            info!(path = %path.display(), audio_id = id, hash = %hash, "Imported audio file");
        } else {
            debug!(
                path = %path.display(),
                audio_id = id,
                "Hash inserted concurrently, reusing record"
            );
        }

        tx.commit().await?;
        Ok(id)
    }

    // 关联音频与词条；不检查词条是否存在，见 reconcile
    pub async fn link_to_entry(&self, audio_id: i64, entry_id: &str) -> Result<(), AudioError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE audio_files SET entry_id = ? WHERE id = ?")
            .bind(entry_id)
            .bind(audio_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AudioError::NotFound(audio_id));
        }
        debug!(audio_id, entry_id, "Linked audio to entry");
        Ok(())
    }

    // 导入目录下所有可接受的音频文件
    // 文件名提供兜底元数据，metadata_by_name（按文件名索引）逐字段覆盖
    // 单个文件失败只记录，不中断批量导入
    pub async fn batch_import_directory(
        &self,
        dir: impl AsRef<Path>,
        metadata_by_name: &HashMap<String, ImportMetadata>,
    ) -> Result<BatchReport, AudioError> {
        let dir = dir.as_ref();
        let files = media::scan_directory(dir, &self.import)?;
        info!(dir = %dir.display(), files = files.len(), "Starting batch import");

        let outcomes: Vec<FileOutcome> = stream::iter(files)
            .then(|path| self.import_one(path, metadata_by_name))
            .collect()
            .await;
        let report = BatchReport::from_outcomes(outcomes);

        info!(
            attempted = report.attempted,
            imported = report.imported,
            linked = report.linked,
            "Batch import finished"
        );

        if self.import.write_report {
            let report_path = dir.join("import_results.json");
            if let Err(e) = report.write_json(&report_path) {
                warn!(path = %report_path.display(), "Could not write import report: {}", e);
            }
        }
        Ok(report)
    }

    async fn import_one(
        &self,
        path: PathBuf,
        metadata_by_name: &HashMap<String, ImportMetadata>,
    ) -> FileOutcome {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut metadata = metadata_by_name.get(&filename).cloned().unwrap_or_default();
        FilenameFields::from_path(&path, self.import.filename_delimiter).apply_to(&mut metadata);

        let result = async {
            let audio_id = self.import_file(&path, &metadata).await?;
            let linked = match non_empty(&metadata.entry_id) {
                Some(entry_id) => {
                    self.link_to_entry(audio_id, entry_id).await?;
                    true
                }
                None => false,
            };
            Ok::<_, AudioError>((audio_id, linked))
        }
        .await;

        match result {
            Ok((audio_id, entry_linked)) => FileOutcome {
                filename,
                success: true,
                audio_file_id: Some(audio_id),
                entry_linked,
                error: None,
                error_kind: None,
            },
            Err(e) => {
                warn!(file = %filename, "Import failed: {}", e);
                FileOutcome {
                    filename,
                    success: false,
                    audio_file_id: None,
                    entry_linked: false,
                    error_kind: Some(ImportFailure::from(&e)),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn get(&self, audio_id: i64) -> Result<Option<AudioRecord>, AudioError> {
        let record = sqlx::query_as::<_, AudioRecord>(&format!(
            "SELECT {} FROM audio_files af WHERE af.id = ?",
            AUDIO_COLUMNS
        ))
        .bind(audio_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn count(&self) -> Result<i64, AudioError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audio_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    fn joined_query(filter: &str, order: &str) -> String {
        format!(
            r#"
            SELECT {}, s.age AS speaker_age, s.location AS speaker_location,
                   l.rakhine, l.romanization, l.gloss_en
            FROM audio_files af
            LEFT JOIN speakers s ON af.speaker_id = s.speaker_id
            LEFT JOIN lexicon l ON af.entry_id = l.id
            WHERE {}
            ORDER BY {}
            "#,
            AUDIO_COLUMNS, filter, order
        )
    }

    // 某词条的全部录音，按方言、说话人排序
    pub async fn query_by_entry(&self, entry_id: &str) -> Result<Vec<AudioQueryRow>, AudioError> {
        let sql = Self::joined_query("af.entry_id = ?", "af.dialect, af.speaker_id, af.id");
        let rows = sqlx::query_as::<_, AudioQueryRow>(&sql)
            .bind(entry_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // 某方言的全部录音，按词条、说话人排序
    pub async fn query_by_dialect(&self, dialect: &str) -> Result<Vec<AudioQueryRow>, AudioError> {
        let sql = Self::joined_query("af.dialect = ?", "af.entry_id, af.speaker_id, af.id");
        let rows = sqlx::query_as::<_, AudioQueryRow>(&sql)
            .bind(dialect)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn speaker(&self, speaker_id: &str) -> Result<Option<Speaker>, AudioError> {
        let row = sqlx::query_as::<_, SpeakerRow>("SELECT * FROM speakers WHERE speaker_id = ?")
            .bind(speaker_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Speaker::try_from).transpose()
    }

    pub async fn speakers(&self) -> Result<Vec<Speaker>, AudioError> {
        let rows = sqlx::query_as::<_, SpeakerRow>("SELECT * FROM speakers ORDER BY speaker_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Speaker::try_from).collect()
    }

    // 写入外部计算的标量特征，已存在则覆盖
    pub async fn set_feature(
        &self,
        audio_id: i64,
        name: &str,
        value: f64,
    ) -> Result<(), AudioError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM audio_files WHERE id = ?")
            .bind(audio_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AudioError::NotFound(audio_id));
        }
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO audio_features (audio_file_id, feature_name, feature_value)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(audio_id)
        .bind(name)
        .bind(value)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn features(&self, audio_id: i64) -> Result<BTreeMap<String, f64>, AudioError> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT feature_name, feature_value FROM audio_features WHERE audio_file_id = ?",
        )
        .bind(audio_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn statistics(&self) -> Result<AudioStatistics, AudioError> {
        let total_audio_files = self.count().await?;

        let entries_with_audio: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT entry_id) FROM audio_files WHERE entry_id IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_dialect: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(dialect, 'unknown'), COUNT(*) FROM audio_files GROUP BY 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_speaker: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(speaker_id, 'unknown'), COUNT(*) FROM audio_files GROUP BY 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let total_duration: f64 =
            sqlx::query_scalar("SELECT CAST(COALESCE(SUM(duration), 0) AS REAL) FROM audio_files")
                .fetch_one(&self.pool)
                .await?;

        Ok(AudioStatistics {
            total_audio_files,
            entries_with_audio,
            files_by_dialect: by_dialect.into_iter().collect(),
            files_by_speaker: by_speaker.into_iter().collect(),
            total_duration_hours: total_duration / 3600.0,
        })
    }

    // 镜像词条的词头和首个释义，供查询关联
    pub async fn sync_entries(&self, lexicon: &Lexicon) -> Result<usize, AudioError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM lexicon").execute(&mut *tx).await?;

        for entry in lexicon.entries() {
            sqlx::query(
                r#"
                INSERT INTO lexicon (id, rakhine, romanization, pos, gloss_en)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.rakhine)
            .bind(&entry.romanization)
            .bind(&entry.pos)
            .bind(entry.primary_sense().map(|s| s.gloss_en.as_str()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(entries = lexicon.len(), "Synchronized lexicon mirror");
        Ok(lexicon.len())
    }

    // 对比音频关联与词典，两边都不修改
    pub async fn reconcile(&self, lexicon: &Lexicon) -> Result<ReconciliationReport, AudioError> {
        let linked = sqlx::query_as::<_, AudioRecord>(&format!(
            "SELECT {} FROM audio_files af WHERE af.entry_id IS NOT NULL \
             ORDER BY af.entry_id, af.id",
            AUDIO_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let linked_ids: BTreeSet<&str> = linked
            .iter()
            .filter_map(|r| r.entry_id.as_deref())
            .collect();
        let entries_without_audio = lexicon
            .entries()
            .filter(|e| !linked_ids.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        let dangling: Vec<AudioRecord> = linked
            .iter()
            .filter(|r| r.entry_id.as_deref().is_some_and(|id| !lexicon.contains(id)))
            .cloned()
            .collect();

        if !dangling.is_empty() {
            warn!(count = dangling.len(), "Audio linked to entries missing from lexicon");
        }
        Ok(ReconciliationReport {
            dangling,
            entries_without_audio,
        })
    }
}

// 最后写入者胜出：整行覆盖
async fn upsert_speaker(conn: &mut SqliteConnection, speaker: &Speaker) -> Result<(), AudioError> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO speakers (
            speaker_id, gender, age, dialect, native_speaker, location, other_languages, notes
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&speaker.speaker_id)
    .bind(&speaker.gender)
    .bind(speaker.age)
    .bind(&speaker.dialect)
    .bind(speaker.native_speaker)
    .bind(&speaker.location)
    .bind(serde_json::to_string(&speaker.other_languages)?)
    .bind(&speaker.notes)
    .execute(conn)
    .await?;
    debug!(speaker_id = %speaker.speaker_id, "Upserted speaker");
    Ok(())
}

// 读取元数据 JSON 列表，按 filename 建索引
pub fn load_metadata_file(path: &Path) -> Result<HashMap<String, ImportMetadata>, AudioError> {
    let file = File::open(path).map_err(|e| AudioError::io(path, e))?;
    let list: Vec<ImportMetadata> = serde_json::from_reader(BufReader::new(file))?;
    Ok(list
        .into_iter()
        .filter_map(|meta| Some((meta.filename.clone()?, meta)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::{LexiconEntry, Sense};

    fn write_wav(path: &Path, seconds: f32, sample_rate: u32, freq: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let samples = (seconds * sample_rate as f32) as u32;
        for i in 0..samples {
            let t = i as f32 / sample_rate as f32;
            let value = (t * freq * std::f32::consts::TAU).sin() * 0.5 * i16::MAX as f32;
            writer.write_sample(value as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn store() -> AudioLinkStore {
        AudioLinkStore::in_memory(ImportConfig::default()).await.unwrap()
    }

    fn meta(entry: &str, speaker: &str, dialect: &str) -> ImportMetadata {
        ImportMetadata {
            entry_id: Some(entry.to_string()),
            speaker_id: Some(speaker.to_string()),
            dialect: Some(dialect.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reimport_of_identical_bytes_returns_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let copy = dir.path().join("a_copy.wav");
        write_wav(&a, 0.5, 16000, 440.0);
        std::fs::copy(&a, &copy).unwrap();

        let store = store().await;
        let first = store.import_file(&a, &ImportMetadata::default()).await.unwrap();
        let second = store.import_file(&copy, &ImportMetadata::default()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get(first).await.unwrap().unwrap();
        assert_eq!(record.filename, "a.wav");
    }

    #[tokio::test]
    async fn import_records_container_facts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rki_0001.wav");
        write_wav(&path, 1.0, 16000, 220.0);

        let store = store().await;
        let metadata = ImportMetadata {
            recording_date: Some("2024-02-10".to_string()),
            quality_score: Some(0.8),
            ..meta("rki_0001", "spk01", "Sittwe")
        };
        let id = store.import_file(&path, &metadata).await.unwrap();
        let record = store.get(id).await.unwrap().unwrap();

        assert_eq!(record.entry_id.as_deref(), Some("rki_0001"));
        assert_eq!(record.speaker_id.as_deref(), Some("spk01"));
        assert_eq!(record.dialect.as_deref(), Some("Sittwe"));
        assert_eq!(record.sample_rate, Some(16000));
        assert_eq!(record.channels, Some(1));
        assert_eq!(record.format.as_deref(), Some("WAV-PCM_16"));
        assert_eq!(record.recording_date.as_deref(), Some("2024-02-10"));
        assert!((record.quality_score - 0.8).abs() < 1e-9);
        assert!((record.duration.unwrap() - 1.0).abs() < 0.01);
        assert_eq!(
            record.filesize,
            Some(std::fs::metadata(&path).unwrap().len() as i64)
        );
        assert_eq!(record.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn quality_score_defaults_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.wav");
        write_wav(&path, 0.2, 8000, 300.0);

        let store = store().await;
        let id = store.import_file(&path, &ImportMetadata::default()).await.unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.quality_score, 1.0);
        assert_eq!(record.entry_id, None);
        assert!(store.speakers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_errors_are_typed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;

        let missing = store
            .import_file(dir.path().join("missing.wav"), &ImportMetadata::default())
            .await;
        assert!(matches!(missing, Err(AudioError::Io { .. })));

        let garbage = dir.path().join("garbage.wav");
        std::fs::write(&garbage, b"not audio at all").unwrap();
        let unsupported = store.import_file(&garbage, &ImportMetadata::default()).await;
        assert!(matches!(unsupported, Err(AudioError::UnsupportedFormat { .. })));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn speaker_upsert_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one.wav");
        let two = dir.path().join("two.wav");
        let one_again = dir.path().join("one_again.wav");
        write_wav(&one, 0.2, 16000, 300.0);
        write_wav(&two, 0.2, 16000, 600.0);
        std::fs::copy(&one, &one_again).unwrap();

        let store = store().await;
        let first = ImportMetadata {
            speaker_age: Some(40),
            recording_location: Some("Sittwe".to_string()),
            other_languages: vec!["Burmese".to_string()],
            ..meta("rki_0001", "spk01", "Sittwe")
        };
        store.import_file(&one, &first).await.unwrap();
        let speaker = store.speaker("spk01").await.unwrap().unwrap();
        assert_eq!(speaker.age, Some(40));
        assert_eq!(speaker.other_languages, vec!["Burmese".to_string()]);

        let second = ImportMetadata {
            speaker_age: Some(41),
            ..meta("rki_0002", "spk01", "Sittwe")
        };
        store.import_file(&two, &second).await.unwrap();
        let speaker = store.speaker("spk01").await.unwrap().unwrap();
        assert_eq!(speaker.age, Some(41));
        assert_eq!(speaker.location, None);
        assert!(speaker.other_languages.is_empty());

        // 重复导入不触碰说话人表
        let third = ImportMetadata {
            speaker_age: Some(99),
            ..meta("rki_0001", "spk01", "Sittwe")
        };
        store.import_file(&one_again, &third).await.unwrap();
        assert_eq!(store.speaker("spk01").await.unwrap().unwrap().age, Some(41));
        assert_eq!(store.speakers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn link_does_not_require_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loose.wav");
        write_wav(&path, 0.2, 16000, 500.0);

        let store = store().await;
        let id = store.import_file(&path, &ImportMetadata::default()).await.unwrap();
        store.link_to_entry(id, "rki_4242").await.unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().entry_id.as_deref(),
            Some("rki_4242")
        );

        assert!(matches!(
            store.link_to_entry(id + 100, "rki_0001").await,
            Err(AudioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn queries_join_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        let imports = [
            ("a.wav", 300.0, meta("rki_0002", "spk02", "Sittwe")),
            ("b.wav", 350.0, meta("rki_0001", "spk02", "Sittwe")),
            ("c.wav", 400.0, meta("rki_0001", "spk01", "Sittwe")),
            ("d.wav", 450.0, meta("rki_0001", "spk03", "Kyaukphyu")),
        ];
        for (name, freq, metadata) in &imports {
            let path = dir.path().join(name);
            write_wav(&path, 0.2, 16000, *freq);
            let metadata = ImportMetadata {
                speaker_age: Some(30),
                recording_location: Some("Mrauk U".to_string()),
                ..metadata.clone()
            };
            store.import_file(&path, &metadata).await.unwrap();
        }

        let mut lexicon = Lexicon::new();
        lexicon
            .add(
                LexiconEntry::new("rki_0001", "လမ်", "lam", "noun", &SystemClock)
                    .with_sense(Sense::new("road")),
            )
            .unwrap();
        store.sync_entries(&lexicon).await.unwrap();

        let rows = store.query_by_entry("rki_0001").await.unwrap();
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.audio.dialect.clone().unwrap(), r.audio.speaker_id.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Kyaukphyu".to_string(), "spk03".to_string()),
                ("Sittwe".to_string(), "spk01".to_string()),
                ("Sittwe".to_string(), "spk02".to_string()),
            ]
        );
        assert_eq!(rows[0].speaker_age, Some(30));
        assert_eq!(rows[0].speaker_location.as_deref(), Some("Mrauk U"));
        assert_eq!(rows[0].gloss_en.as_deref(), Some("road"));

        let rows = store.query_by_dialect("Sittwe").await.unwrap();
        let order: Vec<_> = rows
            .iter()
            .map(|r| (r.audio.entry_id.clone().unwrap(), r.audio.speaker_id.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("rki_0001".to_string(), "spk01".to_string()),
                ("rki_0001".to_string(), "spk02".to_string()),
                ("rki_0002".to_string(), "spk02".to_string()),
            ]
        );
        assert_eq!(rows[0].rakhine.as_deref(), Some("လမ်"));
        assert_eq!(rows[2].rakhine, None);

        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["filename"], "c.wav");
        assert_eq!(value["gloss_en"], "road");

        assert!(store.query_by_dialect("sittwe").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn statistics_on_empty_store() {
        let stats = store().await.statistics().await.unwrap();
        assert_eq!(stats.total_audio_files, 0);
        assert_eq!(stats.entries_with_audio, 0);
        assert!(stats.files_by_dialect.is_empty());
        assert_eq!(stats.total_duration_hours, 0.0);
    }

    #[tokio::test]
    async fn statistics_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        for (i, metadata) in [
            meta("rki_0001", "spk01", "Sittwe"),
            meta("rki_0001", "spk02", "Sittwe"),
            meta("rki_0002", "spk01", "Kyaukphyu"),
            ImportMetadata::default(),
        ]
        .iter()
        .enumerate()
        {
            let path = dir.path().join(format!("{i}.wav"));
            write_wav(&path, 1.0, 8000, 200.0 + i as f32 * 50.0);
            store.import_file(&path, metadata).await.unwrap();
        }

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_audio_files, 4);
        assert_eq!(stats.entries_with_audio, 2);
        assert_eq!(stats.files_by_dialect.get("Sittwe"), Some(&2));
        assert_eq!(stats.files_by_dialect.get("unknown"), Some(&1));
        assert_eq!(stats.files_by_speaker.get("spk01"), Some(&2));
        assert!((stats.total_duration_hours - 4.0 / 3600.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn features_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wav");
        write_wav(&path, 0.2, 16000, 700.0);

        let store = store().await;
        let id = store.import_file(&path, &ImportMetadata::default()).await.unwrap();
        store.set_feature(id, "pitch_mean", 180.5).await.unwrap();
        store.set_feature(id, "rms", 0.12).await.unwrap();
        store.set_feature(id, "pitch_mean", 182.0).await.unwrap();

        let features = store.features(id).await.unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features.get("pitch_mean"), Some(&182.0));
        assert!(matches!(
            store.set_feature(id + 1, "rms", 0.1).await,
            Err(AudioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reconcile_reports_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store().await;
        for (name, freq, entry) in [("a.wav", 300.0, "rki_0001"), ("b.wav", 400.0, "rki_0404")] {
            let path = dir.path().join(name);
            write_wav(&path, 0.2, 16000, freq);
            store
                .import_file(&path, &meta(entry, "spk01", "Sittwe"))
                .await
                .unwrap();
        }

        let mut lexicon = Lexicon::new();
        for (id, gloss) in [("rki_0001", "road"), ("rki_0002", "water")] {
            lexicon
                .add(
                    LexiconEntry::new(id, "ရေ", "re", "noun", &SystemClock)
                        .with_sense(Sense::new(gloss)),
                )
                .unwrap();
        }

        let report = store.reconcile(&lexicon).await.unwrap();
        assert_eq!(report.dangling.len(), 1);
        assert_eq!(report.dangling[0].entry_id.as_deref(), Some("rki_0404"));
        assert_eq!(report.entries_without_audio, vec!["rki_0002".to_string()]);
    }

    #[test]
    fn metadata_file_keyed_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(
            &path,
            r#"[
                {"filename": "rki_0001_spk01.wav", "dialect": "Sittwe", "speaker_age": 52},
                {"dialect": "orphan"}
            ]"#,
        )
        .unwrap();

        let map = load_metadata_file(&path).unwrap();
        assert_eq!(map.len(), 1);
        let meta = &map["rki_0001_spk01.wav"];
        assert_eq!(meta.dialect.as_deref(), Some("Sittwe"));
        assert_eq!(meta.speaker_age, Some(52));
    }
}
