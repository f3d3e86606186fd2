use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::error::LogError;

/// One buffered characteristic value.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    timestamp_ms: i64,
    sequence: u64,
    key: String,
    #[serde_as(as = "Hex")]
    value: Vec<u8>,
}

impl NotificationRecord {
    /// Milliseconds since the Unix epoch at append time.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Append order, unique within one log.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// `notification|<deviceId>|<serviceUuid>|<charUuid>`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Append-only, time-ordered store of delivered notification values.
///
/// Records are kept in memory and, for file-backed logs, mirrored as JSON
/// lines so that a restarted process can still hand them out on catch-up.
#[derive(Debug)]
pub struct NotificationLog {
    state: Mutex<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<NotificationRecord>,
    next_sequence: u64,
    last_timestamp_ms: i64,
    file: Option<LogFile>,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    handle: File,
}

impl NotificationLog {
    /// Opens a file-backed log, reloading any records already on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or read, or if an
    /// existing line is not a valid record.
    #[instrument(skip(path), level = "debug", fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| LogError::Io { source })?;
        }

        let mut records = if path.exists() {
            load_records(path)?
        } else {
            Vec::new()
        };
        records.sort_by_key(|record| (record.timestamp_ms, record.sequence));

        let handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError::Io { source })?;

        let next_sequence = records
            .iter()
            .map(|record| record.sequence + 1)
            .max()
            .unwrap_or(0);
        let last_timestamp_ms = records.last().map_or(0, |record| record.timestamp_ms);
        debug!(reloaded = records.len(), "opened notification log");

        Ok(Self {
            state: Mutex::new(LogState {
                records,
                next_sequence,
                last_timestamp_ms,
                file: Some(LogFile {
                    path: path.to_path_buf(),
                    handle,
                }),
            }),
        })
    }

    /// Creates a log that is not persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LogState::default()),
        }
    }

    /// Returns the backing file path, if any.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().file.as_ref().map(|file| file.path.clone())
    }

    /// Appends a value stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub fn append(&self, key: String, value: Vec<u8>) -> Result<NotificationRecord, LogError> {
        self.append_at(now_ms(), key, value)
    }

    /// Appends a value with an explicit timestamp.
    ///
    /// Timestamps never go backwards within one log: a value older than the
    /// newest record is stamped with the newest record's time.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub fn append_at(
        &self,
        timestamp_ms: i64,
        key: String,
        value: Vec<u8>,
    ) -> Result<NotificationRecord, LogError> {
        let mut state = self.state.lock();
        let record = NotificationRecord {
            timestamp_ms: timestamp_ms.max(state.last_timestamp_ms),
            sequence: state.next_sequence,
            key,
            value,
        };

        if let Some(file) = state.file.as_mut() {
            let mut line =
                serde_json::to_string(&record).map_err(|source| LogError::Encode { source })?;
            line.push('\n');
            file.handle
                .write_all(line.as_bytes())
                .and_then(|()| file.handle.flush())
                .map_err(|source| LogError::Io { source })?;
        }

        state.next_sequence += 1;
        state.last_timestamp_ms = record.timestamp_ms;
        state.records.push(record.clone());
        Ok(record)
    }

    /// Returns every record stamped at or after `since_ms`, oldest first.
    #[must_use]
    pub fn drain_since(&self, since_ms: i64) -> Vec<NotificationRecord> {
        let state = self.state.lock();
        records_since(&state.records, since_ms).to_vec()
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be truncated.
    pub fn clear(&self) -> Result<(), LogError> {
        let mut state = self.state.lock();
        clear_locked(&mut state)
    }

    /// Reads everything at or after `since_ms` and then clears the whole log.
    ///
    /// Both steps happen under one lock, so no append can slip between the
    /// read and the clear. Records older than `since_ms` are discarded too.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be truncated; the records
    /// are left in place in that case.
    #[instrument(skip(self), level = "debug")]
    pub fn catch_up(&self, since_ms: Option<i64>) -> Result<Vec<NotificationRecord>, LogError> {
        let mut state = self.state.lock();
        let drained = records_since(&state.records, since_ms.unwrap_or(i64::MIN)).to_vec();
        clear_locked(&mut state)?;
        debug!(delivered = drained.len(), "notification log caught up");
        Ok(drained)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }
}

fn records_since(records: &[NotificationRecord], since_ms: i64) -> &[NotificationRecord] {
    let start = records.partition_point(|record| record.timestamp_ms < since_ms);
    &records[start..]
}

fn clear_locked(state: &mut LogState) -> Result<(), LogError> {
    if let Some(file) = state.file.as_mut() {
        file.handle
            .set_len(0)
            .map_err(|source| LogError::Io { source })?;
    }
    state.records.clear();
    Ok(())
}

/// Reads persisted records.
///
/// An unterminated final line is the remains of an interrupted append: it is
/// cut from the file and the records before it are kept. Any other
/// unparsable line is fatal.
fn load_records(path: &Path) -> Result<Vec<NotificationRecord>, LogError> {
    let raw = fs::read(path).map_err(|source| LogError::Io { source })?;
    let mut records = Vec::new();
    let mut offset = 0;
    for (index, line) in raw.split_inclusive(|byte| *byte == b'\n').enumerate() {
        let start = offset;
        offset += line.len();
        let content = line.trim_ascii();
        if content.is_empty() {
            continue;
        }
        match serde_json::from_slice(content) {
            Ok(record) => records.push(record),
            Err(source) if line.ends_with(b"\n") => {
                return Err(LogError::CorruptRecord {
                    line: index + 1,
                    source,
                });
            }
            Err(source) => {
                warn!(line = index + 1, %source, "dropping torn notification record");
                truncate_log(path, start)?;
                return Ok(records);
            }
        }
    }

    if !raw.is_empty() && !raw.ends_with(b"\n") {
        // Complete final record missing its newline.
        OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(b"\n"))
            .map_err(|source| LogError::Io { source })?;
    }
    Ok(records)
}

fn truncate_log(path: &Path, len: usize) -> Result<(), LogError> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len as u64))
        .map_err(|source| LogError::Io { source })
}

fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn unique_temp_path(name: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("blesession-{name}-{suffix}.jsonl"))
    }

    fn keys(records: &[NotificationRecord]) -> Vec<&str> {
        records.iter().map(NotificationRecord::key).collect()
    }

    #[test]
    fn drain_since_is_inclusive_and_ordered() {
        let log = NotificationLog::in_memory();
        log.append_at(10, "a".into(), vec![1]).expect("append should succeed");
        log.append_at(20, "b".into(), vec![2]).expect("append should succeed");
        log.append_at(30, "c".into(), vec![3]).expect("append should succeed");

        assert_eq!(vec!["b", "c"], keys(&log.drain_since(20)));
        assert_eq!(3, log.len());
    }

    #[test]
    fn timestamps_never_run_backwards() {
        let log = NotificationLog::in_memory();
        log.append_at(50, "late".into(), vec![]).expect("append should succeed");
        let record = log
            .append_at(40, "skewed".into(), vec![])
            .expect("append should succeed");

        assert_eq!(50, record.timestamp_ms());
        assert_eq!(1, record.sequence());
    }

    #[test]
    fn catch_up_drains_then_clears() {
        let log = NotificationLog::in_memory();
        log.append_at(5, "old".into(), vec![0]).expect("append should succeed");
        log.append_at(15, "new".into(), vec![1]).expect("append should succeed");

        let delivered = log.catch_up(Some(10)).expect("catch up should succeed");
        assert_eq!(vec!["new"], keys(&delivered));
        assert!(log.is_empty());
        assert_eq!(Vec::<NotificationRecord>::new(), log.drain_since(0));
    }

    #[test]
    fn file_backed_log_survives_reopen_and_clear() {
        let path = unique_temp_path("reopen");
        {
            let log = NotificationLog::open(&path).expect("log should open");
            log.append_at(1, "first".into(), vec![0xAB]).expect("append should succeed");
            log.append_at(2, "second".into(), vec![0xCD]).expect("append should succeed");
        }

        let reopened = NotificationLog::open(&path).expect("log should reopen");
        assert_eq!(vec!["first", "second"], keys(&reopened.drain_since(0)));
        let next = reopened
            .append_at(3, "third".into(), vec![])
            .expect("append should succeed");
        assert_eq!(2, next.sequence());

        reopened.clear().expect("clear should succeed");
        drop(reopened);
        let emptied = NotificationLog::open(&path).expect("log should reopen");
        assert!(emptied.is_empty());

        fs::remove_file(&path).expect("temporary log should be removable");
    }

    #[test]
    fn persisted_values_are_hex_encoded() {
        let path = unique_temp_path("hex");
        let log = NotificationLog::open(&path).expect("log should open");
        log.append_at(7, "k".into(), vec![0xDE, 0xAD]).expect("append should succeed");

        let raw = fs::read_to_string(&path).expect("log file should be readable");
        assert_eq!(
            "{\"timestamp_ms\":7,\"sequence\":0,\"key\":\"k\",\"value\":\"dead\"}\n",
            raw
        );

        fs::remove_file(&path).expect("temporary log should be removable");
    }

    #[test]
    fn torn_final_record_is_dropped_on_open() {
        let path = unique_temp_path("torn");
        fs::write(
            &path,
            "{\"timestamp_ms\":1,\"sequence\":0,\"key\":\"k\",\"value\":\"00\"}\n{\"timestamp_ms\":2,\"seq",
        )
        .expect("fixture should write");

        let log = NotificationLog::open(&path).expect("torn tail should not block open");
        assert_eq!(1, log.len());
        log.append_at(3, "next".into(), vec![0x01]).expect("append should succeed");
        drop(log);

        let reopened = NotificationLog::open(&path).expect("log should reopen");
        assert_eq!(vec!["k", "next"], keys(&reopened.drain_since(0)));

        fs::remove_file(&path).expect("temporary log should be removable");
    }

    #[test]
    fn unterminated_complete_record_is_kept() {
        let path = unique_temp_path("unterminated");
        fs::write(
            &path,
            "{\"timestamp_ms\":1,\"sequence\":0,\"key\":\"k\",\"value\":\"00\"}",
        )
        .expect("fixture should write");

        let log = NotificationLog::open(&path).expect("log should open");
        log.append_at(2, "next".into(), vec![0x01]).expect("append should succeed");
        drop(log);

        let reopened = NotificationLog::open(&path).expect("log should reopen");
        assert_eq!(vec!["k", "next"], keys(&reopened.drain_since(0)));

        fs::remove_file(&path).expect("temporary log should be removable");
    }

    #[test]
    fn corrupt_line_fails_open() {
        let path = unique_temp_path("corrupt");
        fs::write(&path, "{\"timestamp_ms\":1,\"sequence\":0,\"key\":\"k\",\"value\":\"00\"}\nnot json\n")
            .expect("fixture should write");

        assert_matches!(
            NotificationLog::open(&path),
            Err(LogError::CorruptRecord { line: 2, .. })
        );

        fs::remove_file(&path).expect("temporary log should be removable");
    }
}
