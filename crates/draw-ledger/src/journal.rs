use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use draw_core::{DrawEvent, DrawStore, StoreError};
use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::chain::{ChainHead, JournalEntry};

/// Append-only JSON-lines journal. Each append is flushed to disk before it
/// returns, and the in-memory head only advances after that.
///
/// The handle holds an exclusive lock on the file for its whole life, so at
/// most one process writes a journal at a time.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<Writer>,
}

#[derive(Debug)]
struct Writer {
    file: File,
    head: ChainHead,
}

enum Locking {
    Try,
    Wait,
}

impl FileJournal {
    /// Open `path`, creating it if needed, and verify whatever it already
    /// holds. Fails with [`StoreError::Unavailable`] when another handle
    /// already holds the journal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), Locking::Try)
    }

    /// Like [`FileJournal::open`], but blocks until the current holder lets
    /// go of the journal instead of failing.
    pub fn open_waiting(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(path.as_ref(), Locking::Wait)
    }

    fn open_with(path: &Path, locking: Locking) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        match locking {
            Locking::Try => file.try_lock_exclusive().map_err(|e| {
                StoreError::Unavailable(format!(
                    "journal {} is held by another process: {e}",
                    path.display()
                ))
            })?,
            Locking::Wait => file.lock_exclusive()?,
        }

        let replay = read_chain(&mut file)?;
        if let Some(torn) = replay.torn_tail {
            warn!(
                path = %path.display(),
                height = replay.head.len,
                offset = torn,
                "dropping torn final journal line"
            );
            file.set_len(torn)?;
            file.sync_all()?;
        }
        info!(path = %path.display(), entries = replay.entries.len(), "journal opened");
        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                head: replay.head,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn head(&self) -> Result<ChainHead, StoreError> {
        self.writer().map(|writer| writer.head)
    }

    /// Every entry with its chain metadata, verified.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let mut writer = self.writer()?;
        read_chain(&mut writer.file).map(|replay| replay.entries)
    }

    fn writer(&self) -> Result<MutexGuard<'_, Writer>, StoreError> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Unavailable("journal writer poisoned".into()))
    }
}

impl DrawStore for FileJournal {
    fn append(&self, event: &DrawEvent) -> Result<(), StoreError> {
        let mut writer = self.writer()?;
        let entry = JournalEntry::new(writer.head.len, writer.head.digest, event.clone())?;
        let next = writer.head.extend(&entry)?;

        let mut line = serde_json::to_vec(&entry).map_err(|e| StoreError::Encoding(e.to_string()))?;
        line.push(b'\n');
        let file = &mut writer.file;
        let committed = file.metadata()?.len();
        let written = file.write_all(&line).and_then(|()| file.sync_all());
        if let Err(err) = written {
            // Drop whatever part of the line reached the file so the next
            // append starts on a clean boundary.
            if let Err(undo) = file.set_len(committed).and_then(|()| file.sync_all()) {
                warn!(error = %undo, offset = committed, "could not roll back partial journal append");
            }
            warn!(height = entry.height, error = %err, "journal append failed");
            return Err(err.into());
        }

        writer.head = next;
        debug!(height = entry.height, event = event.label(), "journal append");
        Ok(())
    }

    fn load(&self) -> Result<Vec<DrawEvent>, StoreError> {
        Ok(self.entries()?.into_iter().map(|entry| entry.event).collect())
    }
}

struct Replay {
    entries: Vec<JournalEntry>,
    head: ChainHead,
    /// Offset of an unreadable final line left by an interrupted append.
    torn_tail: Option<u64>,
}

/// Walk the whole file. An unreadable final line is reported as a torn tail;
/// anything wrong earlier in the file is corruption.
fn read_chain(file: &mut File) -> Result<Replay, StoreError> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;

    let lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
    let last = lines.iter().rposition(|line| !is_blank(line));
    let mut replay = Replay {
        entries: Vec::new(),
        head: ChainHead::empty(),
        torn_tail: None,
    };
    let mut offset = 0u64;
    for (idx, line) in lines.iter().enumerate() {
        let start = offset;
        offset += line.len() as u64 + 1;
        if is_blank(line) {
            continue;
        }
        let entry: JournalEntry = match serde_json::from_slice(line) {
            Ok(entry) => entry,
            Err(_) if Some(idx) == last => {
                replay.torn_tail = Some(start);
                break;
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    height: replay.head.len,
                    reason: format!("unreadable entry: {e}"),
                })
            }
        };
        replay.head = replay.head.extend(&entry)?;
        replay.entries.push(entry);
    }
    Ok(replay)
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}
