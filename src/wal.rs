use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;

/// Encode a single event to `[len][bincode][crc32]` format.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read the next record. `Ok(None)` means end of log, including a torn or
/// corrupt tail left behind by a crash.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize::<Event>(&payload).ok())
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of store mutations.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash) is discarded via length-prefix + CRC check.
///
/// A batch that fails to sync is cut back off the file, so a retried
/// append never lands next to its earlier copy. If the cut itself fails the
/// log is poisoned and refuses appends until the next compaction rewrites it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length as of the last successful sync.
    durable_len: u64,
    unsynced: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            durable_len,
            unsynced: 0,
            poisoned: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        encode_record(&mut self.writer, event)?;
        self.unsynced += 1;
        Ok(())
    }

    /// Flush and fsync everything buffered. On failure the unsynced tail is
    /// discarded before the error is returned.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        let synced = self
            .writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all())
            .and_then(|()| self.writer.get_ref().metadata());
        match synced {
            Ok(meta) => {
                self.durable_len = meta.len();
                self.appends_since_compact += self.unsynced;
                self.unsynced = 0;
                Ok(())
            }
            Err(e) => {
                self.discard_unsynced();
                Err(e)
            }
        }
    }

    /// Drop buffered bytes without writing them and truncate the file back
    /// to its last synced length.
    fn discard_unsynced(&mut self) {
        self.unsynced = 0;
        let cut = self.writer.get_ref().try_clone().and_then(|file| {
            let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
            // into_parts hands back the buffer instead of flushing it.
            drop(stale.into_parts());
            let file = self.writer.get_ref();
            file.set_len(self.durable_len)?;
            file.sync_all()
        });
        if let Err(e) = cut {
            tracing::error!("WAL rollback to {} bytes failed, refusing appends: {e}", self.durable_len);
            self.poisoned = true;
        }
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by a failed rollback"));
        }
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        drop(stale.into_parts());
        self.durable_len = self.writer.get_ref().metadata()?.len();
        self.appends_since_compact = 0;
        self.unsynced = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Replay the WAL from disk, returning all valid events.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_record(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the background task that owns the WAL file.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

impl WalHandle {
    /// Move `wal` onto a writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append one event; resolves after the batch containing it is fsync'd.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Append { event, response })
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))?
    }

    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response })
            .await
            .map_err(|_| io::Error::other("WAL writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("WAL writer dropped response"))?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// 1. Block until the first command arrives.
/// 2. Buffer every immediately available Append (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_other(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            wal.discard_unsynced();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, ResourceRef};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("reservd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn registered(name: &str) -> Event {
        Event::ResourceRegistered {
            resource: Resource::facility(Ulid::new(), name),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            registered("Room 101"),
            Event::ResourceActivationChanged {
                resource: ResourceRef::equipment(Ulid::new()),
                active: false,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = registered("Hall");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        {
            let payload = bincode::serialize(&registered("Lab")).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let keep = registered("Auditorium");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&keep).unwrap();
        let rref = ResourceRef::facility(Ulid::new());
        for i in 0..20 {
            wal.append(&Event::ResourceActivationChanged { resource: rref, active: i % 2 == 0 })
                .unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&keep)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let next = registered("Studio");
        wal.append(&next).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, next]);
    }

    #[test]
    fn failed_batch_is_cut_from_the_file() {
        let path = tmp_path("rollback.wal");
        let kept = registered("Room 101");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let synced = fs::metadata(&path).unwrap().len();

        // The bytes reach the file but the batch never syncs.
        wal.append_buffered(&registered("lost")).unwrap();
        wal.writer.flush().unwrap();
        assert!(fs::metadata(&path).unwrap().len() > synced);
        wal.discard_unsynced();
        assert_eq!(fs::metadata(&path).unwrap().len(), synced);
        assert_eq!(wal.appends_since_compact(), 1);

        // Still buffered, never written.
        wal.append_buffered(&registered("also lost")).unwrap();
        wal.discard_unsynced();

        let retried = registered("retried");
        wal.append(&retried).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, retried]);
    }

    #[test]
    fn poisoned_log_refuses_appends_until_compacted() {
        let path = tmp_path("poisoned.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.poisoned = true;
        assert!(wal.append(&registered("Hall")).is_err());

        let keep = registered("Lab");
        wal.compact(std::slice::from_ref(&keep)).unwrap();
        let next = registered("Studio");
        wal.append(&next).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![keep, next]);
    }

    #[tokio::test]
    async fn writer_task_batches_and_counts() {
        let path = tmp_path("writer_task.wal");
        let handle = WalHandle::spawn(Wal::open(&path).unwrap());

        let events: Vec<Event> = (0..8).map(|i| registered(&format!("room {i}"))).collect();
        let writes = events.iter().cloned().map(|e| {
            let h = handle.clone();
            async move { h.append(e).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        assert_eq!(handle.appends_since_compact().await, 8);
        assert_eq!(Wal::replay(&path).unwrap().len(), 8);

        handle.compact(events[..1].to_vec()).await.unwrap();
        assert_eq!(handle.appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap(), events[..1].to_vec());
    }
}
