use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use ::zip::write::SimpleFileOptions;

use punzip::extract::{
    ArchiveEntry, ArchiveSource, ConflictDecision, ConflictHandler, EntryEvent, EntryOutcome,
    EntryTimes, NoProgress, OverwritePolicy, ProgressSink,
};
use punzip::{ExtractError, ExtractOptions, ExtractSummary, LocalFileReader, ZipArchive};

/// `None` content marks a directory entry
type Fixture<'a> = &'a [(&'a str, Option<&'a [u8]>)];

fn write_zip(dir: &Path, entries: Fixture<'_>) -> PathBuf {
    let path = dir.join("fixture.zip");
    let mut writer = ::zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let stamp = ::zip::DateTime::from_date_and_time(2020, 1, 2, 3, 4, 6).unwrap();
    let options = SimpleFileOptions::default().last_modified_time(stamp);

    for (name, content) in entries {
        match content {
            None => writer.add_directory(*name, options).unwrap(),
            Some(data) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
    }
    writer.finish().unwrap();
    path
}

async fn open_zip(path: &Path) -> Arc<ZipArchive<LocalFileReader>> {
    let reader = Arc::new(LocalFileReader::new(path).unwrap());
    Arc::new(ZipArchive::open(reader).await.unwrap())
}

/// Relative path -> content of every regular file below `root`
fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            let rel = rel.to_string_lossy().replace('\\', "/");
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Relative path -> modification time of everything below `root`
fn mtimes(root: &Path) -> BTreeMap<String, SystemTime> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap();
            let rel = rel.to_string_lossy().replace('\\', "/");
            (rel, e.metadata().unwrap().modified().unwrap())
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    sequence: u64,
    name: String,
    outcome: Option<EntryOutcome>,
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Recorded>>,
    completed: Mutex<Option<ExtractSummary>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    fn started(&self) -> usize {
        self.events().iter().filter(|e| e.outcome.is_none()).count()
    }

    fn record(&self, event: &EntryEvent<'_>) {
        self.events.lock().unwrap().push(Recorded {
            sequence: event.sequence,
            name: event.entry.name().to_string(),
            outcome: event.outcome,
        });
    }
}

impl ProgressSink for RecordingSink {
    fn entry_started(&self, event: &EntryEvent<'_>) {
        self.record(event);
    }

    fn entry_finished(&self, event: &EntryEvent<'_>) {
        self.record(event);
    }

    fn run_completed(&self, _target: &Path, summary: &ExtractSummary) {
        *self.completed.lock().unwrap() = Some(*summary);
    }
}

fn many_files() -> Vec<(String, Vec<u8>)> {
    (0..40)
        .map(|i| {
            let name = format!("d{}/sub{}/file{:02}.bin", i % 3, i % 5, i);
            let data = format!("payload {} ", i).repeat(i * 37 + 1).into_bytes();
            (name, data)
        })
        .collect()
}

#[tokio::test]
async fn directory_times_survive_child_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let zip = write_zip(
        tmp.path(),
        &[
            ("a/", None),
            ("a/f1.txt", Some(&b"one"[..])),
            ("a/b/f2.txt", Some(&b"two"[..])),
        ],
    );
    let archive = open_zip(&zip).await;
    let stamp = archive.entries()[0].times().modified.unwrap();
    let out = tmp.path().join("out");

    let summary = punzip::extract_all(
        archive,
        &out,
        &ExtractOptions::default(),
        Arc::new(NoProgress),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_extracted, 2);
    assert_eq!(summary.directories, 1);
    assert_eq!(std::fs::read(out.join("a/f1.txt")).unwrap(), b"one");
    assert_eq!(std::fs::read(out.join("a/b/f2.txt")).unwrap(), b"two");
    let meta = std::fs::metadata(out.join("a")).unwrap();
    assert_eq!(meta.modified().unwrap(), stamp);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dont_overwrite_keeps_existing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let zip = write_zip(
        tmp.path(),
        &[
            ("f.txt", Some(&b"new"[..])),
            ("g.txt", Some(&b"g"[..])),
            ("h/i.txt", Some(&b"i"[..])),
        ],
    );
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("f.txt"), b"old").unwrap();

    let sink = Arc::new(RecordingSink::default());
    let options = ExtractOptions::default()
        .with_policy(OverwritePolicy::DontOverwrite)
        .with_workers(4);
    let summary = punzip::extract_all(open_zip(&zip).await, &out, &options, sink.clone())
        .await
        .unwrap();

    assert_eq!(std::fs::read(out.join("f.txt")).unwrap(), b"old");
    assert_eq!(std::fs::read(out.join("g.txt")).unwrap(), b"g");
    assert_eq!(summary.files_skipped, 1);
    assert_eq!(summary.files_extracted, 2);
    assert!(
        sink.events()
            .iter()
            .any(|e| e.name == "f.txt" && e.outcome == Some(EntryOutcome::Skipped))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn extracted_tree_matches_file_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let files = many_files();
    let mut fixture: Vec<(&str, Option<&[u8]>)> = vec![("d0/", None), ("d1/sub1/", None)];
    fixture.extend(files.iter().map(|(n, d)| (n.as_str(), Some(d.as_slice()))));
    let zip = write_zip(tmp.path(), &fixture);
    let expected: BTreeMap<String, Vec<u8>> = files.into_iter().collect();

    for workers in [1, 4] {
        let out = tmp.path().join(format!("out{}", workers));
        let options = ExtractOptions::default().with_workers(workers);
        let archive = open_zip(&zip).await;
        let summary = punzip::extract_all(archive, &out, &options, Arc::new(NoProgress))
            .await
            .unwrap();

        assert_eq!(summary.files_extracted, expected.len() as u64);
        assert_eq!(tree(&out), expected, "workers = {}", workers);
    }
}

#[tokio::test]
async fn overwrite_silently_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let zip = write_zip(
        tmp.path(),
        &[
            ("x/", None),
            ("x/1.txt", Some(&b"1"[..])),
            ("x/2.txt", Some(&b"22"[..])),
        ],
    );
    let out = tmp.path().join("out");
    let options = ExtractOptions::default()
        .with_policy(OverwritePolicy::OverwriteSilently)
        .with_workers(2);

    let archive = open_zip(&zip).await;

    let first = punzip::extract_all(archive.clone(), &out, &options, Arc::new(NoProgress))
        .await
        .unwrap();
    let content = tree(&out);
    let times = mtimes(&out);
    let second = punzip::extract_all(archive, &out, &options, Arc::new(NoProgress))
        .await
        .unwrap();

    assert_eq!(first.files_replaced, 0);
    assert_eq!(second.files_replaced, 2);
    assert_eq!(tree(&out), content);
    assert_eq!(mtimes(&out), times);
    assert_eq!(times.len(), 3);
}

#[tokio::test]
async fn sequential_events_follow_archive_order() {
    let tmp = tempfile::tempdir().unwrap();
    let zip = write_zip(
        tmp.path(),
        &[
            ("a/", None),
            ("a/1", Some(&b"1"[..])),
            ("b", Some(&b"2"[..])),
            ("c", Some(&b"3"[..])),
        ],
    );
    let sink = Arc::new(RecordingSink::default());
    punzip::extract_all(
        open_zip(&zip).await,
        tmp.path().join("out"),
        &ExtractOptions::default(),
        sink.clone(),
    )
    .await
    .unwrap();

    let events = sink.events();
    let names: Vec<_> = events.iter().map(|e| (e.sequence, e.name.as_str())).collect();
    assert_eq!(
        names,
        [
            (0, "a/"),
            (0, "a/"),
            (1, "a/1"),
            (1, "a/1"),
            (2, "b"),
            (2, "b"),
            (3, "c"),
            (3, "c"),
        ]
    );
    assert_eq!(events[0].outcome, None);
    assert_eq!(events[1].outcome, Some(EntryOutcome::Directory));
    assert!(sink.completed.lock().unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_sequence_numbers_cover_every_entry_once() {
    let tmp = tempfile::tempdir().unwrap();
    let files = many_files();
    let fixture: Vec<(&str, Option<&[u8]>)> = files
        .iter()
        .map(|(n, d)| (n.as_str(), Some(d.as_slice())))
        .collect();
    let zip = write_zip(tmp.path(), &fixture);

    let sink = Arc::new(RecordingSink::default());
    let options = ExtractOptions::default().with_workers(4);
    let out = tmp.path().join("out");
    punzip::extract_all(open_zip(&zip).await, &out, &options, sink.clone())
        .await
        .unwrap();

    let events = sink.events();
    let mut started: Vec<_> = events
        .iter()
        .filter(|e| e.outcome.is_none())
        .map(|e| e.sequence)
        .collect();
    started.sort_unstable();
    assert_eq!(started, (0..files.len() as u64).collect::<Vec<_>>());

    for finished in events.iter().filter(|e| e.outcome.is_some()) {
        assert!(events.iter().any(|e| {
            e.outcome.is_none() && e.sequence == finished.sequence && e.name == finished.name
        }));
    }
}

/// Replaces files until the `cancel_at`-th conflict, then cancels
struct CancelAt {
    cancel_at: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ConflictHandler for CancelAt {
    async fn check_existing(
        &self,
        _entry: &dyn ArchiveEntry,
        _target_dir: &Path,
        _full_path: &Path,
    ) -> ConflictDecision {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.cancel_at {
            ConflictDecision::Cancel
        } else {
            ConflictDecision::Proceed
        }
    }
}

#[tokio::test]
async fn conflict_handler_can_cancel_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let names = ["1.txt", "2.txt", "3.txt", "4.txt", "5.txt"];
    let fixture: Vec<(&str, Option<&[u8]>)> =
        names.iter().map(|n| (*n, Some(&b"new"[..]))).collect();
    let zip = write_zip(tmp.path(), &fixture);
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    for name in names {
        std::fs::write(out.join(name), b"old").unwrap();
    }

    let handler = Arc::new(CancelAt {
        cancel_at: 3,
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(RecordingSink::default());
    let options =
        ExtractOptions::default().with_policy(OverwritePolicy::InvokeCallback(handler.clone()));
    let summary = punzip::extract_all(open_zip(&zip).await, &out, &options, sink.clone())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_replaced, 2);
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(out.join("2.txt")).unwrap(), b"new");
    for untouched in ["3.txt", "4.txt", "5.txt"] {
        assert_eq!(std::fs::read(out.join(untouched)).unwrap(), b"old");
    }
    let last = sink.events().pop().unwrap();
    assert_eq!(last.name, "3.txt");
    assert_eq!(last.outcome, Some(EntryOutcome::Cancelled));
}

/// Archive with one directory entry and `count` files below it, every file
/// already present in `out` with content `old`
fn preexisting_tree(dir: &Path, count: usize) -> (PathBuf, PathBuf) {
    let names: Vec<String> = (0..count).map(|i| format!("d/f{:03}.txt", i)).collect();
    let mut fixture: Vec<(&str, Option<&[u8]>)> = vec![("d/", None)];
    fixture.extend(names.iter().map(|n| (n.as_str(), Some(&b"new"[..]))));
    let zip = write_zip(dir, &fixture);

    let out = dir.join("out");
    std::fs::create_dir_all(out.join("d")).unwrap();
    for name in &names {
        std::fs::write(out.join(name), b"old").unwrap();
    }
    (zip, out)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_from_one_worker_stops_all_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let (zip, out) = preexisting_tree(tmp.path(), 200);
    let archive = open_zip(&zip).await;
    let stamp = archive.entries()[0].times().modified.unwrap();

    let handler = Arc::new(CancelAt {
        cancel_at: 1,
        calls: AtomicUsize::new(0),
    });
    let sink = Arc::new(RecordingSink::default());
    let options = ExtractOptions::default()
        .with_policy(OverwritePolicy::InvokeCallback(handler))
        .with_workers(4);
    let summary = punzip::extract_all(archive, &out, &options, sink.clone())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_extracted, 0);
    // Each worker handles at most one file before seeing the cancellation;
    // one more slot for the directory entry.
    assert!(sink.started() <= 5, "started {}", sink.started());
    assert!(tree(&out).values().all(|content| content == b"old"));

    let dir_mtime = std::fs::metadata(out.join("d")).unwrap().modified().unwrap();
    assert_ne!(dir_mtime, stamp);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fatal_error_stops_sibling_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let (zip, out) = preexisting_tree(tmp.path(), 100);

    let sink = Arc::new(RecordingSink::default());
    let options = ExtractOptions::default().with_workers(4);
    let err = punzip::extract_all(open_zip(&zip).await, &out, &options, sink.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::PathConflict { .. }));
    // The directory entry may precede the first conflict.
    assert!(sink.started() <= 5, "started {}", sink.started());
    assert!(
        sink.events()
            .iter()
            .all(|e| e.outcome.is_none() || e.outcome == Some(EntryOutcome::Directory))
    );
    assert!(sink.completed.lock().unwrap().is_none());
    assert!(tree(&out).values().all(|content| content == b"old"));
}

#[tokio::test]
async fn throw_policy_reports_the_conflicting_path() {
    let tmp = tempfile::tempdir().unwrap();
    let zip = write_zip(tmp.path(), &[("f.txt", Some(&b"new"[..]))]);
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("f.txt"), b"old").unwrap();

    let err = punzip::extract_all(
        open_zip(&zip).await,
        &out,
        &ExtractOptions::default(),
        Arc::new(NoProgress),
    )
    .await
    .unwrap_err();

    match err {
        ExtractError::PathConflict { path } => assert_eq!(path, out.join("f.txt")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(std::fs::read(out.join("f.txt")).unwrap(), b"old");
}

struct MemEntry {
    name: &'static str,
    data: &'static [u8],
}

impl ArchiveEntry for MemEntry {
    fn name(&self) -> &str {
        self.name
    }
    fn uncompressed_size(&self) -> u64 {
        self.data.len() as u64
    }
    fn compressed_size(&self) -> u64 {
        self.data.len() as u64
    }
    fn times(&self) -> EntryTimes {
        EntryTimes::default()
    }
}

/// In-memory archive; `views` counts how many workers opened a view
struct MemSource {
    entries: Vec<MemEntry>,
    views: AtomicUsize,
}

impl MemSource {
    fn new(entries: Vec<MemEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries,
            views: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ArchiveSource for MemSource {
    type Entry = MemEntry;
    type View = ();

    fn entries(&self) -> &[MemEntry] {
        &self.entries
    }

    async fn open_view(&self) -> anyhow::Result<()> {
        self.views.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn extract_entry(
        &self,
        _view: &mut (),
        entry: &MemEntry,
        out: &mut tokio::fs::File,
    ) -> anyhow::Result<u64> {
        // No flush here: the engine owns the file and flushes it.
        out.write_all(entry.data).await?;
        Ok(entry.data.len() as u64)
    }
}

#[tokio::test]
async fn unflushed_writes_reach_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let source = MemSource::new(vec![
        MemEntry {
            name: "data.bin",
            data: b"data",
        },
        MemEntry {
            name: "nested/more.bin",
            data: b"more data",
        },
    ]);

    let options = ExtractOptions::default();
    let summary = punzip::extract_all(source, tmp.path(), &options, Arc::new(NoProgress))
        .await
        .unwrap();

    assert_eq!(summary.bytes_written, 13);
    assert_eq!(std::fs::read(tmp.path().join("data.bin")).unwrap(), b"data");
    assert_eq!(
        std::fs::read(tmp.path().join("nested/more.bin")).unwrap(),
        b"more data"
    );
}

#[tokio::test]
async fn parent_segments_are_rejected_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let source = MemSource::new(vec![MemEntry {
        name: "../evil.txt",
        data: b"x",
    }]);

    let options = ExtractOptions::default();
    let err = punzip::extract_all(source.clone(), &out, &options, Arc::new(NoProgress))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::UnsafePath { .. }));
    assert!(!tmp.path().join("evil.txt").exists());

    let options = options.allow_parent_paths(true);
    punzip::extract_all(source, &out, &options, Arc::new(NoProgress))
        .await
        .unwrap();
    assert_eq!(std::fs::read(tmp.path().join("evil.txt")).unwrap(), b"x");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_token_extracts_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let source = MemSource::new(vec![
        MemEntry {
            name: "a.txt",
            data: b"a",
        },
        MemEntry {
            name: "b.txt",
            data: b"b",
        },
    ]);

    let token = CancellationToken::new();
    token.cancel();
    let options = ExtractOptions::default()
        .with_workers(2)
        .with_cancellation(token.clone());
    let summary = punzip::extract_all(source, &out, &options, Arc::new(NoProgress))
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_extracted, 0);
    assert!(tree(&out).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_are_capped_by_entry_count() {
    let tmp = tempfile::tempdir().unwrap();
    let source = MemSource::new(vec![
        MemEntry {
            name: "a.txt",
            data: b"a",
        },
        MemEntry {
            name: "b.txt",
            data: b"b",
        },
    ]);

    let options = ExtractOptions::default().with_workers(16);
    let sink = Arc::new(NoProgress);
    let summary = punzip::extract_all(source.clone(), tmp.path(), &options, sink)
        .await
        .unwrap();

    assert_eq!(summary.files_extracted, 2);
    assert_eq!(source.views.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_workers_runs_sequentially() {
    let tmp = tempfile::tempdir().unwrap();
    let source = MemSource::new(vec![MemEntry {
        name: "only.txt",
        data: b"1",
    }]);

    let options = ExtractOptions::default().with_workers(0);
    let sink = Arc::new(NoProgress);
    let summary = punzip::extract_all(source.clone(), tmp.path(), &options, sink)
        .await
        .unwrap();

    assert_eq!(summary.files_extracted, 1);
    assert_eq!(source.views.load(Ordering::SeqCst), 1);
}
