//! Fetch hourly partitioned customer logs into a local directory tree.
//!
//! Each hour of the requested range maps to a prefix of the form
//! `<customer>/<YYYYMMDD>-<HH>/`, which is copied recursively into
//! `<output>/<YYYYMMDD>-<HH>/`. A failing partition is reported and the
//! remaining partitions are still fetched.
use clap::{App, Arg, ArgMatches, SubCommand};
use regex::Regex;
use rusoto_s3::*;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::{fs, io};

use std::collections::HashSet;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use crate::cli;
use crate::creds;
use crate::range::{self, FetchTask};
use crate::summary::{Summary, TransferStats};
use crate::types::{UtilError, UtilResult};
use crate::walker::ObjectWalker;

/// Generates an appropriate `SubCommand` for this module.
pub fn cmd<'a, 'b>() -> App<'a, 'b> {
    SubCommand::with_name("fetch")
        .about("Fetch hourly customer logs from S3 into a local tree")
        .args(&cli::global_args())
        .args(&cli::credential_args())
        .args(&[
            Arg::with_name("dry")
                .help("Only print out the calculated partitions")
                .short("d")
                .long("dry-run"),
            Arg::with_name("customer")
                .help("The customer folder to fetch logs for")
                .index(2)
                .required(true),
            Arg::with_name("start")
                .help("The first date to fetch, as YYYYMMDD")
                .index(3)
                .required(true),
            Arg::with_name("end")
                .help("The last date to fetch, as YYYYMMDD (fetches full days)")
                .index(4),
            Arg::with_name("start-hour")
                .help("First hour to fetch when fetching a single day")
                .short("s")
                .long("start-hour")
                .takes_value(true),
            Arg::with_name("end-hour")
                .help("Last hour to fetch when fetching a single day")
                .short("e")
                .long("end-hour")
                .takes_value(true),
            Arg::with_name("output")
                .help("Local directory to fetch partitions into")
                .short("o")
                .long("output")
                .takes_value(true),
            Arg::with_name("pattern")
                .help("Only fetch objects whose key matches this pattern")
                .short("p")
                .long("pattern")
                .takes_value(true),
            Arg::with_name("skip-existing")
                .help("Skip objects which already exist locally")
                .short("k")
                .long("skip-existing"),
        ])
}

/// Executes this subcommand and returns a `UtilResult` to indicate success.
pub async fn exec(args: &ArgMatches<'_>) -> UtilResult<()> {
    // parse all arguments, validating the range before touching credentials
    let dryrun = cli::is_dry_run(args);
    let spec = cli::get_range_spec(args)?;
    let tasks = range::expand(&spec)?;

    // compile the key filter up front, so a bad pattern fails early
    let pattern = match args.value_of("pattern") {
        Some(pattern) => Some(Regex::new(pattern)?),
        None => None,
    };

    // log out exactly what we're about to fetch
    info!(
        "Fetching {} partition(s) of {} from s3://{}",
        tasks.len(),
        spec.customer,
        spec.bucket
    );

    // dry runs only print the calculated partitions
    if dryrun {
        for task in tasks {
            info!(
                "s3://{}/{} -> {}",
                spec.bucket, task.remote_prefix, task.local_directory
            );
        }
        return Ok(());
    }

    // bootstrap credentials and construct the transfer
    let config = cli::get_credential_config(args)?;
    let transfer = S3Transfer {
        s3: creds::connect(&config).await?,
        pattern,
        skip_existing: args.is_present("skip-existing"),
    };

    // fetch every partition, then print the totals
    let summary = run(&transfer, &spec.bucket, tasks).await;
    summary.print();

    // any failed partition fails the command
    if summary.failed > 0 {
        return Err(format!(
            "Unable to fetch {} of {} partitions",
            summary.failed, summary.partitions
        )
        .into());
    }

    Ok(())
}

/// Trait for anything able to copy a remote partition locally.
pub trait Transfer {
    /// Copies every object under the task prefix into its local directory.
    fn fetch<'a>(
        &'a self,
        bucket: &'a str,
        task: &'a FetchTask,
    ) -> Pin<Box<dyn Future<Output = UtilResult<TransferStats>> + 'a>>;
}

/// Processes every task in order, continuing past failing partitions.
pub async fn run<T, I>(transfer: &T, bucket: &str, tasks: I) -> Summary
where
    T: Transfer,
    I: IntoIterator<Item = FetchTask>,
{
    let mut summary = Summary::new();

    for task in tasks {
        summary.partitions += 1;

        info!(
            "Fetching s3://{}/{} -> {}",
            bucket, task.remote_prefix, task.local_directory
        );

        // ensure the local directory exists, moving on if it can't
        if let Err(err) = fs::create_dir_all(&task.local_directory).await {
            error!("Unable to create {}: {}", task.local_directory, err);
            summary.failed += 1;
            continue;
        }

        // a failed partition never stops the remaining ones
        match transfer.fetch(bucket, &task).await {
            Ok(stats) => summary.record(&stats),
            Err(err) => {
                error!("Unable to fetch {}: {}", task.partition, err);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// `Transfer` implementation backed by Amazon S3.
pub struct S3Transfer {
    s3: S3Client,
    pattern: Option<Regex>,
    skip_existing: bool,
}

impl Transfer for S3Transfer {
    fn fetch<'a>(
        &'a self,
        bucket: &'a str,
        task: &'a FetchTask,
    ) -> Pin<Box<dyn Future<Output = UtilResult<TransferStats>> + 'a>> {
        Box::pin(self.fetch_prefix(bucket, task))
    }
}

impl S3Transfer {
    /// Walks the task prefix, downloading each selected object.
    async fn fetch_prefix(&self, bucket: &str, task: &FetchTask) -> UtilResult<TransferStats> {
        let mut stats = TransferStats::default();
        let mut selector = Selector::new(task, self.pattern.as_ref(), self.skip_existing);
        let mut walker = ObjectWalker::new(
            &self.s3,
            bucket.to_string(),
            Some(task.remote_prefix.clone()),
        );

        // walk across all objects in the partition
        while let Some(object) = walker.next().await? {
            // keys should always be present, skip if not
            let key = match object.key {
                Some(key) => key,
                None => continue,
            };

            // decide what to do with this key locally
            let target = match selector.select(&key).await {
                Selection::Fetch(target) => target,
                Selection::Existing(target) => {
                    debug!("Skipping existing {:?}", target);
                    stats.skipped += 1;
                    continue;
                }
                Selection::Duplicate(target) => {
                    warn!("Skipping {}, another key already maps to {:?}", key, target);
                    stats.skipped += 1;
                    continue;
                }
                Selection::NotAFile => {
                    debug!("Skipping non-file key {}", key);
                    continue;
                }
                Selection::Filtered => continue,
            };

            // stream the object down to disk
            stats.bytes += self.download(bucket, &key, &target).await?;
            stats.files += 1;

            debug!("Saved {:?}", target);
        }

        // an empty partition is suspicious, but not an error
        if stats.files == 0 && stats.skipped == 0 {
            warn!("No objects found in s3://{}/{}", bucket, task.remote_prefix);
        }

        Ok(stats)
    }

    /// Streams a single object into the target path.
    async fn download(&self, bucket: &str, key: &str, target: &Path) -> UtilResult<u64> {
        // create the request for the object
        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            ..GetObjectRequest::default()
        };

        // execute the request and grab the body stream
        let response = self.s3.get_object(request).await?;
        let body = response
            .body
            .ok_or_else(|| UtilError::from(format!("No body for s3://{}/{}", bucket, key)))?;

        // pin the reader so it can be passed through to the copy
        let mut reader = Box::pin(body.into_async_read());
        save_stream(&mut reader, target).await
    }
}

/// Outcome of matching a listed key against the fetch options.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    /// Download the object into the contained path.
    Fetch(PathBuf),
    /// The target already exists and `--skip-existing` was provided.
    Existing(PathBuf),
    /// An earlier key in this partition maps to the same local path.
    Duplicate(PathBuf),
    /// Directory markers and keys escaping the partition directory.
    NotAFile,
    /// The key does not match the provided pattern.
    Filtered,
}

/// Per-partition selection of which listed keys to download, and where.
struct Selector<'a> {
    task: &'a FetchTask,
    pattern: Option<&'a Regex>,
    skip_existing: bool,
    seen: HashSet<PathBuf>,
}

impl<'a> Selector<'a> {
    /// Constructs a new `Selector` for a single partition.
    fn new(task: &'a FetchTask, pattern: Option<&'a Regex>, skip_existing: bool) -> Self {
        Self {
            task,
            pattern,
            skip_existing,
            seen: HashSet::new(),
        }
    }

    /// Determines what should happen to a listed key.
    async fn select(&mut self, key: &str) -> Selection {
        // keys must resolve to a file within the partition
        let relative = match relative_path(&self.task.remote_prefix, key) {
            Some(relative) => relative,
            None => return Selection::NotAFile,
        };

        // patterns are matched against the full key
        if let Some(pattern) = self.pattern {
            if !pattern.is_match(key) {
                return Selection::Filtered;
            }
        }

        let target = Path::new(&self.task.local_directory).join(relative);

        // `a//b` and `a/b` collapse onto the same local file
        if !self.seen.insert(target.clone()) {
            return Selection::Duplicate(target);
        }

        if self.skip_existing && is_existing_file(&target).await {
            return Selection::Existing(target);
        }

        Selection::Fetch(target)
    }
}

/// Determines whether a regular file exists at the provided path.
async fn is_existing_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Returns the sibling path a download is staged in before completion.
fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

/// Streams a reader into `target`, via a sibling `.part` file.
///
/// The target is only replaced once the whole stream has been written, so
/// an interrupted transfer never leaves a truncated file at the final path.
async fn save_stream<R>(reader: &mut R, target: &Path) -> UtilResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    // make sure nested key paths have somewhere to live
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(target);

    match write_partial(reader, &partial).await {
        Ok(written) => {
            // swap the completed file into place
            fs::rename(&partial, target).await?;
            Ok(written)
        }
        Err(err) => {
            // drop the partial file, reporting the copy error
            if let Err(cleanup) = fs::remove_file(&partial).await {
                debug!("Unable to remove {:?}: {}", partial, cleanup);
            }
            Err(err.into())
        }
    }
}

/// Copies a reader into a freshly created file at `partial`.
async fn write_partial<R>(reader: &mut R, partial: &Path) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = fs::File::create(partial).await?;
    let written = io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(written)
}

/// Resolves the local path of a key, relative to its partition prefix.
///
/// Directory markers and keys which would escape the partition directory
/// resolve to `None`. Empty segments are dropped, as the local filesystem
/// would collapse them anyway.
fn relative_path(prefix: &str, key: &str) -> Option<PathBuf> {
    let rest = key.strip_prefix(prefix)?;

    if rest.is_empty() || rest.ends_with('/') {
        return None;
    }

    let path: PathBuf = rest.split('/').filter(|s| !s.is_empty()).collect();

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));

    if escapes {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    use crate::range::RangeSpec;

    /// Fake transfer which fails on selected partitions.
    struct FakeTransfer {
        failing: Vec<String>,
        seen: RefCell<Vec<String>>,
    }

    impl Transfer for FakeTransfer {
        fn fetch<'a>(
            &'a self,
            _bucket: &'a str,
            task: &'a FetchTask,
        ) -> Pin<Box<dyn Future<Output = UtilResult<TransferStats>> + 'a>> {
            Box::pin(async move {
                let name = task.partition.to_string();
                self.seen.borrow_mut().push(name.clone());

                if self.failing.contains(&name) {
                    return Err(format!("access denied to {}", task.remote_prefix).into());
                }

                Ok(TransferStats {
                    files: 2,
                    skipped: 0,
                    bytes: 100,
                })
            })
        }
    }

    fn spec(root: &Path) -> RangeSpec {
        let date = NaiveDate::from_ymd_opt(2025, 4, 21).unwrap();
        RangeSpec::new("acme", "logs-bucket", date)
            .hours(0, 3)
            .root(root.to_string_lossy())
    }

    #[tokio::test]
    async fn running_continues_past_failures() {
        let temp = TempDir::new().unwrap();
        let transfer = FakeTransfer {
            failing: vec!["20250421-01".to_string()],
            seen: RefCell::new(Vec::new()),
        };

        let tasks = range::expand(&spec(temp.path())).unwrap();
        let summary = run(&transfer, "logs-bucket", tasks).await;

        assert_eq!(
            *transfer.seen.borrow(),
            vec!["20250421-00", "20250421-01", "20250421-02", "20250421-03"]
        );
        assert_eq!(summary.partitions, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.files, 6);
        assert_eq!(summary.bytes, 300);
    }

    #[tokio::test]
    async fn running_creates_partition_directories() {
        let temp = TempDir::new().unwrap();
        let transfer = FakeTransfer {
            failing: Vec::new(),
            seen: RefCell::new(Vec::new()),
        };

        // a pre-existing directory must not be an error
        std::fs::create_dir_all(temp.path().join("20250421-02")).unwrap();

        let tasks = range::expand(&spec(temp.path())).unwrap();
        let summary = run(&transfer, "logs-bucket", tasks).await;

        assert_eq!(summary.failed, 0);
        for hour in 0..4 {
            assert!(temp.path().join(format!("20250421-{:02}", hour)).is_dir());
        }
    }

    /// Body stream which fails after yielding its first chunk.
    struct BrokenStream {
        chunk: Option<Vec<u8>>,
    }

    impl AsyncRead for BrokenStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            match self.chunk.take() {
                Some(chunk) => {
                    let len = chunk.len().min(buf.len());
                    buf[..len].copy_from_slice(&chunk[..len]);
                    Poll::Ready(Ok(len))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))),
            }
        }
    }

    fn task(root: &Path) -> FetchTask {
        range::expand(&spec(root).hours(0, 0))
            .unwrap()
            .next()
            .unwrap()
    }

    #[tokio::test]
    async fn saving_streams_into_place() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("pods/web/app.log");
        let mut body: &[u8] = b"fresh log";

        let written = save_stream(&mut body, &target).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&target).unwrap(), b"fresh log");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn saving_interrupted_streams_keeps_previous_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("app.log.gz");

        // a complete copy from an earlier run
        std::fs::write(&target, b"complete log").unwrap();

        let mut body = BrokenStream {
            chunk: Some(b"trunc".to_vec()),
        };
        let err = save_stream(&mut body, &target).await.unwrap_err();

        assert_eq!(err.to_string(), "connection reset by peer");
        assert_eq!(std::fs::read(&target).unwrap(), b"complete log");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn saving_interrupted_streams_leaves_no_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("app.log.gz");

        let mut body = BrokenStream {
            chunk: Some(b"trunc".to_vec()),
        };

        assert!(save_stream(&mut body, &target).await.is_err());
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }

    #[test]
    fn staging_downloads_next_to_target() {
        assert_eq!(
            partial_path(Path::new("/logs/20250421-00/app.log.gz")),
            PathBuf::from("/logs/20250421-00/app.log.gz.part")
        );
    }

    #[tokio::test]
    async fn selecting_keys_for_partition() {
        let temp = TempDir::new().unwrap();
        let task = task(temp.path());
        let dir = Path::new(&task.local_directory).to_path_buf();
        let pattern = Regex::new(r"\.gz$").unwrap();

        // one log fetched by a previous run
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.log.gz"), b"done").unwrap();

        let mut selector = Selector::new(&task, Some(&pattern), true);

        assert_eq!(selector.select("acme/20250421-00/").await, Selection::NotAFile);
        assert_eq!(
            selector.select("acme/20250421-00/pods.gz/").await,
            Selection::NotAFile
        );
        assert_eq!(
            selector.select("acme/20250421-00/app.txt").await,
            Selection::Filtered
        );
        assert_eq!(
            selector.select("acme/20250421-00/old.log.gz").await,
            Selection::Existing(dir.join("old.log.gz"))
        );
        assert_eq!(
            selector.select("acme/20250421-00/pods/web.log.gz").await,
            Selection::Fetch(dir.join("pods/web.log.gz"))
        );
    }

    #[tokio::test]
    async fn selecting_with_patterns_on_full_keys() {
        let temp = TempDir::new().unwrap();
        let task = task(temp.path());
        let anchored = Regex::new(r"^acme/20250421-00/pods/").unwrap();
        let relative = Regex::new(r"^pods/").unwrap();

        let mut full = Selector::new(&task, Some(&anchored), false);
        let mut partial = Selector::new(&task, Some(&relative), false);

        assert!(matches!(
            full.select("acme/20250421-00/pods/web.log").await,
            Selection::Fetch(_)
        ));
        assert_eq!(
            partial.select("acme/20250421-00/pods/web.log").await,
            Selection::Filtered
        );
    }

    #[tokio::test]
    async fn selecting_existing_only_for_files() {
        let temp = TempDir::new().unwrap();
        let task = task(temp.path());
        let dir = Path::new(&task.local_directory).to_path_buf();

        // a directory in the way is not a fetched file
        std::fs::create_dir_all(dir.join("web.log")).unwrap();
        std::fs::write(dir.join("api.log"), b"done").unwrap();

        let mut skipping = Selector::new(&task, None, true);
        let mut overwriting = Selector::new(&task, None, false);

        assert_eq!(
            skipping.select("acme/20250421-00/web.log").await,
            Selection::Fetch(dir.join("web.log"))
        );
        assert_eq!(
            overwriting.select("acme/20250421-00/api.log").await,
            Selection::Fetch(dir.join("api.log"))
        );
    }

    #[tokio::test]
    async fn selecting_collapsed_keys_once() {
        let temp = TempDir::new().unwrap();
        let task = task(temp.path());
        let dir = Path::new(&task.local_directory).to_path_buf();

        let mut selector = Selector::new(&task, None, false);

        assert_eq!(
            selector.select("acme/20250421-00//pods/a.log").await,
            Selection::Fetch(dir.join("pods/a.log"))
        );
        assert_eq!(
            selector.select("acme/20250421-00/pods/a.log").await,
            Selection::Duplicate(dir.join("pods/a.log"))
        );
        assert_eq!(
            selector.select("acme/20250421-00/pods/b.log").await,
            Selection::Fetch(dir.join("pods/b.log"))
        );
    }

    #[test]
    fn resolving_relative_paths() {
        let prefix = "acme/20250421-00/";

        assert_eq!(
            relative_path(prefix, "acme/20250421-00/app.log.gz"),
            Some(PathBuf::from("app.log.gz"))
        );
        assert_eq!(
            relative_path(prefix, "acme/20250421-00/pods/web/app.log.gz"),
            Some(PathBuf::from("pods/web/app.log.gz"))
        );
        assert_eq!(
            relative_path(prefix, "acme/20250421-00//double.log"),
            Some(PathBuf::from("double.log"))
        );
    }

    #[test]
    fn rejecting_unsafe_relative_paths() {
        let prefix = "acme/20250421-00/";

        assert_eq!(relative_path(prefix, "acme/20250421-00/"), None);
        assert_eq!(relative_path(prefix, "acme/20250421-00/pods/"), None);
        assert_eq!(relative_path(prefix, "acme/20250421-00/../escape.log"), None);
        assert_eq!(relative_path(prefix, "acme/20250421-00/./here.log"), None);
        assert_eq!(relative_path(prefix, "other/20250421-00/app.log"), None);
    }
}
