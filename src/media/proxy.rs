use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use axum::body::Bytes;
use futures::{ready, Stream};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

/// Asks yt-dlp for a single file that already carries both streams, so it
/// never has to merge (which cannot be done on stdout).
pub const DEFAULT_FORMAT: &str = "best[vcodec!=none][acodec!=none]";

/// Stderr lines kept for the exit diagnostic
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing url or filename")]
    MissingField,

    #[error("yt-dlp binary not found at {}", .0.display())]
    BinaryMissing(PathBuf),

    #[error("Failed to launch yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct SpawnedProcess {
    pub stdout: BoxedReader,
    pub stderr: Option<BoxedReader>,
    pub control: Box<dyn ProcessControl>,
}

#[async_trait]
pub trait ProcessControl: Send {
    /// Waits for exit; `None` when the process was terminated by a signal.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess>;
}

pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn spawn(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stdout was not captured"))?;
        let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);

        Ok(SpawnedProcess {
            stdout: Box::new(stdout),
            stderr,
            control: Box::new(ChildControl(child)),
        })
    }
}

struct ChildControl(Child);

#[async_trait]
impl ProcessControl for ChildControl {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.0.wait().await?.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill().await
    }
}

/// One download request: what to fetch and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyJob {
    pub url: String,
    pub filename: String,
    pub format_id: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ProxyJob {
    pub fn new(
        url: Option<String>,
        filename: Option<String>,
        format_id: Option<String>,
    ) -> Result<Self, ProxyError> {
        match (non_blank(url), non_blank(filename)) {
            (Some(url), Some(filename)) => Ok(Self {
                url,
                filename,
                format_id: non_blank(format_id),
            }),
            _ => Err(ProxyError::MissingField),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            self.format_id
                .clone()
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            "-o".to_string(),
            "-".to_string(),
            "--".to_string(),
            self.url.clone(),
        ]
    }
}

pub struct StreamProxy {
    binary: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl StreamProxy {
    pub fn new(binary: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { binary, runner }
    }

    /// Launches yt-dlp for `job` and returns its stdout as a byte stream.
    ///
    /// Fails before anything is streamed when the binary is missing or
    /// cannot be started. A non-zero exit after stdout has closed is only
    /// logged, since the response is already on its way to the client.
    /// Dropping the stream early kills the process.
    pub async fn proxy_download(&self, job: ProxyJob) -> Result<ProxyStream, ProxyError> {
        let present = tokio::fs::metadata(&self.binary)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !present {
            error!("yt-dlp binary not found at: {}", self.binary.display());
            return Err(ProxyError::BinaryMissing(self.binary.clone()));
        }

        let args = job.args();
        debug!("Spawning {} {:?}", self.binary.display(), args);

        let process = self.runner.spawn(&self.binary, &args).map_err(|e| {
            error!("yt-dlp process error: {}", e);
            ProxyError::Spawn(e)
        })?;

        info!(
            "Streaming {} as {} (format {})",
            job.url,
            job.filename,
            job.format_id.as_deref().unwrap_or(DEFAULT_FORMAT)
        );

        let stderr_task = process
            .stderr
            .map(|stderr| tokio::spawn(drain_stderr(stderr)));
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(supervise(
            process.control,
            done_rx,
            stderr_task,
            job.filename.clone(),
        ));

        Ok(ProxyStream {
            inner: ReaderStream::new(process.stdout),
            done: Some(done_tx),
            sent: 0,
        })
    }
}

/// yt-dlp reports progress on stderr, so it is only logged and its tail kept
/// for diagnostics.
async fn drain_stderr(stderr: BoxedReader) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("yt-dlp stderr: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read yt-dlp stderr: {}", e);
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}

/// Either reaps the process once its output is fully streamed, or kills it
/// when the stream is dropped first.
async fn supervise(
    mut control: Box<dyn ProcessControl>,
    done: oneshot::Receiver<()>,
    stderr_task: Option<JoinHandle<String>>,
    filename: String,
) {
    if done.await.is_err() {
        warn!("Client stopped reading {}, killing yt-dlp", filename);
        if let Err(e) = control.kill().await {
            error!("Failed to kill yt-dlp process: {}", e);
        }
        return;
    }

    let status = control.wait().await;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    match status {
        Ok(Some(0)) => info!("yt-dlp finished streaming {}", filename),
        Ok(Some(code)) => {
            error!(
                "yt-dlp process exited with code {} after streaming {}: {}",
                code, filename, stderr
            );
        }
        Ok(None) => {
            error!(
                "yt-dlp process was terminated by a signal while streaming {}: {}",
                filename, stderr
            );
        }
        Err(e) => error!("Failed to wait for yt-dlp process: {}", e),
    }
}

/// yt-dlp stdout as a stream of chunks, in the order they were written.
pub struct ProxyStream {
    inner: ReaderStream<BoxedReader>,
    done: Option<oneshot::Sender<()>>,
    sent: usize,
}

impl Stream for ProxyStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));

        match &item {
            Some(Ok(chunk)) => this.sent += chunk.len(),
            Some(Err(e)) => error!("Failed to read yt-dlp stdout: {}", e),
            None => {
                if let Some(done) = this.done.take() {
                    debug!("yt-dlp stdout closed after {} bytes", this.sent);
                    let _ = done.send(());
                }
            }
        }

        Poll::Ready(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mocks::FakeRunner;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn job() -> ProxyJob {
        ProxyJob::new(
            Some("https://youtu.be/abc".to_string()),
            Some("clip.mp4".to_string()),
            Some("18".to_string()),
        )
        .unwrap()
    }

    fn fake_binary() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yt-dlp");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    #[test]
    fn test_job_requires_url_and_filename() {
        assert!(matches!(
            ProxyJob::new(None, Some("a.mp4".into()), None),
            Err(ProxyError::MissingField)
        ));
        assert!(matches!(
            ProxyJob::new(Some("https://x".into()), Some("  ".into()), None),
            Err(ProxyError::MissingField)
        ));
    }

    #[test]
    fn test_job_args() {
        assert_eq!(
            job().args(),
            vec!["-f", "18", "-o", "-", "--", "https://youtu.be/abc"]
        );

        let default = ProxyJob::new(
            Some("https://youtu.be/abc".into()),
            Some("clip.mp4".into()),
            Some(String::new()),
        )
        .unwrap();
        assert_eq!(default.args()[1], DEFAULT_FORMAT);
    }

    #[tokio::test]
    async fn test_streams_stdout_in_order() {
        let (_dir, binary) = fake_binary();
        let chunks = vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()];
        let runner = Arc::new(FakeRunner::with_output(chunks, 0));
        let proxy = StreamProxy::new(binary.clone(), runner.clone());

        let stream = proxy.proxy_download(job()).await.unwrap();
        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"ABC");

        assert_eq!(runner.spawn_count(), 1);
        assert_eq!(runner.last_program(), Some(binary));
        assert_eq!(runner.last_args().unwrap()[1], "18");
    }

    #[tokio::test]
    async fn test_non_zero_exit_after_output_is_not_an_error() {
        let (_dir, binary) = fake_binary();
        let runner = Arc::new(FakeRunner::with_output(vec![b"partial".to_vec()], 1));
        let proxy = StreamProxy::new(binary, runner.clone());

        let stream = proxy.proxy_download(job()).await.unwrap();
        let chunks: Vec<std::io::Result<Bytes>> = stream.collect().await;
        assert!(chunks.iter().all(|c| c.is_ok()));
        assert!(!runner.was_killed());
    }

    #[tokio::test]
    async fn test_missing_binary_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::with_output(vec![b"A".to_vec()], 0));
        let proxy = StreamProxy::new(dir.path().join("yt-dlp"), runner.clone());

        let err = proxy.proxy_download(job()).await.err().unwrap();
        assert!(matches!(err, ProxyError::BinaryMissing(_)));
        assert_eq!(runner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let (_dir, binary) = fake_binary();
        let runner = Arc::new(FakeRunner::failing());
        let proxy = StreamProxy::new(binary, runner);

        let err = proxy.proxy_download(job()).await.err().unwrap();
        assert!(matches!(err, ProxyError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_chunks_flow_before_process_exits() {
        let (_dir, binary) = fake_binary();
        let runner = Arc::new(FakeRunner::hanging());
        let proxy = StreamProxy::new(binary, runner.clone());

        let mut stream = proxy.proxy_download(job()).await.unwrap();
        let mut stdout = runner.take_stdout_writer().unwrap();

        stdout.write_all(b"first").await.unwrap();
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("chunk was held back until exit")
            .unwrap()
            .unwrap();
        assert_eq!(chunk.as_ref(), b"first");
        assert!(!runner.was_killed());

        stdout.write_all(b"second").await.unwrap();
        drop(stdout);
        let rest: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(rest.concat(), b"second");
        assert!(!runner.was_killed());
    }

    #[tokio::test]
    async fn test_dropping_stream_kills_process() {
        let (_dir, binary) = fake_binary();
        let runner = Arc::new(FakeRunner::hanging());
        let proxy = StreamProxy::new(binary, runner.clone());

        let stream = proxy.proxy_download(job()).await.unwrap();
        drop(stream);

        tokio::time::timeout(Duration::from_secs(5), runner.killed())
            .await
            .expect("process was not killed");
        assert!(runner.was_killed());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_tokio_runner_pipes_stdout() {
        let runner = TokioProcessRunner;
        let mut process = runner
            .spawn(
                Path::new("/bin/sh"),
                &["-c".to_string(), "printf hello".to_string()],
            )
            .unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut process.stdout, &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(process.control.wait().await.unwrap(), Some(0));
    }
}
