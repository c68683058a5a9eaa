// Test doubles for the process runner and metadata source.

use super::{
    proxy::{BoxedReader, ProcessControl, ProcessRunner, SpawnedProcess},
    source::MetadataSource,
    types::VideoInfo,
};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::{io::DuplexStream, sync::Notify};

enum Output {
    Bytes(Vec<u8>),
    /// stdout stays open until the process is killed
    Hanging,
    SpawnError,
}

/// Pretends to be yt-dlp: hands out canned stdout and records what it was
/// asked to run.
pub struct FakeRunner {
    output: Output,
    exit_code: i32,
    spawns: AtomicUsize,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    killed: Arc<AtomicBool>,
    kill_signal: Arc<Notify>,
    open_pipes: Mutex<Vec<DuplexStream>>,
}

impl FakeRunner {
    fn build(output: Output, exit_code: i32) -> Self {
        Self {
            output,
            exit_code,
            spawns: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            killed: Arc::new(AtomicBool::new(false)),
            kill_signal: Arc::new(Notify::new()),
            open_pipes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_output(chunks: Vec<Vec<u8>>, exit_code: i32) -> Self {
        Self::build(Output::Bytes(chunks.concat()), exit_code)
    }

    pub fn hanging() -> Self {
        Self::build(Output::Hanging, 0)
    }

    pub fn failing() -> Self {
        Self::build(Output::SpawnError, 0)
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn last_program(&self) -> Option<PathBuf> {
        self.calls.lock().unwrap().last().map(|(p, _)| p.clone())
    }

    pub fn last_args(&self) -> Option<Vec<String>> {
        self.calls.lock().unwrap().last().map(|(_, a)| a.clone())
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Write end of a hanging process's stdout; dropping it closes the pipe.
    pub fn take_stdout_writer(&self) -> Option<DuplexStream> {
        self.open_pipes.lock().unwrap().pop()
    }

    /// Resolves once `kill` has been called on a spawned process.
    pub async fn killed(&self) {
        if !self.was_killed() {
            self.kill_signal.notified().await;
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));

        let stdout: BoxedReader = match &self.output {
            Output::Bytes(bytes) => Box::new(std::io::Cursor::new(bytes.clone())),
            Output::Hanging => {
                let (reader, writer) = tokio::io::duplex(64);
                self.open_pipes.lock().unwrap().push(writer);
                Box::new(reader)
            }
            Output::SpawnError => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "permission denied",
                ))
            }
        };

        Ok(SpawnedProcess {
            stdout,
            stderr: Some(Box::new(std::io::Cursor::new(
                b"[download]  10.0% of 1.00MiB\n".to_vec(),
            ))),
            control: Box::new(FakeControl {
                exit_code: self.exit_code,
                killed: self.killed.clone(),
                kill_signal: self.kill_signal.clone(),
            }),
        })
    }
}

struct FakeControl {
    exit_code: i32,
    killed: Arc<AtomicBool>,
    kill_signal: Arc<Notify>,
}

#[async_trait]
impl ProcessControl for FakeControl {
    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(Some(self.exit_code))
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.kill_signal.notify_one();
        Ok(())
    }
}

/// Serves a fixed `VideoInfo`, or fails when there is none.
pub struct FakeSource {
    pub info: Option<VideoInfo>,
    pub requested: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(info: Option<VideoInfo>) -> Self {
        Self {
            info,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MetadataSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_info(&self, url: &str) -> Result<VideoInfo> {
        self.requested.lock().unwrap().push(url.to_string());
        self.info
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ERROR: [generic] Unsupported URL: {}", url))
    }
}
