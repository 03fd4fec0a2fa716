//! Pooled child processes.
//!
//! # Responsibilities
//! - Spawn a child from prepared parameters, with piped stdin/stdout
//! - Watch for the child's exit in a background task
//! - Refuse to hand out or keep an item whose child has exited
//!
//! Destroying an item kills its child.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use super::StockClass;

/// What to spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChildRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
    pub current_dir: Option<PathBuf>,
}

impl ChildRequest {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Stable stock key for these parameters.
    pub fn stock_key(&self) -> String {
        let mut key = self.program.display().to_string();
        for arg in &self.args {
            key.push(' ');
            key.push_str(arg);
        }
        key
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if self.clear_env {
            command.env_clear();
        }
        command.envs(&self.env);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// A running child owned by the stock.
pub struct ChildProcess {
    pid: Option<u32>,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    exited: Arc<AtomicBool>,
    /// Dropping the sender kills the child.
    _kill: oneshot::Sender<()>,
}

impl ChildProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

#[derive(Default)]
pub struct ChildStockClass;

impl ChildStockClass {
    pub fn new() -> Self {
        Self
    }
}

async fn watch_child(
    key: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
) {
    let status: io::Result<ExitStatus> = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(key = %key, error = %e, "Failed to kill child");
            }
            child.wait().await
        }
    };
    exited.store(true, Ordering::Release);

    match status {
        Ok(status) => tracing::debug!(key = %key, status = %status, "Child exited"),
        Err(e) => tracing::warn!(key = %key, error = %e, "Failed to wait for child"),
    }
}

impl StockClass for ChildStockClass {
    type Request = ChildRequest;
    type Item = ChildProcess;

    fn create<'a>(
        &'a self,
        key: &'a str,
        request: &'a ChildRequest,
    ) -> BoxFuture<'a, io::Result<ChildProcess>> {
        Box::pin(async move {
            let mut child = request.command().spawn()?;
            let pid = child.id();
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();

            let exited = Arc::new(AtomicBool::new(false));
            let (kill_tx, kill_rx) = oneshot::channel();
            tokio::spawn(watch_child(key.to_string(), child, kill_rx, exited.clone()));

            tracing::debug!(key = %key, pid = ?pid, "Child spawned");
            Ok(ChildProcess {
                pid,
                stdin,
                stdout,
                exited,
                _kill: kill_tx,
            })
        })
    }

    fn borrow(&self, item: &mut ChildProcess) -> bool {
        !item.has_exited()
    }

    fn release(&self, item: &mut ChildProcess) -> bool {
        !item.has_exited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::{Stock, StockOptions};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn wait_exit(child: &ChildProcess) {
        for _ in 0..200 {
            if child.has_exited() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("child did not exit");
    }

    #[tokio::test]
    async fn test_child_talks_over_pipes() {
        let stock = Stock::new("cat", Arc::new(ChildStockClass::new()), StockOptions::default());
        let request = ChildRequest::new("cat");

        let mut child = stock.get(&request).await.unwrap();
        let mut stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        stdin.write_all(b"hello child\n").await.unwrap();
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello child\n");
    }

    #[tokio::test]
    async fn test_exited_child_is_not_reused() {
        let stock = Stock::new("true", Arc::new(ChildStockClass::new()), StockOptions::default());
        let request = ChildRequest::new("sh").arg("-c").arg("exit 0");

        let child = stock.get(&request).await.unwrap();
        let first_pid = child.pid();
        wait_exit(&child).await;
        child.put(true);
        assert_eq!(stock.stats().idle, 0);

        let child = stock.get(&request).await.unwrap();
        assert_ne!(child.pid(), first_pid);
    }

    #[tokio::test]
    async fn test_destroy_kills_child() {
        let class = ChildStockClass::new();
        let child = class
            .create("sleep", &ChildRequest::new("sleep").arg("30"))
            .await
            .unwrap();
        let exited = child.exited.clone();

        class.destroy(child);
        for _ in 0..200 {
            if exited.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("child survived destroy");
    }

    #[test]
    fn test_stock_key() {
        let request = ChildRequest::new("/usr/bin/app").arg("--fcgi").env("A", "1");
        assert_eq!(request.stock_key(), "/usr/bin/app --fcgi");
    }
}
