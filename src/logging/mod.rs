use std::io::{self, Write};

use async_trait::async_trait;
use env_logger::Builder;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, metadata, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

/// `io::Write` end handed to env_logger; lines are shipped to the file task.
pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// File logging service.
///
/// Installs env_logger with a channel-backed target, then drains the channel
/// into the configured file until shutdown.
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    pub fn writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    /// `RUST_LOG` refines the configured level.
    pub fn init_env_logger(&self) {
        Builder::new()
            .filter_level(self.config.level_filter())
            .parse_default_env()
            .target(env_logger::Target::Pipe(Box::new(self.writer())))
            .init();
    }

    async fn open(&self) -> io::Result<BufWriter<File>> {
        let path = std::path::Path::new(&self.config.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
                create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        Ok(BufWriter::new(file))
    }

    async fn drain(&mut self, file: &mut BufWriter<File>, mut shutdown: ShutdownWatch) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                eprintln!("Failed to write to log file {}: {e}", self.config.path);
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // keep what was queued before shutdown
        while let Ok(data) = self.receiver.try_recv() {
            let _ = file.write_all(&data).await;
        }
    }
}

#[async_trait]
impl Service for Logger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, shutdown: ShutdownWatch) {
        let mut file = match self.open().await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", self.config.path);
                return;
            }
        };

        self.drain(&mut file, shutdown).await;

        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file {}: {e}", self.config.path);
        }
    }

    fn name(&self) -> &'static str {
        "log sync"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;

    #[tokio::test]
    async fn test_drain_writes_lines_to_file() {
        let dir = std::env::temp_dir().join(format!("pingsix-gray-log-{}", std::process::id()));
        let path = dir.join("nested").join("gray.log");
        let mut logger = Logger::new(config::Log {
            path: path.to_string_lossy().to_string(),
            level: "info".to_string(),
        });

        let mut writer = logger.writer();
        writer.write_all(b"gray decision one\n").unwrap();
        writer.write_all(b"gray decision two\n").unwrap();

        let (tx, rx) = watch::channel(false);
        let mut file = logger.open().await.unwrap();
        tx.send(true).unwrap();
        logger.drain(&mut file, rx).await;
        file.flush().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!("gray decision one\ngray decision two\n", content);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
