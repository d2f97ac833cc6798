// src/pipeline/tailer.rs
use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CREATE_RETRY: Duration = Duration::from_secs(1);

struct Tailed {
    file: File,
    ino: u64,
    offset: u64,
}

/// Follows a file like `tail -F`: survives rotation (inode change or
/// length regression) and delayed creation, emitting whole lines on the
/// channel. Polling keeps this correct on bind mounts where inotify is
/// unreliable. I/O errors are logged and retried, never fatal.
pub fn spawn(
    path: PathBuf,
    tx: mpsc::Sender<String>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(path, tx, shutdown))
}

async fn run(path: PathBuf, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
    let mut tailed: Option<Tailed> = None;
    let mut pending: Vec<u8> = Vec::new();
    let mut first_open = true;

    loop {
        if *shutdown.borrow() {
            return;
        }

        if tailed.is_none() {
            // Seek-to-end only applies to a file that already existed when
            // the tailer started; anything that appears or rotates later is
            // read from the top.
            let attempt = open(&path, first_open).await;
            first_open = false;
            match attempt {
                Some(t) => {
                    info!(path = %path.display(), offset = t.offset, "tailing");
                    pending.clear();
                    tailed = Some(t);
                }
                None => {
                    // Not created yet (or vanished); keep waiting for it.
                    if sleep_or_shutdown(CREATE_RETRY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            }
        }
        let Some(t) = tailed.as_mut() else { continue };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.ino() != t.ino || meta.len() < t.offset => {
                debug!(path = %path.display(), "rotation detected, reopening");
                tailed = None;
                continue;
            }
            Err(_) => {
                debug!(path = %path.display(), "file removed, waiting for recreation");
                tailed = None;
                continue;
            }
            Ok(_) => {}
        }

        let mut buf = [0u8; 8192];
        loop {
            match t.file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    t.offset += n as u64;
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                            .trim_end_matches('\r')
                            .to_string();
                        if !line.is_empty() && tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), "tailer read error: {e}");
                    tailed = None;
                    break;
                }
            }
        }

        if sleep_or_shutdown(POLL_INTERVAL, &mut shutdown).await {
            return;
        }
    }
}

/// On the very first open of a pre-existing file we start at the end:
/// replaying an entire historical access log on agent restart would
/// double-count everything. Reopens after rotation read from the top.
async fn open(path: &PathBuf, seek_to_end: bool) -> Option<Tailed> {
    let mut file = File::open(path).await.ok()?;
    let meta = file.metadata().await.ok()?;
    let ino = meta.ino();
    let mut offset = 0;
    if seek_to_end {
        offset = meta.len();
        file.seek(SeekFrom::End(0)).await.ok()?;
    }
    Some(Tailed { file, ino, offset })
}

/// Returns true when shutdown was signalled during the wait.
async fn sleep_or_shutdown(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => false,
        _ = shutdown.changed() => true,
    }
}
