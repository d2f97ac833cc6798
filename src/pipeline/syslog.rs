// src/pipeline/syslog.rs
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::parser::haproxy::HaproxyParser;
use crate::parser::LogParser;
use crate::pipeline::Job;

const SYSLOG_SERVICE: &str = "syslog_ingest";

/// Network ingestion: UDP datagrams and TCP lines on one port, fed into
/// the same worker pool as the file tailers. Incoming records get the
/// HAProxy parser by default; lines it rejects are dropped in the worker.
pub struct SyslogServer {
    port: u16,
    jobs: mpsc::Sender<Job>,
}

impl SyslogServer {
    pub fn new(port: u16, jobs: mpsc::Sender<Job>) -> Self {
        SyslogServer { port, jobs }
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let udp = tokio::spawn(run_udp(self.port, self.jobs.clone(), shutdown.clone()));
        let tcp = tokio::spawn(run_tcp(self.port, self.jobs, shutdown));
        vec![udp, tcp]
    }
}

fn syslog_job(line: String, parser: &Arc<dyn LogParser>) -> Job {
    Job {
        service: SYSLOG_SERVICE.to_string(),
        log_path: "syslog".to_string(),
        line,
        parser: Arc::clone(parser),
    }
}

async fn run_udp(port: u16, jobs: mpsc::Sender<Job>, mut shutdown: watch::Receiver<bool>) {
    let addr = format!("0.0.0.0:{port}");
    let socket = match UdpSocket::bind(&addr).await {
        Ok(s) => s,
        Err(e) => {
            error!(addr = %addr, "syslog UDP listen error: {e}");
            return;
        }
    };
    info!(addr = %addr, "syslog UDP listening");

    let parser: Arc<dyn LogParser> = Arc::new(HaproxyParser);
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, _)) => {
                        let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if jobs.send(syslog_job(line, &parser)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!("syslog UDP read error: {e}"),
                }
            }
            _ = shutdown.changed() => {
                info!("syslog UDP stopping");
                return;
            }
        }
    }
}

async fn run_tcp(port: u16, jobs: mpsc::Sender<Job>, mut shutdown: watch::Receiver<bool>) {
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, "syslog TCP listen error: {e}");
            return;
        }
    };
    info!(addr = %addr, "syslog TCP listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, peer)) = accepted else { continue };
                debug!(peer = %peer, "syslog TCP connection");
                let jobs = jobs.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(handle_tcp_conn(stream, jobs, conn_shutdown));
            }
            _ = shutdown.changed() => {
                info!("syslog TCP stopping");
                return;
            }
        }
    }
}

async fn handle_tcp_conn(
    stream: tokio::net::TcpStream,
    jobs: mpsc::Sender<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    let parser: Arc<dyn LogParser> = Arc::new(HaproxyParser);
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if jobs.send(syslog_job(line, &parser)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}
