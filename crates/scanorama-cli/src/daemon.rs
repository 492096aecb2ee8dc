//! PID-file-based daemon lifecycle.
//!
//! Single-instance enforcement uses the PID file plus a no-op-signal alive
//! probe; stale files left by crashed processes are detected and replaced.
//! Background start spawns a detached child re-executing this binary in
//! foreground mode and returns only once the API answers its liveness
//! probe.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use scanorama_core::config::AppConfig;

const DEFAULT_PID_FILE: &str = "/tmp/scanorama.pid";
const DEFAULT_LOG_FILE: &str = "/tmp/scanorama.log";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

fn pid_path(pid_file: Option<&str>) -> String {
    pid_file.unwrap_or(DEFAULT_PID_FILE).to_string()
}

fn log_path(log_file: Option<&str>) -> String {
    log_file.unwrap_or(DEFAULT_LOG_FILE).to_string()
}

/// True when a process with this PID exists (no-op signal probe).
pub fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Read the PID file: an ASCII decimal integer.
pub fn read_pid(path: &str) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Create the PID file exclusively; a stale file (dead PID) is replaced, a
/// live one refuses the start.
pub fn write_pid_file(path: &str) -> anyhow::Result<()> {
    if let Some(existing) = read_pid(path) {
        if pid_alive(existing) {
            bail!("already running with pid {existing} (pid file {path})");
        }
        tracing::warn!(pid = existing, path, "Removing stale pid file");
        let _ = fs::remove_file(path);
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("creating pid file {path}"))?;
    write!(file, "{}", std::process::id())?;
    Ok(())
}

pub fn remove_pid_file(path: &str) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path, error = %e, "Failed to remove pid file");
        }
    }
}

/// Spawn a detached child running `server start --foreground`, then wait
/// for the API liveness probe before returning to the caller.
pub fn start_background(
    config: &AppConfig,
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
    pid_file: Option<String>,
    log_file: Option<String>,
) -> anyhow::Result<()> {
    let pid_file = pid_path(pid_file.as_deref());
    let log_file = log_path(log_file.as_deref());

    if let Some(existing) = read_pid(&pid_file) {
        if pid_alive(existing) {
            bail!("already running with pid {existing}");
        }
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("opening log file {log_file}"))?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe().context("resolving current executable")?;
    let mut cmd = Command::new(exe);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    cmd.arg("server")
        .arg("start")
        .arg("--foreground")
        .arg("--pid-file")
        .arg(&pid_file)
        .arg("--log-file")
        .arg(&log_file);
    let probe_host = host.clone().unwrap_or_else(|| config.api.host.clone());
    let probe_port = port.unwrap_or(config.api.port);
    if let Some(host) = host {
        cmd.arg("--host").arg(host);
    }
    if let Some(port) = port {
        cmd.arg("--port").arg(port.to_string());
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()
        .context("spawning server process")?;
    let child_pid = child.id();
    println!("starting scanorama server (pid {child_pid})...");

    if probe_liveness(&probe_host, probe_port, STARTUP_TIMEOUT)? {
        println!("server started: http://{probe_host}:{probe_port}/api/v1 (log: {log_file})");
        Ok(())
    } else {
        bail!(
            "server did not answer its liveness probe within {}s; see {log_file}",
            STARTUP_TIMEOUT.as_secs()
        )
    }
}

/// Poll `/api/v1/liveness` until it answers 200 or the timeout elapses.
fn probe_liveness(host: &str, port: u16, timeout: Duration) -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let url = format!("http://{host}:{port}/api/v1/liveness");

    runtime.block_on(async move {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(response) = client.get(&url).send().await {
                if response.status().is_success() {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
}

fn probe_url_ok(url: &str, api_key: Option<&str>) -> bool {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return false;
    };
    runtime.block_on(async move {
        let Ok(client) = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
        else {
            return false;
        };
        let mut request = client.get(url);
        if let Some(key) = api_key {
            request = request.header("X-API-Key", key);
        }
        matches!(request.send().await, Ok(r) if r.status().is_success())
    })
}

/// Graceful stop: SIGTERM, poll for exit, escalate to SIGKILL on timeout.
pub fn stop(_config: &AppConfig, pid_file: Option<String>) -> anyhow::Result<()> {
    let pid_file = pid_path(pid_file.as_deref());
    let Some(pid) = read_pid(&pid_file) else {
        println!("not running (no pid file at {pid_file})");
        return Ok(());
    };

    if !pid_alive(pid) {
        println!("not running; removing stale pid file");
        remove_pid_file(&pid_file);
        return Ok(());
    }

    println!("stopping scanorama server (pid {pid})...");
    kill(Pid::from_raw(pid), Signal::SIGTERM).context("sending SIGTERM")?;

    let deadline = Instant::now() + STOP_TIMEOUT;
    let mut last_progress = Instant::now();
    while pid_alive(pid) {
        if Instant::now() >= deadline {
            eprintln!("graceful stop timed out; sending SIGKILL");
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            std::thread::sleep(Duration::from_secs(1));
            break;
        }
        if last_progress.elapsed() >= Duration::from_secs(5) {
            println!("still waiting for pid {pid} to exit...");
            last_progress = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    remove_pid_file(&pid_file);
    println!("stopped");
    Ok(())
}

/// Report `(pid_alive, api_liveness, api_health)` plus PID-file details.
pub fn status(config: &AppConfig, pid_file: Option<String>) -> anyhow::Result<()> {
    let pid_file = pid_path(pid_file.as_deref());
    let pid = read_pid(&pid_file);
    let alive = pid.is_some_and(pid_alive);

    let api_key = scanorama_core::config::resolve_cli_api_key().unwrap_or_default();
    let base = format!("http://{}:{}/api/v1", config.api.host, config.api.port);
    let liveness = alive && probe_url_ok(&format!("{base}/liveness"), api_key.as_deref());
    let health = alive && probe_url_ok(&format!("{base}/health"), api_key.as_deref());

    if alive {
        let pid = pid.expect("alive implies pid");
        println!("status:   running{}", if health { " (healthy)" } else if liveness { " (degraded)" } else { " (api unreachable)" });
        println!("pid:      {pid}");
        println!("pid file: {pid_file}");
        if let Ok(meta) = fs::metadata(&pid_file) {
            if let Ok(modified) = meta.modified() {
                let started: chrono::DateTime<chrono::Utc> = modified.into();
                let uptime = chrono::Utc::now() - started;
                println!("started:  {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
                println!("uptime:   {}h {}m", uptime.num_hours(), uptime.num_minutes() % 60);
            }
        }
    } else {
        println!("status:   not running");
        if pid.is_some() {
            println!("pid file: {pid_file} (stale)");
        }
    }
    Ok(())
}

/// Stop then start; starts directly when nothing is running.
pub fn restart(
    config: &AppConfig,
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
    pid_file: Option<String>,
    log_file: Option<String>,
) -> anyhow::Result<()> {
    let path = pid_path(pid_file.as_deref());
    if read_pid(&path).is_some_and(pid_alive) {
        stop(config, pid_file.clone())?;
    }
    start_background(config, config_path, host, port, pid_file, log_file)
}

/// Print the last `lines` of the server log; with `follow`, keep streaming
/// appended output.
pub fn logs(log_file: Option<String>, follow: bool, lines: usize) -> anyhow::Result<()> {
    let path = log_path(log_file.as_deref());
    if !Path::new(&path).exists() {
        bail!("log file {path} does not exist");
    }

    let file = fs::File::open(&path)?;
    let reader = BufReader::new(file);
    let all: Vec<String> = reader.lines().map_while(Result::ok).collect();
    for line in all.iter().skip(all.len().saturating_sub(lines)) {
        println!("{line}");
    }

    if follow {
        let mut file = fs::File::open(&path)?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        loop {
            std::thread::sleep(Duration::from_millis(500));
            let len = file.metadata()?.len();
            if len < offset {
                // Rotated or truncated; start over.
                offset = 0;
            }
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = String::new();
                file.read_to_string(&mut buf)?;
                offset = file.seek(SeekFrom::Current(0))?;
                print!("{buf}");
                std::io::stdout().flush()?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanorama.pid");
        let path = path.to_str().unwrap();

        write_pid_file(path).unwrap();
        assert_eq!(read_pid(path), Some(std::process::id() as i32));

        // Our own PID is alive, so a second writer must refuse.
        assert!(write_pid_file(path).is_err());

        remove_pid_file(path);
        assert_eq!(read_pid(path), None);
        // Removing twice is fine.
        remove_pid_file(path);
    }

    #[test]
    fn stale_pid_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanorama.pid");
        let path = path.to_str().unwrap();

        // PID 0 is never a valid live target process for us; kill(0, ...)
        // addresses a process group, so use an implausibly high PID instead.
        fs::write(path, "999999999").unwrap();
        write_pid_file(path).unwrap();
        assert_eq!(read_pid(path), Some(std::process::id() as i32));
        remove_pid_file(path);
    }

    #[test]
    fn garbage_pid_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanorama.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid(path.to_str().unwrap()), None);
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(999_999_999));
    }
}
