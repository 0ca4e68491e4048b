use crate::config::Config;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_FILE_NAME: &str = "wsbar.log";

pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// stdout carries the bar protocol, so logs go to stderr and optionally a file.
pub fn init_logging(config: &Config) -> Option<LogGuard> {
    let filter = EnvFilter::new(log_directive(
        config.debug,
        std::env::var("WSBAR_LOG_LEVEL").ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    ));
    let guard = match &config.log_dir {
        Some(dir) => match open_log_file(dir) {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("log_file_error: {err}");
                LogGuard { file: None }
            }
        },
        None => LogGuard { file: None },
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// `--debug`, then `WSBAR_LOG_LEVEL`, then `RUST_LOG`, then `info`.
fn log_directive(debug: bool, level: Option<String>, rust_log: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    level
        .into_iter()
        .chain(rust_log)
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

struct MultiWriter {
    stderr: io::Stderr,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stderr: io::stderr(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stderr.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stderr.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &Path) -> io::Result<LogGuard> {
    std::fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_precedence() {
        let warn = || Some("warn".to_string());
        let trace = || Some("wsbar=trace".to_string());
        assert_eq!(log_directive(true, warn(), trace()), "debug");
        assert_eq!(log_directive(false, warn(), trace()), "warn");
        assert_eq!(log_directive(false, Some(" ".to_string()), trace()), "wsbar=trace");
        assert_eq!(log_directive(false, None, None), "info");
    }

    #[test]
    fn log_file_is_created_and_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("logs");
        let guard = open_log_file(&nested).expect("open");
        let mut writer = MultiWriter::new(guard.file.clone());
        writer.write_all(b"line one\n").expect("write");
        writer.flush().expect("flush");
        drop(writer);
        drop(guard);

        let guard = open_log_file(&nested).expect("reopen");
        let mut writer = MultiWriter::new(guard.file.clone());
        writer.write_all(b"line two\n").expect("write");
        writer.flush().expect("flush");

        let contents = std::fs::read_to_string(nested.join(LOG_FILE_NAME)).expect("read");
        assert_eq!(contents, "line one\nline two\n");
    }
}
