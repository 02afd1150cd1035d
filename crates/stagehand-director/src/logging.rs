use crate::config::Config;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "stagehand-director.log";

/// Keeps the log file handle alive for the life of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

/// Copies each formatted event to stdout and/or the log file.
struct TeeWriter {
    stdout: bool,
    file: Option<Arc<Mutex<File>>>,
}

pub fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = env::var("STAGEHAND_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(&config.log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let stdout = config.log_stdout;
    let make_writer = BoxMakeWriter::new(move || TeeWriter {
        stdout,
        file: file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &Path) -> io::Result<LogGuard> {
    if log_dir.as_os_str().is_empty() {
        return Ok(LogGuard { file: None });
    }
    std::fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

impl TeeWriter {
    /// Output errors are dropped.
    fn each(&self, mut op: impl FnMut(&mut dyn Write) -> io::Result<()>) {
        if self.stdout {
            let _ = op(&mut io::stdout().lock());
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = op(&mut *file);
            }
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.each(|out| out.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.each(|out| out.flush());
        Ok(())
    }
}
