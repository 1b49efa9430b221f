use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Error};
use log::{LevelFilter, Log, Metadata, Record};

use osutils::files;

use super::LogEntry;

/// Appends JSON log entries to a file that is kept across runs.
pub struct BackgroundLog {
    file: Option<Mutex<File>>,
    max_level: LevelFilter,
}

impl BackgroundLog {
    /// Opens `path` for appending. If that fails the logger stays disabled and
    /// the reason is printed to stderr, since logging is not set up yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let file = match open_for_append(path.as_ref()) {
            Ok(file) => Some(Mutex::new(file)),
            Err(err) => {
                eprintln!("Logging setup error: {err:?}");
                None
            }
        };

        Self {
            file,
            max_level: LevelFilter::Trace,
        }
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn append(&self, record: &Record) -> Result<(), Error> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let mut line = serde_json::to_string(&LogEntry::from(record))?;
        line.push('\n');

        let mut file = file
            .lock()
            .map_err(|_| anyhow::anyhow!("Background log lock is poisoned"))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn open_for_append(path: &Path) -> Result<File, Error> {
    if let Some(parent) = path.parent() {
        files::create_dirs(parent)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open background log '{}'", path.display()))
}

impl Log for BackgroundLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.file.is_some() && metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // Best effort
        let _ = self.append(record);
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = self.file.as_ref().map(|f| f.lock()) {
            let _ = file.flush();
        }
    }
}
