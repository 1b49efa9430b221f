use log::{LevelFilter, Log, Metadata, Record};

/// Fans every record out to a set of loggers.
pub struct MultiLogger {
    sinks: Vec<Box<dyn Log>>,
    target_caps: Vec<(String, LevelFilter)>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            target_caps: Vec::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.sinks.push(logger);
        self
    }

    /// Caps the verbosity of every target starting with `prefix`, for all
    /// loggers.
    pub fn with_target_cap(mut self, prefix: impl Into<String>, max_level: LevelFilter) -> Self {
        self.target_caps.push((prefix.into(), max_level));
        self
    }

    /// Installs this logger as the global logger. Filtering is left to the
    /// sinks and the target caps.
    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(LevelFilter::Trace);
        log::set_boxed_logger(Box::new(self))
    }

    fn capped(&self, metadata: &Metadata) -> bool {
        self.target_caps
            .iter()
            .any(|(prefix, cap)| metadata.target().starts_with(prefix) && metadata.level() > *cap)
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        !self.capped(metadata) && self.sinks.iter().any(|sink| sink.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if self.capped(record.metadata()) {
            return;
        }

        for sink in self.sinks.iter().filter(|s| s.enabled(record.metadata())) {
            sink.log(record);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}
