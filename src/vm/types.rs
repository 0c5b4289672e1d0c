#[derive(Debug, Clone, Copy)]
pub struct LogLevel {
    /// Dump machine state and interrupt traffic after every step.
    pub internals: bool,
}

impl LogLevel {
    pub fn silent() -> LogLevel {
        LogLevel { internals: false }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::silent()
    }
}
