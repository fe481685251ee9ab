pub mod archive;
pub mod command_log;
pub mod execution_engine;
pub mod reports;
pub mod steps;

pub use archive::{Archiver, ZipArchiver};
pub use command_log::{CommandOutput, FileLogSink, LogEntry, LogKind, LogSink};
pub use execution_engine::{
    EngineDeps, EngineSettings, ExecutionEngine, RecoveryReport, RunOutcome, RunReport,
};
pub use reports::ReportKind;
