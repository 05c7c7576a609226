//! Unit tests for log.rs
//!
//! Tests Logger trait, LogEntry, LogSeverity, the global logger storage and
//! the error-constructing macros. Tests touching the global logger run
//! serially.

use crate::error::Error;
use crate::log::{self, DefaultLogger, LogEntry, LogSeverity, Logger};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_copy() {
    let sev1 = LogSeverity::Info;
    let sev2 = sev1; // Copy, not move
    assert_eq!(sev1, sev2);
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_creation_without_file_line() {
    let entry = LogEntry {
        severity: LogSeverity::Info,
        timestamp: SystemTime::now(),
        source: "nebula::CmdBuffer".to_string(),
        message: "frame submitted".to_string(),
        file: None,
        line: None,
    };

    assert_eq!(entry.severity, LogSeverity::Info);
    assert_eq!(entry.source, "nebula::CmdBuffer");
    assert!(entry.file.is_none());
    assert!(entry.line.is_none());
}

#[test]
fn test_log_entry_clone() {
    let entry1 = LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "nebula::vulkan".to_string(),
        message: "device lost".to_string(),
        file: Some("vulkan.rs"),
        line: Some(42),
    };

    let entry2 = entry1.clone();
    assert_eq!(entry1.severity, entry2.severity);
    assert_eq!(entry1.file, entry2.file);
    assert_eq!(entry1.line, entry2.line);
}

#[test]
fn test_default_logger_does_not_panic() {
    let logger = DefaultLogger;
    logger.log(&LogEntry {
        severity: LogSeverity::Debug,
        timestamp: SystemTime::now(),
        source: "nebula::test".to_string(),
        message: "message".to_string(),
        file: None,
        line: None,
    });
}

// ============================================================================
// GLOBAL LOGGER + MACRO TESTS (serial: shared global state)
// ============================================================================

/// Captures log entries into a shared vector
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[test]
#[serial]
fn test_set_logger_captures_entries() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger {
        entries: entries.clone(),
    });

    crate::engine_info!("nebula::test", "hello {}", 7);

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].source, "nebula::test");
    assert_eq!(captured[0].message, "hello 7");

    drop(captured);
    log::reset_logger();
}

#[test]
#[serial]
fn test_engine_error_includes_file_line() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger {
        entries: entries.clone(),
    });

    crate::engine_error!("nebula::test", "broken: {}", "reason");

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert!(captured[0].file.is_some());
    assert!(captured[0].line.is_some());

    drop(captured);
    log::reset_logger();
}

#[test]
#[serial]
fn test_engine_err_produces_backend_error() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger {
        entries: entries.clone(),
    });

    let err = crate::engine_err!("nebula::test", "queue submit failed: {}", -4);
    match err {
        Error::BackendError(msg) => assert_eq!(msg, "queue submit failed: -4"),
        other => panic!("expected BackendError, got {:?}", other),
    }

    // The macro also logs the message at Error severity
    assert_eq!(entries.lock().unwrap().len(), 1);

    log::reset_logger();
}

#[test]
#[serial]
fn test_engine_bail_returns_early() {
    fn failing() -> crate::error::Result<u32> {
        crate::engine_bail!("nebula::test", "unsupported layout");
    }

    log::reset_logger();
    match failing() {
        Err(Error::BackendError(msg)) => assert!(msg.contains("unsupported layout")),
        other => panic!("expected BackendError, got {:?}", other),
    }
}
