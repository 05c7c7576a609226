//! Integration tests for the engine logging system
//!
//! These tests verify the logging system functionality.
//! No GPU required.
//!
//! Run with: cargo test --test logging_integration_tests

use nebula_engine::log::{log, log_detailed};
use nebula_engine::nebula::log::{reset_logger, set_logger, LogEntry, LogSeverity, Logger};
use nebula_engine::nebula::Error;
use nebula_engine::{engine_err, engine_error, engine_info};
use serial_test::serial;
use std::sync::{Arc, Mutex};

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                entries: entries.clone(),
            },
            entries,
        )
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    log(LogSeverity::Info, "test::module", "Test info message".to_string());
    log(LogSeverity::Warn, "test::module", "Test warning message".to_string());
    log(LogSeverity::Error, "test::module", "Test error message".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 3);

    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].source, "test::module");
    assert_eq!(captured[0].message, "Test info message");

    assert_eq!(captured[1].severity, LogSeverity::Warn);
    assert_eq!(captured[2].severity, LogSeverity::Error);

    drop(captured);
    reset_logger();
}

#[test]
#[serial]
fn test_integration_error_logging_with_location() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    log_detailed(
        LogSeverity::Error,
        "test::error",
        "Critical error occurred".to_string(),
        "test_file.rs",
        42,
    );

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);

    let entry = &captured[0];
    assert_eq!(entry.severity, LogSeverity::Error);
    assert_eq!(entry.source, "test::error");
    assert_eq!(entry.message, "Critical error occurred");
    assert_eq!(entry.file, Some("test_file.rs"));
    assert_eq!(entry.line, Some(42));

    drop(captured);
    reset_logger();
}

#[test]
#[serial]
fn test_integration_logger_reset() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    log(LogSeverity::Info, "test", "Message 1".to_string());
    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 1);
    }

    reset_logger();

    // Goes to the default logger, not the captured one
    log(LogSeverity::Info, "test", "Message 2".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
}

#[test]
#[serial]
fn test_integration_logging_different_severities() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    log(LogSeverity::Trace, "test", "Trace message".to_string());
    log(LogSeverity::Debug, "test", "Debug message".to_string());
    log(LogSeverity::Info, "test", "Info message".to_string());
    log(LogSeverity::Warn, "test", "Warn message".to_string());
    log(LogSeverity::Error, "test", "Error message".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 5);

    assert_eq!(captured[0].severity, LogSeverity::Trace);
    assert_eq!(captured[1].severity, LogSeverity::Debug);
    assert_eq!(captured[2].severity, LogSeverity::Info);
    assert_eq!(captured[3].severity, LogSeverity::Warn);
    assert_eq!(captured[4].severity, LogSeverity::Error);

    drop(captured);
    reset_logger();
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_logging_macros() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    engine_info!("test::macros", "Frame {} started", 7);
    engine_error!("test::macros", "Device lost: {:?}", "timeout");

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 2);

    assert_eq!(captured[0].severity, LogSeverity::Info);
    assert_eq!(captured[0].message, "Frame 7 started");
    assert!(captured[0].file.is_none());

    assert_eq!(captured[1].severity, LogSeverity::Error);
    assert_eq!(captured[1].message, "Device lost: \"timeout\"");
    // Error macro records the call site
    assert!(captured[1].file.is_some());
    assert!(captured[1].line.is_some());

    drop(captured);
    reset_logger();
}

#[test]
#[serial]
fn test_integration_engine_err_logs_and_yields_error() {
    let (test_logger, entries) = TestLogger::new();
    set_logger(test_logger);

    let error = engine_err!("test::macros", "allocation of {} bytes failed", 1024);

    match error {
        Error::BackendError(message) => {
            assert_eq!(message, "allocation of 1024 bytes failed");
        }
        other => panic!("expected BackendError, got {:?}", other),
    }

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert_eq!(captured[0].message, "allocation of 1024 bytes failed");

    drop(captured);
    reset_logger();
}
