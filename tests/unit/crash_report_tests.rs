//! Unit tests for crash block layout, bounded rendering and log splitting.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use whisperer_diagnostics::crash::report::{
    render_report_block, split_blocks, write_report_block, FixedBuffer, DELIMITER,
};
use whisperer_diagnostics::models::crash::FaultDescription;
use whisperer_diagnostics::tasks::TaskRegistry;

fn registry() -> TaskRegistry {
    TaskRegistry::new(Duration::from_secs(300), Duration::from_secs(60))
}

fn signal_fault() -> FaultDescription {
    FaultDescription::Signal {
        name: "SIGSEGV",
        number: 11,
    }
}

fn timestamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap() + chrono::Duration::milliseconds(42)
}

#[tokio::test]
async fn block_layout_for_empty_registry() {
    let block = render_report_block(timestamp(), &signal_fault(), &registry());

    let expected = format!(
        "{DELIMITER}\n\
         Crash Report - 2026-03-14T09:26:53.042Z\n\
         {DELIMITER}\n\
         Fault: Fatal signal SIGSEGV (11)\n\
         \n\
         Task Statistics:\n  Total: 0\n  Completed: 0\n  Failed: 0\n  Cancelled: 0\n  Orphaned: 0\n\
         {DELIMITER}\n\n"
    );
    assert_eq!(block, expected);
}

#[tokio::test(start_paused = true)]
async fn block_lists_orphans_with_ids_names_and_ages() {
    let registry = registry();
    registry.start("a1", "download-model");
    registry.start("b2", "transcribe-chunk");
    registry.start("c3", "inject-text");
    registry.complete("c3", true, None);
    tokio::time::advance(Duration::from_millis(2500)).await;

    let block = render_report_block(timestamp(), &signal_fault(), &registry);

    assert!(block.contains("  Total: 3\n"));
    assert!(block.contains("  Completed: 1\n"));
    assert!(block.contains("  Orphaned: 2\n"));
    assert!(block.contains("\nOrphaned Tasks:\n"));
    assert!(block.contains("  - [a1] download-model (age: 2.5s)\n"));
    assert!(block.contains("  - [b2] transcribe-chunk (age: 2.5s)\n"));
    assert!(!block.contains("[c3]"));
}

#[tokio::test]
async fn panic_fault_renders_location_thread_and_backtrace() {
    let fault = FaultDescription::Panic {
        message: "index out of bounds".into(),
        location: Some("src/audio.rs:88:17".into()),
        thread: Some("capture".into()),
        backtrace: Some("0: audio::capture\n1: std::rt::lang_start".into()),
    };

    let text = fault.to_string();
    assert_eq!(
        text,
        "Uncaught panic: index out of bounds\n  Location: src/audio.rs:88:17\n  Thread: capture\n  Backtrace:\n    0: audio::capture\n    1: std::rt::lang_start"
    );

    let block = render_report_block(timestamp(), &fault, &registry());
    assert!(block.contains("Fault: Uncaught panic: index out of bounds\n"));
}

#[tokio::test]
async fn statistics_report_busy_registry_instead_of_blocking() {
    // Writer that re-enters the registry while the outer render holds the
    // lock, as a fault raised mid-update would.
    struct Reentrant<'a> {
        registry: &'a TaskRegistry,
        inner: String,
        nested: Option<String>,
    }

    impl std::fmt::Write for Reentrant<'_> {
        fn write_str(&mut self, s: &str) -> std::fmt::Result {
            if self.nested.is_none() {
                let mut nested = String::new();
                self.registry.write_statistics(&mut nested)?;
                self.nested = Some(nested);
            }
            self.inner.push_str(s);
            Ok(())
        }
    }

    let registry = registry();
    registry.start("t1", "load-model");
    let mut out = Reentrant {
        registry: &registry,
        inner: String::new(),
        nested: None,
    };
    registry.write_statistics(&mut out).expect("outer render");

    assert!(out.inner.starts_with("Task Statistics:\n"));
    assert_eq!(
        out.nested.as_deref(),
        Some("Task Statistics: unavailable (registry busy)\n")
    );
}

#[tokio::test]
async fn fixed_buffer_truncates_with_notice() {
    let registry = registry();
    for n in 0..200 {
        registry.start(format!("task-{n:04}"), "a-rather-long-operation-name");
    }

    let mut storage = vec![0u8; 1024];
    let mut buffer = FixedBuffer::new(&mut storage);
    let result = write_report_block(&mut buffer, timestamp(), &signal_fault(), &registry);
    assert!(result.is_err(), "render must stop at the buffer boundary");
    assert!(buffer.truncated());

    let bytes = buffer.finish();
    assert_eq!(bytes.len(), 1024);
    let text = String::from_utf8_lossy(bytes);
    assert!(text.starts_with(DELIMITER));
    assert!(text.ends_with("\n[report truncated]\n"));
}

#[test]
fn fixed_buffer_with_room_is_untouched() {
    let mut storage = [0u8; 64];
    let mut buffer = FixedBuffer::new(&mut storage);
    write!(buffer, "Fault: {}", 7).expect("fits");
    assert!(!buffer.truncated());
    assert_eq!(buffer.finish(), b"Fault: 7");
}

#[tokio::test]
async fn split_blocks_separates_appended_reports() {
    let registry = registry();
    let mut log = render_report_block(timestamp(), &signal_fault(), &registry);
    registry.start("t1", "capture-audio");
    log.push_str(&render_report_block(
        timestamp(),
        &FaultDescription::Signal {
            name: "SIGABRT",
            number: 6,
        },
        &registry,
    ));

    let blocks = split_blocks(&log);
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].contains("SIGSEGV"));
    assert!(blocks[1].contains("SIGABRT"));
    assert!(blocks[1].contains("[t1] capture-audio"));
    assert!(blocks.iter().all(|block| block.ends_with(DELIMITER)));
}

#[test]
fn split_blocks_of_empty_log_is_empty() {
    assert!(split_blocks("").is_empty());
}
