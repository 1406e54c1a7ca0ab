// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Output redirection swaps process-wide descriptors, so it lives in its own
//! test binary with a single test.

use std::io::Write;

use drover_core::LogSink;

#[test]
fn test_redirect_captures_and_restores_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let sink = LogSink::open(dir.path().join("r.log"), false).unwrap();

    sink.info("before");
    {
        let _redirect = sink.redirect().unwrap();
        writeln!(std::io::stdout(), "to stdout").unwrap();
        writeln!(std::io::stderr(), "to stderr").unwrap();
        std::process::Command::new("sh")
            .arg("-c")
            .arg("echo from child")
            .status()
            .unwrap();
        std::io::stdout().flush().unwrap();
    }
    writeln!(std::io::stdout(), "after restore").unwrap();
    std::io::stdout().flush().unwrap();
    sink.info("after");

    let content = std::fs::read_to_string(sink.path()).unwrap();
    assert!(content.contains("INFO: before"));
    assert!(content.contains("to stdout"));
    assert!(content.contains("to stderr"));
    assert!(content.contains("from child"));
    assert!(content.contains("INFO: after"));
    assert!(!content.contains("after restore"));
}
