//! Leniency for programs that start a network server.
//!
//! A server never exits on its own, so a run that is cut off at the time
//! limit, or that loses a race for its port, is reported as a successful
//! demonstration instead of a failure.

use std::{ops::RangeInclusive, sync::LazyLock, time::Duration};

use rand::Rng;
use regex::Regex;

use crate::core::{
    domain::{Leniency, RunOutcome},
    traits::runner::OutcomePolicy,
};

static LISTEN_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.listen\s*\(").expect("valid listen pattern"));

static LITERAL_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.listen\s*\(\s*\d+\s*([,)])").expect("valid port pattern")
});

/// Leading shebang and `'use strict'` directive, which must stay first.
static PROLOGUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:#![^\n]*\n?)?(?:\s*(?:'use strict'|"use strict")\s*;?)?"#)
        .expect("valid prologue pattern")
});

const ADDR_IN_USE: &str = "EADDRINUSE";

pub fn is_listener(code: &str) -> bool {
    LISTEN_CALL.is_match(code)
}

pub fn pick_port(range: &RangeInclusive<u16>) -> u16 {
    rand::thread_rng().gen_range(range.clone())
}

/// Replaces literal port arguments of `.listen(...)` calls with `port`.
pub fn rewrite_ports(code: &str, port: u16) -> String {
    LITERAL_PORT
        .replace_all(code, |caps: &regex::Captures| format!(".listen({}{}", port, &caps[1]))
        .into_owned()
}

/// Wraps listener code so that a port conflict exits cleanly and the server
/// is shut down after `demo_window` if it is still running.
pub fn wrap(code: &str, port: u16, demo_window: Duration) -> String {
    let end = PROLOGUE.find(code).map_or(0, |prologue| prologue.end());
    let (prologue, code) = code.split_at(end);
    let prologue = match prologue.trim() {
        "" => String::new(),
        prologue => format!("{}\n", prologue),
    };
    format!(
        r#"{prologue}process.on('uncaughtException', (err) => {{
  if (err && err.code === '{addr_in_use}') {{
    console.log('Port {port} is already in use ({addr_in_use}); the server would bind a free port in production.');
    process.exit(0);
  }}
  console.error(err);
  process.exit(1);
}});

{code}

setTimeout(() => {{
  console.log('Server demonstration completed on port {port}.');
  process.exit(0);
}}, {window_ms}).unref();
"#,
        prologue = prologue,
        addr_in_use = ADDR_IN_USE,
        port = port,
        code = code,
        window_ms = demo_window.as_millis(),
    )
}

/// Applies the run policy to a raw outcome, recording why a failure-looking
/// run was accepted.
pub fn apply_policy(policy: OutcomePolicy, outcome: &mut RunOutcome) {
    let OutcomePolicy::ServerDemo { port } = policy else {
        return;
    };
    if outcome.output_limit_exceeded {
        return;
    }

    outcome.leniency = if outcome.stdout.contains(ADDR_IN_USE) || outcome.stderr.contains(ADDR_IN_USE) {
        Some(Leniency::PortConflict { port })
    } else if outcome.timed_out {
        Some(Leniency::ServerTimedOut { port })
    } else if outcome.exited_cleanly() {
        Some(Leniency::DemoCompleted { port })
    } else {
        None
    };
}
