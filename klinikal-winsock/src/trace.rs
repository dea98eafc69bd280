//! Per-call diagnostics, gated on the KLINIKAL_VERBOSE environment variable.
//! When enabled, every API entry prints one timestamped line to stderr with
//! the function name and its arguments.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

static VERBOSE: Lazy<bool> = Lazy::new(|| {
    std::env::var("KLINIKAL_VERBOSE")
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
});

pub fn verbose() -> bool {
    *VERBOSE
}

pub fn log_call(name: &str, args: &[&dyn fmt::Debug]) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() % 86_400;
    let rendered: Vec<String> = args.iter().map(|a| format!("{a:?}")).collect();
    eprintln!(
        "[{:02}:{:02}:{:02}.{:03}] WINSOCK CALL: {}({})",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        now.subsec_millis(),
        name,
        rendered.join(", ")
    );
}

/// One diagnostic line per API entry when KLINIKAL_VERBOSE is set.
macro_rules! trace_call {
    ($name:expr $(, $arg:expr)* $(,)?) => {
        if $crate::trace::verbose() {
            $crate::trace::log_call($name, &[$(&$arg as &dyn core::fmt::Debug),*]);
        }
    };
}
