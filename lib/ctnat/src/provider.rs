// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Providers let the embedding system plug its own implementation of
//! a core service into the engine. Today that is only logging: a
//! tracker embedded in a daemon logs wherever the daemon logs, while
//! tests and the CLI print to stdout.

use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Discard everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}

pub type LogRef = Arc<dyn LogProvider>;

/// The default provider when the caller does not supply one.
pub fn null_log() -> LogRef {
    Arc::new(NullLog)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::ddi::sync::KSpinLock;
    use alloc::string::String;
    use alloc::vec::Vec;

    /// Collect messages so a test can assert on them.
    #[derive(Default)]
    pub struct VecLog {
        pub msgs: KSpinLock<Vec<(LogLevel, String)>>,
    }

    impl LogProvider for VecLog {
        fn log(&self, level: LogLevel, msg: &str) {
            self.msgs.lock().push((level, msg.into()));
        }
    }

    #[test]
    fn level_display() {
        assert_eq!(LogLevel::Warn.to_string(), "[WARN]");
        let log = VecLog::default();
        log.log(LogLevel::Note, "hello");
        assert_eq!(log.msgs.lock()[0], (LogLevel::Note, "hello".into()));
    }
}
