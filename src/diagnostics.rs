//! Diagnostics sink: where named log records go.
//!
//! The orchestrator decides what to log and when; a [`DiagnosticsSink`]
//! decides where it lands.

use tracing::{debug, error, info, trace, warn, Level};

/// Routing target of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    None,
    /// Durable log (file, collector)
    Persistent,
    /// Operator console
    Interactive,
    Both,
}

impl LogTarget {
    /// Add interactive output, as debug mode does.
    pub fn raise(self) -> Self {
        match self {
            LogTarget::None | LogTarget::Interactive => LogTarget::Interactive,
            LogTarget::Persistent | LogTarget::Both => LogTarget::Both,
        }
    }

    pub fn from_flags(persistent: bool, debug: bool) -> Self {
        let target = if persistent {
            LogTarget::Persistent
        } else {
            LogTarget::None
        };
        if debug {
            target.raise()
        } else {
            target
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogTarget::None => "none",
            LogTarget::Persistent => "persistent",
            LogTarget::Interactive => "interactive",
            LogTarget::Both => "both",
        }
    }
}

/// Receiver of named log records.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, name: &str, level: Level, target: LogTarget, message: &str);
}

/// Forwards records to `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, name: &str, level: Level, target: LogTarget, message: &str) {
        if target == LogTarget::None {
            return;
        }
        let target = target.as_str();
        match level {
            Level::ERROR => error!(log = name, route = target, "{}", message),
            Level::WARN => warn!(log = name, route = target, "{}", message),
            Level::INFO => info!(log = name, route = target, "{}", message),
            Level::DEBUG => debug!(log = name, route = target, "{}", message),
            _ => trace!(log = name, route = target, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise() {
        assert_eq!(LogTarget::None.raise(), LogTarget::Interactive);
        assert_eq!(LogTarget::Persistent.raise(), LogTarget::Both);
        assert_eq!(LogTarget::Both.raise(), LogTarget::Both);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(LogTarget::from_flags(false, false), LogTarget::None);
        assert_eq!(LogTarget::from_flags(true, false), LogTarget::Persistent);
        assert_eq!(LogTarget::from_flags(false, true), LogTarget::Interactive);
        assert_eq!(LogTarget::from_flags(true, true), LogTarget::Both);
    }
}
