//! Runtime diagnostics
//!
//! Every condition the engine reports at runtime (bad indices, null
//! contexts, missing labels, safety-net trips) funnels through a single
//! sink. A report names the offending instance, the descriptor whose code
//! was executing and the byte offset inside it, so a host can map it back
//! to source. The default sink forwards to `tracing`; tests and embedders
//! that want to inspect reports install a [`CollectSink`].

use parking_lot::Mutex;

use crate::name::Name;
use crate::object::ObjHandle;

/// Report severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable; the engine diagnosed the condition and continued.
    Warning,
    /// Unrecoverable by script standards. Engine options decide whether
    /// this also aborts the current dispatch.
    Critical,
}

/// One runtime report.
#[derive(Debug, Clone)]
pub struct ScriptDiagnostic {
    /// Severity class.
    pub severity: Severity,
    /// Instance whose code was executing.
    pub instance: ObjHandle,
    /// Host-given name of that instance.
    pub instance_name: Name,
    /// Descriptor (function or state) owning the executing code.
    pub node: Name,
    /// Byte offset of the cursor inside the descriptor's code.
    pub offset: u32,
    /// Formatted description.
    pub message: String,
}

/// Receives every runtime report.
pub trait DiagnosticSink: Send + Sync {
    /// Deliver one report.
    fn script_log(&self, diag: ScriptDiagnostic);
}

/// Default sink: forwards reports to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn script_log(&self, diag: ScriptDiagnostic) {
        match diag.severity {
            Severity::Warning => tracing::warn!(
                target: "statescript",
                instance = %diag.instance_name,
                node = %diag.node,
                offset = diag.offset,
                "{}",
                diag.message
            ),
            Severity::Critical => tracing::error!(
                target: "statescript",
                instance = %diag.instance_name,
                node = %diag.node,
                offset = diag.offset,
                "{}",
                diag.message
            ),
        }
    }
}

/// Sink that keeps every report for later inspection.
#[derive(Debug, Default)]
pub struct CollectSink {
    entries: Mutex<Vec<ScriptDiagnostic>>,
}

impl CollectSink {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collected reports.
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when any collected message contains `needle`.
    pub fn any(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|d| d.message.contains(needle))
    }

    /// Remove and return everything collected so far.
    pub fn drain(&self) -> Vec<ScriptDiagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }
}

impl DiagnosticSink for CollectSink {
    fn script_log(&self, diag: ScriptDiagnostic) {
        self.entries.lock().push(diag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(text: &str, severity: Severity) -> ScriptDiagnostic {
        ScriptDiagnostic {
            severity,
            instance: ObjHandle::NONE,
            instance_name: Name::new("Probe"),
            node: Name::new("Tick"),
            offset: 9,
            message: text.to_string(),
        }
    }

    #[test]
    fn test_collect_sink_keeps_reports() {
        let sink = CollectSink::new();
        sink.script_log(report("index 7 out of bounds", Severity::Warning));
        sink.script_log(report("assertion failed", Severity::Critical));
        assert_eq!(sink.count(), 2);
        assert!(sink.any("out of bounds"));
        assert!(!sink.any("missing label"));
    }

    #[test]
    fn test_drain_empties_the_collector() {
        let sink = CollectSink::new();
        sink.script_log(report("first", Severity::Warning));
        let taken = sink.drain();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].message, "first");
        assert_eq!(sink.count(), 0);
    }
}
