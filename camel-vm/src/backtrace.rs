//! Back-trace construction from the frame stack.

use crate::error::VmError;
use crate::frame::TraceEntry;

/// Runtime description derived from a VM error's frame snapshot.
#[derive(Debug, Clone)]
pub struct Backtrace {
    entries: Vec<TraceEntry>,
}

impl Backtrace {
    /// Trace carried by an error, innermost frame first.
    pub fn from_error(err: &VmError) -> Self {
        Self {
            entries: err.trace.clone(),
        }
    }

    /// The captured frames, innermost first.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Formats the diagnostic long form: the message, then one
    /// `SUB called at FILE line N` line per enclosing frame.
    pub fn render(&self, message: &str) -> String {
        let mut out = String::from(message);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        for entry in &self.entries {
            let name = if entry.sub_name.is_empty() {
                format!("{}::__TOP__", entry.package)
            } else {
                entry.sub_name.to_string()
            };
            out.push_str(&format!(
                "\t{} called at {} line {}\n",
                name, entry.file, entry.line
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn entry(sub_name: &str, file: &str, line: u32) -> TraceEntry {
        TraceEntry {
            sub_name: Rc::from(sub_name),
            package: Rc::from("main"),
            file: Rc::from(file),
            line,
        }
    }

    #[test]
    fn renders_innermost_first() {
        let trace = Backtrace {
            entries: vec![entry("main::b", "t.pl", 2), entry("main::a", "t.pl", 1)],
        };
        let text = trace.render("boom");
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "boom");
        assert!(lines[1].contains("main::b called at t.pl line 2"));
        assert!(lines[2].contains("main::a called at t.pl line 1"));
    }
}
