use std::collections::BTreeMap;

use serde_json::{json, Value};

/// Breakpoint ids start here and only ever grow within a session.
pub const FIRST_BREAKPOINT_ID: i64 = 1000;

/// A breakpoint as reported to the editor.
///
/// Lines are trusted verbatim, so every breakpoint is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: i64,
    /// Line in the editor's numbering.
    pub line: i64,
    pub verified: bool,
    pub source_path: String,
}

impl Breakpoint {
    pub fn to_dap(&self) -> Value {
        json!({
            "id": self.id,
            "verified": self.verified,
            "line": self.line,
            "source": { "path": self.source_path },
        })
    }
}

/// Per-source breakpoint lists, keyed by the editor's source path.
#[derive(Debug)]
pub struct BreakpointRegistry {
    next_id: i64,
    by_path: BTreeMap<String, Vec<Breakpoint>>,
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self {
            next_id: FIRST_BREAKPOINT_ID,
            by_path: BTreeMap::new(),
        }
    }
}

impl BreakpointRegistry {
    /// Replaces every breakpoint of `source_path` with fresh ones at `lines`, in request order.
    pub fn replace(&mut self, source_path: &str, lines: &[i64]) -> Vec<Breakpoint> {
        let breakpoints: Vec<Breakpoint> = lines
            .iter()
            .map(|&line| {
                let id = self.next_id;
                self.next_id += 1;
                Breakpoint {
                    id,
                    line,
                    verified: true,
                    source_path: source_path.to_string(),
                }
            })
            .collect();

        if breakpoints.is_empty() {
            self.by_path.remove(source_path);
        } else {
            self.by_path
                .insert(source_path.to_string(), breakpoints.clone());
        }
        breakpoints
    }

    #[cfg(test)]
    pub fn for_path(&self, source_path: &str) -> &[Breakpoint] {
        self.by_path
            .get(source_path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every registered breakpoint, grouped by source path.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_path.values().flatten()
    }
}
