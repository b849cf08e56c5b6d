//! Line and function coverage in lcov format
//!
//! Register code with [`CoverageRecorder::add_bco`] before running, pass the
//! recorder as the observer of `Process::run`, then write the collected
//! data with [`CoverageRecorder::save`]. Hits are recorded as flags, so every
//! count in the output is 0 or 1.

use crate::compiler::bytecode::CodeRef;
use crate::vm::interpreter::{Process, ProcessObserver};
use crate::vm::value::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct FunctionCoverage {
    name: String,
    first_line: u32,
    hit: bool,
}

#[derive(Debug, Default)]
struct FileCoverage {
    lines: BTreeMap<u32, bool>,
    functions: Vec<FunctionCoverage>,
}

/// Where a registered code object's hits are recorded
#[derive(Debug, Clone)]
struct FunctionSlot {
    file: String,
    index: usize,
}

/// Coverage collector
#[derive(Default)]
pub struct CoverageRecorder {
    files: BTreeMap<String, FileCoverage>,
    /// Keyed by code object address; `None` for code without a source file
    seen: FxHashMap<usize, Option<FunctionSlot>>,
    /// Keeps registered code alive so addresses are not reused
    retained: Vec<CodeRef>,
}

impl CoverageRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code object and all code reachable from its literals
    ///
    /// Every line in the line map starts out "not hit". Code without a
    /// source file is not recorded, but its literals are still searched.
    pub fn add_bco(&mut self, code: &CodeRef) {
        let mut pending = vec![code.clone()];
        while let Some(code) = pending.pop() {
            let key = Arc::as_ptr(&code) as usize;
            if self.seen.contains_key(&key) {
                continue;
            }

            let slot = {
                let bco = code.read();
                pending.extend(bco.literals().iter().rev().filter_map(|v| match v {
                    Value::Code(child) => Some(child.clone()),
                    _ => None,
                }));
                if bco.file_name().is_empty() {
                    None
                } else {
                    let file = self.files.entry(bco.file_name().to_string()).or_default();
                    for &(_, line) in bco.line_numbers() {
                        file.lines.entry(line).or_insert(false);
                    }
                    file.functions.push(FunctionCoverage {
                        name: bco.subroutine_name().to_string(),
                        first_line: bco.first_line().unwrap_or(0),
                        hit: false,
                    });
                    Some(FunctionSlot {
                        file: bco.file_name().to_string(),
                        index: file.functions.len() - 1,
                    })
                }
            };
            self.seen.insert(key, slot);
            self.retained.push(code);
        }
    }

    /// Number of registered code objects (including ones without a file)
    pub fn registered(&self) -> usize {
        self.seen.len()
    }

    /// Check whether a code object has been registered
    pub fn is_registered(&self, code: &CodeRef) -> bool {
        self.seen.contains_key(&(Arc::as_ptr(code) as usize))
    }

    /// Write lcov records, one per source file in file-name order
    pub fn save(&self, out: &mut impl Write, test_name: &str) -> io::Result<()> {
        for (file, coverage) in &self.files {
            writeln!(out, "TN:{}", test_name)?;
            writeln!(out, "SF:{}", file)?;

            let mut functions: Vec<&FunctionCoverage> = coverage.functions.iter().collect();
            functions.sort_by(|a, b| (&a.name, a.first_line).cmp(&(&b.name, b.first_line)));
            let mut used = FxHashSet::default();
            for function in &functions {
                let name = unique_name(&mut used, &function.name);
                writeln!(out, "FN:{},{}", function.first_line, name)?;
                writeln!(out, "FNDA:{},{}", u8::from(function.hit), name)?;
            }
            writeln!(out, "FNF:{}", functions.len())?;
            writeln!(out, "FNH:{}", functions.iter().filter(|f| f.hit).count())?;

            for (line, hit) in &coverage.lines {
                writeln!(out, "DA:{},{}", line, u8::from(*hit))?;
            }
            writeln!(out, "end_of_record")?;
        }
        Ok(())
    }

    /// Write lcov records to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>, test_name: &str) -> io::Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        self.save(&mut out, test_name)?;
        out.flush()?;
        debug!(path = %path.display(), files = self.files.len(), "coverage saved");
        Ok(())
    }
}

impl ProcessObserver for CoverageRecorder {
    fn add_process_state(&mut self, process: &Process) {
        let Some(frame) = process.top_frame() else {
            return;
        };
        let key = Arc::as_ptr(&frame.code) as usize;
        if !self.seen.contains_key(&key) {
            self.add_bco(&frame.code);
        }
        let Some(Some(slot)) = self.seen.get(&key) else {
            return;
        };
        let Some(file) = self.files.get_mut(&slot.file) else {
            return;
        };
        if let Some(function) = file.functions.get_mut(slot.index) {
            function.hit = true;
        }
        if let Some(line) = frame.line() {
            file.lines.insert(line, true);
        }
    }
}

/// Pick a name not used yet in this record
///
/// Anonymous code is called `anon`; repeats get `_1`, `_2`, ... suffixes.
fn unique_name(used: &mut FxHashSet<String>, name: &str) -> String {
    let base = if name.is_empty() { "anon" } else { name };
    let mut candidate = base.to_string();
    let mut suffix = 0;
    while used.contains(&candidate) {
        suffix += 1;
        candidate = format!("{}_{}", base, suffix);
    }
    used.insert(candidate.clone());
    candidate
}
