// src/engine/summary.rs

use std::path::PathBuf;

use crate::engine::outcome::MachineResult;

/// What a run hands back to its caller.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One result per machine, in fleet order.
    pub results: Vec<MachineResult>,
    /// Final aggregated file, when one was written.
    pub output: Option<PathBuf>,
    /// Aggregation found no output files, so nothing was written.
    pub no_output: bool,
}

impl RunSummary {
    pub fn from_results(mut results: Vec<MachineResult>) -> Self {
        results.sort_by_key(|r| r.index);
        let succeeded = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.iter().filter(|r| r.failed()).count();
        Self {
            total: results.len(),
            succeeded,
            skipped,
            failed,
            results,
            output: None,
            no_output: false,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && !self.no_output
    }

    /// Human-readable report. `verbose` adds per-step detail.
    pub fn report(&self, verbose: bool) -> String {
        let mut out = format!("{}/{} machines succeeded", self.succeeded, self.total);
        if self.skipped > 0 {
            out.push_str(&format!(" ({} skipped: no input)", self.skipped));
        }
        out.push('\n');

        for r in self.results.iter() {
            let status = match (r.success, r.skipped) {
                (true, _) => "ok",
                (false, true) => "skipped",
                (false, false) => "FAILED",
            };
            out.push_str(&format!("  {:<24} {:<8} {:.1?}", r.label, status, r.duration));
            if let Some(ref err) = r.error {
                out.push_str(&format!("  {err}"));
            }
            out.push('\n');

            if verbose {
                for step in r.steps.iter() {
                    let mark = if step.success { "+" } else { "x" };
                    out.push_str(&format!("    {mark} {} ({:.1?}", step.name, step.duration));
                    if step.retries > 0 {
                        out.push_str(&format!(", {} retries", step.retries));
                    }
                    out.push_str(")\n");
                    let output = step.output.trim_end();
                    if !output.is_empty() {
                        for line in output.lines() {
                            out.push_str(&format!("      | {line}\n"));
                        }
                    }
                }
            }
        }

        if let Some(ref path) = self.output {
            out.push_str(&format!("output written to {}\n", path.display()));
        } else if self.no_output {
            out.push_str("no output files to aggregate; nothing written\n");
        }
        out
    }

    pub fn print_report(&self, verbose: bool) {
        print!("{}", self.report(verbose));
    }
}
