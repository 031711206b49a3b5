//! Batch driver: fans input lines out over a worker pool and funnels the
//! reports into a single sink.

use crate::executor::CheckExecutor;
use crossbeam::channel;
use distcheck_common::{CheckReport, CheckResult, DistCheckError, OutputFormat};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Reports buffered between the workers and the sink
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Destination of the report stream
pub trait ReportSink: Send {
    fn write_report(&mut self, report: &CheckReport) -> Result<(), DistCheckError>;

    /// Called once after the last report
    fn finish(&mut self) -> Result<(), DistCheckError> {
        Ok(())
    }
}

impl ReportSink for Vec<CheckReport> {
    fn write_report(&mut self, report: &CheckReport) -> Result<(), DistCheckError> {
        self.push(report.clone());
        Ok(())
    }
}

/// Writes one line per report in the chosen format
pub struct ReportWriter<W: Write> {
    out: W,
    format: OutputFormat,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> ReportSink for ReportWriter<W> {
    fn write_report(&mut self, report: &CheckReport) -> Result<(), DistCheckError> {
        let line = match self.format {
            OutputFormat::Text => report.to_string(),
            OutputFormat::Json => report.to_json_line()?,
        };
        writeln!(self.out, "{}", line)
            .map_err(|e| DistCheckError::Output(format!("Failed to write report: {}", e)))
    }

    fn finish(&mut self) -> Result<(), DistCheckError> {
        self.out
            .flush()
            .map_err(|e| DistCheckError::Output(format!("Failed to flush reports: {}", e)))
    }
}

/// Per-result totals of a finished batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    total: usize,
    counts: [usize; 7],
    #[serde(skip)]
    elapsed: Duration,
}

impl BatchSummary {
    pub fn record(&mut self, result: CheckResult) {
        self.total += 1;
        if let Some(index) = CheckResult::ALL.iter().position(|r| *r == result) {
            self.counts[index] += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, result: CheckResult) -> usize {
        CheckResult::ALL
            .iter()
            .position(|r| *r == result)
            .map(|index| self.counts[index])
            .unwrap_or(0)
    }

    /// Files that did not verify as identical
    pub fn problems(&self) -> usize {
        self.total - self.count(CheckResult::Success)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checked {} paths in {:.2?}", self.total, self.elapsed)?;
        for result in CheckResult::ALL {
            let count = self.count(result);
            if count > 0 {
                writeln!(f, "  {:<24} {}", result.name(), count)?;
            }
        }
        Ok(())
    }
}

/// Runs a [`CheckExecutor`] over a stream of input lines
#[derive(Debug, Clone)]
pub struct BatchRunner {
    threads: Option<usize>,
    channel_capacity: usize,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self {
            threads: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BatchRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker count; `None` or `0` uses every available core
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads.filter(|n| *n > 0);
        self
    }

    /// Checks every line and writes one report per line to `sink`.
    ///
    /// Lines are raw bytes (`BufRead::split(b'\n')` or plain strings); one that
    /// is not valid UTF-8 is reported `UNCHECKED`. Reports arrive at the sink
    /// in completion order. A failing check never stops the batch; an I/O
    /// error reading the input or writing to the sink does.
    pub fn run<I, L, S>(
        &self,
        executor: &CheckExecutor<'_>,
        lines: I,
        sink: &mut S,
    ) -> Result<BatchSummary, DistCheckError>
    where
        I: Iterator<Item = io::Result<L>> + Send,
        L: AsRef<[u8]> + Send,
        S: ReportSink,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads.unwrap_or(0))
            .thread_name(|i| format!("distcheck-worker-{}", i))
            .build()
            .map_err(|e| DistCheckError::Config(format!("Failed to start worker pool: {}", e)))?;

        info!(
            "Starting batch on {} worker threads",
            pool.current_num_threads()
        );
        let started = Instant::now();
        let (tx, rx) = channel::bounded::<CheckReport>(self.channel_capacity);

        let (written, produced) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> Result<BatchSummary, DistCheckError> {
                let mut summary = BatchSummary::default();
                for report in rx {
                    sink.write_report(&report)?;
                    summary.record(report.result());
                }
                sink.finish()?;
                Ok(summary)
            });

            let produced = pool.install(|| {
                lines.par_bridge().try_for_each_with(tx, |tx, line| {
                    let line = line.map_err(|e| {
                        DistCheckError::Io(io::Error::new(
                            e.kind(),
                            format!("Failed to read the file list: {}", e),
                        ))
                    })?;
                    tx.send(Self::check_input(executor, line.as_ref()))
                        .map_err(|_| DistCheckError::Output("the report writer stopped".to_string()))
                })
            });

            let written = writer.join().unwrap_or_else(|_| {
                Err(DistCheckError::Output("the report writer panicked".to_string()))
            });
            (written, produced)
        });

        // a sink failure also surfaces as a send failure; report the sink's own error
        let mut summary = written?;
        produced?;

        summary.elapsed = started.elapsed();
        info!(
            "Batch finished: {} paths, {} not verified identical, in {:.2?}",
            summary.total(),
            summary.problems(),
            summary.elapsed()
        );
        Ok(summary)
    }

    fn check_input(executor: &CheckExecutor<'_>, bytes: &[u8]) -> CheckReport {
        match std::str::from_utf8(bytes) {
            Ok(line) => Self::check_guarded(executor, line),
            Err(e) => {
                let lossy = String::from_utf8_lossy(bytes);
                warn!("Check input path [{}] failed: {}", lossy.trim(), e);
                CheckReport::unchecked(lossy.trim())
            }
        }
    }

    fn check_guarded(executor: &CheckExecutor<'_>, line: &str) -> CheckReport {
        match panic::catch_unwind(AssertUnwindSafe(|| executor.check_line(line))) {
            Ok(report) => report,
            Err(_) => {
                error!("Check of [{}] panicked", line.trim());
                CheckReport::unchecked(line.trim())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumEngine;
    use crate::executor::WorkingDirs;
    use crate::vfs::MemoryVfs;

    fn lines(items: &[&str]) -> Vec<io::Result<String>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    struct FailingSink;

    impl ReportSink for FailingSink {
        fn write_report(&mut self, _report: &CheckReport) -> Result<(), DistCheckError> {
            Err(DistCheckError::Output("disk full".to_string()))
        }
    }

    fn fixture() -> (MemoryVfs, MemoryVfs, WorkingDirs) {
        let source = MemoryVfs::new("src");
        let target = MemoryVfs::object_store("dst");
        for i in 0..50 {
            source.add_file(format!("src/f{}", i), format!("content {}", i));
            if i % 2 == 0 {
                target.add_file(format!("dst/f{}", i), format!("content {}", i));
            }
        }
        let dirs = WorkingDirs::parse("/src", "/dst").unwrap();
        (source, target, dirs)
    }

    #[test]
    fn test_every_line_gets_one_report() {
        let (source, target, dirs) = fixture();
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let mut input: Vec<String> = (0..50).map(|i| format!("/src/f{}", i)).collect();
        input.push(String::new());
        input.push("/src/absent".to_string());
        input.push("/src/f1".to_string());
        let refs: Vec<&str> = input.iter().map(String::as_str).collect();

        let mut reports: Vec<CheckReport> = Vec::new();
        let summary = BatchRunner::new()
            .with_threads(Some(4))
            .run(&executor, lines(&refs).into_iter(), &mut reports)
            .unwrap();

        assert_eq!(reports.len(), input.len());
        assert_eq!(summary.total(), input.len());
        assert_eq!(summary.count(CheckResult::Unchecked), 25 + 1);
        assert_eq!(summary.count(CheckResult::TargetFileMissing), 25 + 1);
        assert_eq!(summary.count(CheckResult::SourceFileMissing), 1);

        let mut sources: Vec<&str> = reports.iter().map(|r| r.source_path()).collect();
        let mut expected = refs.clone();
        sources.sort_unstable();
        expected.sort_unstable();
        assert_eq!(sources, expected);
    }

    #[test]
    fn test_report_writer_text_and_json() {
        let report = CheckReport::new("/src/a", Some("/dst/a".to_string()), CheckResult::Mismatch);

        let mut text = ReportWriter::new(Vec::new(), OutputFormat::Text);
        text.write_report(&report).unwrap();
        text.finish().unwrap();
        assert_eq!(
            String::from_utf8(text.into_inner()).unwrap(),
            "/src/a,/dst/a,None,None,None,MISMATCH,'The source file and target file are different.'\n"
        );

        let mut json = ReportWriter::new(Vec::new(), OutputFormat::Json);
        json.write_report(&report).unwrap();
        let out = String::from_utf8(json.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(value["result"], "MISMATCH");
        assert_eq!(value["target_path"], "/dst/a");
        assert!(value["algorithm"].is_null());
    }

    #[test]
    fn test_sink_failure_aborts_batch() {
        let (source, target, dirs) = fixture();
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let input: Vec<String> = (0..50).map(|i| format!("/src/f{}", i)).collect();
        let refs: Vec<&str> = input.iter().map(String::as_str).collect();
        let err = BatchRunner::new()
            .run(&executor, lines(&refs).into_iter(), &mut FailingSink)
            .unwrap_err();
        assert!(matches!(err, DistCheckError::Output(msg) if msg == "disk full"));
    }

    #[test]
    fn test_invalid_utf8_line_is_unchecked() {
        use std::io::{BufRead, Cursor};

        let (source, target, dirs) = fixture();
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let input = Cursor::new(b"/src/f0\n/src/\xff\xfe\r\n/src/f1\n".to_vec()).split(b'\n');
        let mut reports: Vec<CheckReport> = Vec::new();
        let summary = BatchRunner::new()
            .with_threads(Some(2))
            .run(&executor, input, &mut reports)
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(summary.total(), 3);
        let bad = reports
            .iter()
            .find(|r| r.source_path().starts_with("/src/\u{FFFD}"))
            .unwrap();
        assert_eq!(bad.result(), CheckResult::Unchecked);
        assert_eq!(bad.target_path(), None);
        assert!(reports.iter().any(|r| r.source_path() == "/src/f0"
            && r.result() == CheckResult::Unchecked
            && r.target_path() == Some("/dst/f0")));
        assert!(reports
            .iter()
            .any(|r| r.source_path() == "/src/f1" && r.result() == CheckResult::TargetFileMissing));
    }

    #[test]
    fn test_input_read_error_aborts_batch() {
        let (source, target, dirs) = fixture();
        let executor = CheckExecutor::new(&dirs, &source, &target, ChecksumEngine::default());

        let input: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b"/src/f0".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "listing stream reset")),
        ];
        let mut reports: Vec<CheckReport> = Vec::new();
        let err = BatchRunner::new()
            .with_threads(Some(1))
            .run(&executor, input.into_iter(), &mut reports)
            .unwrap_err();
        assert!(matches!(err, DistCheckError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_summary_display() {
        let mut summary = BatchSummary::default();
        summary.record(CheckResult::Success);
        summary.record(CheckResult::Success);
        summary.record(CheckResult::Unconfirm);

        assert_eq!(summary.problems(), 1);
        let text = summary.to_string();
        assert!(text.contains("Checked 3 paths"));
        assert!(text.contains("SUCCESS"));
        assert!(text.contains("UNCONFIRM"));
        assert!(!text.contains("MISMATCH"));
    }
}
