use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use logsieve_filter::{EntryFilter, LogBuffer, MessageEvent, StreamEntry};

/// Entries evaluated per round of worker tasks
pub const BATCH_SIZE: usize = 512;

/// A partial batch is evaluated once input has been idle this long
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// How matched entries are written
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Settings for one pass over the input
#[derive(Clone, Copy, Debug)]
pub struct StreamOptions {
    pub workers: usize,
    pub format: OutputFormat,
    /// Hold matches back and print only the last N at end of input
    pub tail: Option<usize>,
}

/// Counts per message type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub default: u64,
    pub info: u64,
    pub debug: u64,
    pub error: u64,
    pub fault: u64,
}

impl TypeCounts {
    fn slot(&mut self, event: MessageEvent) -> &mut u64 {
        match event {
            MessageEvent::Default => &mut self.default,
            MessageEvent::Info => &mut self.info,
            MessageEvent::Debug => &mut self.debug,
            MessageEvent::Error => &mut self.error,
            MessageEvent::Fault => &mut self.fault,
        }
    }

    pub fn record(&mut self, event: MessageEvent) {
        *self.slot(event) += 1;
    }

    pub fn total(&self) -> u64 {
        self.default + self.info + self.debug + self.error + self.fault
    }

    pub fn get(&self, event: MessageEvent) -> u64 {
        match event {
            MessageEvent::Default => self.default,
            MessageEvent::Info => self.info,
            MessageEvent::Debug => self.debug,
            MessageEvent::Error => self.error,
            MessageEvent::Fault => self.fault,
        }
    }
}

/// Totals for a finished run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Well-formed entries read
    pub seen: u64,
    /// Entries that passed the filter, by message type
    pub matched: TypeCounts,
}

/// Parse one NDJSON line, skipping blanks and malformed input
pub fn parse_line(line: &str, line_number: u64) -> Option<StreamEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(line_number, error = %e, "skipping malformed entry");
            None
        }
    }
}

/// Evaluate a batch across `workers` blocking tasks sharing one filter.
/// Input order is preserved.
pub async fn filter_batch(
    filter: &Arc<EntryFilter>,
    batch: Vec<StreamEntry>,
    workers: usize,
) -> Result<Vec<StreamEntry>> {
    if batch.is_empty() {
        return Ok(batch);
    }

    let chunk_size = batch.len().div_ceil(workers.max(1));
    let mut pending = batch.into_iter().peekable();
    let mut tasks = Vec::new();

    while pending.peek().is_some() {
        let chunk: Vec<StreamEntry> = pending.by_ref().take(chunk_size).collect();
        let filter = Arc::clone(filter);
        tasks.push(tokio::task::spawn_blocking(move || {
            chunk
                .into_iter()
                .filter(|entry| filter.matches(entry))
                .collect::<Vec<_>>()
        }));
    }

    let mut matched = Vec::new();
    for task in tasks {
        matched.extend(task.await.context("filter worker panicked")?);
    }
    Ok(matched)
}

/// Format an entry as a single display line
pub fn format_entry(entry: &StreamEntry) -> String {
    let scope = match (entry.subsystem.is_empty(), entry.category.is_empty()) {
        (true, _) => String::new(),
        (false, true) => format!(" [{}]", entry.subsystem),
        (false, false) => format!(" [{}:{}]", entry.subsystem, entry.category),
    };
    format!(
        "{} {}[{}] <{}>{} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.process_name(),
        entry.process_id,
        entry.message_type,
        scope,
        entry.message
    )
}

fn write_entry<W: Write>(out: &mut W, entry: &StreamEntry, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", format_entry(entry))?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, entry)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Where matches go: straight to the writer, or into a tail buffer
struct Sink<'a, W> {
    out: &'a mut W,
    format: OutputFormat,
    retained: Option<LogBuffer>,
}

impl<W: Write> Sink<'_, W> {
    fn emit(&mut self, matched: Vec<StreamEntry>) -> Result<()> {
        match &self.retained {
            Some(buffer) => matched.into_iter().for_each(|entry| buffer.push(entry)),
            None => {
                for entry in &matched {
                    write_entry(&mut *self.out, entry, self.format)?;
                }
                self.out.flush()?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if let Some(buffer) = &self.retained {
            for entry in buffer.snapshot() {
                write_entry(&mut *self.out, &entry, self.format)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Evaluate the pending batch and hand its matches to the sink
async fn flush_batch<W: Write>(
    batch: &mut Vec<StreamEntry>,
    filter: &Arc<EntryFilter>,
    workers: usize,
    sink: &mut Sink<'_, W>,
    stats: &mut RunStats,
) -> Result<()> {
    let matched = filter_batch(filter, std::mem::take(batch), workers).await?;
    for entry in &matched {
        stats.matched.record(entry.message_type);
    }
    sink.emit(matched)
}

/// Read entries from `reader` and write the ones passing `filter` to `out`.
///
/// Full batches are evaluated as soon as they fill. A partial batch is
/// evaluated after [`FLUSH_INTERVAL`] without new input, so a live pipe never
/// sits on matches.
pub async fn run<R, W>(
    reader: R,
    out: &mut W,
    filter: Arc<EntryFilter>,
    options: StreamOptions,
) -> Result<RunStats>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = reader.lines();
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    let mut sink = Sink {
        out,
        format: options.format,
        retained: options.tail.map(LogBuffer::new),
    };
    let mut stats = RunStats::default();
    let mut line_number = 0u64;

    loop {
        let next = if batch.is_empty() {
            lines.next_line().await
        } else {
            // next_line is cancel safe, so a timeout loses no input
            match tokio::time::timeout(FLUSH_INTERVAL, lines.next_line()).await {
                Ok(next) => next,
                Err(_) => {
                    flush_batch(&mut batch, &filter, options.workers, &mut sink, &mut stats)
                        .await?;
                    continue;
                }
            }
        };

        let Some(line) = next.context("failed to read input")? else {
            break;
        };
        line_number += 1;
        if let Some(entry) = parse_line(&line, line_number) {
            batch.push(entry);
            stats.seen += 1;
        }

        if batch.len() >= BATCH_SIZE {
            flush_batch(&mut batch, &filter, options.workers, &mut sink, &mut stats).await?;
        }
    }

    if !batch.is_empty() {
        flush_batch(&mut batch, &filter, options.workers, &mut sink, &mut stats).await?;
    }
    sink.finish()?;

    tracing::debug!(seen = stats.seen, matched = stats.matched.total(), "input exhausted");
    Ok(stats)
}
