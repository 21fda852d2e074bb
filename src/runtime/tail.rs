//! Incremental line-oriented reads of a growing log file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::types::EventSink;

/// Poll interval between incremental reads.
pub(crate) const TAIL_INTERVAL: Duration = Duration::from_millis(100);

/// Which output stream a tailer feeds.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TailStream {
    Stdout,
    Stderr,
}

/// Stream appended lines from `path` into the sink until `done` signals.
///
/// A trailing line without a terminator is withheld on periodic reads (its
/// start offset becomes the next read position) and only flushed once the
/// done signal arrives, so partial output is never emitted twice or split.
pub(crate) async fn tail_to_sink(
    path: PathBuf,
    stream: TailStream,
    sink: EventSink,
    mut done: watch::Receiver<bool>,
) {
    let mut pos = 0u64;
    let mut ticker = tokio::time::interval(TAIL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = done.changed() => {
                // final read flushes any incomplete trailing line
                let (_, lines) = read_new_lines(&path, pos, true).await;
                emit_lines(stream, &sink, lines).await;
                return;
            }
            _ = ticker.tick() => {
                let (next, lines) = read_new_lines(&path, pos, false).await;
                pos = next;
                emit_lines(stream, &sink, lines).await;
            }
        }
    }
}

async fn emit_lines(stream: TailStream, sink: &EventSink, lines: Vec<String>) {
    for line in lines {
        match stream {
            TailStream::Stdout => sink.stdout(line).await,
            TailStream::Stderr => sink.stderr(line).await,
        }
    }
}

/// Read from `start`, splitting on both `\n` and `\r` so carriage-return
/// progress output decomposes into discrete lines.
///
/// Returns the next read position and the complete lines found. When
/// `flush_incomplete` is false a trailing partial line is not returned and
/// the position points at its first byte; when true the partial is returned
/// as a final line.
pub(crate) async fn read_new_lines(
    path: &Path,
    start: u64,
    flush_incomplete: bool,
) -> (u64, Vec<String>) {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(_) => return (start, Vec::new()),
    };
    if file.seek(SeekFrom::Start(start)).await.is_err() {
        return (start, Vec::new());
    }

    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).await.is_err() {
        return (start, Vec::new());
    }

    let mut lines = Vec::new();
    let mut partial: Vec<u8> = Vec::new();
    let mut consumed = start;

    for byte in buf {
        consumed += 1;
        if byte == b'\n' || byte == b'\r' {
            if !partial.is_empty() {
                lines.push(String::from_utf8_lossy(&partial).into_owned());
                partial.clear();
            }
            continue;
        }
        partial.push(byte);
    }

    if !partial.is_empty() {
        if flush_incomplete {
            lines.push(String::from_utf8_lossy(&partial).into_owned());
        } else {
            return (consumed - partial.len() as u64, lines);
        }
    }

    (consumed, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn complete_lines_advance_the_cursor() {
        let file = scratch_file(b"one\ntwo\n");
        let (pos, lines) = read_new_lines(file.path(), 0, false).await;
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(pos, 8);

        let (pos, lines) = read_new_lines(file.path(), pos, false).await;
        assert!(lines.is_empty());
        assert_eq!(pos, 8);
    }

    #[tokio::test]
    async fn carriage_returns_split_into_discrete_lines() {
        let file = scratch_file(b"progress 10%\rprogress 20%\r");
        let (_, lines) = read_new_lines(file.path(), 0, false).await;
        assert_eq!(lines, vec!["progress 10%", "progress 20%"]);
    }

    #[tokio::test]
    async fn partial_line_is_withheld_until_flush() {
        let file = scratch_file(b"done\npart");
        let (pos, lines) = read_new_lines(file.path(), 0, false).await;
        assert_eq!(lines, vec!["done"]);
        // cursor parks at the start of the partial line
        assert_eq!(pos, 5);

        // a later read sees the partial grow into a full line
        let grown = scratch_file(b"done\npartial\n");
        let (pos, lines) = read_new_lines(grown.path(), pos, false).await;
        assert_eq!(lines, vec!["partial"]);
        assert_eq!(pos, 13);
    }

    #[tokio::test]
    async fn flush_emits_the_trailing_partial() {
        let file = scratch_file(b"tail without newline");
        let (_, lines) = read_new_lines(file.path(), 0, true).await;
        assert_eq!(lines, vec!["tail without newline"]);
    }

    #[tokio::test]
    async fn oversized_unterminated_line_is_not_emitted_early() {
        let big = vec![b'x'; 300 * 1024];
        let file = scratch_file(&big);
        let (pos, lines) = read_new_lines(file.path(), 0, false).await;
        assert!(lines.is_empty());
        assert_eq!(pos, 0);

        let (_, lines) = read_new_lines(file.path(), pos, true).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 300 * 1024);
    }

    #[tokio::test]
    async fn missing_file_keeps_the_cursor() {
        let (pos, lines) = read_new_lines(Path::new("/nonexistent/execd-tail"), 7, false).await;
        assert_eq!(pos, 7);
        assert!(lines.is_empty());
    }
}
