// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Access-log record parsing.
//!
//! Records are newline-terminated and space-separated. A field that starts
//! with `"` runs to the next unescaped `"` (`""` is a literal quote) and may
//! contain spaces or even newlines. The field count is not checked against
//! the schema: longer records come from newer log formats, shorter ones from
//! older formats, and only a record missing its `time` field is rejected.

use std::sync::Arc;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::MAX_RECORD_BYTES;
use crate::decompress::PipeReader;
use crate::entry::LogEntry;
use crate::errors::{DecodeError, ProcessError};
use crate::replicator::Replicator;
use crate::schema::FieldFilter;

/// Incremental tokenizer for one record.
///
/// Lines are fed one at a time; quote state and the partial field carry over,
/// so a record spanning many lines is scanned once.
#[derive(Debug, Default)]
struct RecordSplitter {
    fields: Vec<String>,
    field: String,
    in_quotes: bool,
    field_start: bool,
    bytes: usize,
}

impl RecordSplitter {
    fn new() -> Self {
        Self {
            fields: Vec::with_capacity(40),
            field_start: true,
            ..Default::default()
        }
    }

    /// Bytes fed so far.
    fn len(&self) -> usize {
        self.bytes
    }

    /// Feeds the next line. Returns `true` once the record is complete.
    fn feed(&mut self, line: &str) -> bool {
        if self.bytes > 0 {
            // Only reached inside a quoted field.
            self.field.push('\n');
        }
        self.bytes += line.len() + 1;

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if self.in_quotes {
                if c != '"' {
                    self.field.push(c);
                } else if chars.peek() == Some(&'"') {
                    chars.next();
                    self.field.push('"');
                } else {
                    self.in_quotes = false;
                }
                continue;
            }

            match c {
                ' ' => {
                    self.fields.push(std::mem::take(&mut self.field));
                    self.field_start = true;
                    continue;
                }
                '"' if self.field_start => self.in_quotes = true,
                _ => self.field.push(c),
            }
            self.field_start = false;
        }

        !self.in_quotes
    }

    fn finish(mut self) -> Vec<String> {
        self.fields.push(self.field);
        self.fields
    }
}

/// Splits one record into its fields.
///
/// Returns `None` while a quoted field is still open, meaning the record
/// continues on the next line.
pub(crate) fn split_record(line: &str) -> Option<Vec<String>> {
    let mut splitter = RecordSplitter::new();
    splitter.feed(line).then(|| splitter.finish())
}

/// Reads records out of the decompression pipe.
pub struct RecordReader {
    pipe: PipeReader,
    buf: BytesMut,
    searched: usize,
    eof: bool,
    line: u64,
    record_line: u64,
    max_record_bytes: usize,
}

impl RecordReader {
    pub fn new(pipe: PipeReader) -> Self {
        Self::with_max_record_bytes(pipe, MAX_RECORD_BYTES)
    }

    /// A record still open after `max_record_bytes` fails with
    /// [`ProcessError::UnterminatedQuote`].
    pub fn with_max_record_bytes(pipe: PipeReader, max_record_bytes: usize) -> Self {
        Self {
            pipe,
            buf: BytesMut::new(),
            searched: 0,
            eof: false,
            line: 0,
            record_line: 0,
            max_record_bytes,
        }
    }

    /// Line number on which the last returned record started.
    pub fn record_line(&self) -> u64 {
        self.record_line
    }

    /// Next record, or `None` at the end of the object. Blank lines are skipped.
    pub async fn next_record(&mut self) -> Result<Option<Vec<String>>, ProcessError> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            self.line += 1;
            if line.is_empty() {
                continue;
            }

            let start = self.line;
            let mut splitter = RecordSplitter::new();
            let mut complete = splitter.feed(&String::from_utf8_lossy(&line));
            while !complete {
                if splitter.len() > self.max_record_bytes {
                    return Err(ProcessError::UnterminatedQuote { line: start });
                }
                let Some(more) = self.next_line().await? else {
                    return Err(ProcessError::UnterminatedQuote { line: start });
                };
                self.line += 1;
                complete = splitter.feed(&String::from_utf8_lossy(&more));
            }
            self.record_line = start;
            return Ok(Some(splitter.finish()));
        }
    }

    async fn next_line(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        loop {
            if let Some(offset) = self.buf[self.searched..].iter().position(|b| *b == b'\n') {
                let end = self.searched + offset;
                let mut line = self.buf.split_to(end + 1);
                self.searched = 0;
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                return Ok(Some(line));
            }
            self.searched = self.buf.len();

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                self.searched = 0;
                let mut line = self.buf.split();
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }

            match self.pipe.read_chunk().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => self.eof = true,
            }
        }
    }
}

/// Turns split records into [`LogEntry`] values for one object.
pub struct Parser {
    filter: Arc<FieldFilter>,
    extension_logged: bool,
}

impl Parser {
    pub fn new(filter: Arc<FieldFilter>) -> Self {
        Self {
            filter,
            extension_logged: false,
        }
    }

    pub fn parse_record(&mut self, record: &[String], line: u64) -> Result<LogEntry, ProcessError> {
        let expected = self.filter.total_fields();
        if !self.extension_logged && record.len() > expected {
            warn!(expected, got = record.len(), "schema_extension");
            self.extension_logged = true;
        }

        let time_index = self.filter.time_index();
        let Some(raw) = record.get(time_index) else {
            return Err(ProcessError::RecordTooShort {
                line,
                expected: time_index + 1,
                got: record.len(),
            });
        };
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map_err(|source| ProcessError::Timestamp {
                line,
                value: raw.clone(),
                source,
            })?
            .with_timezone(&Utc);

        Ok(LogEntry {
            timestamp,
            fields: self.filter.apply(record),
        })
    }

    /// Parses every record and hands it to the replicator, in file order.
    ///
    /// Returns the number of entries forwarded. Stops early, without error,
    /// on cancellation or once no sink accepts entries anymore.
    pub async fn run(
        mut self,
        mut reader: RecordReader,
        replicator: &mut Replicator,
        cancel: &CancellationToken,
    ) -> Result<u64, ProcessError> {
        let mut count = 0;
        loop {
            let record = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Parser cancelled after {count} entries");
                    break;
                }
                record = reader.next_record() => record?,
            };
            let Some(record) = record else {
                break;
            };

            let entry = self.parse_record(&record, reader.record_line())?;
            if !replicator.broadcast(entry, cancel).await {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::pipe;
    use crate::schema::LbType;
    use bytes::Bytes;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    const ALB_LINE: &str = r#"https 2024-03-21T10:15:30.123456Z app/x/1 192.168.1.100:54321 10.0.1.50:8080 0.001 0.015 0.000 200 200 256 1024 "GET https://h:443/ HTTP/1.1" "UA" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 arn:… "Root=1-a" "h" "arn:acm:…" 0 2024-03-21T10:15:30.107456Z "forward" "-" "-" "10.0.1.50:8080" "200" "-" "-" "-""#;

    fn join_record(fields: &[String]) -> String {
        fields
            .iter()
            .map(|field| {
                if field.contains(' ') || field.contains('"') || field.is_empty() {
                    format!("\"{}\"", field.replace('"', "\"\""))
                } else {
                    field.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn alb_parser() -> Parser {
        Parser::new(Arc::new(FieldFilter::all(LbType::Alb)))
    }

    async fn read_all(input: &[&[u8]]) -> Result<Vec<Vec<String>>, ProcessError> {
        let (writer, reader) = pipe(input.len() + 1);
        for chunk in input {
            assert!(writer.write(Bytes::copy_from_slice(chunk)).await);
        }
        drop(writer);

        let mut reader = RecordReader::new(reader);
        let mut records = Vec::new();
        while let Some(record) = reader.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    #[test]
    fn test_split_plain_and_quoted() {
        let fields = split_record(r#"a "b c" d"#).unwrap();
        assert_eq!(fields, vec!["a", "b c", "d"]);
    }

    #[test]
    fn test_split_escaped_quote() {
        let fields = split_record(r#""say ""hi""" x"#).unwrap();
        assert_eq!(fields, vec![r#"say "hi""#, "x"]);
    }

    #[test]
    fn test_split_empty_fields() {
        assert_eq!(split_record("a  b").unwrap(), vec!["a", "", "b"]);
        assert_eq!(split_record(r#""" x"#).unwrap(), vec!["", "x"]);
    }

    #[test]
    fn test_split_open_quote() {
        assert!(split_record(r#"a "b c"#).is_none());
    }

    #[test]
    fn test_minimal_alb_record() {
        let record = split_record(ALB_LINE).unwrap();
        let entry = alb_parser().parse_record(&record, 1).unwrap();

        assert_eq!(entry.fields["elb_status_code"], "200");
        assert_eq!(entry.fields["request"], "GET https://h:443/ HTTP/1.1");
        assert_eq!(entry.fields["user_agent"], "UA");
        assert_eq!(
            entry.timestamp,
            DateTime::parse_from_rfc3339("2024-03-21T10:15:30.123456Z").unwrap()
        );
        assert_eq!(entry.fields.len(), record.len());
    }

    #[test]
    #[traced_test]
    fn test_extra_fields_warn_once() {
        let mut record = split_record(ALB_LINE).unwrap();
        record.resize(33, "-".to_string());
        record.extend(["x".to_string(), "y".to_string(), "z".to_string()]);

        let mut parser = alb_parser();
        let first = parser.parse_record(&record, 1).unwrap();
        let second = parser.parse_record(&record, 2).unwrap();

        assert_eq!(first.fields.len(), 33);
        assert_eq!(second.fields.len(), 33);
        assert!(logs_contain("schema_extension"));
        assert!(logs_contain("got=36"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("schema_extension")).count() {
                1 => Ok(()),
                n => Err(format!("expected one schema_extension warning, got {n}")),
            }
        });
    }

    #[test]
    fn test_short_old_format() {
        let record: Vec<String> = split_record(ALB_LINE).unwrap().into_iter().take(10).collect();
        let entry = alb_parser().parse_record(&record, 1).unwrap();

        let keys: Vec<&str> = entry.fields.keys().map(String::as_str).collect();
        let mut expected = LbType::Alb.fields()[..10].to_vec();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_too_short() {
        let err = alb_parser()
            .parse_record(&["https".to_string()], 7)
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::RecordTooShort {
                line: 7,
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_nlb_time_index() {
        let record: Vec<String> = ["tls", "2.0", "2024-01-15T10:00:00Z", "net/x/1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut parser = Parser::new(Arc::new(FieldFilter::all(LbType::Nlb)));
        let entry = parser.parse_record(&record, 1).unwrap();
        assert_eq!(entry.fields["version"], "2.0");

        let err = parser.parse_record(&record[..2], 2).unwrap_err();
        assert!(matches!(err, ProcessError::RecordTooShort { expected: 3, .. }));
    }

    #[test]
    fn test_timestamp_with_offset() {
        let record = vec!["https".to_string(), "2024-03-21T12:15:30.5+02:00".to_string()];
        let entry = alb_parser().parse_record(&record, 1).unwrap();
        assert_eq!(
            entry.timestamp.to_rfc3339(),
            "2024-03-21T10:15:30.500+00:00"
        );
    }

    #[test]
    fn test_bad_timestamp() {
        let record = vec!["https".to_string(), "yesterday".to_string()];
        let err = alb_parser().parse_record(&record, 4).unwrap_err();
        assert!(matches!(err, ProcessError::Timestamp { line: 4, ref value, .. } if value == "yesterday"));
    }

    #[test]
    fn test_filter_subset() {
        let filter = FieldFilter::new(LbType::Alb, "time,request,elb_status_code").unwrap();
        let mut parser = Parser::new(Arc::new(filter));
        let entry = parser
            .parse_record(&split_record(ALB_LINE).unwrap(), 1)
            .unwrap();

        let keys: Vec<&str> = entry.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["elb_status_code", "request", "time"]);
        assert_eq!(entry.fields["time"], "2024-03-21T10:15:30.123456Z");
    }

    #[tokio::test]
    async fn test_reader_handles_lines_split_across_chunks() {
        let records = read_all(&[b"a b", b" c\r\nd ", b"e\n\nf g"]).await.unwrap();
        assert_eq!(
            records,
            vec![vec!["a", "b", "c"], vec!["d", "e"], vec!["f", "g"]]
        );
    }

    #[tokio::test]
    async fn test_reader_quoted_newline() {
        let records = read_all(&[b"a \"b\nc\" d\ne f\n"]).await.unwrap();
        assert_eq!(records, vec![vec!["a", "b\nc", "d"], vec!["e", "f"]]);
    }

    #[tokio::test]
    async fn test_reader_unterminated_quote() {
        let err = read_all(&[b"a b\nc \"d\n"]).await.unwrap_err();
        assert!(matches!(err, ProcessError::UnterminatedQuote { line: 2 }));
    }

    #[tokio::test]
    async fn test_stray_quote_gives_up_at_record_limit() {
        let (writer, reader) = pipe(4);
        let producer = tokio::spawn(async move {
            let mut written = 0;
            if !writer
                .write(Bytes::from_static(b"https 2024-03-21T10:15:30Z \"stray\n"))
                .await
            {
                return written;
            }
            for i in 0..10_000 {
                let line = format!("https 2024-03-21T10:15:30Z app/x/{i} {}\n", "x".repeat(100));
                if !writer.write(Bytes::from(line)).await {
                    break;
                }
                written += 1;
            }
            written
        });

        let mut reader = RecordReader::with_max_record_bytes(reader, 4 * 1024);
        let err = reader.next_record().await.unwrap_err();
        assert!(matches!(err, ProcessError::UnterminatedQuote { line: 1 }));
        drop(reader);

        let written = producer.await.unwrap();
        assert!(written < 100, "reader kept consuming after the limit: {written} lines");
    }

    #[tokio::test]
    async fn test_long_quoted_field_spanning_many_lines() {
        let mut input = String::from("a \"");
        for i in 0..5_000 {
            input.push_str(&format!("line {i}\n"));
        }
        input.push_str("end\" b\nc d\n");

        let records = read_all(&[input.as_bytes()]).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].len(), 3);
        assert_eq!(records[0][1].lines().count(), 5_001);
        assert!(records[0][1].ends_with("line 4999\nend"));
        assert_eq!(records[1], vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_reader_surfaces_decode_error() {
        let (writer, reader) = pipe(4);
        assert!(writer.write(Bytes::from_static(b"a b\n")).await);
        writer
            .fail(DecodeError::Io(std::io::Error::other("corrupt")))
            .await;

        let mut reader = RecordReader::new(reader);
        assert_eq!(reader.next_record().await.unwrap().unwrap(), vec!["a", "b"]);
        assert!(matches!(
            reader.next_record().await,
            Err(ProcessError::Decode(DecodeError::Io(_)))
        ));
    }

    #[test]
    fn test_round_trip_sample_line() {
        let fields = split_record(ALB_LINE).unwrap();
        let rejoined = join_record(&fields);
        assert_eq!(split_record(&rejoined).unwrap(), fields);
    }

    proptest! {
        #[test]
        fn prop_split_inverts_join(fields in prop::collection::vec("[a-zA-Z0-9:/.\\-\" ]{0,12}", 1..40)) {
            let line = join_record(&fields);
            prop_assert_eq!(split_record(&line).unwrap(), fields);
        }
    }
}
