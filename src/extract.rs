//! Incremental reader over an export archive.
//!
//! An archive is a single JSON array of user objects that may be larger
//! than available memory. [`ArchiveReader`] walks the array framing itself
//! (`[`, `,`, `]`) and hands each element to `serde_json`, so at most one
//! [`UserRecord`] is materialized at a time.
//!
//! ```rust
//! use chat_sieve::extract::ArchiveReader;
//!
//! let data = br#"[{"user_id": "u1", "conversations": []}, {"user_id": "u2"}]"#;
//! let users: Vec<_> = ArchiveReader::new(&data[..])
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(users.len(), 2);
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;

use crate::error::SourceError;
use crate::models::UserRecord;

/// Open an archive file for streaming.
pub fn open_archive(path: &Path) -> Result<ArchiveReader<BufReader<File>>, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ArchiveReader::new(BufReader::new(file)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Elements,
    Done,
}

/// Iterator of user records pulled lazily from a JSON array.
///
/// Fused after the closing bracket or after the first error.
pub struct ArchiveReader<R> {
    reader: R,
    state: State,
    index: usize,
}

impl<R: BufRead> ArchiveReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Start,
            index: 0,
        }
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek_significant(&mut self) -> Result<Option<u8>, SourceError> {
        loop {
            let (skipped, next) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                let skipped = buf
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .count();
                (skipped, buf.get(skipped).copied())
            };
            self.reader.consume(skipped);
            if next.is_some() {
                return Ok(next);
            }
        }
    }

    fn expect_end_of_input(&mut self) -> Result<(), SourceError> {
        match self.peek_significant()? {
            None => Ok(()),
            Some(b) => Err(SourceError::Malformed(format!(
                "unexpected '{}' after the closing bracket",
                b as char
            ))),
        }
    }

    fn next_record(&mut self) -> Result<Option<UserRecord>, SourceError> {
        if self.state == State::Start {
            match self.peek_significant()? {
                Some(b'[') => self.reader.consume(1),
                Some(b) => {
                    return Err(SourceError::Malformed(format!(
                        "expected a top-level array, found '{}'",
                        b as char
                    )))
                }
                None => return Err(SourceError::Malformed("archive is empty".to_string())),
            }
            self.state = State::Elements;
        }

        match self.peek_significant()? {
            Some(b']') => {
                if self.index > 0 {
                    return Err(SourceError::Malformed(format!(
                        "trailing comma after record #{}",
                        self.index - 1
                    )));
                }
                self.reader.consume(1);
                self.expect_end_of_input()?;
                return Ok(None);
            }
            None => {
                return Err(SourceError::Malformed(
                    "unterminated top-level array".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        let record = UserRecord::deserialize(&mut de).map_err(|source| SourceError::Record {
            index: self.index,
            source,
        })?;
        self.index += 1;

        match self.peek_significant()? {
            Some(b',') => self.reader.consume(1),
            Some(b']') => {
                self.reader.consume(1);
                self.expect_end_of_input()?;
                self.state = State::Done;
            }
            Some(b) => {
                return Err(SourceError::Malformed(format!(
                    "expected ',' or ']' after record #{}, found '{}'",
                    self.index - 1,
                    b as char
                )))
            }
            None => {
                return Err(SourceError::Malformed(
                    "unterminated top-level array".to_string(),
                ))
            }
        }

        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for ArchiveReader<R> {
    type Item = Result<UserRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(data: &str) -> Vec<Result<UserRecord, SourceError>> {
        ArchiveReader::new(Cursor::new(data.as_bytes().to_vec())).collect()
    }

    #[test]
    fn test_reads_records_in_order() {
        let results = read_all(
            r#"
            [
              {"user_id": "u1", "email": "a@example.com", "conversations": []},
              {"user_id": "u2", "email": "b@example.com", "conversations": [
                {"conversation_id": "c1", "mapping": {}}
              ]}
            ]
            "#,
        );
        let users: Vec<UserRecord> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, "u1");
        assert_eq!(users[1].conversations.len(), 1);
    }

    #[test]
    fn test_empty_array() {
        assert!(read_all("  [ ]  ").is_empty());
    }

    #[test]
    fn test_small_buffer_reads_across_boundaries() {
        let data = r#"[{"user_id": "u1"},   {"user_id": "u2"}]"#;
        let reader = BufReader::with_capacity(3, Cursor::new(data.as_bytes().to_vec()));
        let users: Vec<UserRecord> = ArchiveReader::new(reader)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].user_id, "u2");
    }

    #[test]
    fn test_not_an_array() {
        let results = read_all(r#"{"user_id": "u1"}"#);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_empty_input() {
        let results = read_all("");
        assert!(matches!(results[0], Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_trailing_comma() {
        let results = read_all(r#"[{"user_id": "u1"},]"#);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(SourceError::Malformed(_))));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_element_not_an_object() {
        let results = read_all(r#"[{"user_id": "u1"}, "oops"]"#);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(SourceError::Record { index: 1, .. })
        ));
    }

    #[test]
    fn test_garbage_after_array() {
        let results = read_all(r#"[{"user_id": "u1"}] x"#);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_unterminated() {
        let results = read_all(r#"[{"user_id": "u1"}"#);
        assert!(matches!(results[0], Err(SourceError::Malformed(_))));
    }

    #[test]
    fn test_fused_after_error() {
        let mut reader = ArchiveReader::new(Cursor::new(b"nope".to_vec()));
        assert!(reader.next().unwrap().is_err());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let err = open_archive(Path::new("/definitely/not/here.json"))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }
}
