//! Line sources for accounting input.
//!
//! A source is a lazy, finite, non-restartable sequence of lines: a file,
//! standard input, a running sacct process, or an in-memory fixture.

use crate::sacct::SacctError;
use async_trait::async_trait;
use camino::Utf8Path;
use coact_parsers::CommandLines;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or None at end of input.
    async fn next_line(&mut self) -> Result<Option<String>, SacctError>;
}

/// Lines held in memory.
pub struct StaticLines {
    lines: std::vec::IntoIter<String>,
}

impl StaticLines {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines: lines.into_iter(),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(text.lines().map(str::to_string).collect())
    }
}

#[async_trait]
impl LineSource for StaticLines {
    async fn next_line(&mut self) -> Result<Option<String>, SacctError> {
        Ok(self.lines.next())
    }
}

/// Lines read from any buffered async reader.
pub struct ReaderLines<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> ReaderLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl ReaderLines<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl ReaderLines<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Utf8Path) -> Result<Self, SacctError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SacctError::Io(format!("{}: {}", path, e)))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for ReaderLines<R> {
    async fn next_line(&mut self) -> Result<Option<String>, SacctError> {
        self.lines
            .next_line()
            .await
            .map_err(|e| SacctError::Io(e.to_string()))
    }
}

/// A running process. The exit status is checked once stdout is exhausted.
#[async_trait]
impl LineSource for CommandLines {
    async fn next_line(&mut self) -> Result<Option<String>, SacctError> {
        match CommandLines::next_line(self).await? {
            Some(line) => Ok(Some(line)),
            None => {
                self.finish().await?;
                Ok(None)
            }
        }
    }
}
