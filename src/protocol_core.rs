//! Line framing shared by the client and the daemon
//!
//! Every protocol token travels as one `\n`-terminated line. File bodies are
//! count-prefixed: a line holding the number of body lines, followed by
//! exactly that many lines.

use crate::protocol::{status, MAX_LINE_BYTES};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one line, without its terminator. `None` means the peer closed the
/// stream before sending anything.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {} bytes", MAX_LINE_BYTES),
        ));
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Like [`read_line`] but for lines the protocol guarantees will follow.
pub async fn expect_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    read_line(reader)
        .await?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed mid-request"))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    writer.write_all(&buf).await
}

pub async fn write_status<W>(writer: &mut W, ok: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let code = if ok { status::SUCCESS } else { status::FAILURE };
    write_line(writer, &code.to_string()).await
}

/// Read a single-bit reply. Anything other than the two status codes is a
/// framing error.
pub async fn read_status<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let line = expect_line(reader).await?;
    match line.trim().parse::<u8>() {
        Ok(status::SUCCESS) => Ok(true),
        Ok(status::FAILURE) => Ok(false),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected status reply {:?}", line),
        )),
    }
}

pub fn parse_count(line: &str) -> Option<usize> {
    line.trim().parse().ok()
}

/// A text file as it travels on the wire: its lines plus their count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferredFile {
    lines: Vec<String>,
}

impl TransferredFile {
    /// Split text on `\n` or `\r\n`. A trailing terminator does not add an
    /// empty line, so `"a\nb\n"` and `"a\nb"` both carry two lines.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_owned).collect(),
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Every line followed by `\n`, the form written to disk and handed to
    /// callers.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Count line followed by the body.
    pub async fn write_to<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_line(writer, &self.lines.len().to_string()).await?;
        for line in &self.lines {
            write_line(writer, line).await?;
        }
        Ok(())
    }

    /// Read exactly `count` body lines.
    pub async fn read_body<R>(reader: &mut R, count: usize) -> io::Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            lines.push(expect_line(reader).await?);
        }
        Ok(Self { lines })
    }

    /// Read the count line, then the body it announces.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = expect_line(reader).await?;
        let count = parse_count(&line).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad line count {:?}", line),
            )
        })?;
        Self::read_body(reader, count).await
    }
}

/// Names of every entry directly under `root`, subdirectories included.
/// Sorted so that one directory snapshot always lists the same way.
pub async fn list_directory(root: &Path) -> io::Result<Vec<String>> {
    let mut dir = tokio::fs::read_dir(root).await?;
    let mut names = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// The single line sent for a listing. An empty directory gives "".
pub fn listing_line(names: &[String]) -> String {
    names.join(" ")
}

/// Find the entry of `root` named exactly `name`, skipping directories.
pub async fn find_regular_file(root: &Path, name: &str) -> io::Result<Option<PathBuf>> {
    let mut dir = tokio::fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        if entry.file_name().to_string_lossy() != name {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            return Ok(None);
        }
        return Ok(Some(entry.path()));
    }
    Ok(None)
}

/// A parameter is sent as one line; embedded line breaks would split it.
pub fn fits_on_one_line(param: &str) -> bool {
    !param.contains(['\n', '\r'])
}

/// Upload targets must name a file directly inside the root: one normal
/// path component, no separators, no NUL.
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\0') {
        return false;
    }
    // Windows ADS defense
    #[cfg(windows)]
    if name.contains(':') {
        return false;
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(s)), None) => s == std::ffi::OsStr::new(name),
        _ => false,
    }
}
