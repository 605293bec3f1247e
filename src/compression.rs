//! Gzip-transparent input and output streams
//!
//! Every codec reads through [`InputStream`], which sniffs the gzip magic on
//! open and decompresses on the fly. Gzip streams cannot seek backwards, so
//! a backwards seek reopens the file and skips forward again.

use crate::error::{Result, VoxError};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as FlateCompression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to a file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Raw bytes
    None,
    /// gzip stream
    Gzip,
}

impl CompressionMethod {
    /// Detect from the leading bytes of a file
    pub fn detect(leading: &[u8]) -> Self {
        if leading.starts_with(&GZIP_MAGIC) {
            CompressionMethod::Gzip
        } else {
            CompressionMethod::None
        }
    }

    /// Compression to use when writing `path`: gzip for a `.gz` suffix.
    pub fn for_output(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("gz") => CompressionMethod::Gzip,
            _ => CompressionMethod::None,
        }
    }
}

enum Source {
    Plain(BufReader<File>),
    Gzip(BufReader<MultiGzDecoder<BufReader<File>>>),
}

/// Readable, forward-seekable view of a possibly gzipped file
pub struct InputStream {
    path: PathBuf,
    source: Source,
    pos: u64,
}

impl InputStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source = Self::open_source(&path)?;
        Ok(Self {
            path,
            source,
            pos: 0,
        })
    }

    fn open_source(path: &Path) -> Result<Source> {
        let mut reader = BufReader::new(File::open(path)?);
        let method = CompressionMethod::detect(reader.fill_buf()?);
        Ok(match method {
            CompressionMethod::None => Source::Plain(reader),
            CompressionMethod::Gzip => Source::Gzip(BufReader::new(MultiGzDecoder::new(reader))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.source, Source::Gzip(_))
    }

    /// Offset into the uncompressed stream
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move to an absolute offset in the uncompressed stream.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if let Source::Plain(reader) = &mut self.source {
            reader.seek(SeekFrom::Start(offset))?;
            self.pos = offset;
            return Ok(());
        }
        if offset < self.pos {
            self.source = Self::open_source(&self.path)?;
            self.pos = 0;
        }
        self.skip(offset - self.pos)
    }

    /// Skip `count` bytes forward.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if let Source::Plain(reader) = &mut self.source {
            reader.seek_relative(count as i64)?;
            self.pos += count;
            return Ok(());
        }
        let skipped = io::copy(&mut self.by_ref().take(count), &mut io::sink())?;
        if skipped < count {
            return Err(VoxError::truncated(count as usize, skipped as usize));
        }
        Ok(())
    }

    /// Fill `buf` completely; a short read is `TruncatedData`.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.read_up_to(buf)?;
        if got < buf.len() {
            return Err(VoxError::truncated(buf.len(), got));
        }
        Ok(())
    }

    /// Read as many bytes as are available, up to `buf.len()`.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.source {
            Source::Plain(reader) => reader.read(buf)?,
            Source::Gzip(reader) => reader.read(buf)?,
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl BufRead for InputStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.source {
            Source::Plain(reader) => reader.fill_buf(),
            Source::Gzip(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match &mut self.source {
            Source::Plain(reader) => reader.consume(amt),
            Source::Gzip(reader) => reader.consume(amt),
        }
        self.pos += amt as u64;
    }
}

/// Read up to `len` leading bytes of `path`, decompressing if needed.
///
/// Paths that cannot be opened as files (directories, missing files) yield
/// an empty prefix.
pub fn read_prefix(path: &Path, len: usize) -> Vec<u8> {
    let mut prefix = vec![0u8; len];
    let got = match InputStream::open(path) {
        Ok(mut stream) => stream.read_up_to(&mut prefix).unwrap_or(0),
        Err(_) => 0,
    };
    prefix.truncate(got);
    prefix
}

/// Writable stream that gzips when asked to
pub enum OutputStream {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputStream {
    pub fn new(file: File, method: CompressionMethod) -> Self {
        let writer = BufWriter::new(file);
        match method {
            CompressionMethod::None => OutputStream::Plain(writer),
            CompressionMethod::Gzip => {
                OutputStream::Gzip(GzEncoder::new(writer, FlateCompression::default()))
            }
        }
    }

    /// Flush everything and hand back the underlying file.
    pub fn finish(self) -> Result<File> {
        let writer = match self {
            OutputStream::Plain(writer) => writer,
            OutputStream::Gzip(encoder) => encoder.finish()?,
        };
        writer.into_inner().map_err(|e| VoxError::Io(e.into_error()))
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputStream::Plain(writer) => writer.write(buf),
            OutputStream::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputStream::Plain(writer) => writer.flush(),
            OutputStream::Gzip(encoder) => encoder.flush(),
        }
    }
}
