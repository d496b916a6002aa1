use core::fmt::Display;
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{Error, Result, Stage};

/// Number of zero bytes kept behind the source text.
pub const SOURCE_PADDING: usize = 16;

/// Kernel source text loaded from disk or memory.
///
/// The buffer is followed by [`SOURCE_PADDING`] zero bytes, so it can be handed
/// to compilers that expect a terminated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    buf: Vec<u8>,
    len: usize,
    path: Option<PathBuf>,
}

impl KernelSource {
    pub fn new(text: impl Into<String>) -> KernelSource {
        let mut buf = text.into().into_bytes();
        let len = buf.len();
        buf.resize(len + SOURCE_PADDING, 0);
        KernelSource {
            buf,
            len,
            path: None,
        }
    }

    /// Reads the file at `path`.
    ///
    /// Reading fewer bytes than the file's size is logged as a warning and
    /// the partial text is kept. A missing or unreadable file fails with
    /// [`UnableToBuildKernel`](crate::ErrorKind::UnableToBuildKernel).
    pub fn from_file(path: impl AsRef<Path>) -> Result<KernelSource> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| load_error(path.display(), err))?;
        let expected = file
            .metadata()
            .map_err(|err| load_error(path.display(), err))?
            .len() as usize;

        let mut source = KernelSource::load(file, expected, &path.display())?;
        source.path = Some(path.to_path_buf());
        Ok(source)
    }

    /// Reads source text from `reader`, which is expected to yield
    /// `expected` bytes. A short read is a warning, not an error.
    #[inline]
    pub fn from_reader(reader: impl Read, expected: usize) -> Result<KernelSource> {
        KernelSource::load(reader, expected, &"<memory>")
    }

    fn load(mut reader: impl Read, expected: usize, origin: &dyn Display) -> Result<KernelSource> {
        let mut buf = Vec::with_capacity(expected + SOURCE_PADDING);
        let len = reader
            .read_to_end(&mut buf)
            .map_err(|err| load_error(origin, err))?;
        if len < expected {
            warn!("short read of {origin}: expected {expected} bytes, got {len}");
        }
        buf.resize(len + SOURCE_PADDING, 0);

        debug!("loaded {len} bytes of kernel source from {origin}");
        Ok(KernelSource {
            buf,
            len,
            path: None,
        })
    }

    /// The exact source bytes, without padding.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The source bytes followed by the zero padding. This is what
    /// [`Runtime::create_program`](crate::Runtime::create_program) receives.
    #[inline]
    pub fn padded(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Used in diagnostics: the file path, or `<memory>`.
    pub fn origin(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |path| path.display().to_string())
    }
}

fn load_error(origin: impl Display, err: io::Error) -> Error {
    log::error!("unable to read kernel source {origin}: {err}");
    Error::build(
        Stage::SourceLoad,
        format!("unable to read kernel source {origin}: {err}"),
    )
}

impl From<&str> for KernelSource {
    #[inline]
    fn from(text: &str) -> Self {
        KernelSource::new(text)
    }
}

impl From<String> for KernelSource {
    #[inline]
    fn from(text: String) -> Self {
        KernelSource::new(text)
    }
}
