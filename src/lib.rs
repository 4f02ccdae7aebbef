use anyhow::{bail, Context, Result};
use clap::Parser;
use flate2::{Compression, GzBuilder};
use log::debug;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};

const USAGE: &str = "\
Packs the given files into a gzip-compressed tar archive.

tgz_path    - relative or absolute path of the output archive, including
              file name and extension. an existing file is overwritten.
fileNN_path - relative path of an input file. directories are not accepted.
              each entry is stored under the path exactly as given, so
              sub-folders inside the archive follow the relative location
              of the file.";

// name of the GNU record that carries an entry name too long for the header
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

#[derive(Parser, Debug)]
#[clap(version, about = "pack files into a .tar.gz, keeping their paths", long_about = USAGE)]
pub struct Args {
    /// path of the archive to write
    #[clap(required=true)]
    tgz_path: PathBuf,

    /// files to add, in order.
    /// names starting with - go after --
    #[clap(required=true)]
    files: Vec<PathBuf>,
}

pub fn run(args: Args) -> Result<()> {
    let out = create_output(&args.tgz_path)?;
    create_archive(&args.files, BufWriter::new(out)).context("Error creating archive")?;
    println!("Archive created successfully");
    Ok(())
}

/// Creates the archive file, truncating whatever was there before.
pub fn create_output(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Error writing archive: {}", path.display()))
}

/// Writes every file in `files`, in order, as a tar stream gzipped into `out`.
///
/// Stops at the first file that fails. The tar and gzip trailers are written
/// either way: explicitly on success, by drop otherwise, so entries added
/// before the failure stay readable.
pub fn create_archive<W: Write>(files: &[PathBuf], out: W) -> Result<()> {
    let encoder = GzBuilder::new().mtime(0).write(out, Compression::default());
    let mut builder = Builder::new(encoder);

    for file in files {
        add_entry(&mut builder, file)?;
    }

    let encoder = builder.into_inner().context("failed to finish tar stream")?;
    let mut out = encoder.finish().context("failed to finish gzip stream")?;
    out.flush().context("failed to flush archive")?;
    debug!("wrote {} entries", files.len());
    Ok(())
}

/// Appends one file under its literal path.
pub fn add_entry<W: Write>(builder: &mut Builder<W>, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let meta = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if meta.is_dir() {
        bail!("{} is a directory", path.display());
    }
    debug!("adding {} ({} bytes)", path.display(), meta.len());

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&meta, HeaderMode::Complete);
    // the header builders only keep the base name or refuse `..`, the
    // archive must hold the path as typed
    set_entry_name(builder, &mut header, path.as_os_str().as_encoded_bytes())
        .with_context(|| format!("failed to name entry {}", path.display()))?;
    header.set_cksum();

    builder
        .append(&header, ExactReader::new(file, meta.len()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Stores `name` as the header's entry name without any normalization.
///
/// Names longer than the header's name field are preceded by a GNU long-name
/// record, the header itself keeps the leading bytes.
pub fn set_entry_name<W: Write>(
    builder: &mut Builder<W>,
    header: &mut Header,
    name: &[u8],
) -> Result<()> {
    if name.is_empty() {
        bail!("entry name is empty");
    }
    let field_len = header.as_old().name.len();
    if name.len() > field_len {
        debug!("name is {} bytes, writing long-name record", name.len());
        let mut long = Header::new_gnu();
        write_name_field(&mut long, LONG_LINK_NAME);
        long.set_mode(0o644);
        long.set_uid(0);
        long.set_gid(0);
        long.set_mtime(0);
        // NUL terminated
        long.set_size(name.len() as u64 + 1);
        long.set_entry_type(EntryType::GNULongName);
        long.set_cksum();
        builder.append(&long, name.chain(&[0u8][..]))?;
    }
    write_name_field(header, &name[..name.len().min(field_len)]);
    Ok(())
}

fn write_name_field(header: &mut Header, name: &[u8]) {
    let field = &mut header.as_old_mut().name;
    field.fill(0);
    field[..name.len()].copy_from_slice(name);
}

/// Yields exactly `len` bytes of `inner` and errors if it holds more or less,
/// so an entry's content can't disagree with the size in its header.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, len: u64) -> Self {
        ExactReader {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "file grew while being archived",
                )),
            };
        }
        let max = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
