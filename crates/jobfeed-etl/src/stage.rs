//! Staging writer: serializes the transformed row stream into a
//! tab-delimited, optionally gzip-compressed staging artifact.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::extract::Extractor;
use crate::transform::Transformer;
use crate::value::Row;

/// Field delimiter in staging artifacts.
pub const FIELD_DELIMITER: char = '\t';

/// Suffix appended when artifacts are compressed.
pub const GZIP_EXT: &str = ".gz";

/// Outcome of one staging run. Counters are observational only.
#[derive(Debug, Clone)]
pub struct StagingReport {
    /// Path of the written artifact.
    pub path: PathBuf,
    /// Records pulled from the extractor.
    pub records_extracted: u64,
    /// Rows serialized successfully.
    pub rows_written: u64,
    /// Rows that failed to serialize and were skipped.
    pub rows_malformed: u64,
}

/// Writes the extract/transform stream into a staging artifact.
///
/// The header line (declared field order) is always written first, even
/// when the extractor yields nothing: a header-only artifact is success.
/// A row that fails to serialize is counted and skipped; it never aborts
/// the file.
pub struct StagingWriter {
    dir: PathBuf,
    compress: bool,
    escape: char,
    null_token: String,
}

impl StagingWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool, escape: char, null_token: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            compress,
            escape,
            null_token: null_token.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.etl.staging_dir.clone(),
            config.etl.compress,
            config.etl.escape_char,
            config.etl.null_token.clone(),
        )
    }

    /// Pull every record from the extractor, transform it and append the
    /// resulting rows to a fresh artifact named by the transformer's
    /// staging-file contract.
    pub async fn write<E, T>(&self, extractor: &mut E, transformer: &T) -> Result<StagingReport>
    where
        E: Extractor + ?Sized,
        T: Transformer + ?Sized,
    {
        let fields = transformer.output_fields()?.to_vec();
        let mut file_name = transformer.staging_file_name()?;
        if self.compress && !file_name.ends_with(GZIP_EXT) {
            file_name.push_str(GZIP_EXT);
        }
        let path = self.dir.join(file_name);

        let mut sink = ArtifactSink::create(&path, self.compress)?;
        writeln!(sink, "{}", fields.join("\t"))?;

        let mut records_extracted = 0u64;
        let mut rows_written = 0u64;
        let mut rows_malformed = 0u64;

        while let Some(record) = extractor.next_record().await? {
            for row in transformer.transform(&record) {
                match serialize_row(&row, &fields, self.escape, &self.null_token) {
                    Ok(line) => {
                        writeln!(sink, "{}", line)?;
                        rows_written += 1;
                    }
                    Err(e) => {
                        warn!("Skipping malformed row: {}", e);
                        rows_malformed += 1;
                    }
                }
            }
            records_extracted += 1;
        }

        sink.finish()?;
        info!(
            "Staged {} rows from {} records into {:?} ({} malformed)",
            rows_written, records_extracted, path, rows_malformed
        );

        Ok(StagingReport {
            path,
            records_extracted,
            rows_written,
            rows_malformed,
        })
    }
}

enum ArtifactSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl ArtifactSink {
    fn create(path: &std::path::Path, compress: bool) -> Result<Self> {
        let writer = BufWriter::new(File::create(path)?);
        Ok(if compress {
            ArtifactSink::Gzip(GzEncoder::new(writer, Compression::default()))
        } else {
            ArtifactSink::Plain(writer)
        })
    }

    fn finish(self) -> Result<()> {
        match self {
            ArtifactSink::Plain(mut writer) => writer.flush()?,
            ArtifactSink::Gzip(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for ArtifactSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ArtifactSink::Plain(writer) => writer.write(buf),
            ArtifactSink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ArtifactSink::Plain(writer) => writer.flush(),
            ArtifactSink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Serialize one row in declared field order. A missing declared field
/// is a serialization failure; the caller counts it and moves on.
fn serialize_row(row: &Row, fields: &[String], escape: char, null_token: &str) -> Result<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let value = row
            .get(field)
            .ok_or_else(|| {
                EtlError::MalformedRow(format!("missing declared field '{}'", field))
            })?;
        parts.push(escape_field(&value.render(null_token), escape));
    }
    Ok(parts.join("\t"))
}

/// Prefix embedded delimiters, line breaks and the escape character
/// itself with the escape character. Nothing is quoted.
fn escape_field(value: &str, escape: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == FIELD_DELIMITER || c == '\n' || c == '\r' || c == escape {
            out.push(escape);
        }
        out.push(c);
    }
    out
}
