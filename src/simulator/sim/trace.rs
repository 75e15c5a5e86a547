use crate::dispatch::ExecRecord;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Writes one JSON object per executed instruction
pub struct TraceWriter {
  writer: Option<BufWriter<File>>,
  lines: u64,
}

impl TraceWriter {
  pub fn create(path: Option<&str>) -> Result<Self> {
    let writer = match path {
      Some(p) => {
        log::info!("tracing to {}", p);
        Some(BufWriter::new(File::create(p)?))
      },
      None => None,
    };
    Ok(Self { writer, lines: 0 })
  }

  pub fn is_enabled(&self) -> bool {
    self.writer.is_some()
  }

  pub fn lines(&self) -> u64 {
    self.lines
  }

  pub fn record(&mut self, record: &ExecRecord) -> Result<()> {
    if let Some(writer) = &mut self.writer {
      writeln!(writer, "{}", record.to_json())?;
      self.lines += 1;
    }
    Ok(())
  }

  pub fn flush(&mut self) -> Result<()> {
    if let Some(writer) = &mut self.writer {
      writer.flush()?;
    }
    Ok(())
  }
}
