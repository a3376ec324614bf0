//! File persistence for recorded session tables: one directory per session,
//! one CSV (or NDJSON) file per tracker table.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use model::{DataCategory, DataTable, SessionId};
use mocap_tracker_core::RowSink;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Ndjson,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Ndjson => "ndjson",
        }
    }
}

/// Writes completed tables under `root/<participant>_<timestamp>_<id>/`,
/// grouped by data category.
pub struct SessionWriter {
    session_dir: PathBuf,
    format: OutputFormat,
}

impl SessionWriter {
    pub fn new(root: &Path, participant: &str, format: OutputFormat) -> Result<Self> {
        let stamp = timestamp()?;
        let id = SessionId::new();
        let dir_name = format!("{participant}_{stamp}_{id}");
        let session_dir = root.join(dir_name);
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("create session dir {}", session_dir.display()))?;
        info!(dir = %session_dir.display(), "session output directory created");
        Ok(Self { session_dir, format })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    fn table_path(&self, name: &str, category: DataCategory) -> Result<PathBuf> {
        let dir = self.session_dir.join(category.dir_name());
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir.join(format!("{name}.{}", self.format.extension())))
    }
}

impl RowSink for SessionWriter {
    fn save(&self, table: DataTable, name: &str, category: DataCategory) -> Result<()> {
        let path = self.table_path(name, category)?;
        match self.format {
            OutputFormat::Csv => write_csv(&table, &path)?,
            OutputFormat::Ndjson => write_ndjson(&table, &path)?,
        }
        if table.is_empty() {
            warn!(name, "persisted a header-only table with no rows");
        }
        info!(name, rows = table.row_count(), path = %path.display(), "table written");
        Ok(())
    }
}

pub fn write_csv(table: &DataTable, path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    w.write_record(table.header().columns())?;
    for row in table.rows() {
        w.write_record(row.cells().iter().map(|(_, v)| v.as_str()))?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_ndjson(table: &DataTable, path: &Path) -> Result<()> {
    use std::io::Write;
    let f = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    for row in table.rows() {
        let mut obj = serde_json::Map::new();
        for (column, value) in row.cells() {
            obj.insert(column.clone(), serde_json::Value::String(value.clone()));
        }
        writeln!(w, "{}", serde_json::Value::Object(obj))?;
    }
    w.flush()?;
    Ok(())
}

fn timestamp() -> Result<String> {
    let fmt = time::format_description::parse("[year][month][day]_[hour][minute][second]")?;
    Ok(time::OffsetDateTime::now_utc().format(&fmt)?)
}
