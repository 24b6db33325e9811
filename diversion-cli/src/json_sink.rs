use std::path::{Path, PathBuf};

use async_trait::async_trait;
use diversion_core::{LayerSink, LayerTable, PortError, WriteMode};
use serde_json::Value;
use tracing::debug;

/// Writes each layer as `<layer>.json` in a directory.
///
/// A replace writes a sibling temp file and renames it over the target, so
/// readers see either the old table or the new one.
pub(crate) struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn target(&self, table: &LayerTable<'_>) -> PathBuf {
        self.dir.join(format!("{}.json", table.layer.slug()))
    }
}

#[async_trait]
impl LayerSink for JsonDirSink {
    fn describe(&self) -> String {
        format!("json:{}", self.dir.display())
    }

    async fn write(&self, table: &LayerTable<'_>, mode: WriteMode) -> Result<usize, PortError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.target(table);
        let fresh = table.json_rows()?;
        let written = fresh.len();

        let rows = match mode {
            WriteMode::Replace => fresh,
            WriteMode::Append => {
                let mut rows = read_rows(&target).await?;
                rows.extend(fresh);
                rows
            }
        };

        replace_file(&target, &serde_json::to_vec_pretty(&rows)?).await?;
        debug!(path = %target.display(), rows = rows.len(), "layer file written");
        Ok(written)
    }
}

async fn read_rows(path: &Path) -> Result<Vec<Value>, PortError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

async fn replace_file(target: &Path, contents: &[u8]) -> Result<(), PortError> {
    let mut staging = target.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    tokio::fs::write(&staging, contents).await?;
    tokio::fs::rename(&staging, target).await?;
    Ok(())
}
