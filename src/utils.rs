use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::fs;

/// Makes sure the directory that will hold `file_path` exists.
/// Returns true when it had to be created; calling it again is a no-op.
pub async fn ensure_parent_directory<P: AsRef<Path>>(file_path: P) -> Result<bool> {
    let Some(dir) = file_path.as_ref().parent() else {
        return Ok(false);
    };
    if dir.as_os_str().is_empty() || fs::try_exists(dir).await.unwrap_or(false) {
        debug!("Directory {:?} already present", dir);
        return Ok(false);
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating directory {:?}", dir))?;
    info!("Created directory at: {:?}", dir);
    Ok(true)
}
