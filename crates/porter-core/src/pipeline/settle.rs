use std::path::Path;
use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::ExecutionContext;

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Waits until the file size is stable across two checks, allowing one extra
/// round when the first pair differs.
pub async fn wait_for_settle(
    context: &ExecutionContext,
    path: &Path,
    delay_ms: u64,
) -> Result<(), CoreError> {
    let delay = Duration::from_millis(if delay_ms == 0 {
        DEFAULT_SETTLE_DELAY_MS
    } else {
        delay_ms
    });

    let first = file_size(path, "file not found").await?;
    context.sleep(delay).await?;
    let second = file_size(path, "file disappeared").await?;
    if first == second {
        return Ok(());
    }

    tracing::debug!(path = %path.display(), first, second, "file still growing; waiting another round");
    context.sleep(delay).await?;
    let third = file_size(path, "file disappeared").await?;
    if second != third {
        return Err(CoreError::new(CoreErrorKind::Io, "file still changing size"));
    }
    Ok(())
}

async fn file_size(path: &Path, context: &str) -> Result<u64, CoreError> {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.len())
        .map_err(|error| CoreError::io(context, error))
}
