use crate::error::CliError;
use delta_model::{BlobType, ChangeEvent};

/// Reads a newline-delimited JSON log of `ChangeEvent` values. Blank lines
/// are skipped so a hand-edited fixture can use them as separators.
pub async fn read_events(path: &str) -> Result<Vec<ChangeEvent>, CliError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::Read { path: path.to_string(), source })?;

    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| CliError::EventParse { line: i + 1, source })
        })
        .collect()
}

/// The blob type every replayed DML event carries. The demo replays a
/// flat log rather than distinguishing an initial snapshot load from
/// streaming change capture, so every event is tagged `Streaming`.
pub const REPLAY_BLOB_TYPE: BlobType = BlobType::Streaming;
