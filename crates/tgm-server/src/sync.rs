use tracing::{debug, info};

use tgm_core::Result;

use crate::state::AppState;

#[derive(Clone, Copy, Debug)]
pub struct SyncReport {
    pub updates: usize,
    pub saved: usize,
}

/// One sync cycle: read the persisted cursor, long-poll from `cursor + 1`,
/// resolve attachments (through the media URL cache), upsert by message id,
/// and persist the advanced cursor. Re-running with the same offset
/// re-fetches the same batch and overwrites identical rows harmlessly.
pub async fn run_sync(state: &AppState) -> Result<SyncReport> {
    let offset = { state.store.lock().await.cursor().map(|c| c + 1) };
    debug!("sync starting at offset {offset:?}");

    let batch = state.client.channel_updates(offset).await?;

    let mut resolved = Vec::with_capacity(batch.posts.len());
    for (mut post, update_id) in batch.posts {
        if let Some(file_id) = post.media.as_ref().map(|m| m.file_id.clone()) {
            let cached = { state.media_cache.lock().await.get(file_id.as_str()) };
            match cached {
                Some(url) => {
                    if let Some(media) = &mut post.media {
                        media.file_url = Some(url);
                    }
                }
                None => {
                    state.client.resolve_post_media(&mut post).await;
                    if let Some(url) = post.media.as_ref().and_then(|m| m.file_url.clone()) {
                        state.media_cache.lock().await.set(file_id, url);
                    }
                }
            }
        }
        resolved.push((post, update_id));
    }

    let report = {
        let mut store = state.store.lock().await;
        let saved = store.upsert_batch(resolved);
        if let Some(last) = batch.last_update_id {
            store.advance_cursor(last);
        }
        store.save()?;
        SyncReport {
            updates: batch.updates_seen,
            saved,
        }
    };

    if report.saved > 0 {
        // Cached pages are stale now.
        state.posts_cache.lock().await.clear();
    }

    info!(
        "sync complete: {} updates seen, {} posts saved",
        report.updates, report.saved
    );
    Ok(report)
}
