//! Prefix enumeration.
//!
//! `objects_under` is the lazy listing of one source prefix with directory
//! markers filtered out; `plan_location` drains it so a run either gets the
//! full set of handles for a prefix or a listing error, never a partial set.

use std::collections::HashSet;

use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::StoreError;
use crate::model::{ObjectHandle, SourceLocation};
use crate::store::SourceStore;

/// True for placeholder entries that stand for the prefix "directory" itself.
pub fn is_directory_marker(handle: &ObjectHandle, location: &SourceLocation) -> bool {
    if handle.path.ends_with('/') {
        return true;
    }
    handle.path.trim_matches('/') == location.prefix_name()
}

/// Lazily list every transferable object under `location`.
pub fn objects_under<'a>(
    source: &'a dyn SourceStore,
    location: &'a SourceLocation,
) -> BoxStream<'a, Result<ObjectHandle, StoreError>> {
    source
        .list(&location.prefix)
        .try_filter(move |handle| {
            let marker = is_directory_marker(handle, location);
            if marker {
                debug!(path = %handle.path, "skipping directory marker");
            }
            future::ready(!marker)
        })
        .boxed()
}

/// Collect the full listing for `location`.
pub async fn plan_location(
    source: &dyn SourceStore,
    location: &SourceLocation,
) -> Result<Vec<ObjectHandle>, StoreError> {
    let handles: Vec<ObjectHandle> = objects_under(source, location).try_collect().await?;
    Ok(drop_folded_markers(handles))
}

/// Remove zero-length entries that are the parent of another listed key.
///
/// Stores that normalise keys report a nested `dir/` marker as `dir`, so the
/// trailing slash check in `is_directory_marker` never sees it.
fn drop_folded_markers(handles: Vec<ObjectHandle>) -> Vec<ObjectHandle> {
    let markers: HashSet<String> = handles
        .iter()
        .filter(|h| h.size == Some(0))
        .filter(|h| {
            let dir = format!("{}/", h.path);
            handles.iter().any(|other| other.path.starts_with(&dir))
        })
        .map(|h| h.path.clone())
        .collect();

    handles
        .into_iter()
        .filter(|h| {
            let marker = markers.contains(&h.path);
            if marker {
                debug!(path = %h.path, "skipping directory marker");
            }
            !marker
        })
        .collect()
}
