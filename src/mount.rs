//! Mounting nested archives.
//!
//! A nested archive entry becomes a delegating handler in the containing
//! context whose delegate is the root of a freshly mounted sub-context.
//! Two policies exist: buffering the entry in memory (the default), or
//! extracting it to a temp file first (`useCopy` / force-copy), which
//! trades memory for disk and survives re-reads without re-inflating.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::context::ZipEntryContext;
use crate::error::{VfsError, VfsResult};
use crate::format::RawZipEntry;
use crate::handler::Handler;
use crate::source::{StreamSource, ZipSource};
use crate::temp::{self, TempInfo};

pub(crate) fn mount_nested(
    ctx: &ZipEntryContext,
    parent: &Arc<Handler>,
    name: &str,
    entry: &RawZipEntry,
    source: &ZipSource,
    use_copy: bool,
) -> VfsResult<Arc<Handler>> {
    if use_copy {
        mount_copied(ctx, parent, name, entry, source)
    } else {
        mount_buffered(ctx, parent, name, entry, source)
    }
}

/// No-copy mode: inflate the nested archive into memory and mount a
/// stream-backed sub-context over the buffer.
fn mount_buffered(
    ctx: &ZipEntryContext,
    parent: &Arc<Handler>,
    name: &str,
    entry: &RawZipEntry,
    source: &ZipSource,
) -> VfsResult<Arc<Handler>> {
    let mut bytes = Vec::with_capacity(entry.size as usize);
    source
        .open_entry(entry)?
        .read_to_end(&mut bytes)
        .map_err(|e| VfsError::io(e, entry.name.clone()))?;

    let stream = StreamSource::new(name, bytes, source.last_modified())
        .map_err(|e| VfsError::archive(e, entry.name.clone()))?;

    let delegator = Handler::delegating(ctx.weak(), Some(parent), name);
    let sub = ZipEntryContext::mount_stream(
        ctx.child_uri(delegator.local_path()),
        &delegator,
        stream,
        ctx.config().clone(),
        ctx.aggregated_options(),
    );
    delegator.set_delegate(sub.root());
    delegator.set_sub_context(sub);
    debug!(entry = %entry.name, "mounted nested archive from memory");
    Ok(delegator)
}

/// Copy mode: extract the nested archive to a temp file (reusing a prior
/// extraction registered on the peer context when one is still valid) and
/// mount a file-backed sub-context that deletes the file on cleanup.
fn mount_copied(
    ctx: &ZipEntryContext,
    parent: &Arc<Handler>,
    name: &str,
    entry: &RawZipEntry,
    source: &ZipSource,
) -> VfsResult<Arc<Handler>> {
    let peer_ctx = ctx.peer_context();
    let registry_key = peer_ctx
        .as_ref()
        .map(|peer| ctx.peer_relative_path(peer, &entry.name));

    let existing = registry_key.as_ref().and_then(|key| {
        peer_ctx
            .as_ref()
            .and_then(|peer| peer.temp_info_file(key))
    });

    let (dest, fresh) = match existing {
        Some(file) => (file, false),
        None => (extract_to_temp(ctx, entry, source)?, true),
    };

    let delegator = Handler::delegating(ctx.weak(), Some(parent), name);
    let sub = ZipEntryContext::mount_file(
        ctx.child_uri(delegator.local_path()),
        &delegator,
        &dest,
        ctx.config().clone(),
        ctx.aggregated_options(),
    );
    delegator.set_delegate(sub.root());
    delegator.set_sub_context(sub);

    if fresh && let (Some(peer), Some(key)) = (peer_ctx, registry_key) {
        peer.add_temp_info(
            key,
            TempInfo {
                file: dest,
                handler: delegator.clone(),
            },
        );
    }
    Ok(delegator)
}

fn extract_to_temp(
    ctx: &ZipEntryContext,
    entry: &RawZipEntry,
    source: &ZipSource,
) -> VfsResult<PathBuf> {
    let file_name = temp::temp_file_name(&entry.name);
    let dir = ctx
        .temp_store()
        .and_then(|store| store.create_temp_folder(source.name(), &entry.name))
        .unwrap_or_else(|| temp::nested_temp_dir(ctx.config()));
    std::fs::create_dir_all(&dir).map_err(|e| VfsError::TempIo(e, dir.clone()))?;

    let dest = dir.join(file_name);
    debug!(entry = %entry.name, dest = %dest.display(), "extracting nested archive");

    let mut stream = source.open_entry(entry)?;
    let file = std::fs::File::create(&dest).map_err(|e| VfsError::TempIo(e, dest.clone()))?;
    let mut writer = std::io::BufWriter::new(file);
    std::io::copy(&mut stream, &mut writer)
        .and_then(|_| writer.flush())
        .map_err(|e| VfsError::TempIo(e, dest.clone()))?;
    Ok(dest)
}
