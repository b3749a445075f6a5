//! Directory listing formatter (part of C5, LIST/NLST): produces an
//! `ls -l`-compatible listing from directory iteration and `stat`,
//! computed entirely in-process (no shell-out — see spec rationale).

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tokio::fs;

const SIX_MONTHS_SECS: i64 = 60 * 60 * 24 * 30 * 6;

/// Builds the full listing body for `dir`, one entry per line, LF
/// separated, ready to stream to the data socket as-is.
pub async fn list_dir(dir: &Path) -> Result<String> {
    let mut entries = fs::read_dir(dir).await?;
    let mut lines = Vec::new();
    let now = Utc::now();

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        lines.push(format_entry(&name, &metadata, now));
    }

    Ok(lines.join("\n"))
}

fn format_entry(name: &str, metadata: &Metadata, now: DateTime<Utc>) -> String {
    format!(
        "{} {:>3} {:<8} {:<8} {:>10} {} {}",
        mode_string(metadata),
        metadata.nlink(),
        "ftp",
        "ftp",
        metadata.len(),
        format_mtime(metadata, now),
        name,
    )
}

fn mode_string(metadata: &Metadata) -> String {
    let file_type = if metadata.is_dir() {
        'd'
    } else if metadata.file_type().is_symlink() {
        'l'
    } else {
        '-'
    };

    let mode = metadata.permissions().mode();
    let mut perms = String::with_capacity(10);
    perms.push(file_type);
    for (shift, triplet) in [(6, "rwx"), (3, "rwx"), (0, "rwx")] {
        for (i, ch) in triplet.chars().enumerate() {
            let bit = 1 << (2 - i);
            perms.push(if (mode >> shift) & bit != 0 { ch } else { '-' });
        }
    }
    perms
}

fn format_mtime(metadata: &Metadata, now: DateTime<Utc>) -> String {
    format_mtime_secs(metadata.mtime(), now)
}

fn format_mtime_secs(mtime_secs: i64, now: DateTime<Utc>) -> String {
    let mtime = DateTime::<Utc>::from_timestamp(mtime_secs, 0).unwrap_or(now);
    let age_secs = (now - mtime).num_seconds();

    if age_secs.abs() > SIX_MONTHS_SECS {
        mtime.format("%b %e  %Y").to_string()
    } else {
        mtime.format("%b %e %H:%M").to_string()
    }
}
