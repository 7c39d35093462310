// CSV and JSON report writers.
//
// Every report has a writer-based function (tested without touching disk)
// and goes to a file through `to_file`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::analytics::dashboard::{SentimentBucket, SentimentCounts};
use crate::analytics::engagement::PlatformEngagement;
use crate::models::{MonitoredEntity, Post};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing to export")]
    NothingToExport,

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub const POST_HEADER: [&str; 11] = [
    "platform",
    "handle",
    "external_id",
    "published_at",
    "author",
    "likes",
    "shares",
    "replies",
    "views",
    "sentiment",
    "text",
];

const ENTITY_HEADER: [&str; 8] = [
    "id",
    "platform",
    "handle",
    "display_name",
    "interval_secs",
    "is_monitoring",
    "total_items",
    "last_collected",
];

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Create `path` (and its parent directories) and hand a buffered writer
/// to `write`.
pub fn to_file<F>(path: &Path, write: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), ExportError>,
{
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    write(&mut out)?;
    out.flush().map_err(io_err)?;
    info!("exported report to {}", path.display());
    Ok(())
}

/// One row per post. `handles` maps entity id to handle; unknown ids get an
/// empty cell.
pub fn write_posts_csv<W: Write>(
    w: W,
    posts: &[Post],
    handles: &HashMap<i64, String>,
) -> Result<(), ExportError> {
    if posts.is_empty() {
        return Err(ExportError::NothingToExport);
    }
    let mut out = csv::Writer::from_writer(w);
    out.write_record(POST_HEADER)?;
    for p in posts {
        out.write_record([
            p.platform.as_str().to_string(),
            handles.get(&p.entity_id).cloned().unwrap_or_default(),
            p.external_id.clone(),
            ts(&p.published_at),
            p.author.clone().unwrap_or_default(),
            p.likes.to_string(),
            p.shares.to_string(),
            p.replies.to_string(),
            p.views.to_string(),
            p.sentiment_compound
                .map(|c| format!("{c:.4}"))
                .unwrap_or_default(),
            p.text.clone(),
        ])?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn write_entities_csv<W: Write>(w: W, entities: &[MonitoredEntity]) -> Result<(), ExportError> {
    if entities.is_empty() {
        return Err(ExportError::NothingToExport);
    }
    let mut out = csv::Writer::from_writer(w);
    out.write_record(ENTITY_HEADER)?;
    for e in entities {
        out.write_record([
            e.id.to_string(),
            e.platform.as_str().to_string(),
            e.handle.clone(),
            e.display_name.clone().unwrap_or_default(),
            e.interval_secs.to_string(),
            e.is_monitoring.to_string(),
            e.total_items.to_string(),
            e.last_collected.as_ref().map(ts).unwrap_or_default(),
        ])?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Report-style writer: rows differ in length.
fn report_writer<W: Write>(
    w: W,
    title: &str,
    generated_at: &DateTime<Utc>,
) -> Result<csv::Writer<W>, ExportError> {
    let mut out = csv::WriterBuilder::new().flexible(true).from_writer(w);
    out.write_record([title])?;
    let stamp = generated_at.format("%Y-%m-%d %H:%M:%S").to_string();
    out.write_record(["Generated:", stamp.as_str()])?;
    out.write_record([""])?;
    Ok(out)
}

pub fn write_engagement_csv<W: Write>(
    w: W,
    rows: &[PlatformEngagement],
    generated_at: DateTime<Utc>,
) -> Result<(), ExportError> {
    let mut out = report_writer(w, "Social Media Analytics - Engagement Report", &generated_at)?;
    out.write_record(["Platform", "Average Engagement", "Items", "Category"])?;
    for r in rows {
        out.write_record([
            r.platform.as_str().to_string(),
            format!("{:.2}", r.average),
            r.total_items.to_string(),
            r.category.clone(),
        ])?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Summary counts, then the daily series when one is given.
pub fn write_sentiment_csv<W: Write>(
    w: W,
    totals: &SentimentCounts,
    timeline: Option<&[SentimentBucket]>,
    generated_at: DateTime<Utc>,
) -> Result<(), ExportError> {
    let mut out = report_writer(w, "Social Media Analytics - Sentiment Report", &generated_at)?;
    out.write_record(["Sentiment Summary"])?;
    out.write_record(["Total Positive", totals.positive.to_string().as_str()])?;
    out.write_record(["Total Neutral", totals.neutral.to_string().as_str()])?;
    out.write_record(["Total Negative", totals.negative.to_string().as_str()])?;

    if let Some(buckets) = timeline.filter(|b| !b.is_empty()) {
        out.write_record([""])?;
        out.write_record(["Timestamp", "Positive", "Neutral", "Negative"])?;
        for b in buckets {
            out.write_record([
                b.date.to_string(),
                b.counts.positive.to_string(),
                b.counts.neutral.to_string(),
                b.counts.negative.to_string(),
            ])?;
        }
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Pretty-printed JSON of any report value (the dashboard summary, usually).
pub fn write_json<W: Write, T: Serialize>(mut w: W, value: &T) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w).map_err(serde_json::Error::io)?;
    Ok(())
}
