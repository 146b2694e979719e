use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use opencv::core::Vector;
use opencv::imgcodecs;
use serde::Serialize;
use thiserror::Error;

use crate::analytics::RunSummary;
use crate::config::ReportConfig;
use crate::report::render_plot;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode summary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write samples: {0}")]
    Csv(#[from] csv::Error),
    #[error("opencv error: {0}")]
    Cv(#[from] opencv::Error),
    #[error("failed to write image {0}")]
    Image(String),
}

#[derive(Serialize)]
struct SampleRow {
    index: usize,
    time_s: f64,
    value: f64,
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    variant: String,
    frame_rate: f64,
    sample_count: usize,
    peak_count: usize,
    estimates: &'a [f64],
    rate_bpm: Option<f64>,
}

/// One `index,time_s,value` row per sample of the run.
pub fn write_samples_csv(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for (index, &value) in summary.raw.iter().enumerate() {
        writer.serialize(SampleRow {
            index,
            time_s: index as f64 / summary.frame_rate,
            value,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let record = SummaryRecord {
        variant: summary.variant.to_string(),
        frame_rate: summary.frame_rate,
        sample_count: summary.raw.len(),
        peak_count: summary.peaks.len(),
        estimates: &summary.estimates,
        rate_bpm: summary.rate_bpm,
    };
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &record)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_plot(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let plot = render_plot(summary)?;
    let name = path.to_string_lossy();
    if !imgcodecs::imwrite(&name, &plot, &Vector::<i32>::new())? {
        return Err(ExportError::Image(name.into_owned()));
    }
    Ok(())
}

/// Writes every artifact configured in `report`. Failures are logged and
/// do not abort the others.
pub fn export_all(report: &ReportConfig, summary: &RunSummary) {
    if let Some(path) = &report.plot_path {
        match write_plot(path, summary) {
            Ok(()) => tracing::info!(path = %path.display(), "plot written"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "failed to write plot"),
        }
    }
    if let Some(path) = &report.samples_csv {
        match write_samples_csv(path, summary) {
            Ok(()) => tracing::info!(path = %path.display(), "samples written"),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to write samples")
            }
        }
    }
    if let Some(path) = &report.summary_json {
        match write_summary_json(path, summary) {
            Ok(()) => tracing::info!(path = %path.display(), "summary written"),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to write summary")
            }
        }
    }
}
