//! CSV export for interval reports and meter readings.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::Result;
use crate::sim::types::IntervalReport;

/// Column header of the interval report export.
const REPORT_HEADER: &str = "agent_id,interval,target_grid_w,realized_grid_w,tracking_error_w,\
                             deviation_above_w,deviation_below_w,storage_soc_wh,\
                             storage_throughput_wh,planned_grid_w,positions,accepted,\
                             bid_energy_wh,offer_energy_wh";

/// Column header of the meter export.
const METER_HEADER: &str = "agent_id,timestamp,meter_id,energy_in_wh,energy_out_wh";

/// Exports interval reports to a CSV file at the given path.
///
/// Produces deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an error if file creation or writing fails.
pub fn export_reports(reports: &[IntervalReport], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_reports(reports, io::BufWriter::new(file))
}

/// Writes interval reports as CSV to any writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_reports(reports: &[IntervalReport], writer: impl Write) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(REPORT_HEADER.split(',').map(str::trim))?;

    for r in reports {
        wtr.write_record(&[
            r.agent_id.clone(),
            r.interval.to_string(),
            format!("{:.3}", r.target_grid_w),
            format!("{:.3}", r.realized_grid_w),
            format!("{:.3}", r.tracking_error_w()),
            format!("{:.3}", r.deviation_above_w),
            format!("{:.3}", r.deviation_below_w),
            format!("{:.3}", r.storage_soc_wh),
            format!("{:.3}", r.storage_throughput_wh),
            format!("{:.3}", r.planned_grid_w),
            r.positions.to_string(),
            r.accepted.to_string(),
            format!("{:.0}", r.bid_energy_wh),
            format!("{:.0}", r.offer_energy_wh),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports the cumulative meter readings carried by `reports`.
///
/// # Errors
///
/// Returns an error if file creation or writing fails.
pub fn export_meters(reports: &[IntervalReport], path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_meters(reports, io::BufWriter::new(file))
}

/// Writes one row per meter reading, in report order.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_meters(reports: &[IntervalReport], writer: impl Write) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(METER_HEADER.split(','))?;

    for r in reports {
        for m in &r.meters {
            wtr.write_record(&[
                r.agent_id.clone(),
                m.timestamp.to_string(),
                m.meter_id.clone(),
                format!("{:.3}", m.energy_in_wh),
                format!("{:.3}", m.energy_out_wh),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
