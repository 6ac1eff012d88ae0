use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{PipelineReport, ProgressEvent, ProgressSink};
use crate::validate::ValidationReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &PipelineReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_validation(report: &ValidationReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable console output; progress goes through `tracing`.
pub struct TextOutput;

impl TextOutput {
    pub fn print_report(report: &PipelineReport) {
        let prep = &report.preparation;
        println!("Series:     {}", report.accession);
        if let Some(organism) = &report.organism {
            println!("Organism:   {organism}");
        }
        println!("Samples:    {}", report.samples);
        println!("Input rows: {}", prep.input_rows);
        println!("Rejected identifiers:   {}", prep.rejected_ids);
        println!("Unresolved identifiers: {}", prep.resolution.unresolved);
        println!(
            "Removed rows: {} empty symbol, {} negative, {} missing",
            prep.cleaning.empty_symbol.removed,
            prep.cleaning.negative.removed,
            prep.cleaning.missing.removed
        );
        println!("Genes after aggregation: {}", prep.genes);
        println!();
        println!(
            "{:<32} {:>12} {:>8} {:>9} {:>10}",
            "label", "lib_size", "factor", "detected", "median"
        );
        for sample in &report.summary.samples {
            println!(
                "{:<32} {:>12.0} {:>8.4} {:>9} {:>10.3}",
                sample.label,
                sample.library_size,
                sample.norm_factor,
                sample.detected_genes,
                sample.median_log_cpm
            );
        }
        println!();
        for group in &report.summary.groups {
            println!(
                "group {:<24} n={:<4} mean logCPM {:.3}",
                group.group, group.samples, group.mean_log_cpm
            );
        }
        println!();
        println!("Aggregated counts: {}", report.artifacts.aggregated);
        println!("Normalized counts: {}", report.artifacts.normalized);
        println!("Report:            {}", report.artifacts.report);
    }

    pub fn print_validation(report: &ValidationReport) {
        for id in &report.valid {
            println!("valid\t{id}");
        }
        println!("rejected\t{}", report.rejected);
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
