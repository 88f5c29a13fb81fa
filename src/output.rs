use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::app::{ActiveResult, ListResult, LoadResult, MigrateResult, SampleResult, ShowResult};
use crate::scanner::ScanReport;
use crate::timeline::{ReassignOptions, Reassignment, Timeline, TimelineEvent};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}

/// Plain-text rendering for a terminal.
pub struct TextOutput;

impl TextOutput {
    pub fn list(result: &ListResult) -> Vec<String> {
        result
            .samples
            .iter()
            .map(|entry| {
                format!(
                    "{} [{}]",
                    entry.filename,
                    entry.status.as_str().to_uppercase()
                )
            })
            .collect()
    }

    pub fn show(result: &ShowResult) -> io::Result<Vec<String>> {
        let body = serde_json::to_string_pretty(&result.document).map_err(io::Error::other)?;
        Ok(vec![format!("{} [{}]", result.path, result.status), body])
    }

    pub fn active(result: &ActiveResult) -> Vec<String> {
        match (&result.active, &result.label) {
            (Some(path), Some(label)) => vec![format!("{label} ({path})")],
            (Some(path), None) => vec![path.to_string()],
            _ => vec![format!("no active sample in {}", result.directory)],
        }
    }

    pub fn sample(result: &SampleResult) -> Vec<String> {
        match &result.path {
            Some(path) => vec![format!("{}: {path}", result.action)],
            None => vec![result.action.clone()],
        }
    }

    pub fn load(result: &LoadResult) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(path) = &result.ejected {
            lines.push(format!("ejected: {path}"));
        }
        if let Some(path) = &result.created {
            lines.push(format!("created: {path}"));
        }
        if lines.is_empty() {
            lines.push("no sample annotated".to_string());
        }
        lines
    }

    pub fn timeline(timeline: &Timeline) -> Vec<String> {
        timeline.events().iter().map(Self::event).collect()
    }

    pub fn events(events: &[TimelineEvent]) -> Vec<String> {
        events.iter().map(Self::event).collect()
    }

    pub fn event(event: &TimelineEvent) -> String {
        let mut line = event.display_text();
        if event.is_orphan {
            line.push_str(" | ORPHAN");
        } else if let (Some(_), Some(sample)) = (event.experiment_number(), &event.sample) {
            if let Some(name) = sample.file_name() {
                line.push_str(&format!(" | {name}"));
            }
        }
        line
    }

    pub fn options(options: &ReassignOptions) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(path) = &options.previous {
            lines.push(format!("--previous: extend ejection of {path}"));
        }
        if let Some(path) = &options.next {
            lines.push(format!("--next: move creation of {path}"));
        }
        if lines.is_empty() {
            lines.push("no neighbouring sample can absorb the selection".to_string());
        }
        lines
    }

    pub fn reassignment(result: &Reassignment) -> Vec<String> {
        let mut lines = vec![format!(
            "{}: {} -> {}",
            match result.direction {
                crate::timeline::ReassignDirection::Previous => "ejection moved",
                crate::timeline::ReassignDirection::Next => "creation moved",
            },
            result.document,
            crate::domain::format_timestamp(&result.shifted_to)
        )];
        if !result.attributed.is_empty() {
            let numbers = result
                .attributed
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("attributed experiments: {numbers}"));
        }
        lines.extend(Self::timeline(&result.timeline));
        lines
    }

    pub fn scan(report: &ScanReport) -> Vec<String> {
        let mut lines = report
            .samples
            .iter()
            .map(|summary| {
                format!(
                    "{} | {} | {} | {}",
                    summary.created, summary.experiment, summary.label, summary.components
                )
            })
            .collect::<Vec<_>>();
        lines.push(format!(
            "{} samples, {} dataset directories, {} unannotated experiment roots, {} skipped",
            report.samples.len(),
            report.dataset_dirs.len(),
            report.experiment_roots.len(),
            report.skipped
        ));
        if report.cancelled {
            lines.push("scan cancelled; results are partial".to_string());
        }
        lines
    }

    pub fn migrate(result: &MigrateResult) -> Vec<String> {
        vec![format!(
            "{}: {} -> {} ({} blocks{})",
            result.path,
            result.from_version,
            result.to_version,
            result.blocks_applied,
            if result.written { ", written" } else { "" }
        )]
    }

    pub fn print(lines: &[String]) -> io::Result<()> {
        let mut stdout = io::stdout();
        for line in lines {
            stdout.write_all(line.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl crate::app::ProgressSink for TextOutput {
    fn event(&self, event: crate::app::ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(
                elapsed_ms = elapsed_ms(elapsed),
                "{}",
                event.message
            ),
            None => info!("{}", event.message),
        }
    }
}

/// Saturates instead of truncating.
fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
