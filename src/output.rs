use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DownloadReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
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

/// Progress lines on stderr for interactive runs.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

impl ConsoleOutput {
    pub fn print_summary(report: &DownloadReport) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        println!("{cyan}SDO download summary{reset}");
        println!(
            "{cyan}window: {} .. {}{reset}",
            report.start_time, report.end_time
        );
        for channel in &report.channels {
            let color = if channel.failed == 0 { green } else { yellow };
            println!(
                "{color}  {} -> {} ({} files, {} failed){reset}",
                channel.channel, channel.directory, channel.files, channel.failed
            );
        }

        if report.needed_files.is_empty() {
            println!("{green}All files retrieved.{reset}");
            return;
        }
        println!(
            "{red}Files needed: {} in {} channel(s){reset}",
            report.needed_files.total_failures(),
            report.needed_files.len()
        );
        for failure in report.needed_files.batches().iter().flatten() {
            println!("{red}  {failure}{reset}");
        }
    }
}
