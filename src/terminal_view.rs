use std::io::Write;
use std::path::PathBuf;

use crate::security::InputValidator;
use crate::uploader::{ControlState, ProgressUpdate, QueuedFile, SizeBand, SizeIndicator, UploadView};

const BAR_WIDTH: usize = 30;

/// Draws the upload widget on the terminal.
///
/// The follow-up page of a successful upload is written to `output_path`
/// when one is set, otherwise to stdout.
pub struct TerminalView {
    output_path: Option<PathBuf>,
    last_percent: Option<u32>,
}

impl TerminalView {
    pub fn new(output_path: Option<PathBuf>) -> Self {
        Self {
            output_path,
            last_percent: None,
        }
    }
}

pub fn text_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("{}{}", "#".repeat(filled), "-".repeat(width - filled))
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}

fn band_name(band: SizeBand) -> &'static str {
    match band {
        SizeBand::Green => "green",
        SizeBand::Orange => "orange",
        SizeBand::Red => "red",
    }
}

impl UploadView for TerminalView {
    fn render_file_list(&mut self, files: &[QueuedFile]) {
        if files.is_empty() {
            return;
        }

        println!("Files to upload ({}):", files.len());
        for file in files {
            println!(
                "  {}  ({})",
                InputValidator::sanitize_filename(&file.name),
                format_size(file.size)
            );
        }
    }

    fn set_drag_tip_visible(&mut self, visible: bool) {
        if visible {
            println!("No files queued. Pass files as arguments or drop them into the watched directory.");
        }
    }

    fn set_drop_area_visible(&mut self, visible: bool) {
        log::debug!("Drop area {}", if visible { "active" } else { "idle" });
    }

    fn render_size_indicator(&mut self, indicator: &SizeIndicator) {
        if !indicator.visible {
            return;
        }

        println!(
            "[{}] {:.0}% of upload limit used, {} ({})",
            text_bar(indicator.percent_used / 100.0, BAR_WIDTH),
            indicator.percent_used,
            indicator.label(),
            band_name(indicator.band)
        );
    }

    fn set_controls(&mut self, controls: ControlState) {
        if controls.abort_visible {
            eprintln!("Uploading... press Ctrl+C to abort.");
        }
        log::debug!("Controls: {:?}", controls);
    }

    fn show_progress(&mut self, update: ProgressUpdate) {
        let percent = (update.fraction * 100.0).floor() as u32;
        if self.last_percent == Some(percent) && !update.done {
            return;
        }
        self.last_percent = Some(percent);

        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\rUploading [{}] {:>3}%",
            text_bar(update.fraction, BAR_WIDTH),
            percent
        );
        if update.done {
            let _ = write!(stderr, " sent, waiting for server");
        }
        let _ = stderr.flush();
    }

    fn clear_progress(&mut self) {
        if self.last_percent.take().is_some() {
            eprintln!();
        }
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn clear_errors(&mut self) {}

    fn replace_document(&mut self, body: &str) {
        self.clear_progress();

        match &self.output_path {
            Some(path) => match std::fs::write(path, body) {
                Ok(()) => println!("Upload complete. Server response saved to {}", path.display()),
                Err(e) => {
                    log::error!("Failed to write response to {}: {}", path.display(), e);
                    println!("{}", body);
                }
            },
            None => {
                eprintln!("Upload complete.");
                println!("{}", body);
            }
        }
    }
}
