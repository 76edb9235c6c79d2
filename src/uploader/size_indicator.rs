use serde::Serialize;

/// Colour band of the size bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBand {
    Green,
    Orange,
    Red,
}

/// Presentation of how much of the upload budget the queue uses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeIndicator {
    pub percent_used: f64,
    pub band: SizeBand,
    pub remaining_mb: i64,
    /// The bar is hidden until the queue uses more than half the budget.
    pub visible: bool,
}

impl SizeIndicator {
    pub fn compute(total_size: u64, max_upload_size: u64) -> Self {
        let percent_used = if max_upload_size == 0 {
            100.0
        } else {
            total_size as f64 * 100.0 / max_upload_size as f64
        };

        let band = if (0.0..=70.0).contains(&percent_used) {
            SizeBand::Green
        } else if percent_used > 70.0 && percent_used <= 90.0 {
            SizeBand::Orange
        } else {
            SizeBand::Red
        };

        let max_mb = max_upload_size as f64 / 1024.0 / 1024.0;
        let remaining_mb = (max_mb * (1.0 - percent_used / 100.0)).round() as i64;

        Self {
            percent_used,
            band,
            remaining_mb,
            visible: percent_used > 50.0,
        }
    }

    pub fn label(&self) -> String {
        format!("{} MB remaining", self.remaining_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(SizeIndicator::compute(0, 100).band, SizeBand::Green);
        assert_eq!(SizeIndicator::compute(70, 100).band, SizeBand::Green);
        assert_eq!(SizeIndicator::compute(71, 100).band, SizeBand::Orange);
        assert_eq!(SizeIndicator::compute(90, 100).band, SizeBand::Orange);
        assert_eq!(SizeIndicator::compute(91, 100).band, SizeBand::Red);
    }

    #[test]
    fn test_hidden_until_half_used() {
        assert!(!SizeIndicator::compute(50, 100).visible);
        assert!(SizeIndicator::compute(51, 100).visible);
    }

    #[test]
    fn test_remaining_megabytes() {
        let indicator = SizeIndicator::compute(25 * MB, 100 * MB);
        assert_eq!(indicator.remaining_mb, 75);
        assert_eq!(indicator.label(), "75 MB remaining");

        let empty = SizeIndicator::compute(0, 1024 * MB);
        assert_eq!(empty.remaining_mb, 1024);
        assert_eq!(empty.percent_used, 0.0);
    }
}
