//! Status words and sizes for transfer lines.

/// Format transfer progress as a padded status word
pub fn format_progress_status(current: u64, total: Option<u64>) -> String {
    let total_valid = total.filter(|&t| t > 0);

    let status_word = if current == 0 {
        "queued"
    } else if let Some(t) = total_valid {
        if current >= t { "complete" } else { "transferring" }
    } else {
        "transferring"
    };

    format!("{status_word:<14}")
}

/// Human-readable byte count, e.g. `1.5 MiB`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_status_format() {
        assert!(format_progress_status(512, Some(1024)).contains("transferring"));
        assert!(format_progress_status(1024, Some(1024)).contains("complete"));
        assert!(format_progress_status(0, Some(1024)).contains("queued"));
        assert!(format_progress_status(10, None).contains("transferring"));
    }

    #[test]
    fn test_progress_status_padding() {
        assert_eq!(format_progress_status(0, None).len(), 14);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
