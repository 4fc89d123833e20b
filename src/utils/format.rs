const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
const UNIT_SIZE: f64 = 1024.0;

fn scale(bytes: u64) -> (f64, &'static str) {
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    (size, UNITS[unit_index])
}

/// Fixed two decimals, e.g. `1.50 MB`.
pub fn format_bytes(bytes: u64) -> String {
    let (size, unit) = scale(bytes);
    format!("{:.2} {}", size, unit)
}

/// The document API's size notation: up to two decimals, trailing zeros
/// dropped (`2 MB`, `1.5 KB`).
pub fn format_file_size(bytes: u64) -> String {
    let (size, unit) = scale(bytes);
    let rounded = format!("{:.2}", size);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024), "2 MB");
        assert_eq!(format_file_size(1000), "1000 B");
    }
}
