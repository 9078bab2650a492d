//! Metrics Types

use std::fmt;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human readable byte count, 1024-based and truncating
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{} {}", value, UNITS[unit])
}

/// Point-in-time view of the traffic registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficStatus {
    pub open: usize,
    pub total: u64,
    pub rx: u64,
    pub tx: u64,
    /// Display names of joined sessions
    pub joined: Vec<String>,
}

impl fmt::Display for TrafficStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Open Connections: {} | Total: {} | rx: {} | tx: {}",
            self.open,
            self.total,
            format_bytes(self.rx),
            format_bytes(self.tx)
        )?;
        if !self.joined.is_empty() {
            write!(f, " | Joined ({}): {}", self.joined.len(), self.joined.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_truncates() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1 KB");
        assert_eq!(format_bytes(1048576), "1 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5 GB");
        assert_eq!(format_bytes(u64::MAX), "16777215 TB");
    }

    #[test]
    fn status_display() {
        let status = TrafficStatus {
            open: 2,
            total: 9,
            rx: 2048,
            tx: 10,
            joined: vec!["[Steve|1.2.3.4:5]".into()],
        };
        assert_eq!(
            status.to_string(),
            "Open Connections: 2 | Total: 9 | rx: 2 KB | tx: 10 B | Joined (1): [Steve|1.2.3.4:5]"
        );
    }
}
