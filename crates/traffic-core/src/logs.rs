use chrono::Local;
use std::collections::VecDeque;
use uuid::Uuid;

pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    System,
    Vehicle,
    Transcript,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogEntry {
    id: Uuid,
    time: String,
    message: String,
    category: LogCategory,
}

impl LogEntry {
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            time: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
            category,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Local wall-clock label, `HH:MM:SS`.
    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> LogCategory {
        self.category
    }
}

/// Bounded activity log, newest entry first.
#[derive(Debug, Clone)]
pub struct LogBook {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, category: LogCategory, message: impl Into<String>) {
        self.entries.push_front(LogEntry::new(category, message));
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_capped() {
        let mut book = LogBook::new(3);
        for i in 0..5 {
            book.push(LogCategory::System, format!("entry {i}"));
        }
        let messages: Vec<_> = book.entries().map(|e| e.message().to_string()).collect();
        assert_eq!(messages, vec!["entry 4", "entry 3", "entry 2"]);
    }

    #[test]
    fn entries_get_unique_ids_and_a_clock_label() {
        let mut book = LogBook::default();
        book.push(LogCategory::Vehicle, "a");
        book.push(LogCategory::Error, "b");
        let entries = book.to_vec();
        assert_ne!(entries[0].id(), entries[1].id());
        assert_eq!(entries[0].category(), LogCategory::Error);
        let time = entries[0].time();
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);

        book.clear();
        assert!(book.is_empty());
    }
}
