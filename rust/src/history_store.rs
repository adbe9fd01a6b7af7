use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub prompt: String,
    pub ts: String,
}

/// Recent prompts that produced an image, newest first. Lives only as long as
/// the session that owns it.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    max_entries: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(Self::MAX_ENTRIES)
    }
}

impl HistoryStore {
    pub const MAX_ENTRIES: usize = 5;

    pub fn new(max_entries: usize) -> Self {
        let resolved_max = max_entries.clamp(1, Self::MAX_ENTRIES);
        Self {
            entries: VecDeque::with_capacity(resolved_max),
            max_entries: resolved_max,
        }
    }

    /// Moves a case-insensitive match to the front instead of duplicating it.
    pub fn record(&mut self, prompt: &str) -> Option<HistoryEntry> {
        let cleaned = prompt.trim();
        if cleaned.is_empty() {
            return None;
        }

        let key = cleaned.to_lowercase();
        self.entries
            .retain(|entry| entry.prompt.trim().to_lowercase() != key);

        let entry = HistoryEntry {
            prompt: cleaned.to_string(),
            ts: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        self.entries.push_front(entry.clone());
        self.entries.truncate(self.max_entries);
        Some(entry)
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn prompts(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.prompt.as_str()).collect()
    }
}
