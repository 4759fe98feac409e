//! Date virtual layer (spec.md §4.5.2): year/month/day bucket on a chosen timestamp.

use super::{split_components, FileId};
use crate::scanner::FileRecord;
use chrono::{Datelike, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampField {
    Mtime,
    Ctime,
    Atime,
}

type DayIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<FileId>>>>;

pub struct DateLayer {
    pub name: String,
    field: TimestampField,
    index: DayIndex,
    files: Arc<Vec<FileRecord>>,
}

impl DateLayer {
    pub fn new(name: impl Into<String>, field: TimestampField) -> Self {
        Self { name: name.into(), field, index: BTreeMap::new(), files: Arc::new(Vec::new()) }
    }

    fn secs_for(&self, record: &FileRecord) -> i64 {
        match self.field {
            TimestampField::Mtime => record.mtime.secs,
            TimestampField::Ctime => record.ctime.secs,
            TimestampField::Atime => record.atime.secs,
        }
    }

    pub fn build_index(&mut self, files: Arc<Vec<FileRecord>>) {
        let mut index: DayIndex = BTreeMap::new();
        for (id, record) in files.iter().enumerate() {
            let secs = self.secs_for(record);
            let Some(dt) = Utc.timestamp_opt(secs, 0).single() else { continue };
            let year = dt.year().to_string();
            let month = format!("{:02}", dt.month());
            let day = format!("{:02}", dt.day());
            index.entry(year).or_default().entry(month).or_default().entry(day).or_default().push(id);
        }
        for years in index.values_mut() {
            for months in years.values_mut() {
                for ids in months.values_mut() {
                    ids.sort_by_key(|&id| files[id].name.clone());
                }
            }
        }
        self.index = index;
        self.files = files;
    }

    pub fn resolve(&self, sub_path: &str) -> Option<PathBuf> {
        let parts = split_components(sub_path);
        if parts.len() != 4 {
            return None;
        }
        let (year, month, day, name) = (parts[0], parts[1], parts[2], parts[3]);
        let ids = self.index.get(year)?.get(month)?.get(day)?;
        ids.iter().map(|&id| &self.files[id]).find(|r| r.name == name).map(|r| r.abs_path.clone())
    }

    pub fn list(&self, sub_path: &str) -> Vec<String> {
        let parts = split_components(sub_path);
        match parts.len() {
            0 => {
                let mut years: Vec<String> = self.index.keys().cloned().collect();
                years.sort();
                years
            }
            1 => match self.index.get(parts[0]) {
                Some(months) => {
                    let mut m: Vec<String> = months.keys().cloned().collect();
                    m.sort();
                    m
                }
                None => Vec::new(),
            },
            2 => match self.index.get(parts[0]).and_then(|y| y.get(parts[1])) {
                Some(days) => {
                    let mut d: Vec<String> = days.keys().cloned().collect();
                    d.sort();
                    d
                }
                None => Vec::new(),
            },
            3 => {
                match self.index.get(parts[0]).and_then(|y| y.get(parts[1])).and_then(|m| m.get(parts[2])) {
                    Some(ids) => {
                        let mut names: Vec<String> = ids.iter().map(|&id| self.files[id].name.clone()).collect();
                        names.sort();
                        names
                    }
                    None => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Timestamp;

    fn rec_with_mtime(name: &str, secs: i64) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            rel_path: PathBuf::from(name),
            abs_path: PathBuf::from(format!("/src/{name}")),
            extension: None,
            size: 1,
            mtime: Timestamp { secs, nanos: 0 },
            ctime: Timestamp { secs: 0, nanos: 0 },
            atime: Timestamp { secs: 0, nanos: 0 },
            mode: 0o100644,
            source_priority: 0,
        }
    }

    #[test]
    fn s2_date_grouping() {
        // 2024-11-12T00:00:00Z
        let secs = Utc.with_ymd_and_hms(2024, 11, 12, 0, 0, 0).unwrap().timestamp();
        let mut layer = DateLayer::new("by-date", TimestampField::Mtime);
        layer.build_index(Arc::new(vec![rec_with_mtime("doc.txt", secs)]));

        assert_eq!(layer.list(""), vec!["2024".to_string()]);
        assert_eq!(layer.list("2024"), vec!["11".to_string()]);
        assert_eq!(layer.list("2024/11"), vec!["12".to_string()]);
        assert!(layer.resolve("2024/11/12/doc.txt").is_some());
    }

    #[test]
    fn month_and_day_are_zero_padded() {
        let secs = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap().timestamp();
        let mut layer = DateLayer::new("by-date", TimestampField::Mtime);
        layer.build_index(Arc::new(vec![rec_with_mtime("a.txt", secs)]));
        assert_eq!(layer.list("2024"), vec!["03".to_string()]);
        assert_eq!(layer.list("2024/03"), vec!["05".to_string()]);
    }
}
