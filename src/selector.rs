use crate::metadata::{UploadDate, VideoRecord};
use serde::Serialize;

pub const DEFAULT_DOWNLOAD_LIMIT: usize = 20;

/// Thresholds applied before downloading. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub min_views: u64,
    /// When set, records without an upload date are rejected.
    pub min_upload_date: Option<UploadDate>,
    pub limit: usize,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            min_views: 0,
            min_upload_date: None,
            limit: DEFAULT_DOWNLOAD_LIMIT,
        }
    }
}

impl SelectionCriteria {
    pub fn accepts(&self, record: &VideoRecord) -> bool {
        let views_ok = record.view_count >= self.min_views;
        let date_ok = match self.min_upload_date {
            Some(min) => record.upload_date.is_some_and(|date| date >= min),
            None => true,
        };
        views_ok && date_ok
    }
}

/// Records picked for download, most viewed first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub records: Vec<VideoRecord>,
    /// How many records passed the filters before truncation.
    pub matched: usize,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Filters, stable-sorts by view count descending, then truncates.
pub fn select(records: &[VideoRecord], criteria: &SelectionCriteria) -> Selection {
    let mut kept: Vec<VideoRecord> = records
        .iter()
        .filter(|record| criteria.accepts(record))
        .cloned()
        .collect();
    let matched = kept.len();
    kept.sort_by(|a, b| b.view_count.cmp(&a.view_count));
    kept.truncate(criteria.limit);
    Selection {
        records: kept,
        matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DEFAULT_DESCRIPTION;

    fn record(url: &str, views: u64, date: Option<&str>) -> VideoRecord {
        VideoRecord {
            url: url.to_string(),
            id: None,
            title: url.to_string(),
            view_count: views,
            upload_date: date.map(|value| value.parse().unwrap()),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    fn criteria(min_views: u64, since: Option<&str>, limit: usize) -> SelectionCriteria {
        SelectionCriteria {
            min_views,
            min_upload_date: since.map(|value| value.parse().unwrap()),
            limit,
        }
    }

    #[test]
    fn threshold_keeps_most_viewed_in_order() {
        let records = vec![
            record("https://x.test/a", 5_000, None),
            record("https://x.test/b", 25_000, None),
            record("https://x.test/c", 30_000, None),
        ];
        let selection = select(&records, &criteria(20_000, None, 20));
        let picked: Vec<(&str, u64)> = selection
            .records
            .iter()
            .map(|record| (record.url.as_str(), record.view_count))
            .collect();
        assert_eq!(
            picked,
            [("https://x.test/c", 30_000), ("https://x.test/b", 25_000)]
        );
        assert_eq!(selection.matched, 2);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let records = vec![
            record("https://x.test/a", 100, Some("20250301")),
            record("https://x.test/b", 99, Some("20250301")),
            record("https://x.test/c", 100, Some("20250228")),
        ];
        let selection = select(&records, &criteria(100, Some("20250301"), 10));
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.records[0].url, "https://x.test/a");
    }

    #[test]
    fn date_filter_rejects_undated_records() {
        let records = vec![
            record("https://x.test/a", 10, None),
            record("https://x.test/b", 10, Some("20260101")),
        ];
        let with_date = select(&records, &criteria(0, Some("20250101"), 10));
        assert_eq!(with_date.len(), 1);
        let without_date = select(&records, &criteria(0, None, 10));
        assert_eq!(without_date.len(), 2);
    }

    #[test]
    fn sort_is_stable_for_equal_counts() {
        let records = vec![
            record("https://x.test/first", 10, None),
            record("https://x.test/big", 50, None),
            record("https://x.test/second", 10, None),
        ];
        let selection = select(&records, &criteria(0, None, 10));
        let urls: Vec<&str> = selection.records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://x.test/big",
                "https://x.test/first",
                "https://x.test/second"
            ]
        );
    }

    #[test]
    fn output_is_capped_sorted_and_filtered() {
        // Deterministic pseudo-random spread of counts and dates.
        let records: Vec<VideoRecord> = (0..200u64)
            .map(|i| {
                let views = (i * 7919) % 1_000;
                let date = format!("2025{:02}{:02}", 1 + i % 12, 1 + i % 28);
                record(&format!("https://x.test/{i}"), views, (i % 5 != 0).then_some(date.as_str()))
            })
            .collect();
        for limit in [0, 1, 7, 50, 500] {
            let wanted = criteria(400, Some("20250601"), limit);
            let selection = select(&records, &wanted);
            assert!(selection.len() <= limit);
            assert!(selection.len() <= selection.matched);
            assert!(
                selection
                    .records
                    .windows(2)
                    .all(|pair| pair[0].view_count >= pair[1].view_count)
            );
            assert!(selection.records.iter().all(|record| wanted.accepts(record)));
        }
    }
}
