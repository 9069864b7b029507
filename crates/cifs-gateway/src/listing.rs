//! Directory entry listing

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::ConnectedShare;
use crate::smb::{filetime_to_datetime, SmbDirEntry};

const PSEUDO_ENTRIES: [&str; 2] = [".", ".."];

/// One file or directory in a share listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    /// Allocation size reported by the server, not the end-of-file length
    pub size: u64,
    /// Raw FILETIME
    pub change_time_windows_ts: u64,
    pub change_time_string: String,
}

impl DirectoryEntry {
    pub fn from_raw(raw: &SmbDirEntry) -> Self {
        Self {
            name: raw.file_name.clone(),
            is_directory: raw.is_directory(),
            size: raw.allocation_size,
            change_time_windows_ts: raw.change_time,
            change_time_string: filetime_to_datetime(raw.change_time).to_rfc3339(),
        }
    }
}

/// Requested listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Whatever order the server returned
    #[default]
    Unordered,
    /// Ascending change time, ties in server order
    ChangeTime,
}

impl SortKey {
    /// `"changetime"` selects [`SortKey::ChangeTime`]; anything else is unordered.
    pub fn parse(key: Option<&str>) -> Self {
        match key {
            Some(k) if k.eq_ignore_ascii_case("changetime") => SortKey::ChangeTime,
            _ => SortKey::Unordered,
        }
    }
}

/// Drops the `.`/`..` records and converts the rest.
pub fn filter_entries(raw: &[SmbDirEntry]) -> Vec<DirectoryEntry> {
    raw.iter()
        .filter(|e| !PSEUDO_ENTRIES.contains(&e.file_name.as_str()))
        .map(DirectoryEntry::from_raw)
        .collect()
}

pub fn sort_entries(entries: &mut [DirectoryEntry], key: SortKey) {
    if key == SortKey::ChangeTime {
        // sort_by_key is stable
        entries.sort_by_key(|e| e.change_time_windows_ts);
    }
}

/// Lists `path` on `share`. Fails with `PathNotFound` if the client says the
/// directory is missing; the path itself is not checked here.
pub fn list(share: &ConnectedShare, path: &str, key: SortKey) -> Result<Vec<DirectoryEntry>> {
    let raw = share.list(path)?;
    let mut entries = filter_entries(&raw);
    sort_entries(&mut entries, key);
    tracing::debug!(share = share.name(), path, count = entries.len(), "listed");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smb::{FILE_ATTRIBUTE_ARCHIVE, FILE_ATTRIBUTE_DIRECTORY};
    use proptest::prelude::*;

    fn raw(name: &str, attrs: u32, change_time: u64) -> SmbDirEntry {
        SmbDirEntry {
            file_name: name.to_string(),
            file_attributes: attrs,
            end_of_file: 10,
            allocation_size: 4096,
            change_time,
        }
    }

    #[test]
    fn test_from_raw() {
        let entry = DirectoryEntry::from_raw(&raw("a.xml", FILE_ATTRIBUTE_ARCHIVE, 132_223_104_000_000_000));
        assert_eq!(entry.name, "a.xml");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, 4096);
        assert_eq!(entry.change_time_windows_ts, 132_223_104_000_000_000);
        assert_eq!(entry.change_time_string, "2020-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_directory_flag_from_attribute() {
        let entry = DirectoryEntry::from_raw(&raw("sub.xml", FILE_ATTRIBUTE_DIRECTORY, 0));
        assert!(entry.is_directory);
    }

    #[test]
    fn test_json_field_names() {
        let entry = DirectoryEntry::from_raw(&raw("x", FILE_ATTRIBUTE_ARCHIVE, 0));
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("isDirectory").is_some());
        assert!(json.get("changeTimeWindowsTs").is_some());
        assert!(json.get("changeTimeString").is_some());
        assert_eq!(json["size"], 4096);
    }

    #[test]
    fn test_filter_pseudo_entries() {
        let listing = vec![
            raw(".", FILE_ATTRIBUTE_DIRECTORY, 1),
            raw("..", FILE_ATTRIBUTE_DIRECTORY, 1),
            raw("...", FILE_ATTRIBUTE_ARCHIVE, 1),
            raw("b", FILE_ATTRIBUTE_ARCHIVE, 1),
        ];
        let names: Vec<_> = filter_entries(&listing).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["...", "b"]);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse(Some("changetime")), SortKey::ChangeTime);
        assert_eq!(SortKey::parse(Some("CHANGETIME")), SortKey::ChangeTime);
        assert_eq!(SortKey::parse(Some("name")), SortKey::Unordered);
        assert_eq!(SortKey::parse(None), SortKey::Unordered);
    }

    #[test]
    fn test_unordered_keeps_listing_order() {
        let listing = vec![raw("b", 0, 3), raw("a", 0, 1)];
        let mut entries = filter_entries(&listing);
        sort_entries(&mut entries, SortKey::Unordered);
        assert_eq!(entries[0].name, "b");
    }

    #[test]
    fn test_change_time_sort_is_stable() {
        let listing = vec![raw("c", 0, 5), raw("a", 0, 2), raw("b", 0, 5), raw("d", 0, 2)];
        let mut entries = filter_entries(&listing);
        sort_entries(&mut entries, SortKey::ChangeTime);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "d", "c", "b"]);
    }

    proptest! {
        #[test]
        fn prop_pseudo_entries_never_listed(
            names in proptest::collection::vec(
                prop_oneof![Just(".".to_string()), Just("..".to_string()), "[a-z.]{1,6}"],
                0..32,
            )
        ) {
            let listing: Vec<_> = names.iter().map(|n| raw(n, 0, 0)).collect();
            for entry in filter_entries(&listing) {
                prop_assert!(entry.name != "." && entry.name != "..");
            }
        }

        #[test]
        fn prop_change_time_sort_non_decreasing_and_stable(
            times in proptest::collection::vec(0u64..8, 0..40)
        ) {
            let listing: Vec<_> = times
                .iter()
                .enumerate()
                .map(|(i, t)| raw(&format!("f{}", i), 0, *t))
                .collect();
            let mut entries = filter_entries(&listing);
            sort_entries(&mut entries, SortKey::ChangeTime);
            prop_assert_eq!(entries.len(), listing.len());
            for pair in entries.windows(2) {
                prop_assert!(pair[0].change_time_windows_ts <= pair[1].change_time_windows_ts);
                if pair[0].change_time_windows_ts == pair[1].change_time_windows_ts {
                    let a: usize = pair[0].name[1..].parse().unwrap();
                    let b: usize = pair[1].name[1..].parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
