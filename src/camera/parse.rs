//! Parsers for gphoto2 text output.
//!
//! Every function here is pure: raw command output in, structured result
//! out. Unrecognized lines are skipped, so banners, warnings and blank
//! lines never break parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::DeviceFile;

/// `There are 2 folders in folder '/store_00010001/DCIM'.`
static FOLDER_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in folder '([^']*)'").expect("valid folder header regex"));

/// ` - 100CANON`
static FOLDER_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-\s+(\S.*?)\s*$").expect("valid folder entry regex"));

/// `#12    IMG_0012.JPG    rd  6324 KB 6000x4000 image/jpeg 1700000000`
static FILE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(\d+)\s+(\S+)").expect("valid file entry regex"));

/// Storage roots look like `store_00010001`.
static STORAGE_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^store_[0-9A-Fa-f]+$").expect("valid storage root regex"));

/// Photo folders are `<number><suffix>`, e.g. `100CANON` or `101_FUJI`.
static PHOTO_FOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([A-Za-z0-9_]*)$").expect("valid photo folder regex"));

/// `Saving file as /photos/IMG_0001.JPG`
static SAVED_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)saving file as\s+(\S.*?)\s*$").expect("valid saved file regex")
});

static STORAGE_FULL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(store full|storage full|no space|not enough space|card full)")
        .expect("valid storage full regex")
});

/// A camera reported by `gphoto2 --auto-detect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedCamera {
    pub model: String,
    pub port: String,
}

/// Parse `--auto-detect` output into the list of attached cameras.
///
/// The table has a `Model  Port` header and a dashed separator; each data
/// row ends with a port token such as `usb:001,005`.
pub fn parse_auto_detect(output: &str) -> Vec<DetectedCamera> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            let (model, port) = line.rsplit_once(char::is_whitespace)?;
            let port = port.trim();
            let is_port = port.starts_with("usb:")
                || port.starts_with("ptpip:")
                || port.starts_with("serial:");
            if !is_port {
                return None;
            }
            Some(DetectedCamera {
                model: model.trim().to_string(),
                port: port.to_string(),
            })
        })
        .collect()
}

/// Parse `--list-folders` output, returning the direct children of `parent`.
///
/// gphoto2 may list recursively; entries are attributed to the most recent
/// `in folder '...'` header. Entries before any header are attributed to
/// `parent`.
pub fn parse_folder_listing(output: &str, parent: &str) -> Vec<String> {
    let parent = normalize_folder(parent);
    let mut current = parent.clone();
    let mut folders = Vec::new();

    for line in output.lines() {
        if let Some(caps) = FOLDER_HEADER.captures(line) {
            current = normalize_folder(&caps[1]);
            continue;
        }
        if current != parent {
            continue;
        }
        if let Some(caps) = FOLDER_ENTRY.captures(line) {
            folders.push(caps[1].to_string());
        }
    }

    folders
}

/// Parse `--list-files` output into numbered file entries.
///
/// Files listed under a different folder header than `folder` are skipped.
pub fn parse_file_listing(output: &str, folder: &str) -> Vec<DeviceFile> {
    let folder = normalize_folder(folder);
    let mut current = folder.clone();
    let mut files = Vec::new();

    for line in output.lines() {
        if let Some(caps) = FOLDER_HEADER.captures(line) {
            current = normalize_folder(&caps[1]);
            continue;
        }
        if current != folder {
            continue;
        }
        if let Some(caps) = FILE_ENTRY.captures(line.trim_start()) {
            let Ok(index) = caps[1].parse::<u32>() else {
                continue;
            };
            files.push(DeviceFile {
                index,
                name: caps[2].to_string(),
            });
        }
    }

    files
}

/// Pick the storage root (`store_XXXXXXXX`) from the root folder list.
pub fn find_storage_root(folders: &[String]) -> Option<&str> {
    folders
        .iter()
        .map(String::as_str)
        .find(|name| STORAGE_ROOT.is_match(name))
}

/// Pick the folder named (or containing) `DCIM`.
pub fn find_dcim(folders: &[String]) -> Option<&str> {
    folders
        .iter()
        .map(String::as_str)
        .find(|name| name.eq_ignore_ascii_case("DCIM"))
        .or_else(|| {
            folders
                .iter()
                .map(String::as_str)
                .find(|name| name.to_ascii_uppercase().contains("DCIM"))
        })
}

/// Pick the photo folder with the highest numeric prefix.
///
/// Cameras roll over to a higher-numbered folder once one fills up, so the
/// highest prefix is the one currently receiving captures.
pub fn select_photo_folder(folders: &[String]) -> Option<&str> {
    folders
        .iter()
        .filter_map(|name| {
            let caps = PHOTO_FOLDER.captures(name)?;
            let number = caps[1].parse::<u64>().ok()?;
            Some((number, name.as_str()))
        })
        .max_by_key(|(number, _)| *number)
        .map(|(_, name)| name)
}

/// Extract the saved path from a tethered-capture progress line.
pub fn parse_saved_file(line: &str) -> Option<&str> {
    SAVED_FILE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// File name component of a path printed by gphoto2.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// True if the line reports that the camera storage is out of space.
pub fn is_storage_full(line: &str) -> bool {
    STORAGE_FULL.is_match(line)
}

/// True if `name` has one of `extensions` (case-insensitive, without dot).
pub fn has_extension(name: &str, extensions: &[String]) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    extensions.iter().any(|allowed| {
        allowed
            .trim_start_matches('.')
            .eq_ignore_ascii_case(ext)
    })
}

/// Join a device folder and a child name.
pub fn join_folder(parent: &str, child: &str) -> String {
    let parent = normalize_folder(parent);
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
