use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

const MAX_NAME_LEN: usize = 50;

/// Replace every character outside `[A-Za-z0-9.-]` with `_` and cap the result at 50 chars.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect()
}

/// Folder prefix with empty, `.` and `..` segments removed.
pub fn normalize_folder(folder: &str) -> String {
    folder
        .split(|c| c == '/' || c == '\\')
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .collect::<Vec<_>>()
        .join("/")
}

/// Generate a unique object key.
/// Scheme: `[{folder}/]{unix_millis}-{16 hex chars}-{sanitized_name}`
pub fn object_key(original_name: &str, folder: Option<&str>) -> String {
    let millis = Utc::now().timestamp_millis();
    let mut random = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut random);
    let name = format!("{}-{}-{}", millis, hex::encode(random), sanitize_name(original_name));

    match folder.map(normalize_folder) {
        Some(folder) if !folder.is_empty() => format!("{}/{}", folder, name),
        _ => name,
    }
}

/// Content digest recorded at upload time (SHA-256, lowercase hex).
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
