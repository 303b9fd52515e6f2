//! Remote key layout and content-type mapping.
//!
//! Keys look like `materials/{yyyy}/{mm}/{dd}/{uuid}{.ext}`; anything that
//! resolves objects by key depends on this layout.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const KEY_PREFIX: &str = "materials";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Date-partitioned key with a random suffix and the original extension.
pub fn generate(now: DateTime<Utc>, original_file_name: &str) -> String {
    format!(
        "{}/{}/{}{}",
        KEY_PREFIX,
        now.format("%Y/%m/%d"),
        Uuid::new_v4(),
        file_extension(original_file_name)
    )
}

/// Extension including the dot, or `""`. A leading dot (`.bashrc`) is not
/// an extension.
pub fn file_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[idx..],
        _ => "",
    }
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).to_ascii_lowercase().as_str() {
        ".pdf" => "application/pdf",
        ".doc" => "application/msword",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".xls" => "application/vnd.ms-excel",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".ppt" => "application/vnd.ms-powerpoint",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".txt" => "text/plain",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".mp4" => "video/mp4",
        ".mp3" => "audio/mpeg",
        ".zip" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
