//! Filesystem CRUD endpoints.
//!
//! Paths are taken as given (absolutized, not chrooted); the daemon owns its
//! whole namespace.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path as FsPath, PathBuf};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Query, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use glob::Pattern;
use log::warn;
use nix::unistd::{Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::api::error::{ApiError, ErrorCode};
use crate::api::state::AppState;

/// File ownership and mode. The mode is octal written as decimal digits
/// (`755` means `0o755`); zero leaves the mode untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub mode: u32,
}

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileItem {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dest: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceFileContentItem {
    #[serde(default)]
    pub old: String,
    #[serde(default)]
    pub new: String,
}

#[derive(Debug, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub path: String,
    #[serde(flatten)]
    pub permission: Permission,
}

fn bad_body(err: JsonRejection) -> ApiError {
    ApiError::invalid_request(format!(
        "error parsing request, MAYBE invalid body format. {err}"
    ))
}

/// Repeated `path` query parameters (`?path=a&path=b`).
fn path_params(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key != "path" || value.is_empty() {
                return None;
            }
            Some(urldecode(value))
        })
        .collect()
}

fn urldecode(value: &str) -> String {
    let mut out = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if let (Some(hi), Some(lo)) = (
                    bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                    bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
                ) {
                    out.push((hi * 16 + lo) as u8);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn absolutize(path: &str) -> PathBuf {
    let path = FsPath::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn system_time_to_utc(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_default()
}

/// Octal mode rendered as decimal digits, matching the request format.
fn mode_as_decimal_octal(mode: u32) -> u32 {
    format!("{:o}", mode & 0o7777).parse().unwrap_or(0)
}

fn file_info(path: &str) -> std::io::Result<FileInfo> {
    let abs = absolutize(path);
    let meta = std::fs::metadata(&abs)?;

    let owner = User::from_uid(Uid::from_raw(meta.uid()))
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| meta.uid().to_string());
    let group = Group::from_gid(Gid::from_raw(meta.gid()))
        .ok()
        .flatten()
        .map(|g| g.name)
        .unwrap_or_else(|| meta.gid().to_string());

    Ok(FileInfo {
        path: abs.to_string_lossy().into_owned(),
        size: meta.len(),
        modified_at: system_time_to_utc(meta.modified()),
        created_at: system_time_to_utc(meta.created()),
        owner,
        group,
        mode: mode_as_decimal_octal(meta.permissions().mode()),
    })
}

fn apply_permission(path: &FsPath, perms: &Permission) -> std::io::Result<()> {
    if perms.mode != 0 {
        let mode = u32::from_str_radix(&perms.mode.to_string(), 8)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }

    let uid = if perms.owner.is_empty() {
        None
    } else {
        match User::from_name(&perms.owner) {
            Ok(Some(user)) => Some(user.uid),
            _ => {
                warn!("failed to lookup user {}", perms.owner);
                None
            }
        }
    };
    let gid = if perms.group.is_empty() {
        None
    } else {
        match Group::from_name(&perms.group) {
            Ok(Some(group)) => Some(group.gid),
            _ => {
                warn!("failed to lookup group {}", perms.group);
                None
            }
        }
    };

    if uid.is_some() || gid.is_some() {
        nix::unistd::chown(path, uid, gid)
            .map_err(|err| std::io::Error::from_raw_os_error(err as i32))?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

/// `GET /files/info?path=a&path=b`
pub async fn files_info(
    State(_state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<HashMap<String, FileInfo>>, ApiError> {
    let mut response = HashMap::new();
    for path in path_params(raw.as_deref()) {
        let info = file_info(&path).map_err(|err| ApiError::from_file_error(&err))?;
        response.insert(path, info);
    }
    Ok(Json(response))
}

/// `DELETE /files?path=a&path=b`: removes plain files, never directories.
pub async fn remove_files(
    State(_state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    for path in path_params(raw.as_deref()) {
        let abs = absolutize(&path);
        let meta = match std::fs::metadata(&abs) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ApiError::runtime(format!(
                    "error removing file {path}. {err}"
                )))
            }
        };
        if meta.is_dir() {
            return Err(ApiError::runtime(format!(
                "error removing file {path}. path is a directory"
            )));
        }
        std::fs::remove_file(&abs)
            .map_err(|err| ApiError::runtime(format!("error removing file {path}. {err}")))?;
    }
    Ok(StatusCode::OK.into_response())
}

/// `POST /files/mv`: rename/move; destination directories are created, an
/// existing destination is refused.
pub async fn rename_files(
    State(_state): State<AppState>,
    body: Result<Json<Vec<RenameFileItem>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(items) = body.map_err(bad_body)?;

    for item in items {
        let src = absolutize(&item.src);
        let dest = absolutize(&item.dest);

        if !src.exists() {
            return Err(ApiError::file_not_found(format!(
                "source path not found: {}",
                item.src
            )));
        }
        if dest.exists() {
            return Err(ApiError::runtime(format!(
                "destination path already exists: {}",
                item.dest
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                ApiError::runtime(format!("failed to create destination directory: {err}"))
            })?;
        }
        std::fs::rename(&src, &dest)
            .map_err(|err| ApiError::runtime(format!("failed to rename file: {err}")))?;
    }
    Ok(StatusCode::OK.into_response())
}

/// `POST /files/permissions`: body is `{path: {owner, group, mode}}`.
pub async fn chmod_files(
    State(_state): State<AppState>,
    body: Result<Json<HashMap<String, Permission>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(items) = body.map_err(bad_body)?;

    for (path, perms) in items {
        apply_permission(&absolutize(&path), &perms).map_err(|err| {
            ApiError::runtime(format!("error changing permissions for {path}. {err}"))
        })?;
    }
    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub pattern: String,
}

/// `GET /files/search?path=<dir>&pattern=<glob>`: match file names under a
/// directory tree.
pub async fn search_files(
    State(_state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<FileInfo>>, ApiError> {
    if query.path.is_empty() {
        return Err(ApiError::missing_query("missing query parameter 'path'"));
    }

    let root = absolutize(&query.path);
    std::fs::metadata(&root).map_err(|err| ApiError::from_file_error(&err))?;

    let pattern = if query.pattern.is_empty() {
        "*".to_string()
    } else {
        query.pattern.clone()
    };
    let pattern = Pattern::new(&pattern)
        .map_err(|err| ApiError::runtime(format!("invalid pattern {}: {err}", query.pattern)))?;

    let mut files = Vec::new();
    let mut stack = vec![root];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ApiError::runtime(format!("error searching files. {err}")));
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = entry.file_name();
            if pattern.matches(&name.to_string_lossy()) {
                if let Ok(info) = file_info(&path.to_string_lossy()) {
                    files.push(info);
                }
            }
        }
    }

    Ok(Json(files))
}

/// `POST /files/replace`: body is `{path: {old, new}}`; literal string
/// replacement across the whole file, preserving its mode.
pub async fn replace_content(
    State(_state): State<AppState>,
    body: Result<Json<HashMap<String, ReplaceFileContentItem>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(items) = body.map_err(bad_body)?;

    for (path, item) in items {
        let abs = absolutize(&path);
        let content =
            std::fs::read_to_string(&abs).map_err(|err| ApiError::from_file_error(&err))?;
        let replaced = content.replace(&item.old, &item.new);
        std::fs::write(&abs, replaced).map_err(|err| ApiError::from_file_error(&err))?;
    }
    Ok(StatusCode::OK.into_response())
}

/// `POST /files/upload`: multipart with paired `metadata` (JSON) and `file`
/// parts; metadata names the destination path and optional permissions.
pub async fn upload_files(
    State(_state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut metadata_parts: Vec<FileMetadata> = Vec::new();
    let mut file_parts: Vec<Vec<u8>> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFile,
            format!("multipart form is empty. {err}"),
        )
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("metadata") => {
                let bytes = field.bytes().await.map_err(|err| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        ErrorCode::InvalidFileMetadata,
                        format!("error reading metadata content. {err}"),
                    )
                })?;
                let meta: FileMetadata = serde_json::from_slice(&bytes).map_err(|err| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        ErrorCode::InvalidFileMetadata,
                        format!("invalid metadata format. {err}"),
                    )
                })?;
                metadata_parts.push(meta);
            }
            Some("file") => {
                let bytes = field.bytes().await.map_err(|err| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        ErrorCode::InvalidFileContent,
                        format!("error reading file content. {err}"),
                    )
                })?;
                file_parts.push(bytes.to_vec());
            }
            _ => {}
        }
    }

    if metadata_parts.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFileMetadata,
            "metadata file is missing",
        ));
    }
    if file_parts.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFileContent,
            "file is missing",
        ));
    }
    if metadata_parts.len() != file_parts.len() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFile,
            format!(
                "metadata and file count mismatch: {} vs {}",
                metadata_parts.len(),
                file_parts.len()
            ),
        ));
    }

    for (meta, content) in metadata_parts.iter().zip(file_parts) {
        if meta.path.is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::InvalidFileMetadata,
                "metadata path is empty",
            ));
        }

        let target = absolutize(&meta.path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                ApiError::runtime(format!(
                    "error creating target directory {}. {err}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(&target, content).map_err(|err| {
            ApiError::runtime(format!("error writing file {}. {err}", meta.path))
        })?;
        apply_permission(&target, &meta.permission).map_err(|err| {
            ApiError::runtime(format!("error chmoding file {}. {err}", meta.path))
        })?;
    }

    Ok(StatusCode::OK.into_response())
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub path: String,
}

/// `GET /files/download?path=<file>`: whole file, or the first byte range
/// when a `Range` header is present.
pub async fn download_file(
    State(_state): State<AppState>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if query.path.is_empty() {
        return Err(ApiError::missing_query("missing query parameter 'path'"));
    }

    let abs = absolutize(&query.path);
    let mut file = tokio::fs::File::open(&abs)
        .await
        .map_err(|err| ApiError::from_file_error(&err))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| {
            ApiError::runtime(format!(
                "error getting file stat info: {}. {err}",
                query.path
            ))
        })?
        .len();

    let filename = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let disposition = format!("attachment; filename={filename}");

    if let Some(range) = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| parse_range(raw, size))
    {
        let (start, length) = range;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| ApiError::runtime(err.to_string()))?;
        let mut body = vec![0u8; length as usize];
        file.read_exact(&mut body)
            .await
            .map_err(|err| ApiError::runtime(err.to_string()))?;

        return Ok((
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
                (header::CONTENT_DISPOSITION.as_str(), disposition),
                (
                    header::CONTENT_RANGE.as_str(),
                    format!("bytes {start}-{}/{size}", start + length - 1),
                ),
            ],
            body,
        )
            .into_response());
    }

    let mut body = Vec::with_capacity(size as usize);
    file.read_to_end(&mut body)
        .await
        .map_err(|err| ApiError::runtime(err.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION.as_str(), disposition),
        ],
        body,
    )
        .into_response())
}

/// Parse the first range of a `Range: bytes=` header into (start, length).
fn parse_range(raw: &str, size: u64) -> Option<(u64, u64)> {
    let spec = raw.strip_prefix("bytes=")?.split(',').next()?.trim();
    let (start, end) = spec.split_once('-')?;

    if start.is_empty() {
        // suffix form: last N bytes
        let n: u64 = end.parse().ok()?;
        let n = n.min(size);
        if n == 0 {
            return None;
        }
        return Some((size - n, n));
    }

    let start: u64 = start.parse().ok()?;
    if start >= size {
        return None;
    }
    let end: u64 = if end.is_empty() {
        size - 1
    } else {
        end.parse::<u64>().ok()?.min(size - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end - start + 1))
}

/// `POST /directories`: body is `{path: {owner, group, mode}}`; mkdir -p.
pub async fn make_dirs(
    State(_state): State<AppState>,
    body: Result<Json<HashMap<String, Permission>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(items) = body.map_err(bad_body)?;

    for (dir, perms) in items {
        let abs = absolutize(&dir);
        std::fs::create_dir_all(&abs)
            .map_err(|err| ApiError::runtime(format!("error creating directory {dir}. {err}")))?;
        apply_permission(&abs, &perms).map_err(|err| {
            ApiError::runtime(format!("error changing permissions for {dir}. {err}"))
        })?;
    }
    Ok(StatusCode::OK.into_response())
}

/// `DELETE /directories?path=a&path=b`: recursive removal.
pub async fn remove_dirs(
    State(_state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    for dir in path_params(raw.as_deref()) {
        let abs = absolutize(&dir);
        if !abs.exists() {
            continue;
        }
        std::fs::remove_dir_all(&abs)
            .map_err(|err| ApiError::runtime(format!("error removing directory {dir}. {err}")))?;
    }
    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_path_params_are_collected_in_order() {
        let paths = path_params(Some("path=/tmp/a&path=/tmp/b&other=x"));
        assert_eq!(paths, vec!["/tmp/a", "/tmp/b"]);
        assert!(path_params(None).is_empty());
    }

    #[test]
    fn url_escapes_decode_in_path_params() {
        let paths = path_params(Some("path=%2Ftmp%2Fwith%20space&path=a+b"));
        assert_eq!(paths, vec!["/tmp/with space", "a b"]);
    }

    #[test]
    fn mode_round_trips_through_decimal_octal() {
        assert_eq!(mode_as_decimal_octal(0o755), 755);
        assert_eq!(mode_as_decimal_octal(0o100644), 644);
    }

    #[test]
    fn range_parsing_covers_the_common_forms() {
        assert_eq!(parse_range("bytes=0-9", 100), Some((0, 10)));
        assert_eq!(parse_range("bytes=10-", 100), Some((10, 90)));
        assert_eq!(parse_range("bytes=-10", 100), Some((90, 10)));
        assert_eq!(parse_range("bytes=0-500", 100), Some((0, 100)));
        assert_eq!(parse_range("bytes=200-", 100), None);
        assert_eq!(parse_range("chunks=0-9", 100), None);
    }

    #[test]
    fn replace_is_literal_not_regex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subject.txt");
        std::fs::write(&path, "a.c a.c abc").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let replaced = content.replace("a.c", "X");
        std::fs::write(&path, replaced).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "X X abc");
    }
}
