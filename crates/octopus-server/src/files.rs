//! File classification and storage-key construction for the registry.

use uuid::Uuid;

use crate::domain::FileCategory;

/// Pools under which the registry lays out bytes:
/// `<workspace>/<project>/<pool>/<random>.<ext>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePoolName {
    Uploads,
    Files,
    Artifacts,
}

impl StoragePoolName {
    pub fn as_str(self) -> &'static str {
        match self {
            StoragePoolName::Uploads => "uploads",
            StoragePoolName::Files => "files",
            StoragePoolName::Artifacts => "artifacts",
        }
    }
}

/// Allocate a fresh storage key for a file named `file_name`, keeping its
/// extension so operators can make sense of the byte store.
pub fn allocate_storage_key(
    workspace_id: Uuid,
    project_id: Uuid,
    pool: StoragePoolName,
    file_name: &str,
) -> String {
    let random = Uuid::new_v4().simple().to_string();
    match extension(file_name) {
        Some(ext) => format!(
            "{workspace_id}/{project_id}/{}/{random}.{ext}",
            pool.as_str()
        ),
        None => format!("{workspace_id}/{project_id}/{}/{random}", pool.as_str()),
    }
}

fn extension(file_name: &str) -> Option<String> {
    let ext = file_name.rsplit_once('.')?.1;
    if ext.is_empty() || ext.len() > 16 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Infer the registry category from the file name and declared content type.
/// Uploaded sources are mostly IFC; everything the classifier cannot place
/// lands in `Other` and may be re-classified by later processing.
pub fn infer_category(file_name: &str, content_type: Option<&str>) -> FileCategory {
    match extension(file_name).as_deref() {
        Some("ifc") | Some("ifczip") | Some("ifcxml") => return FileCategory::Ifc,
        Some("wexbim") => return FileCategory::WexBim,
        Some("png") | Some("jpg") | Some("jpeg") | Some("webp") => {
            return FileCategory::Thumbnail
        }
        Some("log") => return FileCategory::Log,
        Some("json") => return FileCategory::Properties,
        _ => {}
    }

    match content_type {
        Some("application/x-step") | Some("application/ifc") => FileCategory::Ifc,
        Some("application/octet-stream") | None | Some(_) => FileCategory::Other,
    }
}

/// Bound and normalize a client-supplied file name before it is persisted.
pub fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .take(255)
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_extension_first() {
        assert_eq!(infer_category("House.IFC", None), FileCategory::Ifc);
        assert_eq!(infer_category("model.wexbim", None), FileCategory::WexBim);
        assert_eq!(infer_category("props.json", None), FileCategory::Properties);
        assert_eq!(infer_category("shot.png", None), FileCategory::Thumbnail);
        assert_eq!(infer_category("run.log", None), FileCategory::Log);
        assert_eq!(
            infer_category("data.bin", Some("application/x-step")),
            FileCategory::Ifc
        );
        assert_eq!(infer_category("data.bin", None), FileCategory::Other);
    }

    #[test]
    fn storage_keys_are_pool_scoped_and_keep_extension() {
        let ws = Uuid::new_v4();
        let project = Uuid::new_v4();
        let key = allocate_storage_key(ws, project, StoragePoolName::Uploads, "House.ifc");
        assert!(key.starts_with(&format!("{ws}/{project}/uploads/")));
        assert!(key.ends_with(".ifc"));

        let key = allocate_storage_key(ws, project, StoragePoolName::Artifacts, "no-extension");
        assert!(key.starts_with(&format!("{ws}/{project}/artifacts/")));
        assert!(!key.contains('.'));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("a/b\\c.ifc"), "a_b_c.ifc");
        assert_eq!(sanitize_file_name("  "), "unnamed");
        assert_eq!(sanitize_file_name("Düsseldorf plan.ifc"), "Düsseldorf plan.ifc");
    }
}
