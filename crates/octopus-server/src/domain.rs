//! Tenancy roles, file taxonomy and state-machine enums.
//!
//! Every enum here is stored as snake_case TEXT and serialized the same way
//! on the wire. Role enums are ordered by declaration so `>=` comparisons
//! express "at least this powerful".

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WorkspaceRole {
    Guest,
    Member,
    Admin,
    Owner,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProjectRole {
    Viewer,
    Editor,
    ProjectAdmin,
}

impl WorkspaceRole {
    /// Project role a workspace member gets in every project of the
    /// workspace when they hold no direct project membership.
    pub fn implied_project_role(self) -> Option<ProjectRole> {
        match self {
            WorkspaceRole::Owner | WorkspaceRole::Admin => Some(ProjectRole::ProjectAdmin),
            WorkspaceRole::Member => Some(ProjectRole::Viewer),
            WorkspaceRole::Guest => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FileKind {
    Source,
    Artifact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FileCategory {
    Ifc,
    WexBim,
    Properties,
    Thumbnail,
    Log,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LinkType {
    DerivedFrom,
    ThumbnailOf,
    PropertiesOf,
    LogOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum UploadStatus {
    Reserved,
    Uploading,
    Committed,
    Expired,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Committed | UploadStatus::Expired | UploadStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl VersionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, VersionStatus::Ready | VersionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ClientType {
    Public,
    Confidential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    /// Parse the `code_challenge_method` request parameter (RFC 7636 spelling).
    pub fn from_oauth_param(value: &str) -> Option<Self> {
        match value {
            "S256" => Some(CodeChallengeMethod::S256),
            "plain" => Some(CodeChallengeMethod::Plain),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_roles_are_totally_ordered() {
        assert!(WorkspaceRole::Guest < WorkspaceRole::Member);
        assert!(WorkspaceRole::Member < WorkspaceRole::Admin);
        assert!(WorkspaceRole::Admin < WorkspaceRole::Owner);
    }

    #[test]
    fn project_roles_are_totally_ordered() {
        assert!(ProjectRole::Viewer < ProjectRole::Editor);
        assert!(ProjectRole::Editor < ProjectRole::ProjectAdmin);
    }

    #[test]
    fn workspace_role_implies_project_role() {
        assert_eq!(
            WorkspaceRole::Owner.implied_project_role(),
            Some(ProjectRole::ProjectAdmin)
        );
        assert_eq!(
            WorkspaceRole::Admin.implied_project_role(),
            Some(ProjectRole::ProjectAdmin)
        );
        assert_eq!(
            WorkspaceRole::Member.implied_project_role(),
            Some(ProjectRole::Viewer)
        );
        assert_eq!(WorkspaceRole::Guest.implied_project_role(), None);
    }

    #[test]
    fn terminal_states_stay_terminal() {
        assert!(UploadStatus::Committed.is_terminal());
        assert!(UploadStatus::Expired.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(!UploadStatus::Reserved.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());

        assert!(VersionStatus::Ready.is_terminal());
        assert!(VersionStatus::Failed.is_terminal());
        assert!(!VersionStatus::Pending.is_terminal());
        assert!(!VersionStatus::Processing.is_terminal());
    }

    #[test]
    fn challenge_method_parses_rfc_spellings_only() {
        assert_eq!(
            CodeChallengeMethod::from_oauth_param("S256"),
            Some(CodeChallengeMethod::S256)
        );
        assert_eq!(
            CodeChallengeMethod::from_oauth_param("plain"),
            Some(CodeChallengeMethod::Plain)
        );
        assert_eq!(CodeChallengeMethod::from_oauth_param("s256"), None);
    }
}
