//! The change under review (a merge request).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Opened,
    Merged,
    Closed,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    #[serde(default)]
    pub signed: bool,
}

/// A source revision proposed for merge into a target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeUnderReview {
    pub id: u64,
    pub iid: u64,
    pub project_path: String,
    /// Project web URL used to link pipelines and commits in comments.
    #[serde(default)]
    pub web_url: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub diff_head_sha: String,
    pub state: ChangeState,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

impl ChangeUnderReview {
    pub fn is_open(&self) -> bool {
        self.state == ChangeState::Opened
    }

    pub fn unsigned_commits(&self) -> Vec<&str> {
        self.commits
            .iter()
            .filter(|c| !c.signed)
            .map(|c| c.sha.as_str())
            .collect()
    }

    /// Key of the exclusive lock serializing evaluations of this change.
    pub fn lock_key(&self) -> String {
        format!("policy_violation_comment:{}", self.id)
    }

    pub fn pipeline_url(&self, pipeline_id: u64) -> Option<String> {
        self.web_url
            .as_ref()
            .map(|base| format!("{}/-/pipelines/{}", base.trim_end_matches('/'), pipeline_id))
    }

    pub fn commit_url(&self, sha: &str) -> Option<String> {
        self.web_url
            .as_ref()
            .map(|base| format!("{}/-/commit/{}", base.trim_end_matches('/'), sha))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> ChangeUnderReview {
        ChangeUnderReview {
            id: 9,
            iid: 3,
            project_path: "group/project".into(),
            web_url: Some("https://git.example.com/group/project/".into()),
            source_branch: "feature".into(),
            target_branch: "main".into(),
            diff_head_sha: "abc".into(),
            state: ChangeState::Opened,
            commits: vec![
                Commit {
                    sha: "s1".into(),
                    signed: true,
                },
                Commit {
                    sha: "u1".into(),
                    signed: false,
                },
            ],
        }
    }

    #[test]
    fn test_unsigned_commits() {
        assert_eq!(change().unsigned_commits(), vec!["u1"]);
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let c = change();
        assert_eq!(
            c.pipeline_url(12).unwrap(),
            "https://git.example.com/group/project/-/pipelines/12"
        );
        assert_eq!(
            c.commit_url("u1").unwrap(),
            "https://git.example.com/group/project/-/commit/u1"
        );
    }

    #[test]
    fn test_lock_key_uses_change_id() {
        assert_eq!(change().lock_key(), "policy_violation_comment:9");
    }
}
