use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub course_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Assignment {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub submission_types: Vec<String>,
    pub due_at: Option<String>,
}

/// A file stored on Canvas after a successful upload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct File {
    pub id: u64,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub size: u64,
}

/// The server's record of a submission attempt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Submission {
    pub id: u64,
    pub assignment_id: u64,
    pub user_id: u64,
    pub attempt: Option<u32>,
    #[serde(default)]
    pub workflow_state: String,
    pub submission_type: Option<String>,
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    OnlineUpload,
}

/// Body of a submission-creation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSubmission {
    pub submission_type: SubmissionType,
    pub file_ids: Vec<u64>,
}

impl NewSubmission {
    pub fn online_upload(file_ids: Vec<u64>) -> Self {
        NewSubmission {
            submission_type: SubmissionType::OnlineUpload,
            file_ids,
        }
    }
}

/// Canvas nests the submission fields under a `submission` key.
#[derive(Serialize)]
pub(crate) struct SubmitRequest<'a> {
    pub submission: &'a NewSubmission,
}

/// First-step answer of a file upload: where to send the bytes and what to send along.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadTicket {
    pub upload_url: String,
    pub upload_params: Map<String, Value>,
}
