use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    canvas::{
        Assignment, CanvasApi, CanvasClient, ClientError, Course, NewSubmission, Submission,
        UploadOutcome,
    },
    config::{ConfigError, ConfigReader, FileLists, LoadedConfig, ResourceId},
};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("failed to upload {}: {reason}", .path.display())]
    UploadFailed { path: PathBuf, reason: String },
}

/// Path of the endpoint that takes files for `user_id`'s submission to an assignment.
pub fn submission_files_path(
    course_id: &ResourceId,
    assignment_id: &ResourceId,
    user_id: u64,
) -> String {
    format!(
        "/api/v1/courses/{}/assignments/{}/submissions/{}/files",
        course_id, assignment_id, user_id
    )
}

/// An assignment directory ready to be submitted by an authenticated user.
///
/// [`submit`] consumes the value, so every run reads the configuration and
/// authenticates afresh.
///
/// [`submit`]: struct.CanvasAssignment.html#method.submit
pub struct CanvasAssignment<C = CanvasClient> {
    client: C,
    course_id: ResourceId,
    assignment_id: ResourceId,
    user_id: u64,
    file_lists: FileLists,
}

impl CanvasAssignment<CanvasClient> {
    /// Reads the include file in `path` and logs in to the Canvas instance it names.
    ///
    /// # Arguments
    ///
    /// * `path` - The assignment directory
    /// * `include_file` - The configuration file to look for in the assignment directory
    ///
    /// # Errors
    ///
    /// Any configuration error, or a client error while creating the session or looking up the
    /// current user.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        path: P,
        include_file: S,
    ) -> Result<Self, SubmitError> {
        let loaded = ConfigReader::with_include_file(path, include_file).read()?;
        let client = CanvasClient::new(&loaded.config.canvas_url, loaded.config.api_key.clone())?;
        CanvasAssignment::with_client(loaded, client)
    }
}

impl<C: CanvasApi> CanvasAssignment<C> {
    pub fn with_client(loaded: LoadedConfig, client: C) -> Result<Self, SubmitError> {
        let user = client.current_user()?;
        info!(user_id = user.id, "authenticated as {}", user.name);

        Ok(CanvasAssignment {
            client,
            course_id: loaded.config.course_id,
            assignment_id: loaded.config.assignment_id,
            user_id: user.id,
            file_lists: loaded.files,
        })
    }

    pub fn course_id(&self) -> &ResourceId {
        &self.course_id
    }

    pub fn assignment_id(&self) -> &ResourceId {
        &self.assignment_id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn file_lists(&self) -> &FileLists {
        &self.file_lists
    }

    pub fn course(&self) -> Result<Course, SubmitError> {
        Ok(self.client.get_course(&self.course_id)?)
    }

    pub fn assignment(&self) -> Result<Assignment, SubmitError> {
        Ok(self
            .client
            .get_assignment(&self.course_id, &self.assignment_id)?)
    }

    /// Uploads each file individually, in order, then submits the uploaded files as one new
    /// submission.
    ///
    /// Zip-group files are not uploaded.
    ///
    /// # Errors
    ///
    /// Stops at the first file that fails. Returns [`UploadFailed`] naming the file if the upload
    /// was rejected, or the client error if a request failed. Files uploaded before the failure
    /// stay on Canvas, attached to nothing.
    ///
    /// [`UploadFailed`]: enum.SubmitError.html
    pub fn submit(self) -> Result<Submission, SubmitError> {
        let upload_path = submission_files_path(&self.course_id, &self.assignment_id, self.user_id);

        let mut file_ids = Vec::with_capacity(self.file_lists.upload.len());
        for path in &self.file_lists.upload {
            info!(url = %upload_path, path = %path.display(), "uploading");

            match self.client.upload_file(&upload_path, path)? {
                UploadOutcome::Uploaded(file) => {
                    debug!(file_id = file.id, size = file.size, "uploaded as {}", file.display_name);
                    file_ids.push(file.id);
                }
                UploadOutcome::Rejected(reason) => {
                    return Err(SubmitError::UploadFailed {
                        path: path.clone(),
                        reason,
                    })
                }
            }
        }

        let submission = NewSubmission::online_upload(file_ids);
        Ok(self
            .client
            .submit(&self.course_id, &self.assignment_id, &submission)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        canvas::{File, SubmissionType, User},
        config::DEFAULT_INCLUDE_FILE,
    };
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use std::{cell::RefCell, fs, path::Path};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        CurrentUser,
        Upload(String, PathBuf),
        Submit(String, String, NewSubmission),
    }

    /// Records every call; the upload at index `reject_at` (0-based) is rejected.
    struct FakeCanvas {
        user_id: u64,
        reject_at: Option<usize>,
        uploads: RefCell<usize>,
        calls: RefCell<Vec<Call>>,
    }

    impl FakeCanvas {
        fn new(reject_at: Option<usize>) -> Self {
            FakeCanvas {
                user_id: 42,
                reject_at,
                uploads: RefCell::new(0),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl CanvasApi for FakeCanvas {
        fn current_user(&self) -> Result<User, ClientError> {
            self.calls.borrow_mut().push(Call::CurrentUser);
            Ok(User {
                id: self.user_id,
                name: "Student".into(),
            })
        }

        fn get_course(&self, course_id: &ResourceId) -> Result<Course, ClientError> {
            Ok(Course {
                id: course_id.as_str().parse().unwrap(),
                name: "Compilers".into(),
                course_code: None,
            })
        }

        fn get_assignment(
            &self,
            _course_id: &ResourceId,
            assignment_id: &ResourceId,
        ) -> Result<Assignment, ClientError> {
            Ok(Assignment {
                id: assignment_id.as_str().parse().unwrap(),
                name: "Lexer".into(),
                submission_types: vec!["online_upload".into()],
                due_at: None,
            })
        }

        fn upload_file(&self, upload_path: &str, file: &Path) -> Result<UploadOutcome, ClientError> {
            self.calls
                .borrow_mut()
                .push(Call::Upload(upload_path.into(), file.to_path_buf()));

            let index = *self.uploads.borrow();
            *self.uploads.borrow_mut() += 1;
            if Some(index) == self.reject_at {
                return Ok(UploadOutcome::Rejected("storage answered 500".into()));
            }
            Ok(UploadOutcome::Uploaded(File {
                id: 1000 - index as u64,
                display_name: String::new(),
                size: 0,
            }))
        }

        fn submit(
            &self,
            course_id: &ResourceId,
            assignment_id: &ResourceId,
            submission: &NewSubmission,
        ) -> Result<Submission, ClientError> {
            self.calls.borrow_mut().push(Call::Submit(
                course_id.to_string(),
                assignment_id.to_string(),
                submission.clone(),
            ));
            Ok(Submission {
                id: 7,
                assignment_id: assignment_id.as_str().parse().unwrap(),
                user_id: self.user_id,
                attempt: Some(1),
                workflow_state: "submitted".into(),
                submission_type: Some("online_upload".into()),
                submitted_at: None,
            })
        }
    }

    struct Unauthorized;

    impl CanvasApi for Unauthorized {
        fn current_user(&self) -> Result<User, ClientError> {
            Err(ClientError::Api {
                status: StatusCode::UNAUTHORIZED,
                body: "Invalid access token.".into(),
            })
        }

        fn get_course(&self, _: &ResourceId) -> Result<Course, ClientError> {
            unreachable!()
        }

        fn get_assignment(&self, _: &ResourceId, _: &ResourceId) -> Result<Assignment, ClientError> {
            unreachable!()
        }

        fn upload_file(&self, _: &str, _: &Path) -> Result<UploadOutcome, ClientError> {
            unreachable!()
        }

        fn submit(
            &self,
            _: &ResourceId,
            _: &ResourceId,
            _: &NewSubmission,
        ) -> Result<Submission, ClientError> {
            unreachable!()
        }
    }

    const FILES: [&str; 4] = ["src/a.rs", "src/b.rs", "src/c.rs", "notes/todo.md"];

    fn assignment_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in FILES.iter() {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file).unwrap();
        }
        fs::write(
            dir.path().join(DEFAULT_INCLUDE_FILE),
            r#"
assignment_id: 702483
course_id: 171498
canvas_url: https://canvas.example.edu
api_key: secret-token
files:
  - "src/*.rs"
  - zip: ["notes/*"]
"#,
        )
        .unwrap();
        dir
    }

    fn open<'a>(dir: &TempDir, canvas: &'a FakeCanvas) -> CanvasAssignment<&'a FakeCanvas> {
        let loaded = ConfigReader::new(dir.path()).read().unwrap();
        CanvasAssignment::with_client(loaded, canvas).unwrap()
    }

    fn upload_call(dir: &TempDir, file: &str) -> Call {
        Call::Upload(
            "/api/v1/courses/171498/assignments/702483/submissions/42/files".into(),
            dir.path().join(file),
        )
    }

    #[test]
    fn test_submits_uploaded_ids_in_order() {
        let dir = assignment_dir();
        let canvas = FakeCanvas::new(None);
        let assignment = open(&dir, &canvas);
        assert_eq!(assignment.user_id(), 42);

        let submission = assignment.submit().unwrap();
        assert_eq!(submission.id, 7);

        assert_eq!(
            canvas.calls(),
            vec![
                Call::CurrentUser,
                upload_call(&dir, "src/a.rs"),
                upload_call(&dir, "src/b.rs"),
                upload_call(&dir, "src/c.rs"),
                Call::Submit(
                    "171498".into(),
                    "702483".into(),
                    NewSubmission {
                        submission_type: SubmissionType::OnlineUpload,
                        file_ids: vec![1000, 999, 998],
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_rejected_upload_aborts_before_submit() {
        let dir = assignment_dir();
        let canvas = FakeCanvas::new(Some(1));

        let err = open(&dir, &canvas).submit().unwrap_err();
        match err {
            SubmitError::UploadFailed { path, .. } => assert_eq!(path, dir.path().join("src/b.rs")),
            e => panic!("unexpected error: {}", e),
        }

        assert_eq!(
            canvas.calls(),
            vec![
                Call::CurrentUser,
                upload_call(&dir, "src/a.rs"),
                upload_call(&dir, "src/b.rs"),
            ]
        );
    }

    #[test]
    fn test_zip_files_are_not_uploaded() {
        let dir = assignment_dir();
        let canvas = FakeCanvas::new(None);
        let assignment = open(&dir, &canvas);
        assert_eq!(
            assignment.file_lists().zip,
            vec![dir.path().join("notes/todo.md")]
        );

        assignment.submit().unwrap();
        assert!(!canvas
            .calls()
            .contains(&upload_call(&dir, "notes/todo.md")));
    }

    #[test]
    fn test_lookups_use_configured_ids() {
        let dir = assignment_dir();
        let canvas = FakeCanvas::new(None);
        let assignment = open(&dir, &canvas);
        assert_eq!(assignment.course().unwrap().id, 171498);
        assert_eq!(assignment.assignment().unwrap().id, 702483);
    }

    #[test]
    fn test_failed_identity_lookup_is_fatal() {
        let dir = assignment_dir();
        let loaded = ConfigReader::new(dir.path()).read().unwrap();
        let err = CanvasAssignment::with_client(loaded, Unauthorized).err().unwrap();
        assert!(matches!(
            err,
            SubmitError::Client(ClientError::Api { status, .. }) if status == StatusCode::UNAUTHORIZED
        ));
    }

    #[test]
    fn test_invalid_entry_fails_before_network() {
        let dir = assignment_dir();
        fs::write(
            dir.path().join(DEFAULT_INCLUDE_FILE),
            "assignment_id: 1\ncourse_id: 2\ncanvas_url: https://canvas.example.edu\napi_key: k\nfiles: [3]\n",
        )
        .unwrap();

        let err = CanvasAssignment::new(dir.path(), DEFAULT_INCLUDE_FILE)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SubmitError::Config(ConfigError::InvalidFileListEntry { .. })
        ));
    }

    #[test]
    fn test_empty_file_list_still_submits() {
        let dir = assignment_dir();
        fs::write(
            dir.path().join(DEFAULT_INCLUDE_FILE),
            "assignment_id: 1\ncourse_id: 2\ncanvas_url: https://canvas.example.edu\napi_key: k\nfiles: []\n",
        )
        .unwrap();
        let canvas = FakeCanvas::new(None);
        open(&dir, &canvas).submit().unwrap();
        assert_eq!(
            canvas.calls(),
            vec![
                Call::CurrentUser,
                Call::Submit("2".into(), "1".into(), NewSubmission::online_upload(vec![])),
            ]
        );
    }
}
