use std::{
    fs,
    path::{Path, PathBuf},
};

use reqwest::{
    blocking::{
        multipart::{Form, Part},
        Client, RequestBuilder, Response,
    },
    header::LOCATION,
    redirect::Policy,
    StatusCode, Url,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::model::{
    Assignment, Course, File, NewSubmission, Submission, SubmitRequest, UploadTicket, User,
};
use crate::config::{ApiKey, ResourceId};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not set up the HTTP client: {0}")]
    InitError(#[source] reqwest::Error),

    #[error("'{0}' is not a valid Canvas URL")]
    InvalidUrl(String),

    #[error("request to Canvas failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Canvas answered {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("unexpected response from Canvas: {0}")]
    UnexpectedResponse(String),

    #[error("'{}' must be a valid path to a file", .0.display())]
    FileError(PathBuf),
}

/// Result of pushing one file through the upload flow.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded(File),
    /// The file storage did not report success; the reason is for humans.
    Rejected(String),
}

/// The calls an assignment submission makes against Canvas.
pub trait CanvasApi {
    /// Looks up the user the credential belongs to.
    fn current_user(&self) -> Result<User, ClientError>;

    fn get_course(&self, course_id: &ResourceId) -> Result<Course, ClientError>;

    fn get_assignment(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
    ) -> Result<Assignment, ClientError>;

    /// Uploads `file` through the upload endpoint at `upload_path` (relative to the API host).
    fn upload_file(&self, upload_path: &str, file: &Path) -> Result<UploadOutcome, ClientError>;

    fn submit(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
        submission: &NewSubmission,
    ) -> Result<Submission, ClientError>;
}

impl<T: CanvasApi + ?Sized> CanvasApi for &T {
    fn current_user(&self) -> Result<User, ClientError> {
        (**self).current_user()
    }

    fn get_course(&self, course_id: &ResourceId) -> Result<Course, ClientError> {
        (**self).get_course(course_id)
    }

    fn get_assignment(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
    ) -> Result<Assignment, ClientError> {
        (**self).get_assignment(course_id, assignment_id)
    }

    fn upload_file(&self, upload_path: &str, file: &Path) -> Result<UploadOutcome, ClientError> {
        (**self).upload_file(upload_path, file)
    }

    fn submit(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
        submission: &NewSubmission,
    ) -> Result<Submission, ClientError> {
        (**self).submit(course_id, assignment_id, submission)
    }
}

pub struct CanvasClient {
    http_client: Client,
    base_url: String,
    api_key: ApiKey,
}

impl CanvasClient {
    /// Initializes a new `CanvasClient` talking to the [Canvas] instance at `base_url`.
    ///
    /// [Canvas]: https://canvas.instructure.com/doc/api/
    ///
    /// # Arguments
    ///
    /// * `base_url` - The root URL of the Canvas instance, without the `/api/v1` suffix
    /// * `api_key` - The access token sent with every API request
    ///
    /// # Errors
    ///
    /// Returns [`InvalidUrl`] if `base_url` cannot be parsed, and [`InitError`] if there is an
    /// error setting up the client.
    ///
    /// [`InvalidUrl`]: enum.ClientError.html
    /// [`InitError`]: enum.ClientError.html
    ///
    pub fn new(base_url: &str, api_key: ApiKey) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if Url::parse(&base_url).is_err() {
            return Err(ClientError::InvalidUrl(base_url));
        }

        /* Redirects are handled in `upload_file` */
        let http_client = Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(ClientError::InitError)?;

        Ok(CanvasClient {
            http_client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.api_key.expose())
    }

    /// Whether `url` points at the Canvas instance, and so may carry the token.
    fn is_api_host(&self, url: &Url) -> bool {
        match Url::parse(&self.base_url) {
            Ok(base) => {
                base.scheme() == url.scheme()
                    && base.host_str() == url.host_str()
                    && base.port_or_known_default() == url.port_or_known_default()
            }
            Err(_) => false,
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.endpoint(path);
        debug!(%url, "GET");
        decode(self.authorized(self.http_client.get(&url)).send()?)
    }
}

/// Turns an API response into `T`, or an error carrying the status and body.
fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }

    response
        .json()
        .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
}

impl CanvasApi for CanvasClient {
    fn current_user(&self) -> Result<User, ClientError> {
        self.get_json("/api/v1/users/self")
    }

    fn get_course(&self, course_id: &ResourceId) -> Result<Course, ClientError> {
        self.get_json(&format!("/api/v1/courses/{}", course_id))
    }

    fn get_assignment(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
    ) -> Result<Assignment, ClientError> {
        self.get_json(&format!(
            "/api/v1/courses/{}/assignments/{}",
            course_id, assignment_id
        ))
    }

    /// Uploads a file in the three steps [Canvas] expects: announce the file to the API, post
    /// the bytes to the storage URL it hands back, then follow the confirmation redirect if
    /// there is one.
    ///
    /// [Canvas]: https://canvas.instructure.com/doc/api/file.file_uploads.html
    ///
    /// # Errors
    ///
    /// Returns [`FileError`] if `file` is not a regular file, before anything is sent. Transport
    /// failures give [`HttpError`]; an announcement the API refuses gives [`Api`]. A storage
    /// step that does not succeed is not an error but an [`UploadOutcome::Rejected`].
    ///
    /// [`FileError`]: enum.ClientError.html
    /// [`HttpError`]: enum.ClientError.html
    /// [`Api`]: enum.ClientError.html
    ///
    fn upload_file(&self, upload_path: &str, file: &Path) -> Result<UploadOutcome, ClientError> {
        let file_error = || ClientError::FileError(file.to_path_buf());

        /* Only regular files can be uploaded */
        let metadata = fs::metadata(file).map_err(|_| file_error())?;
        if !metadata.is_file() {
            return Err(file_error());
        }
        let filename = file
            .file_name()
            .ok_or_else(file_error)?
            .to_string_lossy()
            .into_owned();

        /* Announce the file and get somewhere to put it */
        let ticket: UploadTicket = {
            let url = self.endpoint(upload_path);
            debug!(%url, %filename, size = metadata.len(), "announcing upload");
            let request = self.authorized(self.http_client.post(&url)).form(&[
                ("name", filename.clone()),
                ("size", metadata.len().to_string()),
            ]);
            decode(request.send()?)?
        };

        /* Post the bytes to the storage URL, parameters first and the file last */
        let response = {
            let form = ticket
                .upload_params
                .iter()
                .fold(Form::new(), |form, (name, value)| {
                    let value = match value {
                        Value::String(value) => value.clone(),
                        other => other.to_string(),
                    };
                    form.text(name.clone(), value)
                });
            let part = Part::file(file).map_err(|_| file_error())?.file_name(filename);

            debug!(url = %ticket.upload_url, "posting file");
            self.http_client
                .post(&ticket.upload_url)
                .multipart(form.part("file", part))
                .send()?
        };

        /* Some storage backends redirect to a confirmation endpoint on the API */
        let response = if response.status().is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .ok_or_else(|| {
                    ClientError::UnexpectedResponse("upload redirect without a location".into())
                })?;
            let location = Url::parse(&ticket.upload_url)
                .and_then(|base| base.join(location))
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;

            debug!(%location, "confirming upload");
            let request = if self.is_api_host(&location) {
                self.authorized(self.http_client.get(location))
            } else {
                self.http_client.get(location)
            };
            request.send()?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(UploadOutcome::Rejected(format!("storage answered {}", status)));
        }

        let body: Value = response
            .json()
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
        match serde_json::from_value::<File>(body) {
            Ok(uploaded) => Ok(UploadOutcome::Uploaded(uploaded)),
            Err(_) => Ok(UploadOutcome::Rejected(
                "storage response carried no file id".into(),
            )),
        }
    }

    fn submit(
        &self,
        course_id: &ResourceId,
        assignment_id: &ResourceId,
        submission: &NewSubmission,
    ) -> Result<Submission, ClientError> {
        let url = self.endpoint(&format!(
            "/api/v1/courses/{}/assignments/{}/submissions",
            course_id, assignment_id
        ));
        debug!(%url, files = submission.file_ids.len(), "submitting");

        let request = self
            .authorized(self.http_client.post(&url))
            .json(&SubmitRequest { submission });
        decode(request.send()?)
    }
}
