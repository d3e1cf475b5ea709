pub mod client;
pub mod model;

pub use client::{CanvasApi, CanvasClient, ClientError, UploadOutcome};
pub use model::{Assignment, Course, File, NewSubmission, Submission, SubmissionType, User};
