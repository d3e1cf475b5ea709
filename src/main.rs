mod canvas;
mod config;
mod opt;
mod submit;

use std::process;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{ConfigReader, FileLists};
use opt::Opts;
use submit::{CanvasAssignment, SubmitError};

fn print_file_lists(files: &FileLists) {
    println!("Files to upload:");
    for path in &files.upload {
        println!("  {}", path.display());
    }
    if !files.zip.is_empty() {
        println!("Files to zip (not uploaded):");
        for path in &files.zip {
            println!("  {}", path.display());
        }
    }
}

fn run(opts: Opts) -> Result<(), SubmitError> {
    if opts.dry_run {
        let loaded = ConfigReader::with_include_file(opts.path, opts.include_file).read()?;
        print_file_lists(&loaded.files);
        return Ok(());
    }

    let assignment = CanvasAssignment::new(opts.path, opts.include_file)?;

    let course = assignment.course()?;
    let target = assignment.assignment()?;
    info!(
        user_id = assignment.user_id(),
        course_id = %assignment.course_id(),
        assignment_id = %assignment.assignment_id(),
        due_at = target.due_at.as_deref().unwrap_or("never"),
        "submitting to '{}' in '{}'",
        target.name,
        course.course_code.as_deref().unwrap_or(&course.name)
    );
    if !target
        .submission_types
        .iter()
        .any(|kind| kind == "online_upload")
    {
        warn!(
            "assignment accepts {:?}, not file uploads; Canvas will likely refuse the submission",
            target.submission_types
        );
    }

    let zipped = assignment.file_lists().zip.len();
    if zipped > 0 {
        warn!(count = zipped, "zip groups are not archived yet, their files will not be uploaded");
    }

    let submission = assignment.submit()?;
    debug!(
        user_id = submission.user_id,
        assignment_id = submission.assignment_id,
        submission_type = submission.submission_type.as_deref().unwrap_or("unknown"),
        submitted_at = submission.submitted_at.as_deref().unwrap_or("unknown"),
        "submission recorded"
    );
    println!(
        "Submitted {} (attempt {}, {})",
        submission.id,
        submission
            .attempt
            .map_or_else(|| "-".to_string(), |attempt| attempt.to_string()),
        submission.workflow_state
    );
    Ok(())
}

fn main() {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(opts) {
        error!("{}", e);
        process::exit(1);
    }
}
