//! Finds the file to instrument once a repository has been classified.

use crate::{IacTool, RepoType, Runtime};
use instrumenter_core::{Document, RepoTree};
use thiserror::Error;
use tracing::{debug, info};

/// Returns the script named by `verdict`, looked up by relative path and then by basename.
/// When the model named a file that does not exist, falls back to searching the tree for a
/// file that looks like the right kind of script.
pub fn locate_script<'t>(tree: &'t RepoTree, verdict: &RepoType) -> Result<&'t Document, LocateError> {
    let tool = verdict
        .kind
        .iac_tool()
        .ok_or(LocateError::NotInfrastructure)?;

    let named = verdict.script_file.trim().trim_start_matches("./");
    if !named.is_empty() {
        if let Some(document) = tree.get_document(named) {
            return Ok(document);
        }
        let basename = named.rsplit('/').next().unwrap_or(named);
        if let Some(document) = tree.find_by_filename(basename) {
            debug!("Found {named} by filename at {}", document.source());
            return Ok(document);
        }
        info!("Script {named:?} named by the classifier is not in the repository; searching");
    }

    let found = match tool {
        IacTool::Cdk => find_cdk_stack(tree, verdict.runtime),
        IacTool::Terraform => tree.documents().into_iter().find(|d| {
            d.filename().ends_with(".tf") && d.content().contains("aws_lambda_function")
        }),
    };
    found.ok_or_else(|| LocateError::NotFound {
        tool,
        script_file: verdict.script_file.clone(),
    })
}

/// The first file containing a CDK stack marker. With no runtime every marker is tried.
fn find_cdk_stack(tree: &RepoTree, runtime: Option<Runtime>) -> Option<&Document> {
    let markers: Vec<&str> = match runtime {
        Some(runtime) => runtime.cdk_stack_marker().into_iter().collect(),
        None => Runtime::ALL
            .iter()
            .filter_map(|r| r.cdk_stack_marker())
            .collect(),
    };
    tree.documents()
        .into_iter()
        .find(|d| markers.iter().any(|marker| d.content().contains(marker)))
}

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("repository is neither a CDK nor a Terraform project")]
    NotInfrastructure,
    #[error("no {tool} file found in the repository (classifier suggested {script_file:?})")]
    NotFound { tool: IacTool, script_file: String },
}
