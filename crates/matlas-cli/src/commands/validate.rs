//! `matlas validate`: schema and dependency checks without touching Atlas.

use super::{validate_document, ManifestArgs};
use crate::exit::ExitCode;
use crate::output;

pub fn run(manifests: &ManifestArgs) -> anyhow::Result<ExitCode> {
    let doc = manifests.load()?;
    let issues = validate_document(&doc, None, manifests.strict);
    output::issues(&issues);
    Ok(if issues.has_errors() {
        ExitCode::Validation
    } else {
        ExitCode::Success
    })
}
