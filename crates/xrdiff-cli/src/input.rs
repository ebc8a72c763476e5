//! Input ingestion: YAML/JSON documents from files or stdin
//!
//! Multiple documents per file are supported (`---` separated); comment-only
//! and empty documents are skipped. Unknown fields are preserved verbatim so
//! the renderer sees exactly what was authored.

use std::io::Read;
use std::path::{Path, PathBuf};

use kube::core::DynamicObject;
use serde::Deserialize;

use crate::error::CliError;

/// Load all XR documents from the given paths; no paths (or `-`) reads stdin.
pub fn load(files: &[PathBuf]) -> Result<Vec<DynamicObject>, CliError> {
    let mut resources = Vec::new();

    if files.is_empty() {
        resources.extend(parse_documents(&read_stdin()?, "<stdin>")?);
        return Ok(resources);
    }

    for file in files {
        let (text, source) = if file == Path::new("-") {
            (read_stdin()?, "<stdin>".to_string())
        } else {
            let text = std::fs::read_to_string(file)
                .map_err(|e| CliError::input(format!("cannot read {}: {e}", file.display())))?;
            (text, file.display().to_string())
        };
        resources.extend(parse_documents(&text, &source)?);
    }

    Ok(resources)
}

fn read_stdin() -> Result<String, CliError> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|e| CliError::input(format!("cannot read stdin: {e}")))?;
    Ok(text)
}

/// Parse a (possibly multi-document) YAML/JSON stream into dynamic objects.
pub fn parse_documents(text: &str, source: &str) -> Result<Vec<DynamicObject>, CliError> {
    let mut resources = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| CliError::input(format!("cannot parse document {index} in {source}: {e}")))?;
        if value.is_null() {
            continue;
        }

        let json = serde_json::to_value(&value)
            .map_err(|e| CliError::input(format!("cannot parse document {index} in {source}: {e}")))?;
        let obj: DynamicObject = serde_json::from_value(json)
            .map_err(|e| CliError::input(format!("cannot parse document {index} in {source}: {e}")))?;

        if obj.types.is_none() {
            return Err(CliError::input_with_help(
                format!("document {index} in {source} is missing apiVersion or kind"),
                "every input document must be a complete composite resource manifest",
            ));
        }

        resources.push(obj);
    }

    Ok(resources)
}
