use std::collections::HashSet;
use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

impl SourceInfo {
    fn id(&self) -> String {
        self.file_path.to_string_lossy().to_string()
    }
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig { file_path: PathBuf },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Merge(MergeError),
    Validation(ValidationError),
}

/// Error type for merge conflicts
#[derive(Debug, Clone)]
pub struct MergeError {
    pub field_path: String,
    pub message: String,
    pub conflicts: Vec<MergeConflictLocation>,
}

#[derive(Debug, Clone)]
pub struct MergeConflictLocation {
    pub file_path: PathBuf,
    pub span: Range<usize>,
    pub content: String,
}

impl MergeConflictLocation {
    pub fn new(source: &SourceInfo, span: Range<usize>) -> Self {
        Self {
            file_path: source.file_path.clone(),
            span,
            content: source.content.clone(),
        }
    }
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Error type for config loading failures (parse errors, IO errors, etc.)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read '{}': {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Import cycle detected at '{}': involves {} file(s)", path.display(), cycle.len())]
    ImportCycle { path: PathBuf, cycle: Vec<PathBuf> },
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(Warning::EmptyConfig { file_path }) => {
                let warning_msg = format!(
                    "Warning: Config file '{}' is empty and has no effect\n",
                    file_path.display()
                );
                output.extend_from_slice(warning_msg.as_bytes());
            }
            Diagnostic::Error(Error::Merge(merge_error)) => {
                let Some(first_conflict) = merge_error.conflicts.first() else {
                    let msg = format!(
                        "Merge conflict in field '{}': {}\n",
                        merge_error.field_path, merge_error.message
                    );
                    output.extend_from_slice(msg.as_bytes());
                    continue;
                };

                let mut report = Report::build(
                    ReportKind::Error,
                    (
                        first_conflict.file_path.to_string_lossy().to_string(),
                        first_conflict.span.clone(),
                    ),
                )
                .with_message(format!(
                    "Merge conflict in field '{}'",
                    merge_error.field_path
                ))
                .with_note(&merge_error.message);

                for (idx, conflict) in merge_error.conflicts.iter().enumerate() {
                    let label_msg = if idx == 0 {
                        "first definition here"
                    } else {
                        "conflicts with this definition"
                    };

                    report = report.with_label(
                        Label::new((
                            conflict.file_path.to_string_lossy().to_string(),
                            conflict.span.clone(),
                        ))
                        .with_message(label_msg)
                        .with_color(if idx == 0 { Color::Red } else { Color::Yellow }),
                    );
                }

                let mut seen = HashSet::new();
                let sources: Vec<(String, String)> = merge_error
                    .conflicts
                    .iter()
                    .filter(|c| seen.insert(c.file_path.clone()))
                    .map(|c| (c.file_path.to_string_lossy().to_string(), c.content.clone()))
                    .collect();

                report
                    .finish()
                    .write(ariadne::sources(sources), &mut output)
                    .ok();
            }
            Diagnostic::Error(Error::Validation(validation_error)) => {
                match (&validation_error.span, &validation_error.source) {
                    (Some(span), Some(source)) => {
                        let id = source.id();
                        Report::build(ReportKind::Error, (id.clone(), span.clone()))
                            .with_message(format!(
                                "Validation error in '{}'",
                                validation_error.field_path
                            ))
                            .with_label(
                                Label::new((id.clone(), span.clone()))
                                    .with_message(&validation_error.message)
                                    .with_color(Color::Red),
                            )
                            .finish()
                            .write((id, Source::from(source.content.as_str())), &mut output)
                            .ok();
                    }
                    _ => {
                        let error_msg = format!(
                            "Validation error in '{}': {}\n",
                            validation_error.field_path, validation_error.message
                        );
                        output.extend_from_slice(error_msg.as_bytes());
                    }
                }
            }
        }
    }

    String::from_utf8_lossy(&output).to_string()
}
