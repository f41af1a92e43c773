//! Smart folder rule evaluation.
//!
//! The raw string-keyed rules from `metadata.json` are compiled once into a
//! closed set of typed variants, so an unsupported property, method or match
//! mode is rejected as a schema error at load time and evaluation itself can
//! no longer fail. Classification is pure: folders are tried in declaration
//! order and the first folder with a matching condition wins.

use crate::error::ExportError;
use crate::metadata::{FileRecord, LibraryInfo, RawCondition, RawRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Name,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Contain,
    Uncontain,
    Equal,
    Unequal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    And,
    Or,
}

#[derive(Debug, Clone)]
struct Rule {
    property: Property,
    method: Method,
    value: String,
}

impl Rule {
    fn compile(raw: &RawRule) -> Result<Self, ExportError> {
        let property = match raw.property.as_str() {
            "name" => Property::Name,
            "type" => Property::Type,
            other => {
                return Err(ExportError::Schema(format!(
                    "unsupported rule property '{other}'"
                )))
            }
        };
        let method = match raw.method.as_str() {
            "contain" => Method::Contain,
            "uncontain" => Method::Uncontain,
            "equal" => Method::Equal,
            "unequal" => Method::Unequal,
            other => {
                return Err(ExportError::Schema(format!(
                    "unsupported rule method '{other}'"
                )))
            }
        };
        Ok(Self {
            property,
            method,
            value: raw.value.clone(),
        })
    }

    fn eval(&self, record: &FileRecord) -> bool {
        let subject = match self.property {
            Property::Name => &record.name,
            Property::Type => &record.ext,
        };
        match self.method {
            Method::Contain => subject.contains(&self.value),
            Method::Uncontain => !subject.contains(&self.value),
            Method::Equal => subject == &self.value,
            Method::Unequal => subject != &self.value,
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    rules: Vec<Rule>,
    mode: Match,
    expected: bool,
}

impl Condition {
    fn compile(raw: &RawCondition) -> Result<Self, ExportError> {
        if raw.rules.is_empty() {
            return Err(ExportError::Schema(
                "smart folder condition has no rules".into(),
            ));
        }
        let mode = match raw.match_mode.as_str() {
            "AND" => Match::And,
            "OR" => Match::Or,
            other => {
                return Err(ExportError::Schema(format!(
                    "unsupported match mode '{other}'"
                )))
            }
        };
        let rules = raw
            .rules
            .iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            mode,
            expected: raw.boolean == "TRUE",
        })
    }

    fn eval(&self, record: &FileRecord) -> bool {
        // rules is non-empty after compile
        let folded = match self.mode {
            Match::And => self.rules.iter().all(|rule| rule.eval(record)),
            Match::Or => self.rules.iter().any(|rule| rule.eval(record)),
        };
        folded == self.expected
    }
}

#[derive(Debug, Clone)]
struct Folder {
    name: String,
    conditions: Vec<Condition>,
}

/// Compiled smart folder definitions, ready for classification.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    folders: Vec<Folder>,
}

impl Classifier {
    /// Validates and compiles every smart folder. Any malformed rule makes the
    /// whole definition unusable, reported with the offending folder's name.
    pub fn compile(info: &LibraryInfo) -> Result<Self, ExportError> {
        let folders = info
            .smart_folders
            .iter()
            .map(|folder| {
                let conditions = folder
                    .conditions
                    .iter()
                    .map(Condition::compile)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| match err {
                        ExportError::Schema(msg) => {
                            ExportError::Schema(format!("smart folder '{}': {msg}", folder.name))
                        }
                        other => other,
                    })?;
                Ok(Folder {
                    name: folder.name.clone(),
                    conditions,
                })
            })
            .collect::<Result<Vec<_>, ExportError>>()?;
        Ok(Self { folders })
    }

    /// Returns the first folder (in declaration order) with a condition that
    /// evaluates true for `record`, or `None` when the file is uncategorized.
    pub fn classify(&self, record: &FileRecord) -> Option<&str> {
        for folder in &self.folders {
            if folder.conditions.iter().any(|cond| cond.eval(record)) {
                return Some(&folder.name);
            }
        }
        None
    }
}
