use std::collections::HashMap;

use crate::error::{ValidationError, ValidationErrors};
use crate::palette::{ClassSpec, NamedColor};

pub const MAX_CLASSES: usize = 1000;
pub const MAX_CLASS_NAME_LEN: usize = 100;

/// One line of a class file after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassLine {
    Blank,
    Comment,
    NamedOnly(String),
    NamedWithColor(String, NamedColor),
    Invalid(Vec<ValidationError>),
}

fn check_class_name(line: usize, name: &str) -> Result<(), ValidationError> {
    let invalid = |reason| ValidationError::InvalidClassName {
        line,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.chars().count() > MAX_CLASS_NAME_LEN {
        return Err(invalid("name is longer than 100 characters"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-');
    if !name.chars().all(allowed) {
        return Err(invalid(
            "only letters, digits, spaces, underscores and hyphens are allowed",
        ));
    }
    Ok(())
}

/// Parse a single line. `line` is 1-based and only used in error reports.
///
/// Lines are `name` or `name:color`; the first colon splits the two and
/// each side is trimmed.
pub fn parse_class_line(line: usize, raw: &str) -> ClassLine {
    let text = raw.trim();
    if text.is_empty() {
        return ClassLine::Blank;
    }
    if text.starts_with('#') {
        return ClassLine::Comment;
    }

    let (name, token) = match text.split_once(':') {
        Some((name, token)) => (name.trim(), Some(token.trim())),
        None => (text, None),
    };

    let mut errors = Vec::new();
    if let Err(err) = check_class_name(line, name) {
        errors.push(err);
    }
    let color = match token {
        Some(token) => match token.parse::<NamedColor>() {
            Ok(color) => Some(color),
            Err(_) => {
                errors.push(ValidationError::InvalidColor {
                    line,
                    token: token.to_string(),
                });
                None
            }
        },
        None => None,
    };

    if !errors.is_empty() {
        return ClassLine::Invalid(errors);
    }
    match color {
        Some(color) => ClassLine::NamedWithColor(name.to_string(), color),
        None => ClassLine::NamedOnly(name.to_string()),
    }
}

/// Validate a whole class file. Every problem is reported; a single bad
/// line rejects the file.
pub fn validate_class_file(bytes: &[u8]) -> Result<Vec<ClassSpec>, ValidationErrors> {
    let text = std::str::from_utf8(bytes).map_err(|e| ValidationError::InvalidEncoding {
        offset: e.valid_up_to(),
    })?;

    let mut errors = Vec::new();
    let mut specs = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let (name, color) = match parse_class_line(line, raw) {
            ClassLine::Blank | ClassLine::Comment => continue,
            ClassLine::Invalid(mut line_errors) => {
                errors.append(&mut line_errors);
                continue;
            }
            ClassLine::NamedOnly(name) => (name, None),
            ClassLine::NamedWithColor(name, color) => (name, Some(color)),
        };

        if let Some(&first_line) = first_seen.get(&name) {
            errors.push(ValidationError::DuplicateClassName {
                line,
                first_line,
                name,
            });
            continue;
        }
        first_seen.insert(name.clone(), line);
        specs.push(ClassSpec { name, color });
    }

    if specs.len() > MAX_CLASSES {
        errors.push(ValidationError::TooManyClasses {
            count: specs.len(),
            max: MAX_CLASSES,
        });
    }
    if specs.is_empty() && errors.is_empty() {
        errors.push(ValidationError::EmptyClassFile);
    }

    if errors.is_empty() {
        Ok(specs)
    } else {
        Err(ValidationErrors(errors))
    }
}
