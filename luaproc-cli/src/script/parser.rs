//! Script preamble parser
//!
//! Consumes a script line by line. Lines starting with the `--#` marker are
//! header metadata (group, name, declarations); every other line belongs to
//! the transform body. Scanning stops at end of input or after ten
//! consecutive blank lines.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::builtin;
use super::declaration::{
    self, Declaration, OutputDeclaration, ParameterDeclaration, create_descriptive_name,
};

/// Prefix identifying a header line
pub const METADATA_MARKER: &str = "--#";

/// Consecutive blank lines after which scanning stops
const MAX_CONSECUTIVE_BLANK_LINES: usize = 10;

const UNNAMED_ID: &str = "unnamedalgorithm";
const UNNAMED_DISPLAY_NAME: &str = "[Unnamed algorithm]";

/// Where a script definition was loaded from
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOrigin {
    /// A script file on disk
    File(PathBuf),
    /// A script shipped inside the binary
    Builtin(String),
    /// Script text supplied directly
    Inline(String),
}

/// Parsed representation of one script
#[derive(Debug, Clone)]
pub struct ScriptDefinition {
    id: String,
    display_name: String,
    group: String,
    parameters: Vec<ParameterDeclaration>,
    outputs: Vec<OutputDeclaration>,
    script: String,
    body: String,
    error: Option<String>,
    origin: ScriptOrigin,
}

impl ScriptDefinition {
    /// Parse script text that has no file name
    pub fn from_source(source: &str) -> Self {
        let lines = source.split('\n').map(|l| l.trim_end_matches('\r'));
        let mut parser = PreambleParser::new(
            UNNAMED_ID.to_string(),
            UNNAMED_DISPLAY_NAME.to_string(),
            ScriptOrigin::Inline(source.to_string()),
        );
        parser.consume(lines);
        parser.finish()
    }

    /// Load and parse a script file.
    ///
    /// The file stem provides the default id and display name; lines are
    /// trimmed of surrounding whitespace.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script file: {}", path.display()))?;
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_named_source(&file_name, &text, ScriptOrigin::File(path)))
    }

    /// Parse a built-in script by file name
    pub fn from_builtin(file_name: &str) -> Result<Self> {
        let text = builtin::script_source(file_name)
            .with_context(|| format!("No built-in script named '{}'", file_name))?;
        Ok(Self::from_named_source(
            file_name,
            text,
            ScriptOrigin::Builtin(file_name.to_string()),
        ))
    }

    fn from_named_source(file_name: &str, text: &str, origin: ScriptOrigin) -> Self {
        let stem = match file_name.rfind('.') {
            Some(idx) => &file_name[..idx],
            None => file_name,
        };
        let mut parser = PreambleParser::new(
            strip_special_characters(&stem.to_lowercase()),
            create_descriptive_name(stem),
            origin,
        );
        parser.consume(text.lines().map(str::trim));
        parser.finish()
    }

    /// A fresh definition parsed again from the same origin
    pub fn create_instance(&self) -> Result<Self> {
        match &self.origin {
            ScriptOrigin::File(path) => Self::from_file(path),
            ScriptOrigin::Builtin(name) => Self::from_builtin(name),
            ScriptOrigin::Inline(source) => Ok(Self::from_source(source)),
        }
    }

    /// Internal identifier (lowercase alphanumeric)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn parameters(&self) -> &[ParameterDeclaration] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[OutputDeclaration] {
        &self.outputs
    }

    /// Find a parameter by internal name
    pub fn parameter(&self, name: &str) -> Option<&ParameterDeclaration> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Full script text, header included
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Transform body (non-metadata lines only)
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Held header syntax error, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// A script with a header error is loadable but must not be executed
    pub fn is_runnable(&self) -> bool {
        self.error.is_none()
    }

    pub fn origin(&self) -> &ScriptOrigin {
        &self.origin
    }

    /// Path of the script file, used as the short description
    pub fn source_path(&self) -> Option<&Path> {
        match &self.origin {
            ScriptOrigin::File(path) => Some(path),
            _ => None,
        }
    }

    /// Whether the script comes from a user folder rather than the binary
    pub fn is_user_script(&self) -> bool {
        !matches!(self.origin, ScriptOrigin::Builtin(_))
    }
}

/// Keep only ASCII letters and digits
pub fn strip_special_characters(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    Done,
}

/// Special header keys handled before declaration resolution
enum MetadataKey<'a> {
    Group(&'a str),
    Name(&'a str),
}

/// Line-by-line state machine building a [`ScriptDefinition`]
struct PreambleParser {
    state: ScanState,
    blank_run: usize,
    definition: ScriptDefinition,
    body_lines: Vec<String>,
}

impl PreambleParser {
    fn new(id: String, display_name: String, origin: ScriptOrigin) -> Self {
        PreambleParser {
            state: ScanState::Scanning,
            blank_run: 0,
            definition: ScriptDefinition {
                id,
                display_name,
                group: String::new(),
                parameters: Vec::new(),
                outputs: Vec::new(),
                script: String::new(),
                body: String::new(),
                error: None,
                origin,
            },
            body_lines: Vec::new(),
        }
    }

    fn consume<'a>(&mut self, lines: impl Iterator<Item = &'a str>) {
        for line in lines {
            self.feed(line);
            if self.state == ScanState::Done {
                break;
            }
        }
    }

    fn feed(&mut self, line: &str) {
        if self.state == ScanState::Done {
            return;
        }

        if line.is_empty() {
            self.blank_run += 1;
        } else {
            self.blank_run = 0;
        }

        if let Some(content) = line.strip_prefix(METADATA_MARKER) {
            if let Err(e) = self.process_metadata_line(content) {
                log::debug!("Header line rejected ({}): {}", e, line);
                self.record_error(line);
            }
        } else {
            self.body_lines.push(line.to_string());
        }

        self.definition.script.push_str(line);
        self.definition.script.push('\n');

        if self.blank_run >= MAX_CONSECUTIVE_BLANK_LINES {
            self.state = ScanState::Done;
        }
    }

    fn finish(mut self) -> ScriptDefinition {
        self.state = ScanState::Done;
        self.definition.body = self.body_lines.join("\n");
        self.definition
    }

    fn process_metadata_line(&mut self, content: &str) -> Result<(), MetadataError> {
        let (token, type_spec) = declaration::split_tokens(content)?;

        match special_key(content, token, type_spec) {
            Some(MetadataKey::Group(group)) => {
                self.definition.group = group.to_string();
                Ok(())
            }
            Some(MetadataKey::Name(name)) => {
                self.definition.id = strip_special_characters(&name.to_lowercase());
                self.definition.display_name = create_descriptive_name(name);
                Ok(())
            }
            None => {
                let declaration = declaration::resolve_line(content)?;
                self.add_declaration(declaration)
            }
        }
    }

    fn add_declaration(&mut self, declaration: Declaration) -> Result<(), MetadataError> {
        let name = declaration.name();
        let taken = self.definition.parameters.iter().any(|p| p.name == name)
            || self.definition.outputs.iter().any(|o| o.name == name);
        if taken {
            return Err(MetadataError::Duplicate(name.to_string()));
        }

        match declaration {
            Declaration::Parameter(p) => self.definition.parameters.push(p),
            Declaration::Output(o) => self.definition.outputs.push(o),
        }
        Ok(())
    }

    fn record_error(&mut self, line: &str) {
        let message = format!("This script has a syntax error.\nProblem with line: {}", line);
        match &self.definition.error {
            None => self.definition.error = Some(message),
            Some(_) => log::warn!("Additional header syntax error: {}", line),
        }
    }
}

/// Recognise `value=group` / `value=name`, or `group=value` / `name=value`.
///
/// With the key on the token side the line is metadata unless the whole line
/// resolves as a declaration, so `--#name=string` stays a parameter while
/// `--#group=Vector tools` sets the group.
fn special_key<'a>(
    content: &str,
    token: &'a str,
    type_spec: &'a str,
) -> Option<MetadataKey<'a>> {
    match type_spec.trim().to_lowercase().as_str() {
        "group" => return Some(MetadataKey::Group(token.trim())),
        "name" => return Some(MetadataKey::Name(token.trim())),
        _ => {}
    }

    let key = match token.trim().to_lowercase().as_str() {
        "group" => MetadataKey::Group(type_spec.trim()),
        "name" => MetadataKey::Name(type_spec.trim()),
        _ => return None,
    };

    if declaration::resolve_line(content).is_ok() {
        return None;
    }
    Some(key)
}

#[derive(Debug)]
enum MetadataError {
    Declaration(declaration::DeclarationError),
    Duplicate(String),
}

impl From<declaration::DeclarationError> for MetadataError {
    fn from(e: declaration::DeclarationError) -> Self {
        MetadataError::Declaration(e)
    }
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Declaration(e) => write!(f, "{}", e),
            MetadataError::Duplicate(name) => write!(f, "duplicate declaration '{}'", name),
        }
    }
}
