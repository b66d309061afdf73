//! Static validation of agent-generated Python script bodies.
//!
//! Scripts are authored by an LLM and executed later in the sandbox, so the
//! failure modes worth catching are the ones that only surface at runtime:
//! structurally broken source (unterminated strings, unbalanced brackets),
//! f-strings that nest the same quote kind as their enclosing literal, and
//! scripts that ignore the engine<->script protocol (no `--variables-file`
//! parsing, no JSON on stdout, no error handling).
//!
//! Validation is a pure function over the source text; it never executes
//! code. Structural and f-string findings are fatal and block persistence;
//! protocol findings are warnings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// f-string with a single-quoted subscript inside a single-quoted literal,
/// e.g. `f'Title: {news['title']}'`.
static FSTRING_SINGLE_NESTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"f'[^']*\{[^}]*\['[^']*'\][^}]*\}").unwrap());

/// f-string with a double-quoted subscript inside a double-quoted literal.
static FSTRING_DOUBLE_NESTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"f"[^"]*\{[^}]*\["[^"]*"\][^}]*\}"#).unwrap());

// ---------------------------------------------------------------------------
// Issue types
// ---------------------------------------------------------------------------

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks persistence.
    Error,
    /// Surfaced but non-blocking.
    Warning,
}

/// One validation finding, optionally anchored to a line and carrying a
/// machine-usable fix hint for the authoring agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn error(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            line,
            message: message.into(),
            suggestion: None,
        }
    }

    fn warning(line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            line,
            message: message.into(),
            suggestion: None,
        }
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Outcome of validating one script body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// False iff any issue has `Severity::Error`.
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Validate a Python script body. Pure over the source text.
pub fn validate_script(code: &str) -> ValidationReport {
    let mut issues = Vec::new();

    // Structural scan first: if the source does not even scan, the protocol
    // checks below would be noise.
    issues.extend(scan_structure(code));

    issues.extend(check_fstring_nesting(code));

    if !issues.iter().any(|i| i.severity == Severity::Error) {
        issues.extend(check_protocol(code));
    }

    let ok = !issues.iter().any(|i| i.severity == Severity::Error);
    ValidationReport { ok, issues }
}

// ---------------------------------------------------------------------------
// Structural scan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    /// Inside a string literal; `triple` spans line breaks.
    InString { quote: char, triple: bool },
    Comment,
}

/// Scan for unterminated string literals and unbalanced brackets.
///
/// Tracks quote state (including triple-quoted strings and backslash
/// escapes) and a bracket stack with the line each opener appeared on.
fn scan_structure(code: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut state = ScanState::Normal;
    let mut string_start_line = 0usize;
    let mut bracket_stack: Vec<(char, usize)> = Vec::new();

    let chars: Vec<char> = code.chars().collect();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            match state {
                ScanState::Comment => state = ScanState::Normal,
                ScanState::InString { triple: false, quote } => {
                    issues.push(ValidationIssue::error(
                        Some(line - 1),
                        format!("unterminated string literal ({quote})"),
                    ));
                    state = ScanState::Normal;
                }
                _ => {}
            }
            i += 1;
            continue;
        }

        match state {
            ScanState::Comment => {}
            ScanState::Normal => match c {
                '#' => state = ScanState::Comment,
                '\'' | '"' => {
                    if i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c {
                        state = ScanState::InString { quote: c, triple: true };
                        string_start_line = line;
                        i += 2;
                    } else {
                        state = ScanState::InString { quote: c, triple: false };
                        string_start_line = line;
                    }
                }
                '(' | '[' | '{' => bracket_stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match bracket_stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => issues.push(ValidationIssue::error(
                            Some(line),
                            format!("mismatched '{c}' closing '{open}' opened on line {open_line}"),
                        )),
                        None => issues.push(ValidationIssue::error(
                            Some(line),
                            format!("unmatched closing '{c}'"),
                        )),
                    }
                }
                _ => {}
            },
            ScanState::InString { quote, triple } => match c {
                '\\' => i += 1,
                c2 if c2 == quote => {
                    if triple {
                        if i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote {
                            state = ScanState::Normal;
                            i += 2;
                        }
                    } else {
                        state = ScanState::Normal;
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    match state {
        ScanState::InString { triple: true, .. } => issues.push(ValidationIssue::error(
            Some(string_start_line),
            "unterminated triple-quoted string",
        )),
        ScanState::InString { triple: false, quote } => issues.push(ValidationIssue::error(
            Some(string_start_line),
            format!("unterminated string literal ({quote})"),
        )),
        _ => {}
    }

    for (open, open_line) in bracket_stack {
        issues.push(ValidationIssue::error(
            Some(open_line),
            format!("unclosed '{open}'"),
        ));
    }

    issues
}

// ---------------------------------------------------------------------------
// f-string quote nesting
// ---------------------------------------------------------------------------

/// Detect f-strings whose placeholder expression nests the same quote kind
/// as the enclosing literal. These scripts only fail at runtime, which makes
/// them the most common agent-authored defect.
fn check_fstring_nesting(code: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (idx, text) in code.lines().enumerate() {
        let line = idx + 1;
        if FSTRING_SINGLE_NESTED.is_match(text) || FSTRING_DOUBLE_NESTED.is_match(text) {
            issues.push(
                ValidationIssue::error(
                    Some(line),
                    "f-string nests the same quote kind as its enclosing literal",
                )
                .with_suggestion(
                    "extract the subscript into a variable first:\n\
                     \x20 title = news.get('title', 'N/A')\n\
                     \x20 result = f\"Title: {title}\"",
                ),
            );
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// Protocol checks (warnings)
// ---------------------------------------------------------------------------

fn check_protocol(code: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !code.contains("--variables-file") && !code.contains("--variables") {
        issues.push(
            ValidationIssue::warning(
                None,
                "script does not parse --variables or --variables-file",
            )
            .with_suggestion(
                "add at the top of the script:\n\
                 \x20 variables = {}\n\
                 \x20 if '--variables-file' in sys.argv:\n\
                 \x20     idx = sys.argv.index('--variables-file')\n\
                 \x20     with open(sys.argv[idx + 1], 'r', encoding='utf-8') as f:\n\
                 \x20         variables = json.load(f)",
            ),
        );
    }

    let emits_json = code
        .lines()
        .any(|l| l.contains("print(") && l.contains("json.dumps") && !l.contains("file=sys.stderr"));
    if !emits_json {
        issues.push(
            ValidationIssue::warning(None, "no structured JSON emitted on stdout").with_suggestion(
                "end the script with:\n\
                 \x20 print(json.dumps({'status': 'success', 'data': result}))",
            ),
        );
    }

    // Non-JSON prints on stdout break stdout parsing.
    for (idx, text) in code.lines().enumerate() {
        let trimmed = text.trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        if trimmed.contains("print(")
            && !trimmed.contains("file=sys.stderr")
            && !trimmed.contains("json.dumps")
        {
            issues.push(ValidationIssue::warning(
                Some(idx + 1),
                "print to stdout without json.dumps may corrupt the output document",
            ));
        }
    }

    if !code.contains("try:") || !code.contains("except") {
        issues.push(ValidationIssue::warning(
            None,
            "no try/except guards the main body",
        ));
    }

    issues
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
