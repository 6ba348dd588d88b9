//! Best-effort conversion of DB2 SQL PL routines, triggers and views.
//!
//! This is textual substitution, not parsing. Anything that looks like it
//! needs a human (cursors, handlers, dynamic SQL, ...) is reported as a
//! warning, and the object is written to the manual review directory.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::core::{ProcedureDefinition, RoutineKind, TriggerDefinition, ViewDefinition};
use crate::error::Result;

use super::ddl::{convert_expression, retarget_schema};
use super::Rendered;

/// DB2 idioms with a direct PL/pgSQL spelling.
static REPLACEMENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bLANGUAGE\s+SQL\b", "LANGUAGE plpgsql"),
        (r"(?i)\bIN\s+OUT\b", "INOUT"),
        (r"(?i)\bBEGIN\s+ATOMIC\b", "BEGIN"),
        (
            r"(?i)(;|\bBEGIN|\bTHEN|\bELSE|\bDO)(\s+)SET\s+([A-Za-z_][A-Za-z0-9_]*)\s*=",
            "${1}${2}${3} :=",
        ),
        (r"(?i)\bCOMMIT\s+WORK\b", "COMMIT"),
        (r"(?i)\bROLLBACK\s+WORK\b", "ROLLBACK"),
        (r"(?i)\bMODE\s+DB2SQL\b", ""),
        (r"(?i)\bCREATE\s+PROCEDURE\b", "CREATE OR REPLACE PROCEDURE"),
        (r"(?i)\bCREATE\s+FUNCTION\b", "CREATE OR REPLACE FUNCTION"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("Invalid regex"), replacement))
    .collect()
});

/// Constructs that textual substitution cannot carry over faithfully.
static COMPLEX_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bCURSOR\b", "cursor usage"),
        (r"(?i)\bFOR\s+\w+\s+AS\b", "FOR loop over a query"),
        (r"(?i)\bWHILE\b.*\bDO\b", "WHILE loop"),
        (r"(?i)\bREPEAT\b", "REPEAT UNTIL loop"),
        (r"(?i)\bGOTO\b", "GOTO statement"),
        (r"(?i)\bSIGNAL\b", "SIGNAL statement"),
        (r"(?i)\bRESIGNAL\b", "RESIGNAL statement"),
        (r"(?i)\bEXECUTE\s+IMMEDIATE\b", "EXECUTE IMMEDIATE"),
        (r"(?i)\bPREPARE\b", "prepared statement"),
        (r"(?i)\bFETCH\b", "cursor fetch"),
        (r"(?i)\bDECLARE\s+(?:CONTINUE|EXIT|UNDO)\s+HANDLER\b", "condition handler"),
        (r"(?i)\bDECLARE\s+\w+\s+CONDITION\b", "named condition"),
        (r"(?i)\b(?:OLD|NEW)\s+TABLE\b", "transition table reference"),
        (r"(?i)\bRETURNS\s+TABLE\b", "table function"),
        (r"(?i)\bDYNAMIC\s+RESULT\s+SETS\b", "dynamic result sets"),
    ]
    .into_iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("Invalid regex"), name))
    .collect()
});

static FIRST_BEGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBEGIN\b").expect("Invalid regex"));

static TRIGGER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?TRIGGER\s+\S+\s+(?:NO\s+CASCADE\s+)?(BEFORE|AFTER|INSTEAD\s+OF)\s+(INSERT|DELETE|UPDATE(?:\s+OF\s+.+?)?)\s+ON\s+(\S+)\s+(.*?)\bFOR\s+EACH\s+(ROW|STATEMENT)\b(.*)$",
    )
    .expect("Invalid regex")
});

static MODE_DB2SQL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*MODE\s+DB2SQL\b").expect("Invalid regex"));

static REFERENCING_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(OLD|NEW)\s+(?:ROW\s+)?AS\s+([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex")
});

/// Converts DB2 routines, triggers and views for one source/target schema pair.
#[derive(Debug, Clone)]
pub struct RoutineConverter {
    source_schema: String,
    target_schema: String,
}

impl RoutineConverter {
    pub fn new(source_schema: impl Into<String>, target_schema: impl Into<String>) -> Self {
        Self {
            source_schema: source_schema.into(),
            target_schema: target_schema.into(),
        }
    }

    /// Convert a procedure or function.
    pub fn convert_routine(&self, routine: &ProcedureDefinition) -> Result<Rendered> {
        let kind = match routine.kind {
            RoutineKind::Procedure => "procedure",
            RoutineKind::Function => "function",
        };
        if routine.definition.trim().is_empty() {
            return Ok(Rendered {
                statements: Vec::new(),
                warnings: vec![format!(
                    "no definition found for {} {}",
                    kind,
                    routine.qualified_name()
                )],
            });
        }

        let mut warnings = detect_complex_features(&routine.definition);
        let converted = self.substitute(&routine.definition)?;

        let body = match wrap_body(&converted) {
            Some(wrapped) => wrapped,
            None => {
                warnings.push(format!(
                    "{} body has no BEGIN ... END block; left unwrapped",
                    kind
                ));
                converted
            }
        };

        Ok(Rendered {
            statements: vec![body],
            warnings,
        })
    }

    /// Convert a row or statement trigger into a trigger function plus `CREATE TRIGGER`.
    pub fn convert_trigger(&self, trigger: &TriggerDefinition) -> Result<Rendered> {
        let Some(caps) = TRIGGER_HEADER.captures(&trigger.definition) else {
            return Ok(Rendered {
                statements: Vec::new(),
                warnings: vec![format!(
                    "could not recognize trigger header for {}",
                    trigger.qualified_name()
                )],
            });
        };
        let timing = caps[1].split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        let event = caps[2].split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        let referencing = caps[4].to_string();
        let level = caps[5].to_uppercase();
        let mut body = caps[6].trim().to_string();

        let mut warnings = detect_complex_features(&body);

        // DB2 lets the trigger name its transition rows; PL/pgSQL uses OLD/NEW.
        for alias in REFERENCING_ALIAS.captures_iter(&referencing) {
            let row = alias[1].to_uppercase();
            let name = regex::escape(&alias[2]);
            let re = Regex::new(&format!(r"(?i)\b{}\.", name)).expect("Invalid regex");
            body = re.replace_all(&body, format!("{}.", row).as_str()).into_owned();
        }
        let body = MODE_DB2SQL_PREFIX.replace(&body, "").into_owned();

        let return_value = if level == "ROW" && timing == "BEFORE" {
            "NEW"
        } else {
            "NULL"
        };

        // A DB2 WHEN clause guards the action; the function skips it unless
        // the condition is true.
        let (condition, action) = match split_when_clause(&body) {
            Some((condition, action)) => (Some(self.substitute(condition.trim())?), action),
            None => {
                if body.trim_start().strip_prefix_ci("WHEN").is_some() {
                    warnings.push("WHEN clause not recognized; left in the function body".to_string());
                }
                (None, body.as_str())
            }
        };
        let action = strip_outer_block(&self.substitute(action)?);
        let body = match condition {
            Some(condition) => format!(
                "IF ({}) IS NOT TRUE THEN\nRETURN {};\nEND IF;\n{}",
                condition, return_value, action
            ),
            None => action,
        };

        let function = format!("{}_fn", trigger.name);
        let target = &self.target_schema;
        let table_name = trigger
            .table
            .rsplit('.')
            .next()
            .unwrap_or(&trigger.table)
            .trim_matches('"');

        let statements = vec![
            format!(
                "CREATE OR REPLACE FUNCTION \"{}\".\"{}\"() RETURNS trigger LANGUAGE plpgsql AS $$\nBEGIN\n{}\nRETURN {};\nEND;\n$$",
                target, function, body, return_value
            ),
            format!(
                "CREATE TRIGGER \"{}\" {} {} ON \"{}\".\"{}\" FOR EACH {} EXECUTE FUNCTION \"{}\".\"{}\"()",
                trigger.name, timing, event, target, table_name, level, target, function
            ),
        ];

        warnings.push("trigger converted textually; verify behavior".to_string());
        Ok(Rendered {
            statements,
            warnings,
        })
    }

    /// Convert a view definition. Views are mostly portable, so only
    /// special registers and schema references are rewritten.
    pub fn convert_view(&self, view: &ViewDefinition) -> Result<String> {
        let text = retarget_schema(&view.definition, &self.source_schema, &self.target_schema)?;
        let text = convert_expression(&text);
        static CREATE_VIEW: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)^\s*CREATE\s+(?:OR\s+REPLACE\s+)?VIEW\b").expect("Invalid regex")
        });
        Ok(CREATE_VIEW
            .replace(text.trim().trim_end_matches(';'), "CREATE OR REPLACE VIEW")
            .into_owned())
    }

    fn substitute(&self, text: &str) -> Result<String> {
        let text = retarget_schema(text, &self.source_schema, &self.target_schema)?;
        let text = REPLACEMENTS
            .iter()
            .fold(text, |acc, (pattern, replacement)| {
                pattern.replace_all(&acc, *replacement).into_owned()
            });
        Ok(convert_expression(&text))
    }
}

/// Names of the complex features present in `definition`, as warnings.
pub fn detect_complex_features(definition: &str) -> Vec<String> {
    let mut found: Vec<String> = COMPLEX_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(definition))
        .map(|(_, name)| format!("complex feature detected: {}", name))
        .collect();
    if !found.is_empty() {
        found.push("manual review required".to_string());
    }
    found
}

/// Put the routine body between `AS $$` and `$$` dollar quotes.
fn wrap_body(text: &str) -> Option<String> {
    if text.contains("$$") {
        return Some(text.to_string());
    }
    let begin = FIRST_BEGIN.find(text)?;
    let (head, body) = text.split_at(begin.start());
    let body = body.trim_end().trim_end_matches(';');
    Some(format!("{}AS $$\n{};\n$$", head, body))
}

/// Drop one outer `BEGIN ... END` pair, if present.
fn strip_outer_block(body: &str) -> String {
    let trimmed = body.trim().trim_end_matches(';').trim_end();
    let upper = trimmed.to_uppercase();
    let inner = (upper.starts_with("BEGIN") && upper.ends_with("END"))
        .then(|| trimmed.get(5..trimmed.len() - 3))
        .flatten();
    if let Some(inner) = inner {
        let inner = inner.trim();
        if inner.ends_with(';') || inner.is_empty() {
            inner.to_string()
        } else {
            format!("{};", inner)
        }
    } else if trimmed.ends_with(';') || trimmed.is_empty() {
        trimmed.to_string()
    } else {
        format!("{};", trimmed)
    }
}

/// Split a leading `WHEN (<condition>)` off a trigger body into the
/// condition and the remaining action.
fn split_when_clause(body: &str) -> Option<(&str, &str)> {
    let rest = body.trim_start().strip_prefix_ci("WHEN")?.trim_start();
    if !rest.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, ch) in rest.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some((&rest[1..i], &rest[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

trait StripPrefixCi {
    fn strip_prefix_ci(&self, prefix: &str) -> Option<&str>;
}

impl StripPrefixCi for str {
    fn strip_prefix_ci(&self, prefix: &str) -> Option<&str> {
        let head = self.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix).then(|| &self[prefix.len()..])
    }
}

/// Write `<dir>/<name>_conversion.sql` with the warnings, the original source
/// in a block comment, and whatever conversion was attempted.
pub fn write_manual_review(
    dir: &Path,
    name: &str,
    original: &str,
    attempted: &[String],
    warnings: &[String],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let file_name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{}_conversion.sql", file_name));

    let mut content = format!("-- CONVERSION NEEDS REVIEW: {}\n-- Warnings:\n", name);
    for warning in warnings {
        content.push_str(&format!("--   - {}\n", warning));
    }
    content.push_str("\n-- ORIGINAL DB2 CODE:\n/*\n");
    content.push_str(&original.replace("*/", "* /"));
    content.push_str("\n*/\n\n-- ATTEMPTED CONVERSION:\n");
    for statement in attempted {
        content.push_str(statement);
        content.push_str(";\n");
    }

    std::fs::write(&path, content)?;
    Ok(path)
}
