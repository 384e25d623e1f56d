//! Builtin tools
//!
//! A small file tool and an arithmetic evaluator, registered via
//! `ToolRegistry::with_builtins`. Both work on the plain-text payload
//! contract every tool shares.

use std::fmt::Write as _;
use std::path::Path;

use crate::tools::Tool;

/// File operations driven by a `command:argument` payload.
pub struct FileTool;

impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "File operations. Commands: 'read:<path>' to read file, 'write:<path>:<content>' to write, \
         'list:<dir>' to list directory, 'exists:<path>' to check existence."
    }

    fn execute(&self, input: &str) -> anyhow::Result<String> {
        let input = input.trim();
        let Some((cmd, arg)) = input.split_once(':') else {
            anyhow::bail!(
                "invalid format. Use 'read:<path>', 'write:<path>:<content>', 'list:<dir>', or 'exists:<path>'"
            );
        };

        match cmd.to_lowercase().as_str() {
            "read" => read_file(arg),
            "write" => {
                let Some((path, content)) = arg.split_once(':') else {
                    anyhow::bail!("write requires path and content: 'write:<path>:<content>'");
                };
                write_file(path, content)
            }
            "list" => list_dir(arg),
            "exists" => exists(arg),
            other => anyhow::bail!("unknown command: {other}. Use read, write, list, or exists"),
        }
    }
}

fn read_file(path: &str) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read file: {e}"))?;
    Ok(content)
}

fn write_file(path: &str, content: &str) -> anyhow::Result<String> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("failed to create directory: {e}"))?;
        }
    }
    std::fs::write(path, content).map_err(|e| anyhow::anyhow!("failed to write file: {e}"))?;
    Ok(format!(
        "Successfully wrote {} bytes to {path}",
        content.len()
    ))
}

fn list_dir(path: &str) -> anyhow::Result<String> {
    let entries =
        std::fs::read_dir(path).map_err(|e| anyhow::anyhow!("failed to list directory: {e}"))?;

    let mut out = String::new();
    for entry in entries {
        let entry = entry.map_err(|e| anyhow::anyhow!("failed to list directory: {e}"))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        match entry.metadata() {
            Ok(meta) if meta.is_dir() => {
                let _ = writeln!(out, "[DIR]  {name}");
            }
            Ok(meta) => {
                let _ = writeln!(out, "[FILE] {name} ({} bytes)", meta.len());
            }
            Err(_) => {
                let _ = writeln!(out, "[FILE] {name} (0 bytes)");
            }
        }
    }
    Ok(out)
}

fn exists(path: &str) -> anyhow::Result<String> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok("true (directory)".into()),
        Ok(meta) => Ok(format!("true (file, {} bytes)", meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("false".into()),
        Err(e) => Err(anyhow::anyhow!("failed to check path: {e}")),
    }
}

/// Arithmetic expression evaluator: `+ - * / %`, parentheses, unary minus.
pub struct CalcTool;

impl Tool for CalcTool {
    fn name(&self) -> &str {
        "calc"
    }

    fn description(&self) -> &str {
        "Evaluate mathematical expressions. Supports +, -, *, /, %, parentheses, and unary minus."
    }

    fn execute(&self, input: &str) -> anyhow::Result<String> {
        let value = eval(input)?;
        // Integer results print without a trailing ".0".
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(format!("{value}"))
        }
    }
}

fn eval(input: &str) -> anyhow::Result<f64> {
    let chars: Vec<char> = input.trim().chars().collect();
    if chars.is_empty() {
        anyhow::bail!("expression error: empty input");
    }
    let mut parser = ExprParser { chars, pos: 0 };
    let value = parser.expression()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        anyhow::bail!(
            "expression error: unexpected '{}' at position {}",
            parser.chars[parser.pos],
            parser.pos
        );
    }
    Ok(value)
}

struct ExprParser {
    chars: Vec<char>,
    pos: usize,
}

impl ExprParser {
    fn expression(&mut self) -> anyhow::Result<f64> {
        let mut left = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    left += self.term()?;
                }
                Some('-') => {
                    self.pos += 1;
                    left -= self.term()?;
                }
                _ => return Ok(left),
            }
        }
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut left = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    left *= self.factor()?;
                }
                Some('/') => {
                    self.pos += 1;
                    let right = self.factor()?;
                    if right == 0.0 {
                        anyhow::bail!("evaluation error: division by zero");
                    }
                    left /= right;
                }
                Some('%') => {
                    self.pos += 1;
                    let right = self.factor()?;
                    if right == 0.0 {
                        anyhow::bail!("evaluation error: modulo by zero");
                    }
                    left %= right;
                }
                _ => return Ok(left),
            }
        }
    }

    fn factor(&mut self) -> anyhow::Result<f64> {
        self.skip_ws();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    anyhow::bail!("expression error: missing closing parenthesis");
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => anyhow::bail!("expression error: unexpected '{c}'"),
            None => anyhow::bail!("expression error: unexpected end of input"),
        }
    }

    fn number(&mut self) -> anyhow::Result<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| anyhow::anyhow!("expression error: invalid number '{text}'"))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }
}
