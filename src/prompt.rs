//! Operator prompts.
//!
//! The driver asks questions through the [`Prompter`] trait so a run can be
//! interactive, scripted in tests, or fully non-interactive with `--yes`.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use parking_lot::Mutex;

/// Asks the operator a question and returns the answer.
pub trait Prompter: Send + Sync {
    /// Ask a free-text question. An empty answer yields `default`.
    fn ask(&self, question: &str, default: Option<&str>) -> io::Result<String>;

    /// Ask a yes/no question.
    fn confirm(&self, question: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        let answer = self.ask(&format!("{question} [{hint}]"), None)?;
        Ok(parse_yes_no(&answer).unwrap_or(default))
    }

    /// Ask the operator to pick one of `choices`; returns its index.
    ///
    /// Accepts a 1-based number or a choice's name. Invalid input is asked
    /// again.
    fn choose(&self, question: &str, choices: &[&str]) -> io::Result<usize> {
        if choices.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no choices provided"));
        }
        let mut text = format_choices(question, choices);
        loop {
            let answer = self.ask(&text, None)?;
            if let Some(index) = parse_choice(&answer, choices) {
                return Ok(index);
            }
            text = format!("Please enter a number between 1 and {}", choices.len());
        }
    }
}

/// Interpret a yes/no answer; `None` for empty or unrecognised input.
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Index of the choice named or numbered by `answer`.
pub fn parse_choice(answer: &str, choices: &[&str]) -> Option<usize> {
    let answer = answer.trim();
    if let Ok(number) = answer.parse::<usize>() {
        return (number > 0 && number <= choices.len()).then(|| number - 1);
    }
    choices.iter().position(|choice| choice.eq_ignore_ascii_case(answer))
}

fn format_choices(question: &str, choices: &[&str]) -> String {
    let mut text = String::from(question);
    for (i, choice) in choices.iter().enumerate() {
        text.push_str(&format!("\n  {}. {}", i + 1, choice));
    }
    text.push_str(&format!("\nEnter choice (1-{})", choices.len()));
    text
}

/// Reads answers from standard input.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str, default: Option<&str>) -> io::Result<String> {
        match default {
            Some(value) => print!("{question} [{value}]: "),
            None => print!("{question}: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
        }
        let input = input.trim();
        Ok(match default {
            Some(value) if input.is_empty() => value.to_string(),
            _ => input.to_string(),
        })
    }
}

/// Accepts every default without asking.
///
/// Questions without a default have no answer and fail, so the driver
/// falls back to its non-interactive choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoPrompter;

impl Prompter for AutoPrompter {
    fn ask(&self, question: &str, default: Option<&str>) -> io::Result<String> {
        tracing::debug!(question = %question, answer = ?default, "Answering automatically");
        default.map(str::to_string).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no default answer in non-interactive mode")
        })
    }

    fn confirm(&self, question: &str, default: bool) -> io::Result<bool> {
        tracing::debug!(question = %question, answer = default, "Answering automatically");
        Ok(default)
    }
}

/// Replays canned answers in order and records every question.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    /// Create a prompter that will give `answers` in order.
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            questions: Mutex::new(Vec::new()),
        }
    }

    /// Questions asked so far.
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().clone()
    }

    /// Answers not yet consumed.
    pub fn remaining(&self) -> usize {
        self.answers.lock().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str, default: Option<&str>) -> io::Result<String> {
        self.questions.lock().push(question.to_string());
        let answer = self.answers.lock().pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, format!("no scripted answer for: {question}"))
        })?;
        Ok(match default {
            Some(value) if answer.is_empty() => value.to_string(),
            _ => answer,
        })
    }
}
