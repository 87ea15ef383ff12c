//! # Console Module
//!
//! Operator communication consumed by the engine.  Messages are fire-and-forget,
//! prompts block until the operator picks one of the allowed responses.

use std::collections::VecDeque;
use std::sync::{Arc,Mutex};
use log::{info,warn};

pub trait Console: Send {
    /// Post an operator notice
    fn post_message(&mut self,text: &str);
    /// Ask the operator a question, returns the index of the chosen response
    fn post_prompt(&mut self,text: &str,allowed: &[&str]) -> usize;
}

/// Console that writes to the log and always answers with a fixed response index
pub struct LogConsole {
    answer: usize
}

impl LogConsole {
    /// `answer` is the response index used for every prompt
    pub fn new(answer: usize) -> Self {
        Self {
            answer
        }
    }
}

impl Console for LogConsole {
    fn post_message(&mut self,text: &str) {
        info!("{}",text);
    }
    fn post_prompt(&mut self,text: &str,allowed: &[&str]) -> usize {
        let ans = usize::min(self.answer,allowed.len().saturating_sub(1));
        info!("{} {:?} -> {}",text,allowed,allowed.get(ans).unwrap_or(&""));
        ans
    }
}

/// Shared record of console traffic, lines start with `MSG` or `PROMPT`
#[derive(Clone,Default)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>
}

impl Transcript {
    fn push(&self,line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(_) => Vec::new()
        }
    }
    pub fn prompts(&self) -> Vec<String> {
        self.lines().into_iter().filter(|l| l.starts_with("PROMPT")).collect()
    }
}

/// Console with a queue of scripted answers, everything posted goes to a `Transcript`.
/// When the queue runs dry the last allowed response is chosen.
#[derive(Default)]
pub struct ScriptedConsole {
    answers: VecDeque<String>,
    transcript: Transcript
}

impl ScriptedConsole {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            transcript: Transcript::default()
        }
    }
    /// Handle to the traffic record, stays valid after the console is handed to an engine
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

impl Console for ScriptedConsole {
    fn post_message(&mut self,text: &str) {
        self.transcript.push(format!("MSG {}",text));
    }
    fn post_prompt(&mut self,text: &str,allowed: &[&str]) -> usize {
        self.transcript.push(format!("PROMPT {}",text));
        if let Some(ans) = self.answers.pop_front() {
            if let Some(idx) = allowed.iter().position(|x| x.eq_ignore_ascii_case(&ans)) {
                return idx;
            }
            warn!("scripted answer {} is not one of {:?}",ans,allowed);
        }
        allowed.len().saturating_sub(1)
    }
}
