//! Per-run iteration bookkeeping.

/// Transient state for one agent run.
///
/// Created when the run starts, mutated once per iteration, and dropped when
/// the run ends. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct IterationState {
    /// Iterations started so far, tool-bearing or not
    pub total_iterations: u32,
    /// Iterations in which at least one tool was executed
    pub tool_iterations: u32,
    accepted: Vec<String>,
    reasoning_log: Vec<String>,
    tools_used: Vec<String>,
    continuation_applied: bool,
    /// Set once a terminal event has been produced
    pub done: bool,
}

/// Outcome of offering an iteration's content to the merge policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Appended as a new answer segment
    Accepted,
    /// Replaced an earlier segment it extends
    Replaced,
    /// Discarded as a restatement of earlier content
    Duplicate,
    /// Nothing to accept
    Empty,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_iteration(&mut self) {
        self.total_iterations += 1;
    }

    /// Add an iteration's reasoning to the run's log. Blank reasoning is
    /// skipped.
    pub fn record_reasoning(&mut self, reasoning: &str) {
        if !reasoning.trim().is_empty() {
            self.reasoning_log.push(reasoning.trim().to_string());
        }
    }

    /// Offer an iteration's cleaned content to the merge policy.
    ///
    /// Exact restatements and fragments of earlier content are dropped. Content
    /// that extends an earlier segment supersedes it and becomes the latest
    /// segment, so the final answer is the most complete version rather than
    /// both drafts.
    pub fn accept_content(&mut self, cleaned: &str) -> Acceptance {
        let candidate = cleaned.trim();
        if candidate.is_empty() {
            return Acceptance::Empty;
        }

        let mut extended = None;
        for (index, previous) in self.accepted.iter().enumerate() {
            match compare(previous, candidate) {
                Overlap::Same | Overlap::Contained => return Acceptance::Duplicate,
                Overlap::Extends => {
                    extended = Some(index);
                    break;
                }
                Overlap::Distinct => {}
            }
        }

        let acceptance = match extended {
            Some(index) => {
                self.accepted.remove(index);
                Acceptance::Replaced
            }
            None => Acceptance::Accepted,
        };
        self.accepted.push(candidate.to_string());
        acceptance
    }

    /// Remember that `name` was executed. Keeps first-use order.
    pub fn record_tool_use(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    pub fn tools_used(&self) -> &[String] {
        &self.tools_used
    }

    /// The last accepted content segment.
    pub fn final_content(&self) -> Option<&str> {
        self.accepted.last().map(String::as_str)
    }

    /// All non-empty reasoning so far, blank-line separated.
    pub fn merged_reasoning(&self) -> Option<String> {
        if self.reasoning_log.is_empty() {
            None
        } else {
            Some(self.reasoning_log.join("\n\n"))
        }
    }

    /// Most recent non-empty reasoning.
    pub fn latest_reasoning(&self) -> Option<&str> {
        self.reasoning_log.last().map(String::as_str)
    }

    /// Whether a reasoning-only iteration may be answered with a synthetic
    /// "give your final answer" turn instead of ending the run.
    pub fn can_request_continuation(&self, max_total_iterations: u32) -> bool {
        !self.continuation_applied
            && !self.tools_used.is_empty()
            && self.total_iterations < max_total_iterations
    }

    pub fn mark_continuation_applied(&mut self) {
        self.continuation_applied = true;
    }

    pub fn continuation_applied(&self) -> bool {
        self.continuation_applied
    }
}

enum Overlap {
    Same,
    /// The candidate is a fragment of earlier content
    Contained,
    /// The candidate contains earlier content
    Extends,
    Distinct,
}

fn compare(previous: &str, candidate: &str) -> Overlap {
    let previous = previous.trim();
    if previous == candidate {
        Overlap::Same
    } else if previous.contains(candidate) {
        Overlap::Contained
    } else if candidate.contains(previous) {
        Overlap::Extends
    } else {
        Overlap::Distinct
    }
}
