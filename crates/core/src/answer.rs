//! Normalization of model answers before they are written as blocks.

const FENCE: &str = "```";

/// Lines of `answer` worth writing, in order.
///
/// The answer is trimmed and split on newlines; a first line and a last line
/// starting with a code fence are dropped, then blank lines are skipped. Fences
/// are not checked for pairing: a lone opening fence is stripped just the same.
pub fn answer_lines(answer: &str) -> Vec<String> {
    let mut lines: Vec<&str> = answer.trim().split('\n').collect();
    if lines.first().map_or(false, |line| line.trim().starts_with(FENCE)) {
        lines.remove(0);
    }
    if lines.last().map_or(false, |line| line.trim().starts_with(FENCE)) {
        lines.pop();
    }
    lines
        .into_iter()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
