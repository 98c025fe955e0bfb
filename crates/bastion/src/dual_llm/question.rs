use serde_json::Value;

pub const DONE_MARKER: &str = "DONE";

/// A multiple choice question from the main agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
}

impl Question {
    /// Options as the quarantined agent sees them, one `index: text` per line
    pub fn render_options(&self) -> String {
        self.options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}: {}", i, option))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn max_index(&self) -> usize {
        self.options.len().saturating_sub(1)
    }
}

const QUESTION_LABEL: &str = "QUESTION:";
const OPTIONS_LABEL: &str = "\nOPTIONS:";

/// Strip a leading `<number>:` label from an option line
fn strip_option_label(line: &str) -> &str {
    let line = line.trim();
    let unlabelled = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if unlabelled.len() == line.len() {
        return line;
    }
    match unlabelled.strip_prefix(':') {
        Some(rest) => rest.trim(),
        None => line,
    }
}

/// The main agent signals it has learned enough
pub fn is_done(response: &str) -> bool {
    response.contains(DONE_MARKER)
}

/// Parse a `QUESTION: ... OPTIONS: ...` block. Anything else, including a block
/// without options, is not a question.
pub fn parse_question(response: &str) -> Option<Question> {
    let (_, after_label) = response.split_once(QUESTION_LABEL)?;
    let (question, options) = after_label.split_once(OPTIONS_LABEL)?;
    let question = question.trim().to_string();
    let options: Vec<String> = options
        .lines()
        .map(strip_option_label)
        .filter(|option| !option.is_empty())
        .map(String::from)
        .collect();

    if question.is_empty() || options.is_empty() {
        return None;
    }
    Some(Question { question, options })
}

/// An answer index the quarantined agent chose, and whether it had to be defaulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAnswer {
    pub index: usize,
    pub defaulted: bool,
}

/// Validate the quarantined agent's answer against the option list.
///
/// Non numbers and out of range numbers resolve to the last option, fractional answers
/// are floored.
pub fn resolve_answer(answer: Option<&Value>, option_count: usize) -> ResolvedAnswer {
    let last = ResolvedAnswer {
        index: option_count.saturating_sub(1),
        defaulted: true,
    };
    let Some(number) = answer.and_then(Value::as_f64) else {
        return last;
    };
    let floored = number.floor();
    if floored < 0.0 || floored >= option_count as f64 {
        return last;
    }
    ResolvedAnswer {
        index: floored as usize,
        defaulted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use serde_json::json;

    #[test]
    fn test_parse_question() {
        let response = indoc! {"
            QUESTION: What kind of file is it?
            OPTIONS:
            0: A text document
            1: A spreadsheet

            2: Something else
        "};
        let parsed = parse_question(response).unwrap();
        assert_eq!(parsed.question, "What kind of file is it?");
        assert_eq!(
            parsed.options,
            vec!["A text document", "A spreadsheet", "Something else"]
        );
        assert_eq!(parsed.max_index(), 2);
        assert_eq!(
            parsed.render_options(),
            "0: A text document\n1: A spreadsheet\n2: Something else"
        );
    }

    #[test]
    fn test_multiline_question() {
        let response = "Sure.\nQUESTION: Does the email\nmention a meeting?\nOPTIONS: 0: yes\n1: no";
        let parsed = parse_question(response).unwrap();
        assert_eq!(parsed.question, "Does the email\nmention a meeting?");
        assert_eq!(parsed.options, vec!["yes", "no"]);
    }

    #[test]
    fn test_malformed_questions() {
        assert!(parse_question("I think we are finished").is_none());
        assert!(parse_question("QUESTION: where are the options?").is_none());
        assert!(parse_question("QUESTION: empty\nOPTIONS:\n\n").is_none());
        assert!(parse_question("OPTIONS:\n0: a").is_none());
    }

    #[test]
    fn test_option_labels() {
        assert_eq!(strip_option_label("12:  twelve "), "twelve");
        assert_eq!(strip_option_label("2024 was the year"), "2024 was the year");
        assert_eq!(strip_option_label("no label"), "no label");
    }

    #[test]
    fn test_done_detection() {
        assert!(is_done("DONE"));
        assert!(is_done("I have what I need. DONE"));
        assert!(!is_done("QUESTION: done yet?\nOPTIONS:\n0: no"));
    }

    #[test]
    fn test_answer_bounds() {
        for raw in [json!(7), json!(-1), json!("not a number"), json!(null), json!(4)] {
            let resolved = resolve_answer(Some(&raw), 4);
            assert_eq!(resolved.index, 3, "{}", raw);
            assert!(resolved.defaulted);
        }
        assert_eq!(resolve_answer(None, 4).index, 3);
    }

    #[test]
    fn test_valid_answers() {
        assert_eq!(
            resolve_answer(Some(&json!(0)), 4),
            ResolvedAnswer {
                index: 0,
                defaulted: false
            }
        );
        assert_eq!(resolve_answer(Some(&json!(2.9)), 4).index, 2);
        assert!(!resolve_answer(Some(&json!(2.9)), 4).defaulted);
        assert_eq!(resolve_answer(Some(&json!(3)), 4).index, 3);
    }
}
