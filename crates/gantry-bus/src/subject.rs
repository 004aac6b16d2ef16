//! Subject pattern matching.
//!
//! Subjects are dot-separated token strings (`run.queued.pip_...`).
//! Patterns support `*` (exactly one token) and `>` (one or more trailing
//! tokens).

#[derive(Debug, Clone)]
pub struct SubjectPattern {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

impl SubjectPattern {
    pub fn new(pattern: &str) -> Self {
        let tokens = pattern
            .split('.')
            .map(|tok| match tok {
                "*" => Token::Single,
                ">" => Token::Tail,
                literal => Token::Literal(literal.to_string()),
            })
            .collect();
        Self { tokens }
    }

    pub fn matches(&self, subject: &str) -> bool {
        let parts: Vec<&str> = subject.split('.').collect();
        let mut i = 0;

        for token in &self.tokens {
            match token {
                // `>` matches one or more remaining tokens.
                Token::Tail => return i < parts.len(),
                Token::Single => {
                    if i >= parts.len() {
                        return false;
                    }
                    i += 1;
                }
                Token::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return false;
                    }
                    i += 1;
                }
            }
        }

        i == parts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let pattern = SubjectPattern::new("agent.registered");
        assert!(pattern.matches("agent.registered"));
        assert!(!pattern.matches("agent.registered.extra"));
        assert!(!pattern.matches("agent"));
    }

    #[test]
    fn test_single_wildcard() {
        let pattern = SubjectPattern::new("agent.*.offline");
        assert!(pattern.matches("agent.agt_123.offline"));
        assert!(!pattern.matches("agent.offline"));
        assert!(!pattern.matches("agent.agt_123.heartbeat"));
    }

    #[test]
    fn test_tail_wildcard() {
        let pattern = SubjectPattern::new("run.>");
        assert!(pattern.matches("run.queued.pip_1"));
        assert!(pattern.matches("run.run_1.job.job_1.completed"));
        assert!(!pattern.matches("run"));
        assert!(!pattern.matches("agent.registered"));
    }

    #[test]
    fn test_match_all() {
        let pattern = SubjectPattern::new(">");
        assert!(pattern.matches("counters.updated"));
        assert!(pattern.matches("run.queued.pip_1"));
    }
}
