use thiserror::Error;

/// Width of the query window shown around an error position.
const QUERY_WINDOW: usize = 70;
/// Leading spaces before the echoed query line.
const QUERY_INDENT: usize = 7;

#[derive(Debug, Clone, Error)]
pub enum KeyqlError {
    /// Parse or semantic-check failure. `pos` is a byte offset into the
    /// query; `None` points past the last token.
    #[error("{}", render_error("Syntax Error", .message, .pos, .query))]
    Syntax {
        message: String,
        pos: Option<usize>,
        query: Option<String>,
    },
    /// Runtime failure while pulling a plan.
    #[error("{}", render_error("Execute Error", .message, .pos, .query))]
    Execute {
        message: String,
        pos: Option<usize>,
        query: Option<String>,
    },
    /// Propagated unchanged from the storage layer.
    #[error("Storage Error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, KeyqlError>;

impl KeyqlError {
    pub fn syntax(pos: impl Into<Option<usize>>, message: impl Into<String>) -> Self {
        KeyqlError::Syntax {
            message: message.into(),
            pos: pos.into(),
            query: None,
        }
    }

    pub fn execute(pos: impl Into<Option<usize>>, message: impl Into<String>) -> Self {
        KeyqlError::Execute {
            message: message.into(),
            pos: pos.into(),
            query: None,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        KeyqlError::Storage(message.into())
    }

    /// Attach the source query so `Display` can render a caret diagram.
    pub fn bind_query(&mut self, q: &str) {
        match self {
            KeyqlError::Syntax { query, .. } | KeyqlError::Execute { query, .. } => {
                *query = Some(q.to_string());
            }
            KeyqlError::Storage(_) => {}
        }
    }

    /// Consuming variant of [`bind_query`](Self::bind_query).
    pub fn with_query(mut self, q: &str) -> Self {
        self.bind_query(q);
        self
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, KeyqlError::Syntax { .. })
    }

    pub fn is_execute(&self) -> bool {
        matches!(self, KeyqlError::Execute { .. })
    }
}

fn render_error(
    kind: &str,
    message: &str,
    pos: &Option<usize>,
    query: &Option<String>,
) -> String {
    match query {
        None => match pos {
            Some(p) => format!("{kind}: {message} at {p}"),
            None => format!("{kind}: {message} at end of query"),
        },
        Some(q) => {
            let diagram = caret_diagram(q, *pos);
            format!("{diagram}{kind}: {message}")
        }
    }
}

/// Render the query trimmed to a window around `pos`, with a `^--` caret
/// line underneath. Trimmed ends are marked with `...`.
fn caret_diagram(query: &str, pos: Option<usize>) -> String {
    let trimmed = query.trim();
    let qlen = trimmed.len();
    let mut pos = pos.unwrap_or(qlen).min(qlen);

    let mut window = trimmed;
    let mut trim_left = false;
    let mut trim_right = false;
    if qlen > QUERY_WINDOW {
        if pos <= QUERY_WINDOW / 2 {
            window = &trimmed[..QUERY_WINDOW];
            trim_right = true;
        } else {
            trim_left = true;
            let cut = pos - QUERY_WINDOW / 2;
            let mut rest = qlen - cut;
            if rest > QUERY_WINDOW {
                rest = QUERY_WINDOW;
                trim_right = true;
            }
            window = &trimmed[cut..cut + rest];
            pos -= cut;
        }
    }

    let mut out = String::new();
    let mut caret_col = pos + QUERY_INDENT;
    out.push_str(&" ".repeat(QUERY_INDENT));
    if trim_left {
        out.push_str("... ");
        caret_col += 4;
    }
    out.push_str(window);
    if trim_right {
        out.push_str(" ...");
    }
    out.push('\n');
    out.push_str(&" ".repeat(caret_col));
    out.push_str("^--\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_display() {
        let err = KeyqlError::syntax(12, "Unknown operator");
        assert_eq!(err.to_string(), "Syntax Error: Unknown operator at 12");

        let err = KeyqlError::execute(None, "Divide by zero");
        assert_eq!(
            err.to_string(),
            "Execute Error: Divide by zero at end of query"
        );
    }

    #[test]
    fn test_bound_display_carries_caret() {
        let mut err = KeyqlError::syntax(10, "Bad Expression");
        err.bind_query("where key = !!");
        let rendered = err.to_string();
        assert!(rendered.contains("where key = !!"));
        assert!(rendered.contains("^--"));
        assert!(rendered.ends_with("Syntax Error: Bad Expression"));
        // Caret sits under the offending token.
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1].find('^'), Some(10 + QUERY_INDENT));
    }

    #[test]
    fn test_long_query_is_windowed() {
        let long = format!("where key = '{}' & value = 'x'", "k".repeat(200));
        let err = KeyqlError::execute(220, "boom").with_query(&long);
        let rendered = err.to_string();
        let first = rendered.lines().next().unwrap();
        assert!(first.contains("..."));
        // window plus markers, never the whole query
        assert!(first.len() < long.len());
    }

    #[test]
    fn test_storage_error_ignores_binding() {
        let mut err = KeyqlError::storage("disk gone");
        err.bind_query("select *");
        assert_eq!(err.to_string(), "Storage Error: disk gone");
    }
}
