use super::Diagnostic;
use crate::ast::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[AUR-R001]: message"
        let heading = match d.code {
            Some(code) => format!("error[{}]", code),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&heading), self.bold(&d.message)));

        if let Some(label) = &d.label {
            let line = label.line as usize;
            let map = d.source.as_deref().map(SourceMap::new);

            // "  --> line:col", or just the line without a span
            let col = match (&label.span, &map) {
                (Some(span), Some(map)) => Some(map.lookup(span.start).1),
                _ => None,
            };
            match col {
                Some(col) => out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col)),
                None => out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line)),
            }

            if let (Some(source), Some(map)) = (&d.source, &map) {
                let line_text = map.line_text(source, line);
                let gutter = line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);

                out.push_str(&format!("{pad} {pipe}\n"));
                let line_num = self.cyan(&format!("{line:>gutter$}"));
                out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

                // Underline the span, or the whole statement when only the line is known
                let (start, len) = match (&label.span, col) {
                    (Some(span), Some(col)) => (col - 1, span.len().max(1)),
                    _ => {
                        let indent = line_text.len() - line_text.trim_start().len();
                        (indent, line_text.trim().len().max(1))
                    }
                };
                let carets = self.bold_red(&"^".repeat(len));
                let indent = " ".repeat(start);
                if label.message.is_empty() {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
                } else {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
                }
                out.push_str(&format!("{pad} {pipe}\n"));
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
