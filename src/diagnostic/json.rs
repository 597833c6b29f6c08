use super::Diagnostic;
use crate::ast::SourceMap;

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "severity": "error",
        "stage": d.stage.to_string(),
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }

    if let Some(label) = &d.label {
        obj["line"] = serde_json::Value::from(label.line);
        if let (Some(span), Some(source)) = (&label.span, &d.source) {
            let (_, col) = SourceMap::new(source).lookup(span.start);
            obj["col"] = serde_json::Value::from(col);
        }
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Stage;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::error(Stage::Compile, "unresolved name `x`")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["stage"], "compile");
        assert_eq!(v["message"], "unresolved name `x`");
        assert!(v.get("line").is_none());
        assert!(v.get("code").is_none());
    }

    #[test]
    fn render_line_and_code() {
        let d = Diagnostic::error(Stage::Runtime, "bad").with_code("AUR-R003").with_line(4, "");
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "AUR-R003");
        assert_eq!(v["line"], 4);
        assert!(v.get("col").is_none());
    }

    #[test]
    fn render_column_from_span() {
        let d = Diagnostic::error(Stage::Lex, "unexpected '$'")
            .with_span(2, 10..11, "here")
            .with_source("x = 1\ny = $".to_string());
        let v = parse_json(&render(&d));
        assert_eq!(v["line"], 2);
        assert_eq!(v["col"], 5);
    }

    #[test]
    fn render_notes_and_suggestion() {
        let d = Diagnostic::error(Stage::Runtime, "bad")
            .with_note("in `f`")
            .with_note("called from `g`")
            .with_suggestion("try this instead");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"].as_array().unwrap().len(), 2);
        assert_eq!(v["notes"][0], "in `f`");
        assert_eq!(v["suggestion"], "try this instead");
    }

    #[test]
    fn render_is_one_line() {
        let e = crate::eval("l = {1}\nx = l:2\n").unwrap_err();
        let out = render(&Diagnostic::from(&e));
        assert!(!out.contains('\n'));
        let v = parse_json(&out);
        assert_eq!(v["stage"], "runtime");
        assert_eq!(v["line"], 2);
    }
}
