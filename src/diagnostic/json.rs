use serde::Serialize;

use super::{Diagnostic, Severity, SourceMap};

#[derive(Serialize)]
struct Report<'a> {
    severity: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    message: &'a str,
    labels: Vec<LabelReport<'a>>,
    notes: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

#[derive(Serialize)]
struct LabelReport<'a> {
    start: usize,
    end: usize,
    message: &'a str,
    /// Present only when the diagnostic carries its source text.
    #[serde(flatten)]
    position: Option<Position>,
}

#[derive(Serialize)]
struct Position {
    line: usize,
    col: usize,
}

/// One diagnostic as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let map = d.source.as_deref().map(SourceMap::new);
    let report = Report {
        severity: match d.severity {
            Severity::Error => "error",
            Severity::Bug => "bug",
        },
        code: d.code,
        message: &d.message,
        labels: d
            .labels
            .iter()
            .map(|l| LabelReport {
                start: l.span.start,
                end: l.span.end,
                message: &l.message,
                position: map.as_ref().map(|m| {
                    let (line, col) = m.lookup(l.span.start);
                    Position { line, col }
                }),
            })
            .collect(),
        notes: &d.notes,
        suggestion: d.suggestion.as_deref(),
    };
    serde_json::to_string(&report)
        .unwrap_or_else(|e| serde_json::json!({ "severity": "bug", "message": e.to_string() }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Span;
    use crate::error::Error;
    use crate::vm::VmError;

    fn rendered(d: &Diagnostic) -> serde_json::Value {
        serde_json::from_str(&render(d)).expect("valid JSON")
    }

    #[test]
    fn json_optional_keys_absent() {
        let v = rendered(&Diagnostic::error("not callable"));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "not callable");
        assert_eq!(v["labels"], serde_json::json!([]));
        assert!(v.get("code").is_none());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn json_label_position_needs_source() {
        let d = Diagnostic::error("unexpected ')'").with_span(Span { start: 4, end: 5 }, "here");
        let bare = rendered(&d);
        assert!(bare["labels"][0].get("line").is_none());

        let v = rendered(&d.with_source("(a\nb))"));
        let label = &v["labels"][0];
        assert_eq!((label["start"].as_u64(), label["end"].as_u64()), (Some(4), Some(5)));
        assert_eq!((label["line"].as_u64(), label["col"].as_u64()), (Some(2), Some(2)));
    }

    #[test]
    fn json_runtime_error_is_single_line() {
        let text = render(&Diagnostic::from(&Error::Runtime(VmError::CallDepth(8))));
        assert!(!text.contains('\n'));
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["code"], "KILN-V001");
        assert_eq!(v["message"], "call depth limit of 8 exceeded");
    }

    #[test]
    fn json_bug_severity_and_suggestion() {
        let mut d = Diagnostic::error("label 3 never anchored").with_code("KILN-C003").with_suggestion("report it");
        d.severity = Severity::Bug;
        let v = rendered(&d);
        assert_eq!(v["severity"], "bug");
        assert_eq!(v["code"], "KILN-C003");
        assert_eq!(v["suggestion"], "report it");
    }
}
