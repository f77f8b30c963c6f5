//! Note template rendering: pure string replacement over named
//! placeholders.
//!
//! Templates shape the body of notes that sync creates for issues with no
//! matching document. Placeholders use `{{name}}` form; anything the
//! template does not mention simply is not rendered, and unknown
//! placeholders pass through untouched so a typo is visible in the output
//! rather than silently eaten.

use crate::types::Issue;

/// Built-in template used when settings carry none. The closing link
/// section is recognized (and stripped) by the body/description
/// comparison, so the two must stay in step.
pub const DEFAULT_TEMPLATE: &str = "# {{title}}

{{description}}

---
[View in Linear]({{url}})
";

/// Render a template for an issue.
pub fn render(template: &str, issue: &Issue) -> String {
    let assignee = issue
        .assignee
        .as_ref()
        .map(|a| a.name.clone())
        .unwrap_or_default();
    let estimate = issue.estimate.map(|e| e.to_string()).unwrap_or_default();
    let labels = issue
        .labels
        .iter()
        .map(|l| l.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let pairs = [
        ("{{title}}", issue.title.clone()),
        ("{{identifier}}", issue.identifier.clone()),
        ("{{description}}", issue.description.clone().unwrap_or_default()),
        ("{{status}}", issue.state.name.clone()),
        ("{{assignee}}", assignee),
        ("{{priority}}", issue.priority.to_string()),
        ("{{estimate}}", estimate),
        ("{{team}}", issue.team.key.clone()),
        ("{{labels}}", labels),
        ("{{url}}", issue.url.clone()),
    ];

    let mut out = template.to_string();
    for (placeholder, value) in pairs {
        out = out.replace(placeholder, &value);
    }

    // Absent optional fields leave blank runs behind; collapse them so an
    // issue without a description still renders a tidy note.
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out
}

/// Render the configured template, or the built-in one.
pub fn body_for(issue: &Issue, template: Option<&str>) -> String {
    render(template.unwrap_or(DEFAULT_TEMPLATE), issue)
}
