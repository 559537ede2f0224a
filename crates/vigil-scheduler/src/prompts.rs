//! Synthetic prompt text for scheduled agent turns.

use vigil_projections::Projection;

/// Build the daily-review prompt from the upcoming projection list.
pub fn review_prompt(upcoming: &[Projection]) -> String {
    let mut out = String::from(
        "[scheduled daily review] The following commitments are on the horizon:\n",
    );
    for p in upcoming {
        out.push_str(&format_line(p));
    }
    out.push_str(
        "\nReview these with the user if anything deserves attention today. \
         If nothing is worth raising right now, reply with exactly NOOP.",
    );
    out
}

/// Build the reminder prompt for projections that just came due.
/// Settlement already happened; this is purely informational.
pub fn due_prompt(due: &[Projection]) -> String {
    let mut out = String::from("[scheduled reminder] Due now:\n");
    for p in due {
        out.push_str(&format_line(p));
    }
    out.push_str(
        "\nLet the user know. If interrupting would be unhelpful, reply with exactly NOOP.",
    );
    out
}

fn format_line(p: &Projection) -> String {
    let mut line = format!("- {}", p.summary);
    if let Some(when) = &p.resolved_when {
        line.push_str(&format!(" (at {when} UTC)"));
    } else {
        line.push_str(&format!(" ({})", p.resolution));
    }
    if let Some(ctx) = &p.context {
        line.push_str(&format!(" — {ctx}"));
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_projections::{NewProjection, ProjectionStore, Resolution};

    #[test]
    fn prompts_list_every_projection() {
        let store = ProjectionStore::open_in_memory().unwrap();
        let a = store
            .add(NewProjection {
                summary: "Call doctor".into(),
                resolved_when: Some("2030-01-15 10:00".into()),
                resolution: Some(Resolution::Exact),
                context: Some("ask about referral".into()),
                ..Default::default()
            })
            .unwrap();
        let b = store
            .add(NewProjection {
                summary: "Learn sailing".into(),
                resolution: Some(Resolution::Someday),
                ..Default::default()
            })
            .unwrap();

        let review = review_prompt(&[a.clone(), b.clone()]);
        assert!(review.contains("Call doctor"));
        assert!(review.contains("2030-01-15 10:00"));
        assert!(review.contains("ask about referral"));
        assert!(review.contains("someday"));
        assert!(review.contains("NOOP"));

        let due = due_prompt(&[a]);
        assert!(due.contains("Due now"));
        assert!(due.contains("Call doctor"));
    }
}
