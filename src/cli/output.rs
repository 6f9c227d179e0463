//! Output formatting module
//!
//! This module handles formatting machine snapshots for different output formats.

use crate::{Result, diagram::DiagramMapper, fsm::MachineStatus};
use serde_json::json;

/// Output machine statuses as JSON
pub fn output_json(w: &mut impl std::io::Write, statuses: &[MachineStatus]) -> Result<()> {
    let signed_in = statuses.iter().filter(|s| s.state == "SignedIn").count();
    let output = json!({
        "summary": {
            "total_machines": statuses.len(),
            "signed_in": signed_in,
        },
        "machines": statuses,
    });

    serde_json::to_writer_pretty(&mut *w, &output)?;
    writeln!(w)?; // Add trailing newline
    Ok(())
}

/// Output machine statuses as text table
pub fn output_table(w: &mut impl std::io::Write, statuses: &[MachineStatus]) -> Result<()> {
    writeln!(w, "Auth State Visualization - Session")?;
    writeln!(w, "{}", "=".repeat(100))?;
    writeln!(w)?;

    writeln!(
        w,
        "{:<10} {:<30} {:<30} {:<6} {:<20}",
        "Provider", "State", "Persisted", "Input", "Arrow"
    )?;
    writeln!(w, "{:-<100}", "")?;

    for status in statuses {
        let arrow = status
            .highlighted_arrow
            .as_deref()
            .map(|a| a.rsplit("-arrow-").next().unwrap_or(a))
            .unwrap_or("-");
        writeln!(
            w,
            "{:<10} {:<30} {:<30} {:<6} {:<20}",
            status.provider.display_name(),
            status.state,
            status.persisted.as_deref().unwrap_or("-"),
            if status.accepts_input { "yes" } else { "no" },
            arrow
        )?;
    }
    writeln!(w)?;

    Ok(())
}

/// Output the diagrams as one Graphviz document per machine
pub fn output_dot(w: &mut impl std::io::Write, diagrams: &[&DiagramMapper]) -> Result<()> {
    for diagram in diagrams {
        write!(w, "{}", diagram.to_dot())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::ProviderId;

    fn create_test_statuses() -> Vec<MachineStatus> {
        vec![
            MachineStatus {
                provider: ProviderId::Email,
                state: "WaitingForUserToClickLink".to_string(),
                persisted: Some("WaitingForUserToClickLink".to_string()),
                accepts_input: true,
                highlighted_box: Some("email-box-waiting-for-user-to-click-link".to_string()),
                highlighted_arrow: Some("email-arrow-link-sent".to_string()),
            },
            MachineStatus {
                provider: ProviderId::Github,
                state: "Idle".to_string(),
                persisted: None,
                accepts_input: true,
                highlighted_box: Some("github-box-idle".to_string()),
                highlighted_arrow: None,
            },
        ]
    }

    #[test]
    fn test_output_json() {
        let mut output = Vec::new();
        output_json(&mut output, &create_test_statuses()).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["summary"]["total_machines"], 2);
        assert_eq!(value["summary"]["signed_in"], 0);
        assert_eq!(value["machines"][0]["provider"], "email");
        assert_eq!(value["machines"][1]["persisted"], serde_json::Value::Null);
    }

    #[test]
    fn test_output_table() {
        let mut output = Vec::new();
        output_table(&mut output, &create_test_statuses()).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("WaitingForUserToClickLink"));
        assert!(text.contains("link-sent"));
        assert!(text.contains("GitHub"));
    }

    #[test]
    fn test_output_dot() {
        let mut email = DiagramMapper::new(ProviderId::Email);
        email.enqueue("Idle");
        let google = DiagramMapper::new(ProviderId::Google);

        let mut output = Vec::new();
        output_dot(&mut output, &[&email, &google]).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("digraph email {"));
        assert!(text.contains("digraph google {"));
        assert!(text.contains("\"email-box-idle\" [label=\"Idle\", fillcolor=\"gold\"]"));
    }
}
