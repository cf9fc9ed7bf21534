//! Console report and constituent file.

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::Path;
use std::time::Duration;

use lib_chain::core::sink::ChainEvent;

/// What a finished session prints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// Messages of traversals that did not succeed.
    pub failures: Vec<String>,
    /// Nested chain names found among the constituents.
    pub nested_chains: Vec<String>,
    pub elapsed: Duration,
    /// Every chain node requested from the server.
    pub subscribed: Vec<String>,
    /// Non-chain constituents, sorted.
    pub constituents: Vec<String>,
}

impl SessionReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for failure in &self.failures {
            out.push_str(&format!("{}\n\n", failure.red()));
        }
        if !self.nested_chains.is_empty() {
            out.push_str(&format!(
                "Received {} underlying chains from the list\n\n{}\n\n",
                self.nested_chains.len(),
                self.nested_chains.join("\n")
            ));
        }
        out.push_str(&format!(
            "{}\n",
            format!("Operation completed in {} ms.", self.elapsed.as_millis()).green()
        ));
        if !self.subscribed.is_empty() {
            out.push_str(&format!(
                "\nBelow is a list of chain nodes requested from the server\n\n{}\n",
                self.subscribed.join(",")
            ));
        }
        if !self.constituents.is_empty() {
            out.push_str(&format!(
                "\nReceived {} constituents from the chains\n\n{}\n",
                self.constituents.len(),
                self.constituents.join("\n")
            ));
        }
        out
    }
}

/// Writes one name per line.
pub fn write_constituents(path: &Path, constituents: &[String]) -> Result<()> {
    let mut text = constituents.join("\n");
    text.push('\n');
    fs::write(path, text).with_context(|| format!("Writing constituents to {} failed", path.display()))
}

/// Multi-line description of a login, status or error event.
pub fn describe_event(event: &ChainEvent) -> Option<String> {
    let banner = "*".repeat(70);
    match event {
        ChainEvent::LoginMessage { timestamp, message } => {
            let state = message.state.clone().unwrap_or_default();
            Some(format!(
                "{banner}\n{} received login {}\nLogin name:{}\nstream:{:?} state:{:?} code:{} text:{}\n{banner}",
                timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                message.kind,
                message.item_name(),
                state.stream,
                state.data,
                state.code.unwrap_or_default(),
                state.text.unwrap_or_default(),
            ))
        }
        ChainEvent::ExtractionStatus { timestamp, status } => {
            let state = status.state.clone().unwrap_or_default();
            Some(format!(
                "{banner}\nReceived {} {}\nItem name:{}\nStream state:{:?}\nData state:{:?}\nState code:{}\nStatus text:{}\n{banner}",
                status.kind,
                timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                status.item_name(),
                state.stream,
                state.data,
                state.code.unwrap_or_default(),
                state.text.unwrap_or_default(),
            ))
        }
        ChainEvent::Error { timestamp, message } => Some(format!(
            "{banner}\nTimestamp:{}\n{}\n{banner}",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            message
        )),
        ChainEvent::ExtractionComplete(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_chain::markets::trep::message::Envelope;
    use serde_json::json;

    #[test]
    fn test_render_report() {
        let report = SessionReport {
            failures: vec!["Chain extraction failed".into()],
            nested_chains: vec!["0#.SUB".into()],
            elapsed: Duration::from_millis(1234),
            subscribed: vec!["0#.X".into(), "1#.X".into()],
            constituents: vec!["A.N".into(), "B.N".into()],
        };
        let text = report.render();
        assert!(text.contains("Chain extraction failed"));
        assert!(text.contains("Received 1 underlying chains"));
        assert!(text.contains("Operation completed in 1234 ms."));
        assert!(text.contains("0#.X,1#.X"));
        assert!(text.contains("Received 2 constituents"));
        assert!(text.contains("A.N\nB.N"));
    }

    #[test]
    fn test_write_constituents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rics.txt");
        write_constituents(&path, &["A.N".to_string(), "B.N".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "A.N\nB.N\n");

        assert!(write_constituents(&dir.path().join("missing/rics.txt"), &[]).is_err());
    }

    #[test]
    fn test_describe_status_event() {
        let status = Envelope::from_value(json!({
            "ID": 5, "Type": "Status", "Key": {"Name": "1#.X"},
            "State": {"Stream": "Closed", "Data": "Suspect", "Code": "NotFound", "Text": "not found"}
        }))
        .unwrap()
        .unwrap();
        let text = describe_event(&ChainEvent::ExtractionStatus {
            timestamp: chrono::Local::now(),
            status,
        })
        .unwrap();
        assert!(text.contains("Item name:1#.X"));
        assert!(text.contains("State code:NotFound"));
        assert!(describe_event(&ChainEvent::error("boom")).unwrap().contains("boom"));
    }
}
