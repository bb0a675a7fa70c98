use std::collections::HashSet;
use tokio::sync::watch;
use traffic_core::logs::LogCategory;
use traffic_core::session::Dashboard;
use traffic_core::stats::{TrafficStats, VehicleClass};
use traffic_core::stream_state::StreamState;
use uuid::Uuid;

/// Turns dashboard snapshots into console lines, printing only what changed.
#[derive(Debug, Default)]
pub struct ConsoleView {
    state: Option<StreamState>,
    stats: Option<TrafficStats>,
    seen: HashSet<Uuid>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, dashboard: &Dashboard) -> Vec<String> {
        let mut lines = Vec::new();

        if self.state != Some(dashboard.stream_state) {
            self.state = Some(dashboard.stream_state);
            let mut line = format!(
                "[{}] {} camera",
                dashboard.stream_state.to_string().to_uppercase(),
                dashboard.facing_mode
            );
            if let Some(error) = &dashboard.error {
                line.push_str(&format!(": {error}"));
            }
            lines.push(line);
        }

        // Oldest first on the console.
        for entry in dashboard.logs.iter().rev() {
            if self.seen.insert(entry.id()) {
                lines.push(format!(
                    "{} {:<10} {}",
                    entry.time(),
                    category_tag(entry.category()),
                    entry.message()
                ));
            }
        }
        if dashboard.logs.is_empty() {
            self.seen.clear();
        }

        if self.stats.as_ref() != Some(&dashboard.stats) {
            self.stats = Some(dashboard.stats.clone());
            lines.push(stats_line(&dashboard.stats));
        }
        lines
    }

    /// Prints until the session manager goes away.
    pub async fn run(mut self, mut rx: watch::Receiver<Dashboard>) {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            for line in self.render(&snapshot) {
                println!("{line}");
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

fn category_tag(category: LogCategory) -> &'static str {
    match category {
        LogCategory::System => "[system]",
        LogCategory::Vehicle => "[vehicle]",
        LogCategory::Transcript => "[model]",
        LogCategory::Error => "[error]",
    }
}

pub fn stats_line(stats: &TrafficStats) -> String {
    let counts: Vec<String> = VehicleClass::ALL
        .iter()
        .map(|class| format!("{} {}", class.label(), stats.counts().get(*class)))
        .collect();
    format!(
        "Vehicles: {} | total {} | density {}",
        counts.join(" | "),
        stats.counts().total(),
        stats.density()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_core::logs::LogBook;
    use traffic_core::media::FacingMode;
    use traffic_core::stats::{Density, VehicleCounts};

    fn dashboard(state: StreamState, stats: TrafficStats, logs: &LogBook) -> Dashboard {
        Dashboard {
            stream_state: state,
            stats,
            logs: logs.to_vec(),
            volume: 0,
            facing_mode: FacingMode::Environment,
            error: None,
        }
    }

    #[test]
    fn test_prints_only_changes() {
        let mut view = ConsoleView::new();
        let mut logs = LogBook::new(10);
        logs.push(LogCategory::System, "Connecting with environment camera");

        let first = view.render(&dashboard(StreamState::Connecting, TrafficStats::new(), &logs));
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], "[CONNECTING] environment camera");
        assert!(first[1].ends_with("Connecting with environment camera"));
        assert!(first[2].starts_with("Vehicles: 2-wheeler 0"));

        let mut stats = TrafficStats::new();
        let mut delta = VehicleCounts::default();
        delta.set(VehicleClass::FourWheeler, 2);
        stats.record(&delta, Density::Medium);
        logs.push(LogCategory::Vehicle, "Detected 2x 4-wheeler");

        let second = view.render(&dashboard(StreamState::Connecting, stats.clone(), &logs));
        assert_eq!(second.len(), 2);
        assert!(second[0].contains("[vehicle]"));
        assert_eq!(
            second[1],
            "Vehicles: 2-wheeler 0 | 3-wheeler 0 | 4-wheeler 2 | heavy 0 | total 2 | density MEDIUM"
        );

        assert!(view
            .render(&dashboard(StreamState::Connecting, stats, &logs))
            .is_empty());
    }
}
