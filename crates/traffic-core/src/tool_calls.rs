use crate::logs::{LogBook, LogCategory};
use crate::realtime_api::RealtimeSession;
use crate::stats::{Density, TrafficStats, VehicleClass, VehicleCounts};
use serde_json::{json, Value};
use std::collections::VecDeque;
use traffic_live_types::{ClientMessage, FunctionCall, FunctionDeclaration, FunctionResponse};

pub const REPORT_TRAFFIC: &str = "report_traffic";

/// Declaration sent in the session setup.
pub fn report_traffic_declaration() -> FunctionDeclaration {
    let count = |what: &str| {
        json!({
            "type": "INTEGER",
            "description": format!("Number of {what} newly seen crossing the guide line"),
        })
    };
    FunctionDeclaration::new(
        REPORT_TRAFFIC,
        "Report vehicles that crossed the guide line since the last report, and the current traffic density.",
        json!({
            "type": "OBJECT",
            "properties": {
                "two_wheeler": count("bicycles and motorcycles"),
                "three_wheeler": count("auto-rickshaws"),
                "four_wheeler": count("cars, vans and SUVs"),
                "heavy_vehicle": count("buses and trucks"),
                "density": {
                    "type": "STRING",
                    "enum": ["LOW", "MEDIUM", "HIGH"],
                    "description": "Overall traffic density in view",
                },
                "description": {
                    "type": "STRING",
                    "description": "Short note about notable activity",
                },
            },
            "required": ["two_wheeler", "three_wheeler", "four_wheeler", "heavy_vehicle", "density"],
        }),
    )
}

/// Non-negative whole count from loosely typed JSON. Anything that is not
/// a finite number or a numeric string counts as zero.
pub fn coerce_count(value: Option<&Value>) -> u64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() && n > 0.0 => n.floor() as u64,
        _ => 0,
    }
}

/// Density from a `LOW|MEDIUM|HIGH` string, the lowest level otherwise.
pub fn parse_density(value: Option<&Value>) -> Density {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficReport {
    pub counts: VehicleCounts,
    pub density: Density,
    pub description: Option<String>,
}

impl TrafficReport {
    pub fn from_args(args: Option<&Value>) -> Self {
        let field = |name: &str| args.and_then(|a| a.get(name));
        let mut counts = VehicleCounts::default();
        for class in VehicleClass::ALL {
            counts.set(class, coerce_count(field(class.arg_name())));
        }
        let description = field("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            counts,
            density: parse_density(field("density")),
            description,
        }
    }

    /// `2x 2-wheeler, 1x heavy (queue at the light)`
    pub fn summary(&self) -> String {
        let classes: Vec<String> = self
            .counts
            .non_zero()
            .map(|(class, n)| format!("{n}x {}", class.label()))
            .collect();
        let mut summary = format!("Detected {}", classes.join(", "));
        if let Some(description) = &self.description {
            summary.push_str(&format!(" ({description})"));
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Positive counts were added.
    Recorded(TrafficReport),
    /// All counts were zero; only density changed.
    DensityOnly(Density),
    /// Not a call this client understands.
    Ignored,
}

/// Applies `report_traffic` calls to the dashboard state.
#[derive(Debug, Default)]
pub struct ToolCallInterpreter;

impl ToolCallInterpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, call: &FunctionCall, stats: &mut TrafficStats, logs: &mut LogBook) -> CallOutcome {
        if call.name != REPORT_TRAFFIC {
            tracing::warn!("ignoring unknown function call {:?}", call.name);
            return CallOutcome::Ignored;
        }
        let report = TrafficReport::from_args(call.args.as_ref());
        if report.counts.is_zero() {
            stats.set_density(report.density);
            return CallOutcome::DensityOnly(report.density);
        }
        stats.record(&report.counts, report.density);
        logs.push(LogCategory::Vehicle, report.summary());
        tracing::info!("{}", report.summary());
        CallOutcome::Recorded(report)
    }

    /// Applies a batch in order and queues one acknowledgment per call.
    pub fn handle_batch(
        &self,
        calls: &[FunctionCall],
        stats: &mut TrafficStats,
        logs: &mut LogBook,
        acks: &mut PendingAcks,
    ) -> Vec<CallOutcome> {
        calls
            .iter()
            .map(|call| {
                let outcome = self.apply(call, stats, logs);
                acks.push(call);
                outcome
            })
            .collect()
    }
}

/// Acknowledgments owed to the remote side, in call order.
#[derive(Debug, Default)]
pub struct PendingAcks {
    queue: VecDeque<FunctionResponse>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: &FunctionCall) {
        self.queue
            .push_back(FunctionResponse::new(&call.id, &call.name, json!({ "result": "ok" })));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Sends one `toolResponse` per queued call. On a send failure the
    /// unsent acknowledgments stay queued.
    pub async fn flush(&mut self, session: &dyn RealtimeSession) -> anyhow::Result<usize> {
        let mut sent = 0;
        while let Some(ack) = self.queue.front() {
            session
                .send(ClientMessage::tool_response(vec![ack.clone()]))
                .await?;
            tracing::debug!("acknowledged call {}", ack.id());
            self.queue.pop_front();
            sent += 1;
        }
        Ok(sent)
    }
}
