//! Battery computer: energy storage status with drain projections.

use super::is_truthy;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use nerv_wire::{ComputerRegistry, JobError, Payload};
use serde_json::{json, Number, Value};
use std::time::Duration;

/// Game ticks per second; agent samples are per tick.
pub const TICK_RATE: f64 = 20.0;

/// Units requested when the caller names none.
pub const DEFAULT_UNITS: &str = "FE";

/// Validate the `units` query parameter.
///
/// Returns the units to request, or `None` when the caller asked for an
/// unknown unit. Known units are `j` and `fe` in any case and are passed on
/// exactly as given.
pub fn resolve_units(units: Option<&str>) -> Option<&str> {
    match units {
        None | Some("") => Some(DEFAULT_UNITS),
        Some(u) if u.eq_ignore_ascii_case("j") || u.eq_ignore_ascii_case("fe") => Some(u),
        Some(_) => None,
    }
}

/// Outcome of asking the battery computer to drop its samples.
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// The computer acknowledged with a truthy `ok`.
    Flushed,
    /// Any other answer, as sent.
    Declined(Payload),
}

/// Client for the computer labelled `Battery`.
#[derive(Debug, Clone)]
pub struct Battery {
    registry: ComputerRegistry,
    timeout: Duration,
}

impl Battery {
    pub const LABEL: &'static str = "Battery";

    pub fn new(registry: ComputerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Fetch the current status and add the derived net/drain fields.
    ///
    /// Fields are derived even when the computer reports an `error`, so a
    /// passed-through failure carries them too.
    pub async fn status(&self, units: &str) -> Result<Payload, JobError> {
        let mut payload = Payload::new();
        payload.insert("units".to_string(), json!(units));
        let mut status = self
            .registry
            .run_job(Self::LABEL, "getStatus", payload, self.timeout)
            .await?;
        derive_status(&mut status, Utc::now());
        Ok(status)
    }

    /// Ask the computer to discard its input/output samples.
    pub async fn flush_samples(&self) -> Result<Flush, JobError> {
        let result = self
            .registry
            .run_job(Self::LABEL, "flushSamples", Payload::new(), self.timeout)
            .await?;
        if result.get("ok").is_some_and(is_truthy) {
            Ok(Flush::Flushed)
        } else {
            Ok(Flush::Declined(result))
        }
    }
}

/// Add `lastNet`, `avgNet`, `timeToEmpty` and `emptyTime` to a raw status.
///
/// Missing samples count as zero for the net values. Any projection that is
/// not a finite number of seconds is `null`.
pub fn derive_status(status: &mut Payload, now: DateTime<Utc>) {
    let energy = field(status, "energy");
    let last_input = field(status, "lastInput");
    let last_output = field(status, "lastOutput");
    let avg_input = field(status, "avgInput");
    let avg_output = field(status, "avgOutput");

    let last_net = last_input.unwrap_or(0.0) - last_output.unwrap_or(0.0);
    let avg_net = if avg_input.is_none() && avg_output.is_none() {
        None
    } else {
        Some(avg_input.unwrap_or(0.0) - avg_output.unwrap_or(0.0))
    };

    let projections = [
        ("last", drain_secs(energy, Some(last_net))),
        ("avg", drain_secs(energy, avg_net)),
        ("worst", loss_secs(energy, avg_output)),
        ("lastWorst", loss_secs(energy, last_output)),
    ];

    let mut time_to_empty = Payload::new();
    let mut empty_time = Payload::new();
    for (key, secs) in projections {
        time_to_empty.insert(key.to_string(), secs.map_or(Value::Null, number));
        empty_time.insert(
            key.to_string(),
            secs.and_then(|s| timestamp_after(now, s))
                .map_or(Value::Null, Value::String),
        );
    }

    status.insert("lastNet".to_string(), number(last_net));
    status.insert("avgNet".to_string(), avg_net.map_or(Value::Null, number));
    status.insert("timeToEmpty".to_string(), Value::Object(time_to_empty));
    status.insert("emptyTime".to_string(), Value::Object(empty_time));
}

fn field(status: &Payload, key: &str) -> Option<f64> {
    status.get(key).and_then(Value::as_f64)
}

/// Seconds until empty at a per-tick net rate; only when draining.
fn drain_secs(energy: Option<f64>, net_per_tick: Option<f64>) -> Option<f64> {
    let per_second = net_per_tick.unwrap_or(0.0) * TICK_RATE;
    if per_second >= 0.0 {
        return None;
    }
    finite(energy? / per_second.abs())
}

/// Seconds until empty if output continued with no input at all.
fn loss_secs(energy: Option<f64>, output_per_tick: Option<f64>) -> Option<f64> {
    finite(energy? / (output_per_tick? * TICK_RATE))
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn timestamp_after(now: DateTime<Utc>, secs: f64) -> Option<String> {
    let millis = (secs * 1000.0).round();
    if !(i64::MIN as f64..=i64::MAX as f64).contains(&millis) {
        return None;
    }
    let at = now.checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)?;
    Some(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// JSON number, integral when the value has no fractional part.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nerv_wire::{ComputerConnection, JobCompletion, Outbound};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn status(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_resolve_units() {
        assert_eq!(resolve_units(None), Some("FE"));
        assert_eq!(resolve_units(Some("")), Some("FE"));
        assert_eq!(resolve_units(Some("j")), Some("j"));
        assert_eq!(resolve_units(Some("J")), Some("J"));
        assert_eq!(resolve_units(Some("Fe")), Some("Fe"));
        assert_eq!(resolve_units(Some("rf")), None);
        assert_eq!(resolve_units(Some("joules")), None);
    }

    #[test]
    fn test_draining_battery() {
        let mut s = status(json!({
            "energy": 1000,
            "lastInput": 10,
            "lastOutput": 15,
            "avgInput": 5,
            "avgOutput": 10
        }));
        derive_status(&mut s, now());

        assert_eq!(s["lastNet"], json!(-5));
        assert_eq!(s["avgNet"], json!(-5));
        assert_eq!(s["timeToEmpty"]["last"], json!(10));
        assert_eq!(s["timeToEmpty"]["avg"], json!(10));
        assert_eq!(s["timeToEmpty"]["worst"], json!(5));
        let last_worst = s["timeToEmpty"]["lastWorst"].as_f64().unwrap();
        assert!((last_worst - 1000.0 / 300.0).abs() < 1e-9);

        assert_eq!(s["emptyTime"]["last"], "2026-01-01T00:00:10.000Z");
        assert_eq!(s["emptyTime"]["worst"], "2026-01-01T00:00:05.000Z");
        assert_eq!(s["emptyTime"]["lastWorst"], "2026-01-01T00:00:03.333Z");
        // Raw fields survive.
        assert_eq!(s["energy"], json!(1000));
    }

    #[test]
    fn test_charging_battery_without_averages() {
        let mut s = status(json!({"energy": 500, "lastInput": 20, "lastOutput": 5}));
        derive_status(&mut s, now());

        assert_eq!(s["lastNet"], json!(15));
        assert_eq!(s["avgNet"], Value::Null);
        assert_eq!(s["timeToEmpty"]["last"], Value::Null);
        assert_eq!(s["timeToEmpty"]["avg"], Value::Null);
        assert_eq!(s["timeToEmpty"]["worst"], Value::Null);
        assert_eq!(s["timeToEmpty"]["lastWorst"], json!(5));
        assert_eq!(s["emptyTime"]["last"], Value::Null);
        assert_eq!(s["emptyTime"]["lastWorst"], "2026-01-01T00:00:05.000Z");
    }

    #[test]
    fn test_idle_battery_has_no_projections() {
        let mut s = status(json!({"energy": 500, "lastInput": 0, "lastOutput": 0, "avgOutput": 0}));
        derive_status(&mut s, now());

        assert_eq!(s["lastNet"], json!(0));
        assert_eq!(s["avgNet"], json!(0));
        for key in ["last", "avg", "worst", "lastWorst"] {
            assert_eq!(s["timeToEmpty"][key], Value::Null, "timeToEmpty.{key}");
            assert_eq!(s["emptyTime"][key], Value::Null, "emptyTime.{key}");
        }
    }

    #[test]
    fn test_only_one_average_present() {
        let mut s = status(json!({"energy": 100, "avgOutput": 1}));
        derive_status(&mut s, now());

        assert_eq!(s["lastNet"], json!(0));
        assert_eq!(s["avgNet"], json!(-1));
        assert_eq!(s["timeToEmpty"]["avg"], json!(5));
        assert_eq!(s["timeToEmpty"]["worst"], json!(5));
        assert_eq!(s["timeToEmpty"]["lastWorst"], Value::Null);
    }

    #[test]
    fn test_missing_energy_yields_null_projections() {
        let mut s = status(json!({"lastInput": 0, "lastOutput": 3, "avgOutput": 3}));
        derive_status(&mut s, now());

        assert_eq!(s["lastNet"], json!(-3));
        assert_eq!(s["timeToEmpty"]["last"], Value::Null);
        assert_eq!(s["timeToEmpty"]["worst"], Value::Null);
        assert_eq!(s["emptyTime"]["last"], Value::Null);
    }

    #[test]
    fn test_fractional_net() {
        let mut s = status(json!({"energy": 10, "lastInput": 0.5, "lastOutput": 0.75}));
        derive_status(&mut s, now());
        assert_eq!(s["lastNet"], json!(-0.25));
        assert_eq!(s["timeToEmpty"]["last"], json!(2));
    }

    async fn answer_next_job(
        conn: &ComputerConnection,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>,
        result: Value,
    ) -> Value {
        let job: Value = match rx.recv().await {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected runJob, got {other:?}"),
        };
        assert!(conn.jobs().finish_job(JobCompletion {
            job_id: job["jobId"].as_str().map(str::to_owned),
            payload: status(result),
        }));
        job
    }

    #[tokio::test]
    async fn test_flush_samples() {
        let registry = ComputerRegistry::new();
        let (conn, mut rx) = ComputerConnection::new("127.0.0.1:5555".parse().unwrap());
        registry.register(Battery::LABEL, Arc::clone(&conn));
        let battery = Battery::new(registry, Duration::from_secs(2));

        let request = tokio::spawn({
            let battery = battery.clone();
            async move { battery.flush_samples().await }
        });
        let job = answer_next_job(&conn, &mut rx, json!({"ok": true})).await;
        assert_eq!(job["jobType"], "flushSamples");
        assert_eq!(request.await.unwrap().unwrap(), Flush::Flushed);

        let request = tokio::spawn(async move { battery.flush_samples().await });
        answer_next_job(&conn, &mut rx, json!({"ok": false, "reason": "busy"})).await;
        assert_eq!(
            request.await.unwrap().unwrap(),
            Flush::Declined(status(json!({"ok": false, "reason": "busy"})))
        );
    }

    #[tokio::test]
    async fn test_status_derives_fields_when_computer_reports_error() {
        let registry = ComputerRegistry::new();
        let (conn, mut rx) = ComputerConnection::new("127.0.0.1:5555".parse().unwrap());
        registry.register(Battery::LABEL, Arc::clone(&conn));
        let battery = Battery::new(registry, Duration::from_secs(2));

        let request = tokio::spawn(async move { battery.status("FE").await });
        answer_next_job(
            &conn,
            &mut rx,
            json!({"error": "Cell offline", "energy": 100, "lastOutput": 1}),
        )
        .await;

        let result = request.await.unwrap().unwrap();
        assert_eq!(result["error"], "Cell offline");
        assert_eq!(result["lastNet"], json!(-1));
        assert_eq!(result["timeToEmpty"]["last"], json!(5));
    }
}
