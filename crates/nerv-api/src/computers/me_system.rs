//! ME storage system computer: inventory listings and status.

use nerv_wire::{ComputerRegistry, JobError, Payload};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Which slice of the inventory to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    All,
    Items,
    Fluid,
    Gas,
}

impl ListKind {
    pub fn job_type(self) -> &'static str {
        match self {
            Self::All => "list",
            Self::Items => "listItems",
            Self::Fluid => "listFluid",
            Self::Gas => "listGas",
        }
    }
}

/// Pagination parameters of a listing, as received in the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub order: Option<String>,
    pub count: Option<String>,
}

impl ListParams {
    pub const DEFAULT_PAGE: u64 = 0;
    pub const DEFAULT_ORDER: &'static str = "count-desc";
    pub const DEFAULT_COUNT: u64 = 50;

    /// Job payload; given values are passed through untouched.
    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(
            "page".to_string(),
            self.page.map_or(json!(Self::DEFAULT_PAGE), Value::String),
        );
        payload.insert(
            "order".to_string(),
            Value::String(self.order.unwrap_or_else(|| Self::DEFAULT_ORDER.to_string())),
        );
        payload.insert(
            "count".to_string(),
            self.count.map_or(json!(Self::DEFAULT_COUNT), Value::String),
        );
        payload
    }
}

/// Client for the computer labelled `MESystem`.
#[derive(Debug, Clone)]
pub struct MeSystem {
    registry: ComputerRegistry,
    timeout: Duration,
}

impl MeSystem {
    pub const LABEL: &'static str = "MESystem";

    pub fn new(registry: ComputerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn list(&self, kind: ListKind, params: ListParams) -> Result<Payload, JobError> {
        self.registry
            .run_job(Self::LABEL, kind.job_type(), params.into_payload(), self.timeout)
            .await
    }

    pub async fn status(&self) -> Result<Payload, JobError> {
        self.registry
            .run_job(Self::LABEL, "getStatus", Payload::new(), self.timeout)
            .await
    }
}
