use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::error::AutomationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Absent,
    Unauthorized,
    Offline,
    Online,
    Other(String),
}

impl ConnectionState {
    pub fn from_adb(raw: &str) -> Self {
        match raw.trim() {
            "device" => ConnectionState::Online,
            "offline" => ConnectionState::Offline,
            "unauthorized" => ConnectionState::Unauthorized,
            "" => ConnectionState::Absent,
            other => ConnectionState::Other(other.to_string()),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceHandle {
    pub serial: String,
    pub state: ConnectionState,
    pub model: Option<String>,
    pub product: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionReport {
    pub adb_path: Option<String>,
    pub connected: bool,
    pub devices: Vec<DeviceHandle>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdbInfo {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Transfer,
    StockAdd,
    Receive,
    ChangeItemState,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Transfer => "transfer",
            OperationKind::StockAdd => "stock_add",
            OperationKind::Receive => "receive",
            OperationKind::ChangeItemState => "change_item_state",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub from_location: String,
    pub to_location: String,
    pub imei: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

impl WorkItem {
    pub fn transfer(
        from_location: impl Into<String>,
        to_location: impl Into<String>,
        imei: impl Into<String>,
    ) -> Self {
        Self {
            from_location: from_location.into(),
            to_location: to_location.into(),
            imei: imei.into(),
            product_id: None,
        }
    }

    fn trimmed(self) -> Self {
        Self {
            from_location: self.from_location.trim().to_string(),
            to_location: self.to_location.trim().to_string(),
            imei: self.imei.trim().to_string(),
            product_id: self
                .product_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub operation: OperationKind,
    pub from_location: String,
    pub to_location: String,
    pub items: Vec<WorkItem>,
}

impl Batch {
    /// One (from, to) pair for every IMEI. Blank IMEIs are dropped.
    pub fn transfer<I, S>(from_location: &str, to_location: &str, imeis: I) -> Result<Self, AutomationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let from_location = from_location.trim();
        let to_location = to_location.trim();
        if from_location.is_empty() || to_location.is_empty() {
            return Err(AutomationError::InvalidBatch(
                "from and to locations are required".to_string(),
            ));
        }
        let items = imeis
            .into_iter()
            .map(|imei| imei.as_ref().trim().to_string())
            .filter(|imei| !imei.is_empty())
            .map(|imei| WorkItem::transfer(from_location, to_location, imei))
            .collect::<Vec<_>>();
        Self::new(OperationKind::Transfer, from_location, to_location, items)
    }

    /// Identifier-only operations (stock add, receive). Locations stay empty.
    pub fn identifiers<I, S>(operation: OperationKind, identifiers: I) -> Result<Self, AutomationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let items = identifiers
            .into_iter()
            .map(|value| value.as_ref().trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| WorkItem::transfer("", "", value))
            .collect::<Vec<_>>();
        Self::new(operation, "", "", items)
    }

    pub fn change_item_state(pairs: Vec<(String, String)>) -> Result<Self, AutomationError> {
        let items = pairs
            .into_iter()
            .map(|(imei, product_id)| (imei.trim().to_string(), product_id.trim().to_string()))
            .filter(|(imei, product_id)| !imei.is_empty() && !product_id.is_empty())
            .map(|(imei, product_id)| WorkItem {
                from_location: String::new(),
                to_location: String::new(),
                imei,
                product_id: Some(product_id),
            })
            .collect::<Vec<_>>();
        Self::new(OperationKind::ChangeItemState, "", "", items)
    }

    pub fn new(
        operation: OperationKind,
        from_location: &str,
        to_location: &str,
        items: Vec<WorkItem>,
    ) -> Result<Self, AutomationError> {
        let from_location = from_location.trim();
        let to_location = to_location.trim();
        let items = items
            .into_iter()
            .map(WorkItem::trimmed)
            .filter(|item| !item.imei.is_empty())
            .collect::<Vec<_>>();
        if items.is_empty() {
            return Err(AutomationError::InvalidBatch(
                "batch has no valid items".to_string(),
            ));
        }
        if operation == OperationKind::Transfer {
            if from_location.is_empty() || to_location.is_empty() {
                return Err(AutomationError::InvalidBatch(
                    "transfer batches need from and to locations".to_string(),
                ));
            }
            if let Some(stray) = items
                .iter()
                .find(|item| item.from_location != from_location || item.to_location != to_location)
            {
                return Err(AutomationError::InvalidBatch(format!(
                    "{} is for {} -> {}, not {from_location} -> {to_location}",
                    stray.imei, stray.from_location, stray.to_location
                )));
            }
        }
        if operation == OperationKind::ChangeItemState
            && items.iter().any(|item| item.product_id.is_none())
        {
            return Err(AutomationError::InvalidBatch(
                "change item state needs a product id for every item".to_string(),
            ));
        }
        Ok(Self {
            operation,
            from_location: from_location.to_string(),
            to_location: to_location.to_string(),
            items,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
    Aborted,
}

impl BatchStatus {
    pub fn label(self) -> &'static str {
        match self {
            BatchStatus::Idle => "idle",
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::Stopping => "stopping",
            BatchStatus::Completed => "completed",
            BatchStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Aborted)
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            BatchStatus::Running | BatchStatus::Paused | BatchStatus::Stopping
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedItem {
    pub item: WorkItem,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    StopRequested,
    DeviceLost(String),
    Fatal(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSnapshot {
    pub run_id: Option<String>,
    pub operation: Option<OperationKind>,
    pub status: BatchStatus,
    pub current_index: usize,
    pub total: usize,
    pub succeeded_count: usize,
    pub failed_items: Vec<FailedItem>,
    pub current_item: Option<WorkItem>,
    pub message: String,
    pub abort_reason: Option<AbortReason>,
    pub teardown_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Default for BatchSnapshot {
    fn default() -> Self {
        Self {
            run_id: None,
            operation: None,
            status: BatchStatus::Idle,
            current_index: 0,
            total: 0,
            succeeded_count: 0,
            failed_items: Vec::new(),
            current_item: None,
            message: String::new(),
            abort_reason: None,
            teardown_error: None,
            started_at: None,
            finished_at: None,
            version: 0,
        }
    }
}

impl BatchSnapshot {
    /// One-line outcome for the control surface.
    pub fn summary(&self) -> String {
        match (&self.status, &self.abort_reason) {
            (BatchStatus::Completed, _) => format!(
                "completed {}/{} ({} failed)",
                self.succeeded_count,
                self.total,
                self.failed_items.len()
            ),
            (BatchStatus::Aborted, Some(AbortReason::StopRequested)) => format!(
                "stopped after {}/{}",
                self.current_index, self.total
            ),
            (BatchStatus::Aborted, Some(AbortReason::DeviceLost(detail))) => format!(
                "aborted after {}/{}: device lost ({detail})",
                self.current_index, self.total
            ),
            (BatchStatus::Aborted, Some(AbortReason::Fatal(detail))) => format!(
                "aborted after {}/{}: {detail}",
                self.current_index, self.total
            ),
            (status, _) => format!("{} {}/{}", status.label(), self.current_index, self.total),
        }
    }
}
