//! Typed payloads and responses for the commonly used transitions.
//!
//! Transitions not covered here can be sent with any serializable payload
//! (e.g. a `serde_json::Value`) through the same client methods.

use serde::{Deserialize, Serialize};

/// Body of every `assign` transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPayload {
  pub assignee_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note: Option<String>,
}

/// `leads/{id}/convert`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertLeadPayload {
  /// Create a customer account from the lead's company
  pub create_customer: bool,
  /// Open a deal (opportunity) for the converted lead
  pub create_deal: bool,
  #[serde(default)]
  pub deal_name: Option<String>,
  #[serde(default)]
  pub deal_value: Option<f64>,
  /// Attach to an existing customer instead of creating one
  #[serde(default)]
  pub existing_customer_id: Option<String>,
}

/// Identifiers of everything a lead conversion produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertLeadResult {
  pub lead_id: String,
  #[serde(default)]
  pub customer_id: Option<String>,
  #[serde(default)]
  pub contact_id: Option<String>,
  #[serde(default)]
  pub deal_id: Option<String>,
}

/// `deals/{id}/win`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinDealPayload {
  #[serde(default)]
  pub actual_value: Option<f64>,
  #[serde(default)]
  pub won_reason: Option<String>,
}

/// `deals/{id}/lose`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoseDealPayload {
  pub lost_reason: String,
  #[serde(default)]
  pub competitor: Option<String>,
}

/// `deals/{id}/stage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStagePayload {
  pub stage: String,
}

/// `tickets/{id}/escalate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateTicketPayload {
  pub reason: String,
  #[serde(default)]
  pub escalate_to_id: Option<String>,
}

/// `tickets/{id}/resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveTicketPayload {
  pub resolution: String,
}
