//! Permit and equipment request models.
//!
//! Both kinds share one lifecycle (status, response text, notified flag) but
//! live in separate tables; [`Request`] is the tagged union over the two.

use serde::{Deserialize, Serialize};

/// Primary lifecycle state of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }

    /// Decode a stored status. Legacy rows carry free-form values
    /// ("pendiente", empty strings, NULL); all of them read back as pending.
    pub fn decode(s: Option<&str>) -> Self {
        s.and_then(Self::from_str).unwrap_or(RequestStatus::Pending)
    }

    /// True for the two terminal states a reviewer can set.
    pub fn is_decided(&self) -> bool {
        matches!(self, RequestStatus::Approved | RequestStatus::Rejected)
    }
}

/// Which of the two request tables a record belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Permit,
    Equipment,
}

impl RequestKind {
    /// Lookup order when resolving an id across both kinds.
    pub const RESOLUTION_ORDER: [RequestKind; 2] = [RequestKind::Permit, RequestKind::Equipment];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Permit => "permit",
            RequestKind::Equipment => "equipment",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            RequestKind::Permit => "permit_requests",
            RequestKind::Equipment => "equipment_requests",
        }
    }
}

/// Shared lifecycle view over both request kinds.
pub trait Lifecycle {
    fn id(&self) -> i64;
    fn kind(&self) -> RequestKind;
    fn requester_code(&self) -> &str;
    fn status(&self) -> RequestStatus;
    fn response_text(&self) -> Option<&str>;
    fn notified(&self) -> i64;

    fn is_notified(&self) -> bool {
        self.notified() != 0
    }
}

/// A leave/absence permit request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermitRequest {
    pub id: i64,
    pub requester_code: String,
    pub requester_name: String,
    pub phone: String,
    pub dates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub novelty_type: String,
    pub description: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Secondary approver, independent of `status`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_marker: Option<String>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub notified: i64,
    pub created_at: String,
}

/// An equipment or shift-change request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentRequest {
    pub id: i64,
    pub requester_code: String,
    pub requester_name: String,
    #[serde(rename = "type")]
    pub equipment_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(rename = "shiftCodeAM", skip_serializing_if = "Option::is_none")]
    pub shift_code_am: Option<String>,
    #[serde(rename = "shiftCodePM", skip_serializing_if = "Option::is_none")]
    pub shift_code_pm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shift: Option<String>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub notified: i64,
    pub created_at: String,
}

/// A request of either kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Request {
    Permit(PermitRequest),
    Equipment(EquipmentRequest),
}

macro_rules! impl_lifecycle {
    ($ty:ty, $kind:expr) => {
        impl Lifecycle for $ty {
            fn id(&self) -> i64 {
                self.id
            }
            fn kind(&self) -> RequestKind {
                $kind
            }
            fn requester_code(&self) -> &str {
                &self.requester_code
            }
            fn status(&self) -> RequestStatus {
                self.status
            }
            fn response_text(&self) -> Option<&str> {
                self.response_text.as_deref()
            }
            fn notified(&self) -> i64 {
                self.notified
            }
        }
    };
}

impl_lifecycle!(PermitRequest, RequestKind::Permit);
impl_lifecycle!(EquipmentRequest, RequestKind::Equipment);

impl Request {
    fn inner(&self) -> &dyn Lifecycle {
        match self {
            Request::Permit(permit) => permit,
            Request::Equipment(equipment) => equipment,
        }
    }
}

impl Lifecycle for Request {
    fn id(&self) -> i64 {
        self.inner().id()
    }
    fn kind(&self) -> RequestKind {
        self.inner().kind()
    }
    fn requester_code(&self) -> &str {
        self.inner().requester_code()
    }
    fn status(&self) -> RequestStatus {
        self.inner().status()
    }
    fn response_text(&self) -> Option<&str> {
        self.inner().response_text()
    }
    fn notified(&self) -> i64 {
        self.inner().notified()
    }
}

/// Which of a requester's requests to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterFilter {
    All,
    /// Approved or rejected only
    Decided,
    /// `notified == 0` only
    Unnotified,
}

/// Body for submitting a permit request (attachments travel separately).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermitRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub novelty_type: String,
    #[serde(default)]
    pub description: String,
}

/// Body for submitting an equipment request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEquipmentRequest {
    #[serde(rename = "type", default)]
    pub equipment_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "zona")]
    pub zone: Option<String>,
    #[serde(default, rename = "shiftCodeAM", alias = "codeAM")]
    pub shift_code_am: Option<String>,
    #[serde(default, rename = "shiftCodePM", alias = "codePM")]
    pub shift_code_pm: Option<String>,
    #[serde(default)]
    pub shift: Option<String>,
}

/// Body for a reviewer decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub status: String,
    #[serde(default, alias = "respuesta")]
    pub response_text: Option<String>,
}

/// Body for updating the notified flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdate {
    #[serde(alias = "notification_status")]
    pub notification_status: i64,
}

/// Body for setting the secondary approval marker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalUpdate {
    #[serde(alias = "approved_by")]
    pub approved_by: String,
}

/// Body for the duplicate-date check.
#[derive(Debug, Clone, Deserialize)]
pub struct DateCheckRequest {
    #[serde(default)]
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateCheckResponse {
    pub has_existing_request: bool,
}
