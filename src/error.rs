//! Error types for the SOAP RPC client.

use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// SOAP RPC client errors.
#[derive(Error, Debug)]
pub enum SoapError {
    /// A type or operation is missing from the service schema.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Local input does not match the schema. Never sent over the wire.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Field '{field}' is not in type '{type_name}'")]
    UnknownField { field: String, type_name: String },

    #[error("{operation}() takes exactly {expected} argument(s). ({given} given)")]
    Arity {
        operation: String,
        expected: usize,
        given: usize,
    },

    /// Credential refresh needs an out-of-band challenge answer.
    #[error("Captcha challenge, token '{token}', url '{url}'")]
    AuthChallenge { token: String, url: String },

    #[error("Authentication error: {0}")]
    AuthToken(String),

    #[error("{0}")]
    RemoteFault(Box<ApiFault>),

    /// The request/response handshake did not complete.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Local(String),

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Malformed transcript: {0}")]
    MalformedTranscript(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SoapError>;

impl SoapError {
    /// Errors raised before any network activity.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Schema(_)
                | Self::SchemaViolation(_)
                | Self::UnknownField { .. }
                | Self::Arity { .. }
                | Self::Local(_)
                | Self::Config(_)
        )
    }

    /// The structured remote fault, if this is one.
    pub fn fault(&self) -> Option<&ApiFault> {
        match self {
            Self::RemoteFault(fault) => Some(fault),
            _ => None,
        }
    }

    pub(crate) fn violation(message: impl Into<String>) -> Self {
        Self::SchemaViolation(message.into())
    }
}

/// Category of a remote fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCategory {
    /// Malformed or invalid request
    Request,
    /// Failure inside the remote service (quota, database, internal)
    InternalService,
    /// Account state prevents the call
    Account,
    /// Webpage / landing page problems
    Webpage,
    Billing,
    Authentication,
    /// No table entry for the fault identifier
    Unclassified,
}

impl FaultCategory {
    /// Get the string code for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "REQUEST_ERROR",
            Self::InternalService => "INTERNAL_SERVICE_ERROR",
            Self::Account => "ACCOUNT_ERROR",
            Self::Webpage => "WEBPAGE_ERROR",
            Self::Billing => "BILLING_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Unclassified => "UNCLASSIFIED_ERROR",
        }
    }

    /// Look up the category for a normalized fault identifier.
    ///
    /// Numeric legacy codes and error type names share one table; numeric
    /// identifiers are matched as their decimal string.
    pub fn classify(key: &str) -> Self {
        let key = key.trim();
        if let Ok(code) = key.parse::<u32>() {
            return Self::classify_code(code);
        }
        match key {
            "AdError" | "AdExtensionError" | "AdExtensionOverrideError" | "AdGroupAdError"
            | "AdGroupCriterionError" | "AdGroupServiceError" | "AdParamError"
            | "AdParamPolicyError" | "AlertError" | "ApiError" | "ApiUsageError"
            | "AudioError" | "BidLandscapeServiceError" | "BiddingError"
            | "BiddingTransitionError" | "BudgetError" | "BulkMutateJobError"
            | "CampaignAdExtensionError" | "CampaignCriterionError" | "CampaignError"
            | "CollectionSizeError" | "ConversionTrackingError" | "CriterionError"
            | "CriterionPolicyError" | "CurrencyCodeError" | "CustomerSyncError"
            | "DataError" | "DateError" | "DistinctError" | "ExperimentServiceError"
            | "GeoLocationError" | "IdError" | "ImageError" | "JobError"
            | "MatchesRegexError" | "MediaError" | "NewEntityCreationError"
            | "NotEmptyError" | "NullError" | "OperatorError" | "OpportunityError"
            | "PagingError" | "PolicyViolationError" | "RangeError" | "ReadOnlyError"
            | "RegionCodeError" | "RejectedError" | "ReportDefinitionError"
            | "RequestError" | "RequiredError" | "SelectorError"
            | "ServicedAccountError" | "SettingError" | "SizeLimitError"
            | "StatsQueryError" | "StringLengthError" | "TargetError"
            | "TargetingIdeaError" | "TrafficEstimatorError" | "UserListError"
            | "VideoError" => Self::Request,
            "InternalApiError" | "DatabaseError" | "QuotaCheckError" | "QuotaError"
            | "QuotaExceededError" | "RateExceededError" => Self::InternalService,
            "ClientTermsError" | "NotWhitelistedError" => Self::Account,
            "AuthenticationError" | "AuthorizationError" => Self::Authentication,
            _ => Self::Unclassified,
        }
    }

    fn classify_code(code: u32) -> Self {
        match code {
            1..=10 | 12..=17 | 19..=49 | 51 | 54 | 57..=59 | 61..=63 | 70..=83 | 87..=94
            | 96 | 97 | 99 | 112 | 115 | 116 | 120..=125 | 127 | 128 | 131 | 133 | 134
            | 137 | 138 | 140..=142 | 144..=147 | 149 | 153 | 156..=158 | 170..=174
            | 176 | 177 | 186 | 188 | 190 | 206 | 207 => Self::Request,
            0 | 18 | 55 | 60 | 95 | 98 | 117 | 143 | 155 => Self::InternalService,
            84..=86 | 111 | 119 | 129 | 139 | 162..=165 | 183 | 189 => Self::Account,
            100..=105 => Self::Webpage,
            50 | 52 | 53 | 106 | 107 | 109 | 110 | 114 | 118 | 130 | 132 => Self::Billing,
            166 | 184 => Self::Authentication,
            _ => Self::Unclassified,
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a fault's `errors` list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiErrorDetail {
    /// Normalized error type (from `*.Type` elements)
    pub error_type: Option<String>,
    /// Path to the offending request field
    pub field_path: Option<String>,
    /// Value that triggered the error
    pub trigger: Option<String>,
    pub reason: Option<String>,
    /// Every field of the error record, as parsed
    pub fields: IndexMap<String, Value>,
}

impl ApiErrorDetail {
    fn from_value(value: &Value) -> Self {
        let fields = value.as_record().cloned().unwrap_or_default();
        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(String::from);
        Self {
            error_type: text("type"),
            field_path: text("fieldPath"),
            trigger: text("trigger"),
            reason: text("reason"),
            fields: fields.clone(),
        }
    }
}

/// A structured remote fault, built from the normalized fault record.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFault {
    pub category: FaultCategory,
    pub fault_code: String,
    pub fault_string: String,
    /// Detail message, falling back to the fault string
    pub message: String,
    /// Legacy numeric code, when the fault carries one
    pub code: Option<i64>,
    pub trigger: Option<String>,
    pub errors: Vec<ApiErrorDetail>,
    /// The normalized fault record
    pub raw: Value,
}

impl ApiFault {
    /// Build a fault from a normalized fault record and classify it.
    ///
    /// The category comes from `detail.code` when present, otherwise from
    /// the type of the first entry in `detail.errors`.
    pub fn from_record(raw: Value) -> Self {
        let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or("").to_string();
        let fault_code = text(raw.get("faultcode"));
        let fault_string = text(raw.get("faultstring"));

        let detail = raw.get("detail").filter(|d| !d.is_empty());
        let code = detail
            .and_then(|d| d.get("code"))
            .and_then(Value::as_str)
            .and_then(|c| c.trim().parse::<i64>().ok());
        let trigger = detail
            .and_then(|d| d.get("trigger"))
            .and_then(Value::as_str)
            .map(String::from);
        let mut message = text(detail.and_then(|d| d.get("message")));
        if message.is_empty() {
            message = fault_string.clone();
        }

        let errors = match detail {
            Some(d) => match d.get("errors") {
                Some(Value::List(items)) => items.iter().map(ApiErrorDetail::from_value).collect(),
                Some(single @ Value::Record(_)) => vec![ApiErrorDetail::from_value(single)],
                Some(_) => Vec::new(),
                None => vec![ApiErrorDetail::from_value(d)],
            },
            None => vec![ApiErrorDetail::default()],
        };

        let category = match (code, errors.first().and_then(|e| e.error_type.as_deref())) {
            (Some(code), _) => FaultCategory::classify(&code.to_string()),
            (None, Some(error_type)) => FaultCategory::classify(error_type),
            (None, None) => FaultCategory::Unclassified,
        };

        Self {
            category,
            fault_code,
            fault_string,
            message,
            code,
            trigger,
            errors,
            raw,
        }
    }
}

impl fmt::Display for ApiFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.as_str(), self.message)
    }
}
